// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::libc::{c_int, ECONNREFUSED, ECONNRESET, EEXIST, EINVAL, ENOTCONN, ESHUTDOWN, ETIMEDOUT};
use ::std::{error, fmt};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Failure
#[derive(Clone)]
pub struct Fail {
    /// Error code.
    pub errno: c_int,
    /// Cause.
    pub cause: String,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Fail {
    /// Creates a new failure.
    pub fn new(errno: c_int, cause: &str) -> Self {
        Self {
            errno,
            cause: cause.to_string(),
        }
    }

    /// An operation was attempted on a connection that has no control block.
    pub fn connection_does_not_exist() -> Self {
        Self::new(ENOTCONN, "connection does not exist")
    }

    /// OPEN was called on a connection that is not closed.
    pub fn connection_already_exists() -> Self {
        Self::new(EEXIST, "connection already exists")
    }

    /// The remote peer answered our connection request with a reset.
    pub fn connection_refused() -> Self {
        Self::new(ECONNREFUSED, "connection refused")
    }

    /// The remote peer reset a synchronized connection.
    pub fn connection_reset() -> Self {
        Self::new(ECONNRESET, "connection reset")
    }

    /// The operation was rejected because the connection is shutting down.
    pub fn connection_closing() -> Self {
        Self::new(ESHUTDOWN, "connection closing")
    }

    /// No progress was made within the configured user timeout.
    pub fn user_timeout_expired() -> Self {
        Self::new(ETIMEDOUT, "connection aborted due to user timeout")
    }

    /// The payload handed to the send path cannot be transmitted.
    pub fn unsupported_message() -> Self {
        Self::new(EINVAL, "unsupported message")
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Display for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?}: {:?}", self.errno, self.cause)
    }
}

impl fmt::Debug for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?}: {:?}", self.errno, self.cause)
    }
}

impl error::Error for Fail {}
