// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The connection engine: an RFC 9293-shaped reliability layer that turns an unreliable, unordered
//! message transport into an ordered byte stream with flow and congestion control.

pub mod config;
pub mod connection;
pub mod constants;
pub mod ctrlblk;
pub mod isn_generator;
pub mod segment;
pub mod sequence_number;

#[cfg(test)]
mod tests;

use crate::runtime::fail::Fail;

pub use self::sequence_number::SeqNumber;

/// Completion callback for a user SEND or CLOSE call.  Fires exactly once: with `Ok` once the
/// operation's effect has been acknowledged by the peer, or with a typed failure if the connection
/// is torn down first.
pub type Completion = Box<dyn FnOnce(Result<(), Fail>)>;
