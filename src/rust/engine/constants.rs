// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use ::std::time::Duration;

/// Maximum segment size assumed for a peer that did not send an MSS option (RFC 9293 default).
pub const FALLBACK_MSS: usize = 536;

/// Minimum acceptable maximum segment size.
pub const MIN_MSS: usize = FALLBACK_MSS;

/// Maximum acceptable maximum segment size.
pub const MAX_MSS: usize = 9216;

/// Default maximum segment size advertised to the peer.
pub const DEFAULT_MSS: usize = 1450;

/// Maximum segment lifetime.  RFC 9293 arbitrarily defines two minutes, which would stall every
/// close for four minutes in TIME-WAIT.  Since this engine pairs exactly one connection with one
/// peer, late segments of a previous incarnation are far less of a hazard, and a much shorter
/// lifetime keeps teardown snappy.
pub const MSL: Duration = Duration::from_secs(2);

/// Default capacity of the receive (reassembly) buffer in bytes.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: u32 = 65_535;
