// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::engine::segment::Segment;

//======================================================================================================================
// Traits
//======================================================================================================================

/// Interface to the unreliable message transport underneath the engine.  The transport may delay,
/// drop, duplicate, or reorder segments; the engine's whole job is to cope with that.
///
/// `transmit` hands over one segment; `flush` marks the end of a processing turn, allowing a
/// batching transport to push accumulated segments to the wire.  The byte layout of a segment on
/// the wire is the transport's business, not the engine's.
pub trait SegmentTransport {
    fn transmit(&mut self, segment: Segment);
    fn flush(&mut self);
}
