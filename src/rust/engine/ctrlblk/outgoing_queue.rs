// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{engine::segment::Segment, runtime::transport::SegmentTransport};
use ::std::collections::VecDeque;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Staging queue for segments produced within one processing turn.  Flushing coalesces redundant
/// pure acknowledgments (a later segment acknowledging at least as much supersedes them, which is
/// also how acknowledgments get piggybacked onto data) and stamps the advertised window last, so
/// every transmitted segment reflects the window as of the moment it leaves the engine.  The
/// relative order of data-bearing segments is preserved.
pub struct OutgoingSegmentQueue {
    queue: VecDeque<Segment>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl OutgoingSegmentQueue {
    pub fn new() -> Self {
        Self { queue: VecDeque::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn place(&mut self, segment: Segment) {
        self.queue.push_back(segment);
    }

    /// Coalesces and hands everything to the transport.  Returns the highest acknowledgment number
    /// that went out, so the caller can update its `Last.ACK.sent` bookkeeping.
    pub fn flush<T: SegmentTransport>(&mut self, transport: &mut T, window: u32) -> Option<u32> {
        if self.queue.is_empty() {
            return None;
        }

        // Drop a pure ACK when any later segment also carries an acknowledgment: within one turn
        // acknowledgment numbers only move forward, so the later segment supersedes it.
        let mut index: usize = 0;
        while index < self.queue.len() {
            let superseded: bool = self.queue[index].is_pure_ack()
                && self.queue.iter().skip(index + 1).any(|later| later.ack && !later.rst);
            if superseded {
                self.queue.remove(index);
            } else {
                index += 1;
            }
        }

        let mut last_ack_sent: Option<u32> = None;
        while let Some(mut segment) = self.queue.pop_front() {
            segment.window_size = window;
            if segment.ack {
                last_ack_sent = Some(segment.ack_num.into());
            }
            debug!(
                "sending {} bytes, seq={}, ack={}, wnd={}",
                segment.payload.len(),
                segment.seq_num,
                segment.ack_num,
                segment.window_size
            );
            transport.transmit(segment);
        }
        transport.flush();
        last_ack_sent
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for OutgoingSegmentQueue {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
