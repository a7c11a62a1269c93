// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    engine::{segment::Segment, sequence_number::SeqNumber, Completion},
    runtime::fail::Fail,
};
use ::std::{collections::VecDeque, time::Instant};

//======================================================================================================================
// Structures
//======================================================================================================================

// One sent-but-unacknowledged segment.
pub struct UnackedSegment {
    segment: Segment,
    // When the segment was first handed to the network.  Cleared on retransmission so that an
    // ambiguous acknowledgment never feeds the round-trip estimator (Karn's algorithm).
    initial_tx: Option<Instant>,
    completions: Vec<Completion>,
}

/// Ordered record of outbound segments awaiting acknowledgment.  Bookkeeping is per segment: an
/// entry leaves the queue only once the cumulative acknowledgment covers its last sequence number.
pub struct RetransmissionQueue {
    queue: VecDeque<UnackedSegment>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl RetransmissionQueue {
    pub fn new() -> Self {
        Self { queue: VecDeque::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Records a segment that was just handed to the network, along with the completions that fire
    /// once it is fully acknowledged.
    pub fn add(&mut self, segment: Segment, now: Instant, completions: Vec<Completion>) {
        self.queue.push_back(UnackedSegment {
            segment,
            initial_tx: Some(now),
            completions,
        });
    }

    /// Drops every entry whose segment is entirely covered by the cumulative acknowledgment `ack`,
    /// firing its completions.  Returns whether anything was removed; the caller restarts or
    /// cancels the retransmission timer accordingly.
    pub fn remove_acknowledged(&mut self, ack: SeqNumber) -> bool {
        let mut removed_any: bool = false;
        while let Some(entry) = self.queue.front() {
            if entry.segment.end_seq() > ack {
                break;
            }
            match self.queue.pop_front() {
                Some(entry) => {
                    for completion in entry.completions {
                        completion(Ok(()));
                    }
                    removed_any = true;
                },
                None => break,
            }
        }
        removed_any
    }

    /// A copy of the earliest unacknowledged segment, for re-sending.  The stored original keeps
    /// its payload but loses its round-trip eligibility; the caller refreshes the copy's
    /// acknowledgment fields and options before transmitting it.
    pub fn retransmission_segment(&mut self) -> Option<Segment> {
        let entry: &mut UnackedSegment = self.queue.front_mut()?;
        entry.initial_tx = None;
        Some(entry.segment.clone())
    }

    /// When the earliest unacknowledged segment was first sent, unless it has been retransmitted.
    /// This drives round-trip measurement when the timestamps option is off.
    pub fn first_segment_sent_time(&self) -> Option<Instant> {
        self.queue.front()?.initial_tx
    }

    /// Releases every entry, failing its completions with `cause`.  Used on teardown.
    pub fn fail_all(&mut self, cause: &Fail) {
        while let Some(entry) = self.queue.pop_front() {
            for completion in entry.completions {
                completion(Err(cause.clone()));
            }
        }
    }

    /// Releases every entry without failing completions.  Used when falling back to LISTEN, where
    /// the user need not be informed.
    pub fn release(&mut self) {
        self.queue.clear();
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for RetransmissionQueue {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
