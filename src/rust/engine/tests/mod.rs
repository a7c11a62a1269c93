// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod flow_control;
pub mod handshake;
pub mod setup;

use crate::{
    engine::{segment::Segment, sequence_number::SeqNumber, Completion},
    runtime::{fail::Fail, transport::SegmentTransport},
};
use ::std::{cell::RefCell, collections::VecDeque, rc::Rc};

//=============================================================================

/// Transport double that records every segment the engine hands over, so tests can pop frames off
/// one side of the "wire" and feed them to the other.
pub struct TestTransport {
    frames: VecDeque<Segment>,
    flushes: usize,
}

impl TestTransport {
    pub fn new() -> Self {
        Self {
            frames: VecDeque::new(),
            flushes: 0,
        }
    }

    /// Pops the next transmitted frame.  Panics if nothing was transmitted.
    pub fn pop_frame(&mut self) -> Segment {
        self.frames.pop_front().expect("no frame was transmitted")
    }

    pub fn pop_frame_unchecked(&mut self) -> Option<Segment> {
        self.frames.pop_front()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }
}

impl SegmentTransport for TestTransport {
    fn transmit(&mut self, segment: Segment) {
        self.frames.push_back(segment);
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }
}

//=============================================================================

/// Checks for a data segment.
pub fn check_segment_data(segment: &Segment, seq_num: SeqNumber, ack_num: Option<SeqNumber>) -> usize {
    assert_ne!(segment.payload.len(), 0);
    assert!(!segment.syn && !segment.rst && !segment.fin);
    assert_eq!(segment.seq_num, seq_num);
    if let Some(ack_num) = ack_num {
        assert!(segment.ack);
        assert_eq!(segment.ack_num, ack_num);
    }

    segment.payload.len()
}

//=============================================================================

/// Checks for a pure ACK segment.
pub fn check_segment_pure_ack(segment: &Segment, ack_num: SeqNumber) {
    assert!(segment.is_pure_ack());
    assert_eq!(segment.ack_num, ack_num);
}

//=============================================================================

/// Cooks a buffer.
pub fn cook_buffer(size: usize, stamp: Option<u8>) -> Vec<u8> {
    (0..size).map(|i| stamp.unwrap_or(i as u8)).collect()
}

//=============================================================================

/// A completion that records the result it resolved with, so a test can check whether (and how)
/// it fired.
pub fn recording_completion() -> (Completion, Rc<RefCell<Option<Result<(), Fail>>>>) {
    let slot: Rc<RefCell<Option<Result<(), Fail>>>> = Rc::new(RefCell::new(None));
    let clone: Rc<RefCell<Option<Result<(), Fail>>>> = slot.clone();
    (Box::new(move |result| *clone.borrow_mut() = Some(result)), slot)
}

/// A completion for calls whose outcome the test does not care about.
pub fn noop_completion() -> Completion {
    Box::new(|_| ())
}
