// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::time::Instant;

//======================================================================================================================
// Constants
//======================================================================================================================

const NUM_TIMER_KINDS: usize = 5;

//======================================================================================================================
// Structures
//======================================================================================================================

/// The timers a connection may have pending.  At most one timer of each kind is armed at any time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimerKind {
    /// Bounds the time a handshake or unacknowledged data may remain outstanding.
    User,
    /// Fires when the oldest unacknowledged segment must be retransmitted.
    Retransmission,
    /// The 2*MSL linger after an active close.
    TimeWait,
    /// Probes a peer that advertised a zero window.
    ZeroWindowProbe,
    /// Forces transmission of data held back by the silly-window-syndrome avoidance test.
    NagleOverride,
}

/// Deadline store for a connection's timers.  The engine arms and cancels deadlines; the host polls
/// for expiry with its own notion of "now" and re-enters the engine for each fired timer, so all
/// timer callbacks stay serialized with segment arrival and user calls.
pub struct TimerSet {
    deadlines: [Option<Instant>; NUM_TIMER_KINDS],
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl TimerKind {
    fn index(self) -> usize {
        match self {
            TimerKind::User => 0,
            TimerKind::Retransmission => 1,
            TimerKind::TimeWait => 2,
            TimerKind::ZeroWindowProbe => 3,
            TimerKind::NagleOverride => 4,
        }
    }

    fn from_index(index: usize) -> TimerKind {
        match index {
            0 => TimerKind::User,
            1 => TimerKind::Retransmission,
            2 => TimerKind::TimeWait,
            3 => TimerKind::ZeroWindowProbe,
            _ => TimerKind::NagleOverride,
        }
    }
}

impl TimerSet {
    pub fn new() -> Self {
        Self {
            deadlines: [None; NUM_TIMER_KINDS],
        }
    }

    /// Arms (or re-arms) the timer of the given kind.  An already-armed timer of the same kind is
    /// replaced, so each kind has at most one pending deadline.
    pub fn arm(&mut self, kind: TimerKind, deadline: Instant) {
        self.deadlines[kind.index()] = Some(deadline);
    }

    /// Cancels the timer of the given kind.  Cancelling an unarmed timer is a no-op.
    pub fn cancel(&mut self, kind: TimerKind) {
        self.deadlines[kind.index()] = None;
    }

    /// Cancels every pending timer.  Used on transition to the closed state.
    pub fn cancel_all(&mut self) {
        self.deadlines = [None; NUM_TIMER_KINDS];
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadlines[kind.index()].is_some()
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<Instant> {
        self.deadlines[kind.index()]
    }

    /// Removes and returns the expired timer with the earliest deadline, if any.  Callers drain
    /// expirations by invoking this repeatedly until it returns `None`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<TimerKind> {
        let mut earliest: Option<(usize, Instant)> = None;
        for (index, deadline) in self.deadlines.iter().enumerate() {
            if let Some(deadline) = deadline {
                if *deadline <= now {
                    match earliest {
                        Some((_, other)) if other <= *deadline => (),
                        _ => earliest = Some((index, *deadline)),
                    }
                }
            }
        }
        let (index, _): (usize, Instant) = earliest?;
        self.deadlines[index] = None;
        Some(TimerKind::from_index(index))
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for TimerSet {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
