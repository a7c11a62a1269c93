// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// Congestion control state and window arithmetic: slow start and congestion avoidance (RFC 5681),
// fast retransmit/fast recovery in both the Reno (RFC 5681) and NewReno (RFC 6582) variants, and
// limited transmit (RFC 3042).  This module owns the window variables and their mutations; the
// decisions that need queue or timer access (classifying duplicate ACKs, actually retransmitting)
// live in the connection engine.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::engine::sequence_number::SeqNumber;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Number of duplicate ACKs that triggers fast retransmit.
pub const DUP_ACK_THRESHOLD: u32 = 3;

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Debug)]
pub struct CongestionControl {
    // Sender maximum segment size, in bytes.
    smss: u32,

    // Congestion window: an upper bound on the number of bytes in flight.
    cwnd: u32,

    // Slow start threshold: below it we slow start, at or above it we do congestion avoidance.
    ssthresh: u32,

    // Consecutive duplicate ACKs observed; three or more means fast recovery is in progress.
    duplicate_acks: u32,

    // NewReno: duplicate ACKs at or below this sequence number do not re-enter fast retransmit.
    recover: SeqNumber,

    // The initial send sequence number, the baseline `recover` is re-primed to outside recovery.
    recover_baseline: SeqNumber,

    // The window the peer advertised on the last acceptable ACK.
    last_advertised_window: u32,

    new_reno: bool,
    limited_transmit: bool,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl CongestionControl {
    pub fn new(smss: usize, iss: SeqNumber, new_reno: bool, limited_transmit: bool) -> Self {
        let smss: u32 = smss as u32;
        // Initial window per RFC 5681, Section 3.1.
        let initial_cwnd: u32 = match smss {
            0..=1095 => 4 * smss,
            1096..=2190 => 3 * smss,
            _ => 2 * smss,
        };
        Self {
            smss,
            cwnd: initial_cwnd,
            // RFC 5681 wants ssthresh initialized "arbitrarily high".
            ssthresh: u32::MAX,
            duplicate_acks: 0,
            // Recover starts at the initial send sequence number (RFC 6582, Section 3.2 step 1).
            recover: iss,
            recover_baseline: iss,
            last_advertised_window: 0,
            new_reno,
            limited_transmit,
        }
    }

    /// The peer negotiated a different segment size after this state was created.
    pub fn update_smss(&mut self, smss: usize) {
        self.smss = smss as u32;
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn duplicate_acks(&self) -> u32 {
        self.duplicate_acks
    }

    pub fn recover(&self) -> SeqNumber {
        self.recover
    }

    pub fn in_fast_recovery(&self) -> bool {
        self.duplicate_acks >= DUP_ACK_THRESHOLD
    }

    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    pub fn last_advertised_window(&self) -> u32 {
        self.last_advertised_window
    }

    pub fn set_last_advertised_window(&mut self, window: u32) {
        self.last_advertised_window = window;
    }

    /// Opens the window for an ACK of `acked_bytes` of new data (RFC 5681, Section 3.1): slow start
    /// grows by `min(N, SMSS)` per ACK, congestion avoidance by roughly one segment per round trip.
    pub fn on_new_data_acked(&mut self, acked_bytes: u32) {
        if self.in_slow_start() {
            self.cwnd += acked_bytes.min(self.smss);
        } else {
            // cwnd += SMSS*SMSS/cwnd, rounded up so the window never stops growing entirely.
            let increment: u64 = (self.smss as u64 * self.smss as u64).div_ceil(self.cwnd as u64);
            self.cwnd = self.cwnd.saturating_add((increment as u32).max(1));
        }
    }

    /// Records one more duplicate ACK and returns the running count.
    pub fn increment_duplicate_acks(&mut self) -> u32 {
        self.duplicate_acks += 1;
        if self.new_reno && self.duplicate_acks < DUP_ACK_THRESHOLD {
            // Re-prime the NewReno baseline while below the threshold.
            self.recover = self.recover_baseline;
        }
        self.duplicate_acks
    }

    pub fn reset_duplicate_acks(&mut self) {
        self.duplicate_acks = 0;
    }

    /// Whether the third duplicate ACK for `ack` may enter fast retransmit.  Reno always enters;
    /// NewReno declines when the ACK does not cover `recover` (RFC 6582, Section 3.2 step 2).
    pub fn may_enter_fast_retransmit(&self, ack: SeqNumber) -> bool {
        !self.new_reno || ack > self.recover
    }

    /// Enters fast retransmit on the third duplicate ACK: halve the window into `ssthresh` and
    /// inflate `cwnd` by the three segments known to have left the network.
    pub fn enter_fast_retransmit(&mut self, flight_size: u32, snd_nxt: SeqNumber) {
        self.ssthresh = (flight_size / 2).max(2 * self.smss);
        self.cwnd = self.ssthresh + 3 * self.smss;
        if self.new_reno {
            // Highest sequence number transmitted so far.
            self.recover = snd_nxt - SeqNumber::from(1);
        }
    }

    /// One more duplicate ACK beyond the third: another segment has left the network.
    pub fn inflate(&mut self) {
        self.cwnd += self.smss;
    }

    /// Whether `ack` acknowledges everything outstanding when fast retransmit was entered.
    pub fn is_full_acknowledgment(&self, ack: SeqNumber) -> bool {
        ack >= self.recover
    }

    /// Exits fast recovery on an ACK of new data: deflate the window back to `ssthresh`.
    pub fn exit_fast_recovery(&mut self) {
        self.cwnd = self.ssthresh;
        self.duplicate_acks = 0;
    }

    /// NewReno partial acknowledgment (RFC 6582, Section 3.2 step 3): deflate by the amount
    /// acknowledged, then re-inflate by one segment if at least one full segment was covered.
    /// Fast recovery continues.
    pub fn on_partial_acknowledgment(&mut self, acked_bytes: u32) {
        let mut cwnd: u32 = self.cwnd.saturating_sub(acked_bytes);
        if acked_bytes >= self.smss {
            cwnd += self.smss;
        }
        self.cwnd = cwnd.max(self.smss);
    }

    /// Collapses the window after a retransmission timeout (RFC 5681, Section 3.1): one full-sized
    /// segment, with `ssthresh` capped at half the flight size.
    pub fn on_retransmission_timeout(&mut self, flight_size: u32, eff_mss: u32, snd_nxt: SeqNumber) {
        self.ssthresh = (flight_size / 2).max(2 * self.smss);
        self.cwnd = eff_mss;
        self.duplicate_acks = 0;
        if self.new_reno {
            self.recover = snd_nxt - SeqNumber::from(1);
        }
    }

    /// Limited transmit (RFC 3042): on the first two duplicate ACKs, one new segment may be sent
    /// without growing `cwnd`, provided the advertised window allows it and the flight stays
    /// within `cwnd + 2*SMSS`.
    pub fn allows_limited_transmit(&self, flight_size: u32, snd_wnd: u32, has_unsent_data: bool) -> bool {
        self.limited_transmit
            && self.duplicate_acks > 0
            && self.duplicate_acks < DUP_ACK_THRESHOLD
            && has_unsent_data
            && snd_wnd >= self.smss
            && flight_size + self.smss <= self.cwnd + 2 * self.smss
    }

    #[cfg(test)]
    pub fn set_cwnd(&mut self, cwnd: u32) {
        self.cwnd = cwnd;
    }

    #[cfg(test)]
    pub fn set_ssthresh(&mut self, ssthresh: u32) {
        self.ssthresh = ssthresh;
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
