// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod congestion_control;
pub mod outgoing_queue;
pub mod receive_buffer;
pub mod retransmission_queue;
pub mod rto;
pub mod send_buffer;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::engine::{
    config::ConnectionConfig,
    constants::{FALLBACK_MSS, MAX_MSS, MIN_MSS},
    ctrlblk::{
        congestion_control::CongestionControl, outgoing_queue::OutgoingSegmentQueue, receive_buffer::ReceiveBuffer,
        retransmission_queue::RetransmissionQueue, rto::RtoCalculator, send_buffer::SendBuffer,
    },
    segment::Segment,
    sequence_number::SeqNumber,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Transmission control block: the complete mutable state of one connection.  Created on OPEN,
/// destroyed on the transition to CLOSED, and only ever mutated by the one engine that owns it.
///
/// ```text
///      Send Sequence Space
///
///                 1         2          3          4
///            ----------|----------|----------|----------
///                   snd_una    snd_nxt    snd_una
///                                        + snd_wnd
///
///      1 - old sequence numbers which have been acknowledged
///      2 - sequence numbers of unacknowledged data
///      3 - sequence numbers allowed for new data transmission
///      4 - future sequence numbers which are not yet allowed
/// ```
///
/// The receive sequence space lives inside the [ReceiveBuffer], which owns RCV.NXT and RCV.WND.
pub struct ControlBlock {
    // Send Sequence Variables (RFC 9293, Section 3.3.1).
    /// Oldest unacknowledged sequence number (SND.UNA).
    pub snd_una: SeqNumber,
    /// Next sequence number to be sent (SND.NXT).
    pub snd_nxt: SeqNumber,
    /// Send window as advertised by the peer (SND.WND).
    pub snd_wnd: u32,
    /// Segment sequence number of the last window update (SND.WL1).
    pub snd_wl1: SeqNumber,
    /// Segment acknowledgment number of the last window update (SND.WL2).
    pub snd_wl2: SeqNumber,
    /// Initial send sequence number (ISS).
    pub iss: SeqNumber,
    /// Largest send window the peer has ever advertised (MAX.SND.WND, RFC 5961).
    pub max_snd_wnd: u32,

    /// Initial receive sequence number (IRS).
    pub irs: SeqNumber,

    // Maximum segment size this side may send, learned from the peer's MSS option.
    send_mss: usize,

    // Timestamps option state (RFC 7323).
    /// Most recent peer timestamp eligible for echoing (TS.Recent).
    pub ts_recent: u32,
    /// Acknowledgment number of the last ACK we sent (Last.ACK.sent).
    pub last_ack_sent: SeqNumber,
    /// Whether the timestamps option was negotiated on this connection (Snd.TS.OK).
    pub snd_ts_ok: bool,

    /// Sequence number our FIN occupies, once it has been sent.
    pub fin_seq: Option<SeqNumber>,

    /// The Nagle override timer fired: the next segmentization pass skips the deferral test once.
    pub override_pending: bool,

    // Owned buffers and policies.
    pub send_buffer: SendBuffer,
    pub receive_buffer: ReceiveBuffer,
    pub retransmission_queue: RetransmissionQueue,
    pub congestion_control: CongestionControl,
    pub rto_calculator: RtoCalculator,
    pub outgoing: OutgoingSegmentQueue,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl ControlBlock {
    /// Creates a control block with unsynchronized sequence variables.  Active opens call
    /// [Self::initialize_send] right away; passive opens once the peer's SYN arrives.
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            snd_una: SeqNumber::from(0),
            snd_nxt: SeqNumber::from(0),
            snd_wnd: 0,
            snd_wl1: SeqNumber::from(0),
            snd_wl2: SeqNumber::from(0),
            iss: SeqNumber::from(0),
            max_snd_wnd: 0,
            irs: SeqNumber::from(0),
            send_mss: FALLBACK_MSS,
            ts_recent: 0,
            last_ack_sent: SeqNumber::from(0),
            snd_ts_ok: false,
            fin_seq: None,
            override_pending: false,
            send_buffer: SendBuffer::new(),
            receive_buffer: ReceiveBuffer::new(config.get_receive_buffer_size()),
            retransmission_queue: RetransmissionQueue::new(),
            congestion_control: CongestionControl::new(
                FALLBACK_MSS,
                SeqNumber::from(0),
                config.get_new_reno(),
                config.get_limited_transmit(),
            ),
            rto_calculator: RtoCalculator::new(config),
            outgoing: OutgoingSegmentQueue::new(),
        }
    }

    /// Seeds the send sequence space around a freshly selected ISS.  SND.NXT is set past the SYN
    /// that is about to consume the first sequence number.
    pub fn initialize_send(&mut self, iss: SeqNumber, config: &ConnectionConfig) {
        self.iss = iss;
        self.snd_una = iss;
        self.snd_nxt = iss + SeqNumber::from(1);
        self.congestion_control = CongestionControl::new(
            self.send_mss,
            iss,
            config.get_new_reno(),
            config.get_limited_transmit(),
        );
    }

    /// Synchronizes the receive sequence space with the peer's SYN.
    pub fn synchronize_receive(&mut self, irs: SeqNumber) {
        self.irs = irs;
        self.receive_buffer.synchronize(irs + SeqNumber::from(1));
    }

    pub fn rcv_nxt(&self) -> SeqNumber {
        self.receive_buffer.receive_next()
    }

    pub fn rcv_wnd(&self) -> u32 {
        self.receive_buffer.window()
    }

    /// SND.NXT - SND.UNA: the number of sequence numbers currently in flight.
    pub fn flight_size(&self) -> u32 {
        (self.snd_nxt - self.snd_una).into()
    }

    /// Sender maximum segment size.
    pub fn smss(&self) -> usize {
        self.send_mss
    }

    /// Effective send segment size.  Header overhead is the transport's concern, so this equals
    /// the negotiated SMSS.
    pub fn eff_snd_mss(&self) -> usize {
        self.send_mss
    }

    /// Adopts the peer's MSS option.
    pub fn negotiate_mss(&mut self, peer_mss: u16) {
        let mss: usize = (peer_mss as usize).clamp(MIN_MSS, MAX_MSS);
        self.send_mss = mss;
        self.congestion_control.update_smss(mss);
    }

    /// How much the windows allow us to send right now: the lesser of the peer's window and the
    /// congestion window, minus what is already in flight.
    pub fn usable_window(&self) -> u32 {
        let limit: u32 = self.snd_wnd.min(self.congestion_control.cwnd());
        limit.saturating_sub(self.flight_size())
    }

    /// SND.UNA < SEG.ACK <= SND.NXT.
    pub fn is_acceptable_ack(&self, ack: SeqNumber) -> bool {
        self.snd_una < ack && ack <= self.snd_nxt
    }

    /// Whether `ack` covers the FIN we sent, if we sent one.
    pub fn our_fin_acked(&self, ack: SeqNumber) -> bool {
        match self.fin_seq {
            Some(fin_seq) => ack > fin_seq,
            None => false,
        }
    }

    /// Applies a send-window update if the segment is newer than the last one used for that
    /// (RFC 9293: SND.WL1 < SEG.SEQ, or SND.WL1 = SEG.SEQ and SND.WL2 =< SEG.ACK).  Returns
    /// whether the window was updated.
    pub fn update_send_window(&mut self, segment: &Segment) -> bool {
        if self.snd_wl1 < segment.seq_num
            || (self.snd_wl1 == segment.seq_num && self.snd_wl2 <= segment.ack_num)
        {
            self.set_send_window(segment);
            return true;
        }
        false
    }

    /// Unconditionally adopts the segment's window and records it as the update source.
    pub fn set_send_window(&mut self, segment: &Segment) {
        self.snd_wnd = segment.window_size;
        self.snd_wl1 = segment.seq_num;
        self.snd_wl2 = segment.ack_num;
        self.max_snd_wnd = self.max_snd_wnd.max(segment.window_size);
    }

    /// Sender-side silly-window-syndrome avoidance (RFC 9293, Section 3.8.6.2.1).  With D bytes
    /// queued and U usable window, transmission proceeds when a full segment can go out, when
    /// everything queued fits and nothing is in flight, when an idle sender can cover half the
    /// largest window the peer ever offered, or when the override timer already fired.
    pub fn sender_may_transmit(&self, no_delay: bool, fs: f64) -> bool {
        let d: usize = self.send_buffer.readable_bytes();
        let u: usize = self.usable_window() as usize;
        if d == 0 || u == 0 {
            return false;
        }
        if no_delay {
            return true;
        }

        let min_du: usize = d.min(u);
        if min_du >= self.eff_snd_mss() {
            return true;
        }
        let nothing_in_flight: bool = self.snd_nxt == self.snd_una;
        if nothing_in_flight && d <= u {
            return true;
        }
        if nothing_in_flight && min_du as f64 >= fs * self.max_snd_wnd as f64 {
            return true;
        }
        self.override_pending
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
