// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    engine::{
        config::ConnectionConfig,
        ctrlblk::ControlBlock,
        isn_generator::IsnGenerator,
        segment::{Segment, SegmentOption},
        sequence_number::SeqNumber,
        Completion,
    },
    runtime::{
        fail::Fail,
        timer::{TimerKind, TimerSet},
        transport::SegmentTransport,
    },
};
use ::libc::EBADMSG;
use ::std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Connection states per RFC 9293, Section 3.3.2.  CLOSED has no control block; every other state
/// owns exactly one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl State {
    /// Whether both sides have synchronized sequence numbers in this state.
    pub fn synchronized(&self) -> bool {
        !matches!(self, State::Closed | State::Listen | State::SynSent)
    }
}

/// Asynchronous signals surfaced to the application.  The host drains these with
/// [ConnectionEngine::poll_event] after re-entering the engine.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A SYN or SYN+ACK went out; the handshake is in progress.
    HandshakeIssued,
    /// The connection reached ESTABLISHED.
    HandshakeCompleted,
    /// The peer sent a FIN; no more data will arrive after the reassembly buffer drains.
    ConnectionClosing,
    /// New bytes became readable.
    DataReadable,
    /// An asynchronous failure: peer reset, user timeout.  Pending send completions have already
    /// been failed with the same cause.
    Error(Fail),
    /// The connection reached CLOSED and its control block was released.
    Closed,
}

/// Point-in-time copy of the interesting control-block variables, for STATUS calls.
#[derive(Clone, Debug)]
pub struct TcbSnapshot {
    pub snd_una: SeqNumber,
    pub snd_nxt: SeqNumber,
    pub snd_wnd: u32,
    pub iss: SeqNumber,
    pub rcv_nxt: SeqNumber,
    pub rcv_wnd: u32,
    pub irs: SeqNumber,
    pub cwnd: u32,
    pub ssthresh: u32,
    pub duplicate_acks: u32,
    pub rto: Duration,
    pub smss: usize,
}

/// The connection engine: one finite-state machine driving one connection over one transport.
///
/// Every entry point (user calls, segment arrival, timer expiry) must be invoked from the same
/// logical event loop; the engine mutates its control block inline and hands any outbound segments
/// to the transport before returning, so no locking is needed anywhere.
pub struct ConnectionEngine<T: SegmentTransport> {
    config: ConnectionConfig,
    transport: T,
    state: State,
    tcb: Option<ControlBlock>,
    timers: TimerSet,
    events: VecDeque<ConnectionEvent>,
    now: Instant,
    // Epoch for the 32-bit timestamps option clock.
    ts_clock_base: Instant,
    isn_generator: IsnGenerator,
    close_completion: Option<Completion>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl<T: SegmentTransport> ConnectionEngine<T> {
    pub fn new(config: ConnectionConfig, transport: T, now: Instant) -> Self {
        Self {
            config,
            transport,
            state: State::Closed,
            tcb: None,
            timers: TimerSet::new(),
            events: VecDeque::new(),
            now,
            ts_clock_base: now,
            isn_generator: IsnGenerator::new(),
            close_completion: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn timers(&self) -> &TimerSet {
        &self.timers
    }

    //==================================================================================================================
    // User calls
    //==================================================================================================================

    /// OPEN call: creates the control block and either issues a SYN (active open) or starts
    /// listening for one (passive open).
    pub fn open(&mut self) -> Result<(), Fail> {
        if self.state != State::Closed {
            let cause: Fail = Fail::connection_already_exists();
            error!("open(): {:?}", cause);
            return Err(cause);
        }

        self.tcb = Some(ControlBlock::new(&self.config));

        if !self.config.get_active_open() {
            debug!("passive open: entering LISTEN");
            self.state = State::Listen;
            return Ok(());
        }

        let iss: SeqNumber = self.isn_generator.generate();
        debug!("active open: sending SYN, iss={}", iss);
        if let Some(tcb) = self.tcb.as_mut() {
            tcb.initialize_send(iss, &self.config);
        }
        let syn: Segment = self.form_syn(iss, false);
        self.transmit_tracked(syn, Vec::new());
        self.arm_user_timer();
        self.state = State::SynSent;
        self.events.push_back(ConnectionEvent::HandshakeIssued);
        self.flush_outgoing();
        Ok(())
    }

    /// SEND call: queues bytes for ordered delivery to the peer.  The completion fires once every
    /// byte has been acknowledged, or with a typed failure if the connection is torn down first.
    pub fn send(&mut self, bytes: Vec<u8>, completion: Completion) {
        if self.state == State::Closed {
            completion(Err(Fail::connection_does_not_exist()));
            return;
        }
        if matches!(
            self.state,
            State::FinWait1 | State::FinWait2 | State::Closing | State::LastAck | State::TimeWait
        ) {
            completion(Err(Fail::connection_closing()));
            return;
        }
        if bytes.is_empty() {
            completion(Err(Fail::unsupported_message()));
            return;
        }

        let closing: bool = match self.tcb.as_mut() {
            Some(tcb) => tcb.send_buffer.end_of_stream_marked() || tcb.fin_seq.is_some(),
            None => true,
        };
        if closing {
            completion(Err(Fail::connection_closing()));
            return;
        }

        if let Some(tcb) = self.tcb.as_mut() {
            tcb.send_buffer.enqueue(bytes, Some(completion));
        }

        // Before the connection is synchronized the data just waits in the send buffer.
        if matches!(self.state, State::Established | State::CloseWait) {
            self.try_send_previously_unsent_data();
            self.flush_outgoing();
        }
    }

    /// Bytes ready for the application to read.
    pub fn readable_bytes(&self) -> usize {
        match self.tcb.as_ref() {
            Some(tcb) => tcb.receive_buffer.readable_bytes(),
            None => 0,
        }
    }

    /// RECEIVE call: hands up to `max_bytes` of in-order data to the application.  Freed buffer
    /// space may produce a window-update ACK.
    pub fn receive(&mut self, max_bytes: usize) -> Vec<u8> {
        let Some(tcb) = self.tcb.as_mut() else {
            return Vec::new();
        };
        let eff_mss: usize = tcb.eff_snd_mss();
        let (data, window_grew): (Vec<u8>, bool) = tcb.receive_buffer.deliver(max_bytes, eff_mss);
        if window_grew && self.state.synchronized() {
            trace!("receive(): advertising reopened window");
            self.queue_pure_ack();
            self.flush_outgoing();
        }
        data
    }

    /// CLOSE call: sends any queued data, then a FIN.  The completion fires when the connection
    /// reaches CLOSED.
    pub fn close(&mut self, completion: Completion) {
        match self.state {
            State::Closed => completion(Err(Fail::connection_does_not_exist())),
            State::Listen => {
                self.close_completion = Some(completion);
                self.delete_tcb(None);
            },
            State::SynSent => {
                // Nothing has been exchanged; pending sends fail as "closing".
                self.close_completion = Some(completion);
                self.delete_tcb(None);
            },
            State::SynReceived | State::Established | State::CloseWait => {
                let already_closing: bool = match self.tcb.as_ref() {
                    Some(tcb) => tcb.send_buffer.end_of_stream_marked() || tcb.fin_seq.is_some(),
                    None => true,
                };
                if already_closing {
                    completion(Err(Fail::connection_closing()));
                    return;
                }
                if let Some(tcb) = self.tcb.as_mut() {
                    tcb.send_buffer.mark_end_of_stream();
                }
                self.close_completion = Some(completion);
                self.try_send_previously_unsent_data();
                self.flush_outgoing();
            },
            _ => completion(Err(Fail::connection_closing())),
        }
    }

    /// ABORT call: tears the connection down immediately, resetting the peer if sequence numbers
    /// were synchronized.  Pending sends fail with "connection reset".
    pub fn abort(&mut self) -> Result<(), Fail> {
        if self.state == State::Closed {
            let cause: Fail = Fail::connection_does_not_exist();
            error!("abort(): {:?}", cause);
            return Err(cause);
        }

        if self.state.synchronized() {
            let mut rst: Segment = Segment::new(self.tcb.as_ref().map_or(SeqNumber::from(0), |tcb| tcb.snd_nxt));
            rst.rst = true;
            rst.ack = true;
            if let Some(tcb) = self.tcb.as_mut() {
                rst.ack_num = tcb.rcv_nxt();
                tcb.outgoing.place(rst);
            }
            self.flush_outgoing();
        }

        let cause: Fail = Fail::connection_reset();
        if let Some(tcb) = self.tcb.as_mut() {
            tcb.send_buffer.fail_all(&cause);
            tcb.retransmission_queue.fail_all(&cause);
        }
        self.delete_tcb(None);
        Ok(())
    }

    /// STATUS call: the current state plus a snapshot of the control block, if one exists.
    pub fn status(&self) -> (State, Option<TcbSnapshot>) {
        let snapshot: Option<TcbSnapshot> = self.tcb.as_ref().map(|tcb| TcbSnapshot {
            snd_una: tcb.snd_una,
            snd_nxt: tcb.snd_nxt,
            snd_wnd: tcb.snd_wnd,
            iss: tcb.iss,
            rcv_nxt: tcb.rcv_nxt(),
            rcv_wnd: tcb.rcv_wnd(),
            irs: tcb.irs,
            cwnd: tcb.congestion_control.cwnd(),
            ssthresh: tcb.congestion_control.ssthresh(),
            duplicate_acks: tcb.congestion_control.duplicate_acks(),
            rto: tcb.rto_calculator.rto(),
            smss: tcb.smss(),
        });
        (self.state, snapshot)
    }

    /// Next pending application-facing event, if any.
    pub fn poll_event(&mut self) -> Option<ConnectionEvent> {
        self.events.pop_front()
    }

    //==================================================================================================================
    // Event-loop integration
    //==================================================================================================================

    /// Moves the engine's notion of "now" forward.  The host owns the clock.
    pub fn advance_clock(&mut self, now: Instant) {
        debug_assert!(now >= self.now);
        self.now = now;
    }

    /// Fires every timer whose deadline has passed, in deadline order.
    pub fn poll_timers(&mut self) {
        while let Some(kind) = self.timers.pop_expired(self.now) {
            self.on_timer(kind);
        }
    }

    /// Timer expiry entry point.
    pub fn on_timer(&mut self, kind: TimerKind) {
        trace!("{:?} timer fired in {:?}", kind, self.state);
        match kind {
            TimerKind::User => self.user_timeout(),
            TimerKind::Retransmission => self.retransmission_timeout(),
            TimerKind::TimeWait => self.time_wait_timeout(),
            TimerKind::ZeroWindowProbe => self.zero_window_probe(),
            TimerKind::NagleOverride => self.nagle_override_timeout(),
        }
        self.flush_outgoing();
    }

    /// Segment arrival entry point.
    pub fn on_segment(&mut self, segment: Segment) {
        trace!(
            "{:?} received seq={} ack={} len={} flags=[{}{}{}{}{}]",
            self.state,
            segment.seq_num,
            segment.ack_num,
            segment.len(),
            if segment.syn { "S" } else { "" },
            if segment.ack { "A" } else { "" },
            if segment.fin { "F" } else { "" },
            if segment.rst { "R" } else { "" },
            if segment.psh { "P" } else { "" },
        );

        match self.state {
            State::Closed => self.segment_arrives_on_closed_state(segment),
            State::Listen => self.segment_arrives_on_listen_state(segment),
            State::SynSent => self.segment_arrives_on_syn_sent_state(segment),
            _ => {
                if let Err(e) = self.segment_arrives_on_other_states(segment) {
                    debug!("dropped segment: {:?}", e);
                }
            },
        }
        self.flush_outgoing();
    }

    //==================================================================================================================
    // Segment arrival, per state (RFC 9293, Section 3.10.7)
    //==================================================================================================================

    // With no control block every inbound segment is answered with a reset that is acceptable to
    // the sender of the offending segment, unless it is itself a reset.
    fn segment_arrives_on_closed_state(&mut self, segment: Segment) {
        if segment.rst {
            return;
        }

        let mut response: Segment;
        if !segment.ack {
            // <SEQ=0><ACK=SEG.SEQ+SEG.LEN><CTL=RST,ACK>
            response = Segment::new(SeqNumber::from(0));
            response.rst = true;
            response.ack = true;
            response.ack_num = segment.end_seq();
        } else {
            // <SEQ=SEG.ACK><CTL=RST>
            response = Segment::new(segment.ack_num);
            response.rst = true;
        }
        debug!("no connection exists; resetting peer");
        self.transport.transmit(response);
        self.transport.flush();
    }

    fn segment_arrives_on_listen_state(&mut self, segment: Segment) {
        // An inbound RST cannot be in response to anything we sent; ignore it.
        if segment.rst {
            return;
        }

        // Any ACK is bad on a connection still in LISTEN: <SEQ=SEG.ACK><CTL=RST>.
        if segment.ack {
            let mut response: Segment = Segment::new(segment.ack_num);
            response.rst = true;
            debug!("ACK received in LISTEN; resetting peer");
            if let Some(tcb) = self.tcb.as_mut() {
                tcb.outgoing.place(response);
            }
            return;
        }

        if segment.syn {
            debug!("SYN received in LISTEN; synchronizing");
            let Some(tcb) = self.tcb.as_mut() else {
                return;
            };
            tcb.synchronize_receive(segment.seq_num);

            if self.config.get_timestamps() {
                if let Some((ts_val, _)) = segment.timestamps_option() {
                    tcb.ts_recent = ts_val;
                    tcb.snd_ts_ok = true;
                }
            }
            if let Some(mss) = segment.mss_option() {
                debug!("peer advertised mss {}", mss);
                tcb.negotiate_mss(mss);
            }

            let iss: SeqNumber = self.isn_generator.generate();
            if let Some(tcb) = self.tcb.as_mut() {
                tcb.initialize_send(iss, &self.config);
            }

            // <SEQ=ISS><ACK=RCV.NXT><CTL=SYN,ACK>
            let syn_ack: Segment = self.form_syn(iss, true);
            self.transmit_tracked(syn_ack, Vec::new());
            self.arm_user_timer();
            self.state = State::SynReceived;
            self.events.push_back(ConnectionEvent::HandshakeIssued);
        }

        // Anything else would carry an ACK and was already dealt with above.
    }

    fn segment_arrives_on_syn_sent_state(&mut self, segment: Segment) {
        let now_ts: u32 = self.now_timestamp();
        let Some(tcb) = self.tcb.as_mut() else {
            return;
        };

        // First, check the ACK bit.
        if segment.ack && (segment.ack_num <= tcb.iss || segment.ack_num > tcb.snd_nxt) {
            // The peer acknowledges something we never sent.
            if !segment.rst {
                let mut response: Segment = Segment::new(segment.ack_num);
                response.rst = true;
                debug!("unacceptable ACK in SYN-SENT; resetting peer");
                tcb.outgoing.place(response);
            }
            return;
        }

        // Second, check the RST bit.
        if segment.rst {
            if segment.ack && tcb.is_acceptable_ack(segment.ack_num) {
                // Our SYN was answered with a reset: the connection was refused.
                let cause: Fail = Fail::connection_refused();
                info!("{:?}", cause);
                tcb.send_buffer.fail_all(&cause);
                tcb.retransmission_queue.fail_all(&cause);
                self.delete_tcb(Some(cause));
            }
            return;
        }

        // Fourth (there is no security check), check the SYN bit.
        if segment.syn {
            tcb.synchronize_receive(segment.seq_num);

            if segment.ack && tcb.is_acceptable_ack(segment.ack_num) {
                tcb.snd_una = segment.ack_num;
            }

            if self.config.get_timestamps() {
                if let Some((ts_val, ts_ecr)) = segment.timestamps_option() {
                    tcb.ts_recent = ts_val;
                    tcb.snd_ts_ok = true;
                    if segment.ack {
                        // Initial round-trip estimate from the echoed timestamp.
                        let rtt: Duration = Duration::from_millis(now_ts.wrapping_sub(ts_ecr) as u64);
                        let flight_size: u32 = tcb.flight_size();
                        let smss: usize = tcb.smss();
                        tcb.rto_calculator.add_sample(rtt, flight_size, smss);
                    }
                }
            }
            if let Some(mss) = segment.mss_option() {
                debug!("peer advertised mss {}", mss);
                tcb.negotiate_mss(mss);
            }

            if tcb.snd_una > tcb.iss {
                // Our SYN has been acknowledged: the handshake is complete on our side.
                tcb.set_send_window(&segment);
                self.remove_acknowledged_segments(segment.ack_num);
                self.state = State::Established;
                debug!("connection established (active open)");
                self.queue_pure_ack();
                self.events.push_back(ConnectionEvent::HandshakeCompleted);
                self.try_send_previously_unsent_data();
            } else {
                // Simultaneous open: the peer's SYN crossed ours.
                tcb.set_send_window(&segment);
                let iss: SeqNumber = tcb.iss;
                let syn_ack: Segment = self.form_syn(iss, true);
                if let Some(tcb) = self.tcb.as_mut() {
                    tcb.outgoing.place(syn_ack);
                }
                self.state = State::SynReceived;
                debug!("simultaneous open: entering SYN-RECEIVED");
            }
        }

        // Neither SYN nor RST: drop.
    }

    // Segment arrival for every synchronized state plus SYN-RECEIVED, following the processing
    // order of RFC 9293, Section 3.10.7.4.  Each step either continues or bails out with EBADMSG,
    // which the caller logs as a dropped segment.
    fn segment_arrives_on_other_states(&mut self, mut segment: Segment) -> Result<(), Fail> {
        // First, check the sequence number (trimming the segment to the window).
        self.check_segment_in_window(&mut segment)?;
        // Second, check the RST bit.
        self.check_rst(&segment)?;
        // Third (security) does not apply.  Fourth, check the SYN bit.
        self.check_syn(&segment)?;
        // Fifth, check the ACK field.
        self.process_ack(&segment)?;
        // Sixth (URG) is not supported.  Seventh, process the segment text.
        let fin_became_ready: bool = self.process_payload(&mut segment)?;
        // Eighth, check the FIN bit.
        self.process_fin(&segment, fin_became_ready);
        Ok(())
    }

    // Sequence-number acceptability (RFC 9293, Section 3.10.7.4 step 1), including the RFC 7323
    // timestamp check, plus trimming: duplicate bytes are cut off the front and bytes beyond the
    // window off the back, so later steps see an idealized segment starting at RCV.NXT.
    fn check_segment_in_window(&mut self, segment: &mut Segment) -> Result<(), Fail> {
        let Some(tcb) = self.tcb.as_mut() else {
            return Err(Fail::connection_does_not_exist());
        };

        let receive_next: SeqNumber = tcb.rcv_nxt();
        let receive_window: u32 = tcb.rcv_wnd();

        // RFC 7323: a non-RST segment with an old timestamp is unacceptable.
        if tcb.snd_ts_ok {
            if let Some((ts_val, _)) = segment.timestamps_option() {
                if (ts_val.wrapping_sub(tcb.ts_recent) as i32) < 0 && !segment.rst {
                    self.queue_pure_ack();
                    return Err(Fail::new(EBADMSG, "segment timestamp too old"));
                }
                if (ts_val.wrapping_sub(tcb.ts_recent) as i32) >= 0 && segment.seq_num <= tcb.last_ack_sent {
                    tcb.ts_recent = ts_val;
                }
            }
        }

        let seg_len: u32 = segment.len();
        let seg_end: SeqNumber = if seg_len > 0 {
            segment.seq_num + SeqNumber::from(seg_len - 1)
        } else {
            segment.seq_num
        };
        let after_window: SeqNumber = receive_next + SeqNumber::from(receive_window);

        // The four acceptability cases of RFC 9293.
        let acceptable: bool = match (seg_len, receive_window) {
            (0, 0) => segment.seq_num == receive_next,
            (0, _) => receive_next <= segment.seq_num && segment.seq_num < after_window,
            (_, 0) => false,
            (_, _) => {
                (receive_next <= segment.seq_num && segment.seq_num < after_window)
                    || (receive_next <= seg_end && seg_end < after_window)
            },
        };
        if !acceptable {
            if self.state == State::TimeWait && segment.fin {
                // A retransmitted FIN restarts the 2*MSL linger along with being re-ACKed.
                self.timers.arm(TimerKind::TimeWait, self.now + 2 * self.config.get_msl());
            }
            if !segment.rst {
                trace!("unacceptable segment; sending corrective ACK");
                self.queue_pure_ack();
            }
            return Err(Fail::new(EBADMSG, "segment not acceptable"));
        }

        // Trim duplicate data off the front (removing a consumed SYN with it).
        if segment.seq_num < receive_next {
            let mut duplicate: u32 = (receive_next - segment.seq_num).into();
            if segment.syn {
                segment.syn = false;
                duplicate -= 1;
            }
            segment.payload.drain(..(duplicate as usize).min(segment.payload.len()));
            segment.seq_num = receive_next;
        }

        // Trim data beyond the window off the back (removing the FIN with it).
        let seg_len: u32 = segment.len();
        if seg_len > 0 {
            let seg_end: SeqNumber = segment.seq_num + SeqNumber::from(seg_len - 1);
            if seg_end >= after_window {
                let mut excess: u32 = u32::from(seg_end - after_window) + 1;
                if segment.fin {
                    segment.fin = false;
                    excess -= 1;
                }
                let keep: usize = segment.payload.len().saturating_sub(excess as usize);
                segment.payload.truncate(keep);
            }
        }

        Ok(())
    }

    // RST handling by window position (RFC 9293, Section 3.10.7.4 step 2 / RFC 5961): exact match
    // resets, elsewhere-in-window draws a challenge ACK, outside the window was already dropped.
    fn check_rst(&mut self, segment: &Segment) -> Result<(), Fail> {
        if !segment.rst {
            return Ok(());
        }
        let Some(tcb) = self.tcb.as_mut() else {
            return Err(Fail::connection_does_not_exist());
        };

        if segment.seq_num != tcb.rcv_nxt() {
            trace!("in-window RST with unexpected sequence number; sending challenge ACK");
            self.queue_pure_ack();
            return Err(Fail::new(EBADMSG, "challenged RST"));
        }

        match self.state {
            State::SynReceived => {
                if !self.config.get_active_open() {
                    // Back to LISTEN; the user need not be informed.
                    info!("peer reset the handshake; returning to LISTEN");
                    tcb.retransmission_queue.release();
                    self.timers.cancel(TimerKind::Retransmission);
                    self.timers.cancel(TimerKind::User);
                    self.state = State::Listen;
                } else {
                    let cause: Fail = Fail::connection_refused();
                    info!("{:?}", cause);
                    tcb.send_buffer.fail_all(&cause);
                    tcb.retransmission_queue.fail_all(&cause);
                    self.delete_tcb(Some(cause));
                }
            },
            State::Established | State::FinWait1 | State::FinWait2 | State::CloseWait => {
                let cause: Fail = Fail::connection_reset();
                info!("{:?}", cause);
                tcb.send_buffer.fail_all(&cause);
                tcb.retransmission_queue.fail_all(&cause);
                self.delete_tcb(Some(cause));
            },
            _ => {
                // CLOSING, LAST-ACK, TIME-WAIT: we were tearing down anyway.
                info!("peer reset a closing connection");
                self.delete_tcb(None);
            },
        }
        Err(Fail::new(EBADMSG, "connection reset by peer"))
    }

    // SYN handling in synchronized states (RFC 9293, Section 3.10.7.4 step 4 / RFC 5961): always
    // answer with a challenge ACK and drop.
    fn check_syn(&mut self, segment: &Segment) -> Result<(), Fail> {
        if !segment.syn {
            return Ok(());
        }

        if self.state == State::SynReceived && !self.config.get_active_open() {
            debug!("extra SYN in SYN-RECEIVED after passive open; returning to LISTEN");
            self.state = State::Listen;
            return Err(Fail::new(EBADMSG, "returned to listen"));
        }

        trace!("in-window SYN on synchronized connection; sending challenge ACK");
        self.queue_pure_ack();
        Err(Fail::new(EBADMSG, "challenged SYN"))
    }

    // ACK-field processing (RFC 9293, Section 3.10.7.4 step 5).
    fn process_ack(&mut self, segment: &Segment) -> Result<(), Fail> {
        if !segment.ack {
            // Every segment in a synchronized state must carry an ACK.
            return Err(Fail::new(EBADMSG, "segment without ACK"));
        }

        {
            let Some(tcb) = self.tcb.as_mut() else {
                return Err(Fail::connection_does_not_exist());
            };

            // RFC 5961 blind-data-injection check: SND.UNA - MAX.SND.WND =< SEG.ACK =< SND.NXT.
            let lower_bound: SeqNumber = tcb.snd_una - SeqNumber::from(tcb.max_snd_wnd);
            if !(lower_bound <= segment.ack_num && segment.ack_num <= tcb.snd_nxt) {
                warn!("segment acknowledges data outside the permissible range");
                self.queue_pure_ack();
                return Err(Fail::new(EBADMSG, "unacceptable ACK"));
            }
        }

        // SYN-RECEIVED: an acceptable ACK of our SYN completes the handshake, after which the
        // segment continues through established-state processing.
        if self.state == State::SynReceived {
            let acceptable: bool = match self.tcb.as_mut() {
                Some(tcb) => {
                    if tcb.is_acceptable_ack(segment.ack_num) {
                        tcb.set_send_window(segment);
                        true
                    } else {
                        false
                    }
                },
                None => false,
            };
            if acceptable {
                self.state = State::Established;
                debug!("connection established (passive open)");
                self.events.push_back(ConnectionEvent::HandshakeCompleted);
                self.try_send_previously_unsent_data();
            } else {
                // <SEQ=SEG.ACK><CTL=RST>
                let mut response: Segment = Segment::new(segment.ack_num);
                response.rst = true;
                if let Some(tcb) = self.tcb.as_mut() {
                    tcb.outgoing.place(response);
                }
                return Err(Fail::new(EBADMSG, "unacceptable ACK in SYN-RECEIVED"));
            }
        }

        // Whether this segment acknowledges our FIN must be judged before the ACK advances state.
        let fin_acked: bool = match self.tcb.as_ref() {
            Some(tcb) => tcb.our_fin_acked(segment.ack_num),
            None => false,
        };

        match self.state {
            State::Established | State::CloseWait | State::FinWait2 => {
                if self.established_ack_processing(segment) {
                    return Err(Fail::new(EBADMSG, "acknowledgment processing consumed segment"));
                }
            },
            State::FinWait1 => {
                if self.established_ack_processing(segment) {
                    return Err(Fail::new(EBADMSG, "acknowledgment processing consumed segment"));
                }
                if fin_acked {
                    debug!("our FIN was acknowledged; entering FIN-WAIT-2");
                    self.state = State::FinWait2;
                }
            },
            State::Closing => {
                if self.established_ack_processing(segment) {
                    return Err(Fail::new(EBADMSG, "acknowledgment processing consumed segment"));
                }
                if fin_acked {
                    debug!("our FIN was acknowledged; entering TIME-WAIT");
                    self.enter_time_wait();
                } else {
                    return Err(Fail::new(EBADMSG, "acknowledgment does not cover our FIN"));
                }
            },
            State::LastAck => {
                if fin_acked {
                    debug!("our FIN was acknowledged; closing");
                    self.delete_tcb(None);
                }
                return Err(Fail::new(EBADMSG, "close sequence finished"));
            },
            State::TimeWait => {
                // Only a retransmission of the peer's FIN can arrive here; ACK it and restart the
                // 2*MSL timer.
                if segment.fin {
                    self.queue_pure_ack();
                    self.timers.arm(TimerKind::TimeWait, self.now + 2 * self.config.get_msl());
                }
                return Err(Fail::new(EBADMSG, "segment in TIME-WAIT"));
            },
            _ => (),
        }

        Ok(())
    }

    // The common ACK/congestion machinery shared by ESTABLISHED and the closing states
    // (RFC 9293 step 5 with RFC 5681/6582/3042 folded in).  Returns true when the segment needs no
    // further processing.
    fn established_ack_processing(&mut self, segment: &Segment) -> bool {
        let now_ts: u32 = self.now_timestamp();
        let (is_stale, is_duplicate, acked_bytes): (bool, bool, u32) = {
            let Some(tcb) = self.tcb.as_mut() else {
                return true;
            };

            // RFC 5681's duplicate test decides whether the segment counts toward fast retransmit;
            // its advertised-window-equality clause is deliberately omitted, because window updates
            // often ride on duplicate ACKs.  Only an acknowledgment strictly below SND.UNA is
            // stale: one of exactly SND.UNA may still carry a window update, since RFC 9293 admits
            // SND.UNA = SEG.ACK in the update test.
            let is_stale: bool = segment.ack_num < tcb.snd_una;
            let is_duplicate: bool = !tcb.retransmission_queue.is_empty()
                && segment.len() == 0
                && !segment.syn
                && !segment.fin
                && segment.ack_num == tcb.snd_una;

            let mut acked_bytes: u32 = 0;
            if tcb.is_acceptable_ack(segment.ack_num) {
                acked_bytes = (segment.ack_num - tcb.snd_una).into();
                trace!("ACK advances SND.UNA by {} bytes", acked_bytes);

                // Round-trip measurement: echoed timestamp when negotiated, else the send time of
                // the oldest unacknowledged segment (skipped after a retransmission, per Karn).
                let sample: Option<Duration> = if tcb.snd_ts_ok {
                    segment
                        .timestamps_option()
                        .map(|(_, ts_ecr)| Duration::from_millis(now_ts.wrapping_sub(ts_ecr) as u64))
                } else {
                    tcb.retransmission_queue
                        .first_segment_sent_time()
                        .map(|sent| self.now.duration_since(sent))
                };
                if let Some(rtt) = sample {
                    let flight_size: u32 = tcb.flight_size();
                    let smss: usize = tcb.smss();
                    tcb.rto_calculator.add_sample(rtt, flight_size, smss);
                }

                tcb.snd_una = segment.ack_num;
            }
            (is_stale, is_duplicate, acked_bytes)
        };

        // Entirely acknowledged segments leave the retransmission queue; their completions fire.
        self.remove_acknowledged_segments(segment.ack_num);

        self.congestion_processing(segment, is_duplicate, acked_bytes);

        if is_stale {
            // Nothing here concerns the send side anymore; let the segment's data and FIN be
            // processed.
            return false;
        }

        let (window_zero, has_unsent, rto, window_updated): (bool, bool, Duration, bool) = match self.tcb.as_mut() {
            Some(tcb) => {
                tcb.congestion_control.set_last_advertised_window(segment.window_size);
                let window_updated: bool = tcb.update_send_window(segment);
                (
                    tcb.snd_wnd == 0,
                    !tcb.send_buffer.is_empty(),
                    tcb.rto_calculator.rto(),
                    window_updated,
                )
            },
            None => return true,
        };
        if window_zero && has_unsent {
            // Zero-window probing starts one retransmission-timeout interval after the window
            // closes, and every zero-window acknowledgment pushes the probe out again.
            debug!("peer window closed; arming zero-window probe");
            self.timers.arm(TimerKind::ZeroWindowProbe, self.now + rto);
        } else if !window_zero && self.timers.is_armed(TimerKind::ZeroWindowProbe) {
            debug!("peer window reopened; cancelling zero-window probe");
            self.timers.cancel(TimerKind::ZeroWindowProbe);
        }

        if acked_bytes > 0 || window_updated {
            // Acknowledged data left the network, or the peer grew its window; either way there
            // may be room to send more.
            self.try_send_previously_unsent_data();
        }
        false
    }

    // Slow start, congestion avoidance, fast retransmit/recovery, and limited transmit.
    fn congestion_processing(&mut self, segment: &Segment, is_duplicate: bool, acked_bytes: u32) {
        let new_reno: bool = self.config.get_new_reno();

        if is_duplicate {
            let (count, flight_size, snd_wnd, snd_nxt, has_unsent): (u32, u32, u32, SeqNumber, bool) = {
                let Some(tcb) = self.tcb.as_mut() else {
                    return;
                };
                (
                    tcb.congestion_control.increment_duplicate_acks(),
                    tcb.flight_size(),
                    tcb.snd_wnd,
                    tcb.snd_nxt,
                    !tcb.send_buffer.is_empty(),
                )
            };
            trace!("duplicate ACK #{} for {}", count, segment.ack_num);

            if count < 3 {
                let allowed: bool = match self.tcb.as_ref() {
                    Some(tcb) => tcb
                        .congestion_control
                        .allows_limited_transmit(flight_size, snd_wnd, has_unsent),
                    None => false,
                };
                if allowed {
                    // RFC 3042: one new segment, without touching cwnd.
                    trace!("limited transmit: sending one segment of new data");
                    let smss: usize = self.tcb.as_ref().map_or(0, |tcb| tcb.smss());
                    self.emit_data_segment(smss);
                }
            } else if count == 3 {
                let may_enter: bool = match self.tcb.as_ref() {
                    Some(tcb) => tcb.congestion_control.may_enter_fast_retransmit(segment.ack_num),
                    None => false,
                };
                if may_enter {
                    debug!("third duplicate ACK: fast retransmit");
                    if let Some(tcb) = self.tcb.as_mut() {
                        tcb.congestion_control.enter_fast_retransmit(flight_size, snd_nxt);
                    }
                    self.retransmit_earliest_segment();
                }
            } else {
                // Each further duplicate ACK means another segment left the network.
                if let Some(tcb) = self.tcb.as_mut() {
                    tcb.congestion_control.inflate();
                }
                self.try_send_previously_unsent_data();
            }
            return;
        }

        // Fast recovery only begins at the third duplicate ACK; one or two of them are a benign
        // reordering that the next cumulative ACK simply clears.
        let in_recovery: bool = match self.tcb.as_ref() {
            Some(tcb) => tcb.congestion_control.in_fast_recovery(),
            None => return,
        };
        if in_recovery {
            if acked_bytes == 0 {
                return;
            }
            let full_acknowledgment: bool = match self.tcb.as_ref() {
                Some(tcb) => tcb.congestion_control.is_full_acknowledgment(segment.ack_num),
                None => return,
            };
            if !new_reno || full_acknowledgment {
                debug!("leaving fast recovery");
                if let Some(tcb) = self.tcb.as_mut() {
                    tcb.congestion_control.exit_fast_recovery();
                }
            } else {
                // NewReno partial acknowledgment: the next hole starts at the new SND.UNA.
                debug!("partial acknowledgment inside fast recovery");
                self.retransmit_earliest_segment();
                if let Some(tcb) = self.tcb.as_mut() {
                    tcb.congestion_control.on_partial_acknowledgment(acked_bytes);
                }
                self.try_send_previously_unsent_data();
            }
            return;
        }

        if acked_bytes > 0 {
            if let Some(tcb) = self.tcb.as_mut() {
                // Any duplicate ACKs counted so far were reordering, not loss.
                tcb.congestion_control.reset_duplicate_acks();
                tcb.congestion_control.on_new_data_acked(acked_bytes);
            }
        }
    }

    // Segment-text processing (RFC 9293, Section 3.10.7.4 step 7).  Returns whether an
    // out-of-order FIN became deliverable by this segment's data.
    fn process_payload(&mut self, segment: &mut Segment) -> Result<bool, Fail> {
        if segment.payload.is_empty() {
            return Ok(false);
        }

        match self.state {
            State::Established | State::FinWait1 | State::FinWait2 => (),
            state => {
                // A FIN has already been received from the peer; ignore the text.
                warn!("ignoring data received in {:?}", state);
                segment.fin = false;
                return Ok(false);
            },
        }

        let Some(tcb) = self.tcb.as_mut() else {
            return Err(Fail::connection_does_not_exist());
        };

        let out_of_order: bool = segment.seq_num != tcb.rcv_nxt();
        let mut fin_became_ready: bool = false;
        if out_of_order {
            if segment.fin {
                // Park the FIN; it becomes processable once the gap before it closes.
                tcb.receive_buffer.park_out_of_order_fin(segment.end_seq() - SeqNumber::from(1));
                segment.fin = false;
            }
            let payload: Vec<u8> = std::mem::take(&mut segment.payload);
            tcb.receive_buffer.receive(segment.seq_num, payload);
            // An immediate ACK for out-of-order data feeds the peer's fast retransmit.
            trace!("out-of-order segment; sending duplicate ACK");
            self.queue_pure_ack();
        } else {
            let payload: Vec<u8> = std::mem::take(&mut segment.payload);
            fin_became_ready = tcb.receive_buffer.receive(segment.seq_num, payload);
            // The segment's text has been consumed; a trailing FIN now sits at RCV.NXT.
            segment.seq_num = tcb.rcv_nxt();
            self.events.push_back(ConnectionEvent::DataReadable);
            self.queue_pure_ack();
        }

        Ok(fin_became_ready)
    }

    // FIN processing (RFC 9293, Section 3.10.7.4 step 8).  `fin_became_ready` marks a FIN parked
    // earlier whose preceding data just arrived.
    fn process_fin(&mut self, segment: &Segment, fin_became_ready: bool) {
        let fin_in_order: bool = fin_became_ready
            || (segment.fin && self.tcb.as_ref().map_or(false, |tcb| segment.seq_num == tcb.rcv_nxt()));
        if !fin_in_order {
            return;
        }

        info!("peer closed its side of the connection");
        if let Some(tcb) = self.tcb.as_mut() {
            tcb.receive_buffer.advance_over_fin();
        }
        self.events.push_back(ConnectionEvent::ConnectionClosing);
        // A FIN implies PUSH for any text not yet delivered.
        self.events.push_back(ConnectionEvent::DataReadable);
        self.queue_pure_ack();

        match self.state {
            State::SynReceived | State::Established => self.state = State::CloseWait,
            State::FinWait1 => {
                if self.tcb.as_ref().map_or(false, |tcb| tcb.our_fin_acked(segment.ack_num)) {
                    self.enter_time_wait();
                } else {
                    // Simultaneous close.
                    self.state = State::Closing;
                }
            },
            State::FinWait2 => self.enter_time_wait(),
            State::TimeWait => {
                self.timers.arm(TimerKind::TimeWait, self.now + 2 * self.config.get_msl());
            },
            // CLOSE-WAIT, CLOSING, LAST-ACK: stay.
            _ => (),
        }
    }

    //==================================================================================================================
    // Timers
    //==================================================================================================================

    // USER TIMEOUT (RFC 9293, Section 3.10.8): flush all queues, signal the user, delete the TCB.
    fn user_timeout(&mut self) {
        let cause: Fail = Fail::user_timeout_expired();
        warn!("{:?}", cause);
        if let Some(tcb) = self.tcb.as_mut() {
            tcb.send_buffer.fail_all(&cause);
            tcb.retransmission_queue.fail_all(&cause);
            tcb.receive_buffer.release();
        }
        self.delete_tcb(Some(cause));
    }

    // RETRANSMISSION TIMEOUT (RFC 6298, Section 5): resend the earliest outstanding segment, back
    // the timer off, and collapse the congestion window.
    fn retransmission_timeout(&mut self) {
        if self.tcb.is_none() {
            return;
        }

        self.retransmit_earliest_segment();

        let Some(tcb) = self.tcb.as_mut() else {
            return;
        };
        tcb.rto_calculator.back_off();
        let rto: Duration = tcb.rto_calculator.rto();
        let flight_size: u32 = tcb.flight_size();
        let eff_mss: u32 = tcb.eff_snd_mss() as u32;
        let snd_nxt: SeqNumber = tcb.snd_nxt;
        debug!("retransmission timeout; rto backed off to {:?}", rto);
        tcb.congestion_control.on_retransmission_timeout(flight_size, eff_mss, snd_nxt);
        self.timers.arm(TimerKind::Retransmission, self.now + rto);
    }

    // TIME-WAIT TIMEOUT (RFC 9293, Section 3.10.8): the 2*MSL linger ended; release everything.
    fn time_wait_timeout(&mut self) {
        debug!("TIME-WAIT expired; closing");
        self.delete_tcb(None);
    }

    // Zero-window probe: force one byte into a closed window to solicit a window update.
    fn zero_window_probe(&mut self) {
        let Some(tcb) = self.tcb.as_ref() else {
            return;
        };
        if tcb.snd_wnd != 0 || tcb.send_buffer.is_empty() {
            return;
        }
        debug!("probing zero window with one byte");
        self.emit_data_segment(1);
        let rto: Duration = match self.tcb.as_ref() {
            Some(tcb) => tcb.rto_calculator.rto(),
            None => return,
        };
        self.timers.arm(TimerKind::ZeroWindowProbe, self.now + rto);
    }

    // Nagle override: the deferral has gone on long enough; force a segmentization pass.
    fn nagle_override_timeout(&mut self) {
        if let Some(tcb) = self.tcb.as_mut() {
            tcb.override_pending = true;
        }
        self.try_send_previously_unsent_data();
    }

    fn arm_user_timer(&mut self) {
        self.timers.arm(TimerKind::User, self.now + self.config.get_user_timeout());
    }

    //==================================================================================================================
    // Transmission
    //==================================================================================================================

    // Segmentizes as much buffered data as the windows and the silly-window-syndrome avoidance
    // test allow, then emits the FIN if a CLOSE is pending and all data has drained.
    fn try_send_previously_unsent_data(&mut self) {
        if !matches!(self.state, State::Established | State::CloseWait) {
            return;
        }

        let mut sent_any: bool = false;
        loop {
            let (deferred, to_send): (bool, usize) = {
                let Some(tcb) = self.tcb.as_ref() else {
                    return;
                };
                let buffered: usize = tcb.send_buffer.readable_bytes();
                if buffered == 0 {
                    break;
                }
                let usable: usize = tcb.usable_window() as usize;
                if usable == 0 {
                    // Blocked on the window, not on Nagle; acknowledgments (or the zero-window
                    // probe) will start the flow again.
                    break;
                }
                if !tcb.sender_may_transmit(self.config.get_no_delay(), self.config.get_fs()) {
                    (true, 0)
                } else {
                    (false, buffered.min(usable).min(tcb.eff_snd_mss()))
                }
            };

            if deferred {
                if !self.timers.is_armed(TimerKind::NagleOverride) {
                    trace!("transmission deferred; arming override timer");
                    self.timers
                        .arm(TimerKind::NagleOverride, self.now + self.config.get_override_timeout());
                }
                break;
            }

            self.emit_data_segment(to_send);
            sent_any = true;
            if let Some(tcb) = self.tcb.as_mut() {
                tcb.override_pending = false;
            }
        }

        // All data drained: a pending CLOSE may now emit its FIN.
        let emit_fin: bool = match self.tcb.as_mut() {
            Some(tcb) => tcb.fin_seq.is_none() && tcb.send_buffer.take_end_of_stream(),
            None => false,
        };
        if emit_fin {
            self.send_fin();
        }

        if sent_any {
            self.timers.cancel(TimerKind::NagleOverride);
        }
    }

    // Reads up to `max_bytes` off the send buffer and ships them as one segment.
    fn emit_data_segment(&mut self, max_bytes: usize) {
        if max_bytes == 0 {
            return;
        }
        let segment: Option<(Segment, Vec<Completion>)> = {
            let Some(tcb) = self.tcb.as_mut() else {
                return;
            };
            let chunk = tcb.send_buffer.read(max_bytes);
            if chunk.data.is_empty() {
                None
            } else {
                let mut segment: Segment = Segment::new(tcb.snd_nxt);
                segment.ack = true;
                segment.ack_num = tcb.rcv_nxt();
                segment.psh = chunk.push;
                segment.payload = chunk.data;
                tcb.snd_nxt = tcb.snd_nxt + SeqNumber::from(segment.payload.len() as u32);
                Some((segment, chunk.completions))
            }
        };
        if let Some((mut segment, completions)) = segment {
            self.stamp_timestamps(&mut segment);
            self.transmit_tracked(segment, completions);
        }
    }

    // Emits our FIN and performs the associated state transition.
    fn send_fin(&mut self) {
        let segment: Option<Segment> = {
            let Some(tcb) = self.tcb.as_mut() else {
                return;
            };
            let mut segment: Segment = Segment::new(tcb.snd_nxt);
            segment.ack = true;
            segment.ack_num = tcb.rcv_nxt();
            segment.fin = true;
            tcb.fin_seq = Some(tcb.snd_nxt);
            tcb.snd_nxt = tcb.snd_nxt + SeqNumber::from(1);
            Some(segment)
        };
        if let Some(mut segment) = segment {
            self.stamp_timestamps(&mut segment);
            self.transmit_tracked(segment, Vec::new());
        }

        match self.state {
            // Active close.
            State::Established => self.state = State::FinWait1,
            // Passive close.
            State::CloseWait => self.state = State::LastAck,
            state => warn!("sent FIN in unexpected state {:?}", state),
        }
        debug!("sent FIN; entering {:?}", self.state);
    }

    // Places a segment on the outgoing queue and a copy of it on the retransmission queue, and
    // makes sure the retransmission and user timers are running.
    fn transmit_tracked(&mut self, segment: Segment, completions: Vec<Completion>) {
        let rto: Duration = {
            let Some(tcb) = self.tcb.as_mut() else {
                return;
            };
            tcb.retransmission_queue.add(segment.clone(), self.now, completions);
            tcb.outgoing.place(segment);
            tcb.rto_calculator.rto()
        };
        if !self.timers.is_armed(TimerKind::Retransmission) {
            self.timers.arm(TimerKind::Retransmission, self.now + rto);
        }
        if !self.timers.is_armed(TimerKind::User) {
            self.arm_user_timer();
        }
    }

    // Re-sends the earliest unacknowledged segment: same sequence number, flags, and payload, but
    // fresh acknowledgment and options.
    fn retransmit_earliest_segment(&mut self) {
        let segment: Option<Segment> = {
            let Some(tcb) = self.tcb.as_mut() else {
                return;
            };
            tcb.retransmission_queue.retransmission_segment().map(|stored| {
                let mut segment: Segment = Segment::new(stored.seq_num);
                segment.syn = stored.syn;
                segment.fin = stored.fin;
                segment.psh = stored.psh;
                segment.ack = stored.ack;
                segment.payload = stored.payload;
                if segment.ack {
                    segment.ack_num = tcb.rcv_nxt();
                }
                if segment.syn {
                    segment.push_option(SegmentOption::MaximumSegmentSize(
                        self.config.get_advertised_mss() as u16,
                    ));
                }
                segment
            })
        };
        if let Some(mut segment) = segment {
            debug!("retransmitting seq={} len={}", segment.seq_num, segment.len());
            self.stamp_timestamps(&mut segment);
            if let Some(tcb) = self.tcb.as_mut() {
                tcb.outgoing.place(segment);
            }
        }
    }

    // Builds our SYN or SYN+ACK, carrying the MSS option and, when configured, the timestamps
    // option that negotiates round-trip measurement.
    fn form_syn(&mut self, iss: SeqNumber, with_ack: bool) -> Segment {
        let mut segment: Segment = Segment::new(iss);
        segment.syn = true;
        segment.push_option(SegmentOption::MaximumSegmentSize(
            self.config.get_advertised_mss() as u16,
        ));
        if with_ack {
            segment.ack = true;
            if let Some(tcb) = self.tcb.as_ref() {
                segment.ack_num = tcb.rcv_nxt();
            }
        }
        if self.config.get_timestamps() {
            let ts_ecr: u32 = self.tcb.as_ref().map_or(0, |tcb| if tcb.snd_ts_ok { tcb.ts_recent } else { 0 });
            let ts_val: u32 = self.now_timestamp();
            segment.push_option(SegmentOption::Timestamps { ts_val, ts_ecr });
        }
        segment
    }

    // Queues a pure acknowledgment <SEQ=SND.NXT><ACK=RCV.NXT><CTL=ACK>.
    fn queue_pure_ack(&mut self) {
        let segment: Option<Segment> = self.tcb.as_ref().map(|tcb| {
            let mut segment: Segment = Segment::new(tcb.snd_nxt);
            segment.ack = true;
            segment.ack_num = tcb.rcv_nxt();
            segment
        });
        if let Some(mut segment) = segment {
            self.stamp_timestamps(&mut segment);
            if let Some(tcb) = self.tcb.as_mut() {
                tcb.outgoing.place(segment);
            }
        }
    }

    // RFC 7323: once negotiated, every non-RST segment carries <TSval=now, TSecr=TS.Recent>.
    fn stamp_timestamps(&mut self, segment: &mut Segment) {
        let ts_recent: Option<u32> = match self.tcb.as_ref() {
            Some(tcb) if tcb.snd_ts_ok && !segment.rst => Some(tcb.ts_recent),
            _ => None,
        };
        if let Some(ts_ecr) = ts_recent {
            let ts_val: u32 = self.now_timestamp();
            segment.push_option(SegmentOption::Timestamps { ts_val, ts_ecr });
        }
    }

    // Millisecond timestamp for the timestamps option clock.
    fn now_timestamp(&self) -> u32 {
        self.now.duration_since(self.ts_clock_base).as_millis() as u32
    }

    // Coalesces and flushes the outgoing queue, stamping the current receive window on every
    // segment and recording Last.ACK.sent.
    fn flush_outgoing(&mut self) {
        let window: u32 = match self.tcb.as_ref() {
            Some(tcb) => tcb.rcv_wnd(),
            None => return,
        };
        let last_ack_sent: Option<u32> = match self.tcb.as_mut() {
            Some(tcb) => tcb.outgoing.flush(&mut self.transport, window),
            None => None,
        };
        if let (Some(ack), Some(tcb)) = (last_ack_sent, self.tcb.as_mut()) {
            tcb.last_ack_sent = SeqNumber::from(ack);
        }
    }

    //==================================================================================================================
    // Teardown
    //==================================================================================================================

    // Entering TIME-WAIT arms the 2*MSL timer and turns off every other timer.
    fn enter_time_wait(&mut self) {
        self.state = State::TimeWait;
        self.timers.cancel(TimerKind::User);
        self.timers.cancel(TimerKind::Retransmission);
        self.timers.cancel(TimerKind::ZeroWindowProbe);
        self.timers.cancel(TimerKind::NagleOverride);
        self.timers.arm(TimerKind::TimeWait, self.now + 2 * self.config.get_msl());
    }

    // The single exit path to CLOSED: cancels every timer, fails anything still pending, releases
    // the control block, and signals the application.  With a cause, the teardown is an error that
    // is broadcast; without one it is the orderly end of the close sequence.
    fn delete_tcb(&mut self, cause: Option<Fail>) {
        self.timers.cancel_all();
        if let Some(mut tcb) = self.tcb.take() {
            let fail: Fail = cause.clone().unwrap_or_else(Fail::connection_closing);
            tcb.send_buffer.fail_all(&fail);
            tcb.retransmission_queue.fail_all(&fail);
            tcb.receive_buffer.release();
        }
        if let Some(completion) = self.close_completion.take() {
            match cause.clone() {
                Some(cause) => completion(Err(cause)),
                None => completion(Ok(())),
            }
        }
        if let Some(cause) = cause {
            self.events.push_back(ConnectionEvent::Error(cause));
        }
        self.state = State::Closed;
        self.events.push_back(ConnectionEvent::Closed);
        debug!("control block released; connection closed");
    }
}

// Removes entirely acknowledged segments from the retransmission queue and keeps the
// retransmission and user timers consistent with what remains outstanding (RFC 6298, rules 5.2
// and 5.3).
impl<T: SegmentTransport> ConnectionEngine<T> {
    fn remove_acknowledged_segments(&mut self, ack: SeqNumber) {
        let outcome: Option<(bool, bool, Duration)> = self.tcb.as_mut().map(|tcb| {
            let removed_any: bool = tcb.retransmission_queue.remove_acknowledged(ack);
            (
                removed_any,
                tcb.retransmission_queue.is_empty(),
                tcb.rto_calculator.rto(),
            )
        });
        let Some((removed_any, now_empty, rto)) = outcome else {
            return;
        };
        if !removed_any {
            return;
        }
        if now_empty {
            trace!("all outstanding data acknowledged; stopping retransmission timer");
            self.timers.cancel(TimerKind::Retransmission);
            self.timers.cancel(TimerKind::User);
        } else {
            trace!("new data acknowledged; restarting retransmission timer");
            self.timers.arm(TimerKind::Retransmission, self.now + rto);
            self.arm_user_timer();
        }
    }
}
