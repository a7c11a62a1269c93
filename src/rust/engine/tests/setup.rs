// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use crate::{
    engine::{
        config::ConnectionConfig,
        connection::{ConnectionEngine, ConnectionEvent, State},
        segment::{Segment, SegmentOption},
        sequence_number::SeqNumber,
        tests::{check_segment_pure_ack, TestTransport},
    },
    runtime::logging,
};
use ::anyhow::Result;
use ::std::time::{Duration, Instant};

//=============================================================================

pub type TestEngine = ConnectionEngine<TestTransport>;

/// Initial send sequence number of the scripted peer used by single-engine tests.  Engines under
/// test pick ISS 0, so this being elsewhere in the space catches seq/ack mix-ups.
pub const PEER_ISS: u32 = 12_345;

/// Receive window the scripted peer advertises unless a test narrows it.
pub const PEER_WINDOW: u32 = 65_535;

/// Maximum segment size both sides advertise in these tests.
pub const TEST_MSS: usize = 1450;

//=============================================================================

pub fn new_engine(config: ConnectionConfig, now: Instant) -> TestEngine {
    logging::initialize();
    ConnectionEngine::new(config, TestTransport::new(), now)
}

//=============================================================================

/// Advances the shared test clock by one millisecond on every given engine.
pub fn advance_clock(server: Option<&mut TestEngine>, client: Option<&mut TestEngine>, now: &mut Instant) {
    *now += Duration::from_millis(1);
    if let Some(server) = server {
        server.advance_clock(*now);
    }
    if let Some(client) = client {
        client.advance_clock(*now);
    }
}

/// Jumps the clock forward by `delta` and fires every timer that became due.
pub fn advance_and_fire(engine: &mut TestEngine, now: &mut Instant, delta: Duration) {
    *now += delta;
    engine.advance_clock(*now);
    engine.poll_timers();
}

//=============================================================================

/// Drains the engine's pending application events.
pub fn drain_events(engine: &mut TestEngine) -> Vec<ConnectionEvent> {
    let mut events: Vec<ConnectionEvent> = Vec::new();
    while let Some(event) = engine.poll_event() {
        events.push(event);
    }
    events
}

//=============================================================================
// Scripted-peer segment builders.

pub fn peer_pure_ack(seq: u32, ack: u32, window: u32) -> Segment {
    let mut segment: Segment = Segment::new(SeqNumber::from(seq));
    segment.ack = true;
    segment.ack_num = SeqNumber::from(ack);
    segment.window_size = window;
    segment
}

pub fn peer_data_segment(seq: u32, ack: u32, window: u32, payload: Vec<u8>) -> Segment {
    let mut segment: Segment = peer_pure_ack(seq, ack, window);
    segment.payload = payload;
    segment
}

pub fn peer_fin(seq: u32, ack: u32, window: u32) -> Segment {
    let mut segment: Segment = peer_pure_ack(seq, ack, window);
    segment.fin = true;
    segment
}

pub fn peer_syn_ack(ack: u32, window: u32) -> Segment {
    let mut segment: Segment = Segment::new(SeqNumber::from(PEER_ISS));
    segment.syn = true;
    segment.ack = true;
    segment.ack_num = SeqNumber::from(ack);
    segment.window_size = window;
    segment.push_option(SegmentOption::MaximumSegmentSize(TEST_MSS as u16));
    segment
}

pub fn peer_syn(window: u32) -> Segment {
    let mut segment: Segment = Segment::new(SeqNumber::from(PEER_ISS));
    segment.syn = true;
    segment.window_size = window;
    segment.push_option(SegmentOption::MaximumSegmentSize(TEST_MSS as u16));
    segment
}

//=============================================================================

/// Drives an active-open engine to ESTABLISHED against the scripted peer, checking every
/// handshake frame on the way.  The engine comes back with SND.UNA = SND.NXT = ISS+1 and
/// RCV.NXT = PEER_ISS+1, its event queue drained.
pub fn established_engine(config: ConnectionConfig, now: &mut Instant) -> Result<TestEngine> {
    let mut engine: TestEngine = new_engine(config, *now);
    engine.open()?;
    crate::ensure_eq!(engine.state(), State::SynSent);

    let syn: Segment = engine.transport_mut().pop_frame();
    crate::ensure_eq!(syn.syn, true);
    crate::ensure_eq!(syn.ack, false);
    crate::ensure_eq!(syn.seq_num, SeqNumber::from(0));
    crate::ensure_eq!(engine.transport_mut().frame_count(), 0);

    advance_clock(None, Some(&mut engine), now);
    engine.on_segment(peer_syn_ack(1, PEER_WINDOW));
    crate::ensure_eq!(engine.state(), State::Established);

    let ack: Segment = engine.transport_mut().pop_frame();
    check_segment_pure_ack(&ack, SeqNumber::from(PEER_ISS + 1));
    crate::ensure_eq!(engine.transport_mut().frame_count(), 0);

    drain_events(&mut engine);
    Ok(engine)
}

//=============================================================================

/// Performs the three-way handshake between two engines by shuttling frames, leaving both
/// ESTABLISHED with their event queues drained.
pub fn connection_setup(now: &mut Instant, server: &mut TestEngine, client: &mut TestEngine) -> Result<()> {
    // Server: LISTEN state at T(0).
    server.open()?;
    crate::ensure_eq!(server.state(), State::Listen);

    // Client: SYN_SENT state at T(0).
    client.open()?;
    crate::ensure_eq!(client.state(), State::SynSent);
    let syn: Segment = client.transport_mut().pop_frame();

    // T(0) -> T(1)
    advance_clock(Some(server), Some(client), now);

    // Server: SYN_RCVD state at T(1).
    server.on_segment(syn);
    crate::ensure_eq!(server.state(), State::SynReceived);
    let syn_ack: Segment = server.transport_mut().pop_frame();

    // T(1) -> T(2)
    advance_clock(Some(server), Some(client), now);

    // Client: ESTABLISHED state at T(2).
    client.on_segment(syn_ack);
    crate::ensure_eq!(client.state(), State::Established);
    let ack: Segment = client.transport_mut().pop_frame();

    // T(2) -> T(3)
    advance_clock(Some(server), Some(client), now);

    // Server: ESTABLISHED state at T(3).
    server.on_segment(ack);
    crate::ensure_eq!(server.state(), State::Established);
    crate::ensure_eq!(server.transport_mut().frame_count(), 0);
    crate::ensure_eq!(client.transport_mut().frame_count(), 0);

    drain_events(server);
    drain_events(client);
    Ok(())
}

//=============================================================================

#[test]
fn test_connection_setup() -> Result<()> {
    let mut now: Instant = Instant::now();

    let mut server: TestEngine = new_engine(ConnectionConfig::default().set_active_open(false), now);
    let mut client: TestEngine = new_engine(ConnectionConfig::default(), now);

    connection_setup(&mut now, &mut server, &mut client)?;

    // Both sides agree on the sequence spaces.
    let (_, server_tcb) = server.status();
    let (_, client_tcb) = client.status();
    let Some(server_tcb) = server_tcb else {
        anyhow::bail!("server should have a control block");
    };
    let Some(client_tcb) = client_tcb else {
        anyhow::bail!("client should have a control block");
    };
    crate::ensure_eq!(server_tcb.rcv_nxt, client_tcb.snd_nxt);
    crate::ensure_eq!(client_tcb.rcv_nxt, server_tcb.snd_nxt);
    crate::ensure_eq!(client_tcb.smss, TEST_MSS);
    crate::ensure_eq!(server_tcb.smss, TEST_MSS);

    Ok(())
}
