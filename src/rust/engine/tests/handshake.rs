// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use crate::engine::{
    config::ConnectionConfig,
    connection::{ConnectionEvent, State},
    segment::{Segment, SegmentOption},
    sequence_number::SeqNumber,
    tests::{
        check_segment_pure_ack,
        setup::{
            advance_and_fire, advance_clock, drain_events, new_engine, peer_data_segment, peer_pure_ack, peer_syn,
            peer_syn_ack, TestEngine, PEER_ISS, PEER_WINDOW, TEST_MSS,
        },
    },
};
use ::anyhow::Result;
use ::libc::{ECONNREFUSED, EEXIST, ENOTCONN};
use ::std::time::{Duration, Instant};

//=============================================================================

/// An active OPEN sends exactly one SYN; the peer's SYN+ACK completes the handshake with exactly
/// one ACK in response.
#[test]
fn test_active_open_handshake() -> Result<()> {
    let mut now: Instant = Instant::now();
    let mut engine: TestEngine = new_engine(ConnectionConfig::default(), now);

    engine.open()?;
    crate::ensure_eq!(engine.state(), State::SynSent);

    let syn: Segment = engine.transport_mut().pop_frame();
    crate::ensure_eq!(syn.syn, true);
    crate::ensure_eq!(syn.ack, false);
    crate::ensure_eq!(syn.seq_num, SeqNumber::from(0));
    crate::ensure_eq!(syn.mss_option(), Some(TEST_MSS as u16));
    crate::ensure_eq!(engine.transport_mut().frame_count(), 0);
    crate::ensure_eq!(engine.transport_mut().flushes() >= 1, true);

    // <SEQ=PEER_ISS><ACK=ISS+1><CTL=SYN,ACK>
    advance_clock(None, Some(&mut engine), &mut now);
    engine.on_segment(peer_syn_ack(1, PEER_WINDOW));
    crate::ensure_eq!(engine.state(), State::Established);

    let ack: Segment = engine.transport_mut().pop_frame();
    check_segment_pure_ack(&ack, SeqNumber::from(PEER_ISS + 1));
    crate::ensure_eq!(ack.seq_num, SeqNumber::from(1));
    crate::ensure_eq!(engine.transport_mut().frame_count(), 0);

    let events: Vec<ConnectionEvent> = drain_events(&mut engine);
    crate::ensure_eq!(matches!(events[0], ConnectionEvent::HandshakeIssued), true);
    crate::ensure_eq!(
        events.iter().any(|e| matches!(e, ConnectionEvent::HandshakeCompleted)),
        true
    );

    let (_, snapshot) = engine.status();
    let Some(snapshot) = snapshot else {
        anyhow::bail!("engine should have a control block");
    };
    crate::ensure_eq!(snapshot.snd_una, SeqNumber::from(1));
    crate::ensure_eq!(snapshot.snd_nxt, SeqNumber::from(1));
    crate::ensure_eq!(snapshot.irs, SeqNumber::from(PEER_ISS));
    crate::ensure_eq!(snapshot.rcv_nxt, SeqNumber::from(PEER_ISS + 1));
    crate::ensure_eq!(snapshot.snd_wnd, PEER_WINDOW);
    crate::ensure_eq!(snapshot.smss, TEST_MSS);

    Ok(())
}

//=============================================================================

/// A passive OPEN listens silently; the peer's SYN draws exactly one SYN+ACK, whose
/// acknowledgment completes the handshake.
#[test]
fn test_passive_open_handshake() -> Result<()> {
    let mut now: Instant = Instant::now();
    let mut engine: TestEngine = new_engine(ConnectionConfig::default().set_active_open(false), now);

    engine.open()?;
    crate::ensure_eq!(engine.state(), State::Listen);
    crate::ensure_eq!(engine.transport_mut().frame_count(), 0);
    crate::ensure_eq!(engine.poll_event().is_none(), true);

    advance_clock(None, Some(&mut engine), &mut now);
    engine.on_segment(peer_syn(PEER_WINDOW));
    crate::ensure_eq!(engine.state(), State::SynReceived);

    let syn_ack: Segment = engine.transport_mut().pop_frame();
    crate::ensure_eq!(syn_ack.syn, true);
    crate::ensure_eq!(syn_ack.ack, true);
    crate::ensure_eq!(syn_ack.seq_num, SeqNumber::from(0));
    crate::ensure_eq!(syn_ack.ack_num, SeqNumber::from(PEER_ISS + 1));
    crate::ensure_eq!(syn_ack.mss_option(), Some(TEST_MSS as u16));
    crate::ensure_eq!(engine.transport_mut().frame_count(), 0);

    advance_clock(None, Some(&mut engine), &mut now);
    engine.on_segment(peer_pure_ack(PEER_ISS + 1, 1, PEER_WINDOW));
    crate::ensure_eq!(engine.state(), State::Established);
    crate::ensure_eq!(engine.transport_mut().frame_count(), 0);

    let events: Vec<ConnectionEvent> = drain_events(&mut engine);
    crate::ensure_eq!(
        events.iter().any(|e| matches!(e, ConnectionEvent::HandshakeCompleted)),
        true
    );

    Ok(())
}

//=============================================================================

/// Two crossing SYNs still converge on ESTABLISHED (simultaneous open).
#[test]
fn test_simultaneous_open() -> Result<()> {
    let mut now: Instant = Instant::now();
    let mut engine: TestEngine = new_engine(ConnectionConfig::default(), now);

    engine.open()?;
    let _syn: Segment = engine.transport_mut().pop_frame();

    // The peer's SYN crosses ours on the wire.
    advance_clock(None, Some(&mut engine), &mut now);
    engine.on_segment(peer_syn(PEER_WINDOW));
    crate::ensure_eq!(engine.state(), State::SynReceived);

    let syn_ack: Segment = engine.transport_mut().pop_frame();
    crate::ensure_eq!(syn_ack.syn, true);
    crate::ensure_eq!(syn_ack.ack, true);
    crate::ensure_eq!(syn_ack.seq_num, SeqNumber::from(0));
    crate::ensure_eq!(syn_ack.ack_num, SeqNumber::from(PEER_ISS + 1));

    advance_clock(None, Some(&mut engine), &mut now);
    engine.on_segment(peer_pure_ack(PEER_ISS + 1, 1, PEER_WINDOW));
    crate::ensure_eq!(engine.state(), State::Established);

    Ok(())
}

//=============================================================================

/// A lost SYN is retransmitted once the retransmission timer fires, with the timeout doubled.
#[test]
fn test_syn_retransmission_backs_off() -> Result<()> {
    let mut now: Instant = Instant::now();
    let mut engine: TestEngine = new_engine(ConnectionConfig::default(), now);

    engine.open()?;
    let _syn: Segment = engine.transport_mut().pop_frame();

    let (_, snapshot) = engine.status();
    let Some(snapshot) = snapshot else {
        anyhow::bail!("engine should have a control block");
    };
    let rto: Duration = snapshot.rto;
    crate::ensure_eq!(rto, Duration::from_secs(1));

    advance_and_fire(&mut engine, &mut now, rto + Duration::from_millis(100));
    crate::ensure_eq!(engine.state(), State::SynSent);

    let retransmitted: Segment = engine.transport_mut().pop_frame();
    crate::ensure_eq!(retransmitted.syn, true);
    crate::ensure_eq!(retransmitted.seq_num, SeqNumber::from(0));
    crate::ensure_eq!(retransmitted.mss_option(), Some(TEST_MSS as u16));

    let (_, snapshot) = engine.status();
    let Some(snapshot) = snapshot else {
        anyhow::bail!("engine should have a control block");
    };
    crate::ensure_eq!(snapshot.rto, rto * 2);

    Ok(())
}

//=============================================================================

/// A RST answering our SYN refuses the connection: pending sends fail with ECONNREFUSED and the
/// failure is broadcast.
#[test]
fn test_connection_refused_by_reset() -> Result<()> {
    let mut now: Instant = Instant::now();
    let mut engine: TestEngine = new_engine(ConnectionConfig::default(), now);

    engine.open()?;
    let _syn: Segment = engine.transport_mut().pop_frame();

    // Data handed over before the handshake finishes just waits in the send buffer.
    let (completion, slot) = super::recording_completion();
    engine.send(super::cook_buffer(64, None), completion);
    crate::ensure_eq!(engine.transport_mut().frame_count(), 0);
    crate::ensure_eq!(slot.borrow().is_none(), true);

    // <SEQ=0><ACK=ISS+1><CTL=RST,ACK>
    advance_clock(None, Some(&mut engine), &mut now);
    let mut rst: Segment = peer_pure_ack(0, 1, 0);
    rst.rst = true;
    engine.on_segment(rst);

    crate::ensure_eq!(engine.state(), State::Closed);
    match slot.borrow().as_ref() {
        Some(Err(e)) => crate::ensure_eq!(e.errno, ECONNREFUSED),
        _ => anyhow::bail!("pending send should have failed"),
    }
    let events: Vec<ConnectionEvent> = drain_events(&mut engine);
    crate::ensure_eq!(
        events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::Error(f) if f.errno == ECONNREFUSED)),
        true
    );
    crate::ensure_eq!(events.iter().any(|e| matches!(e, ConnectionEvent::Closed)), true);

    Ok(())
}

//=============================================================================

/// An ACK arriving on a listening connection cannot acknowledge anything and draws a RST.
#[test]
fn test_acknowledgment_in_listen_draws_reset() -> Result<()> {
    let mut now: Instant = Instant::now();
    let mut engine: TestEngine = new_engine(ConnectionConfig::default().set_active_open(false), now);

    engine.open()?;
    advance_clock(None, Some(&mut engine), &mut now);
    engine.on_segment(peer_pure_ack(500, 77, PEER_WINDOW));

    // <SEQ=SEG.ACK><CTL=RST>
    let rst: Segment = engine.transport_mut().pop_frame();
    crate::ensure_eq!(rst.rst, true);
    crate::ensure_eq!(rst.seq_num, SeqNumber::from(77));
    crate::ensure_eq!(engine.state(), State::Listen);

    Ok(())
}

//=============================================================================

/// Segments arriving with no connection at all are answered with a reset the offending sender
/// will find acceptable; inbound resets are ignored.
#[test]
fn test_segments_on_closed_connection_draw_reset() -> Result<()> {
    let now: Instant = Instant::now();
    let mut engine: TestEngine = new_engine(ConnectionConfig::default(), now);

    // No ACK bit: <SEQ=0><ACK=SEG.SEQ+SEG.LEN><CTL=RST,ACK>
    let mut segment: Segment = Segment::new(SeqNumber::from(500));
    segment.payload = vec![0u8; 10];
    engine.on_segment(segment);
    let rst: Segment = engine.transport_mut().pop_frame();
    crate::ensure_eq!(rst.rst, true);
    crate::ensure_eq!(rst.ack, true);
    crate::ensure_eq!(rst.seq_num, SeqNumber::from(0));
    crate::ensure_eq!(rst.ack_num, SeqNumber::from(510));

    // ACK bit: <SEQ=SEG.ACK><CTL=RST>
    engine.on_segment(peer_pure_ack(500, 42, PEER_WINDOW));
    let rst: Segment = engine.transport_mut().pop_frame();
    crate::ensure_eq!(rst.rst, true);
    crate::ensure_eq!(rst.ack, false);
    crate::ensure_eq!(rst.seq_num, SeqNumber::from(42));

    // A reset never answers a reset.
    let mut inbound_rst: Segment = Segment::new(SeqNumber::from(500));
    inbound_rst.rst = true;
    engine.on_segment(inbound_rst);
    crate::ensure_eq!(engine.transport_mut().frame_count(), 0);

    Ok(())
}

//=============================================================================

/// OPEN on a connection that already exists fails; so does ABORT on one that does not.
#[test]
fn test_user_calls_in_wrong_state_fail() -> Result<()> {
    let now: Instant = Instant::now();
    let mut engine: TestEngine = new_engine(ConnectionConfig::default(), now);

    match engine.abort() {
        Err(e) => crate::ensure_eq!(e.errno, ENOTCONN),
        Ok(()) => anyhow::bail!("abort on a closed connection should fail"),
    }

    engine.open()?;
    match engine.open() {
        Err(e) => crate::ensure_eq!(e.errno, EEXIST),
        Ok(()) => anyhow::bail!("second open should fail"),
    }

    Ok(())
}

//=============================================================================

/// Timestamps ride every segment once both SYNs carried the option, and a segment stamped older
/// than TS.Recent is dropped after a corrective ACK (PAWS).
#[test]
fn test_timestamps_negotiation() -> Result<()> {
    let mut now: Instant = Instant::now();
    let mut engine: TestEngine = new_engine(ConnectionConfig::default().set_timestamps(true), now);

    engine.open()?;
    let syn: Segment = engine.transport_mut().pop_frame();
    crate::ensure_eq!(syn.timestamps_option().is_some(), true);

    advance_clock(None, Some(&mut engine), &mut now);
    let mut syn_ack: Segment = peer_syn_ack(1, PEER_WINDOW);
    syn_ack.push_option(SegmentOption::Timestamps { ts_val: 777, ts_ecr: 0 });
    engine.on_segment(syn_ack);
    crate::ensure_eq!(engine.state(), State::Established);

    // Our ACK echoes the peer's clock.
    let ack: Segment = engine.transport_mut().pop_frame();
    match ack.timestamps_option() {
        Some((_, ts_ecr)) => crate::ensure_eq!(ts_ecr, 777),
        None => anyhow::bail!("established segments should carry timestamps"),
    }

    // A stale timestamp makes the segment unacceptable: corrective ACK, no data delivered.
    let mut stale: Segment = peer_data_segment(PEER_ISS + 1, 1, PEER_WINDOW, vec![1, 2, 3]);
    stale.push_option(SegmentOption::Timestamps { ts_val: 700, ts_ecr: 0 });
    engine.on_segment(stale);
    let corrective: Segment = engine.transport_mut().pop_frame();
    check_segment_pure_ack(&corrective, SeqNumber::from(PEER_ISS + 1));
    crate::ensure_eq!(engine.readable_bytes(), 0);

    // A fresh timestamp is accepted and becomes the one we echo.
    let mut fresh: Segment = peer_data_segment(PEER_ISS + 1, 1, PEER_WINDOW, vec![1, 2, 3]);
    fresh.push_option(SegmentOption::Timestamps { ts_val: 800, ts_ecr: 0 });
    engine.on_segment(fresh);
    crate::ensure_eq!(engine.readable_bytes(), 3);
    let ack: Segment = engine.transport_mut().pop_frame();
    check_segment_pure_ack(&ack, SeqNumber::from(PEER_ISS + 4));
    match ack.timestamps_option() {
        Some((_, ts_ecr)) => crate::ensure_eq!(ts_ecr, 800),
        None => anyhow::bail!("established segments should carry timestamps"),
    }

    Ok(())
}
