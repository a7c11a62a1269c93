// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use crate::{
    engine::{
        config::ConnectionConfig,
        connection::{ConnectionEvent, State},
        segment::Segment,
        sequence_number::SeqNumber,
        tests::{
            check_segment_data, check_segment_pure_ack, cook_buffer, noop_completion, recording_completion,
            setup::{
                advance_and_fire, advance_clock, drain_events, established_engine, peer_data_segment, peer_pure_ack,
                TestEngine, PEER_ISS, PEER_WINDOW, TEST_MSS,
            },
        },
    },
    runtime::timer::TimerKind,
};
use ::anyhow::Result;
use ::libc::ETIMEDOUT;
use ::std::time::{Duration, Instant};

const SMSS: u32 = TEST_MSS as u32;

//=============================================================================

/// With data in flight, a sub-MSS send is held back by the Nagle test until the override timer
/// forces it out.
#[test]
fn test_nagle_defers_small_segment() -> Result<()> {
    let mut now: Instant = Instant::now();
    let mut engine: TestEngine = established_engine(ConnectionConfig::default(), &mut now)?;

    // A full segment goes out immediately and stays unacknowledged.
    engine.send(cook_buffer(TEST_MSS, None), noop_completion());
    let _frame: Segment = engine.transport_mut().pop_frame();

    // Ten more bytes: deferred, override timer armed.
    engine.send(cook_buffer(10, None), noop_completion());
    crate::ensure_eq!(engine.transport_mut().frame_count(), 0);
    crate::ensure_eq!(engine.timers().is_armed(TimerKind::NagleOverride), true);

    // The override fires after the configured delay and forces the send.
    advance_and_fire(&mut engine, &mut now, Duration::from_millis(101));
    let frame: Segment = engine.transport_mut().pop_frame();
    let len: usize = check_segment_data(&frame, SeqNumber::from(1 + SMSS), Some(SeqNumber::from(PEER_ISS + 1)));
    crate::ensure_eq!(len, 10);
    crate::ensure_eq!(engine.timers().is_armed(TimerKind::NagleOverride), false);

    Ok(())
}

//=============================================================================

/// A full segment is never deferred, and disabling Nagle sends small segments eagerly.
#[test]
fn test_nagle_exemptions() -> Result<()> {
    let mut now: Instant = Instant::now();

    // A second full-sized segment goes out despite data in flight.
    let mut engine: TestEngine = established_engine(ConnectionConfig::default(), &mut now)?;
    engine.send(cook_buffer(TEST_MSS, None), noop_completion());
    let _frame: Segment = engine.transport_mut().pop_frame();
    engine.send(cook_buffer(TEST_MSS, None), noop_completion());
    let frame: Segment = engine.transport_mut().pop_frame();
    check_segment_data(&frame, SeqNumber::from(1 + SMSS), None);

    // With noDelay, even tiny segments follow at once.
    let mut eager: TestEngine = established_engine(ConnectionConfig::default().set_no_delay(true), &mut now)?;
    eager.send(cook_buffer(TEST_MSS, None), noop_completion());
    let _frame: Segment = eager.transport_mut().pop_frame();
    eager.send(cook_buffer(10, None), noop_completion());
    let frame: Segment = eager.transport_mut().pop_frame();
    let len: usize = check_segment_data(&frame, SeqNumber::from(1 + SMSS), None);
    crate::ensure_eq!(len, 10);

    Ok(())
}

//=============================================================================

/// When the peer closes its window with data still queued, the engine probes with single bytes at
/// the retransmission timeout until the window reopens, then resumes the flow.
#[test]
fn test_zero_window_probe() -> Result<()> {
    let mut now: Instant = Instant::now();
    let mut engine: TestEngine = established_engine(ConnectionConfig::default(), &mut now)?;

    // Three segments fill the congestion window; one more stays queued behind it.
    engine.send(cook_buffer(4 * TEST_MSS, None), noop_completion());
    for _ in 0..3 {
        let _frame: Segment = engine.transport_mut().pop_frame();
    }
    crate::ensure_eq!(engine.transport_mut().frame_count(), 0);

    // The peer acknowledges everything but closes its window.
    advance_clock(None, Some(&mut engine), &mut now);
    engine.on_segment(peer_pure_ack(PEER_ISS + 1, 1 + 3 * SMSS, 0));
    crate::ensure_eq!(engine.transport_mut().frame_count(), 0);
    crate::ensure_eq!(engine.timers().is_armed(TimerKind::ZeroWindowProbe), true);

    // The probe carries exactly one byte of the queued data.
    let (_, snapshot) = engine.status();
    let Some(snapshot) = snapshot else {
        anyhow::bail!("engine should have a control block");
    };
    advance_and_fire(&mut engine, &mut now, snapshot.rto + Duration::from_millis(10));
    let probe: Segment = engine.transport_mut().pop_frame();
    let len: usize = check_segment_data(&probe, SeqNumber::from(1 + 3 * SMSS), Some(SeqNumber::from(PEER_ISS + 1)));
    crate::ensure_eq!(len, 1);

    // The peer absorbs the probe byte but stays closed: the probe is re-armed.
    advance_clock(None, Some(&mut engine), &mut now);
    engine.on_segment(peer_pure_ack(PEER_ISS + 1, 2 + 3 * SMSS, 0));
    crate::ensure_eq!(engine.timers().is_armed(TimerKind::ZeroWindowProbe), true);
    advance_and_fire(&mut engine, &mut now, snapshot.rto + Duration::from_millis(10));
    let probe: Segment = engine.transport_mut().pop_frame();
    let len: usize = check_segment_data(&probe, SeqNumber::from(2 + 3 * SMSS), None);
    crate::ensure_eq!(len, 1);

    // The window reopens: the probe stops and the rest of the queue drains.
    advance_clock(None, Some(&mut engine), &mut now);
    engine.on_segment(peer_pure_ack(PEER_ISS + 1, 3 + 3 * SMSS, PEER_WINDOW));
    crate::ensure_eq!(engine.timers().is_armed(TimerKind::ZeroWindowProbe), false);
    let frame: Segment = engine.transport_mut().pop_frame();
    let len: usize = check_segment_data(&frame, SeqNumber::from(3 + 3 * SMSS), None);
    crate::ensure_eq!(len, TEST_MSS - 2);
    crate::ensure_eq!(engine.state(), State::Established);

    Ok(())
}

//=============================================================================

/// The receiver withholds window growth until the freed space is worth advertising, then
/// announces all of it at once.
#[test]
fn test_receiver_withholds_small_window_growth() -> Result<()> {
    let mut now: Instant = Instant::now();
    let mut engine: TestEngine =
        established_engine(ConnectionConfig::default().set_receive_buffer_size(100), &mut now)?;

    // Sixty bytes arrive: the advertised window shrinks to forty.
    engine.on_segment(peer_data_segment(PEER_ISS + 1, 1, PEER_WINDOW, cook_buffer(60, None)));
    let ack: Segment = engine.transport_mut().pop_frame();
    check_segment_pure_ack(&ack, SeqNumber::from(PEER_ISS + 61));
    crate::ensure_eq!(ack.window_size, 40);

    // Freeing twenty bytes is below min(capacity/2, MSS): no window update goes out.
    crate::ensure_eq!(engine.receive(20).len(), 20);
    crate::ensure_eq!(engine.transport_mut().frame_count(), 0);

    // Freeing the rest crosses the threshold: one update advertising the full buffer.
    crate::ensure_eq!(engine.receive(40).len(), 40);
    let update: Segment = engine.transport_mut().pop_frame();
    check_segment_pure_ack(&update, SeqNumber::from(PEER_ISS + 61));
    crate::ensure_eq!(update.window_size, 100);

    Ok(())
}

//=============================================================================

/// Unacknowledged data outliving the user timeout aborts the connection: pending completions fail
/// with ETIMEDOUT and the failure is broadcast.
#[test]
fn test_user_timeout_aborts_connection() -> Result<()> {
    let mut now: Instant = Instant::now();
    let mut engine: TestEngine = established_engine(ConnectionConfig::default(), &mut now)?;

    let (completion, slot) = recording_completion();
    engine.send(cook_buffer(TEST_MSS, None), completion);
    let _frame: Segment = engine.transport_mut().pop_frame();

    // The retransmission timer fires (and backs off) along the way; the user timer wins in the
    // end.
    advance_and_fire(&mut engine, &mut now, Duration::from_secs(61));
    crate::ensure_eq!(engine.state(), State::Closed);
    match slot.borrow().as_ref() {
        Some(Err(e)) => crate::ensure_eq!(e.errno, ETIMEDOUT),
        _ => anyhow::bail!("pending send should have failed"),
    }
    let events: Vec<ConnectionEvent> = drain_events(&mut engine);
    crate::ensure_eq!(
        events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::Error(f) if f.errno == ETIMEDOUT)),
        true
    );
    crate::ensure_eq!(events.iter().any(|e| matches!(e, ConnectionEvent::Closed)), true);
    crate::ensure_eq!(engine.timers().is_armed(TimerKind::Retransmission), false);

    Ok(())
}
