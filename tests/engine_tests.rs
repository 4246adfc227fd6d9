//! Engine state-machine scenarios on the simulated endpoint.
//!
//! These run the full three-thread pipeline in real time (the simulated
//! device retires frames against a monotonic clock), so assertions wait on
//! observable state rather than fixed sleeps.

use std::time::{Duration, Instant};

use playhead::audio::simulated::SimulatedEndpoint;
use playhead::playback::{PcmSource, PlayerEngine, PlayerState, SineSource};

const SAMPLE_RATE: u32 = 48_000;

fn fast_endpoint() -> SimulatedEndpoint {
    SimulatedEndpoint::new().with_period(Duration::from_millis(5))
}

fn sine_engine() -> PlayerEngine {
    PlayerEngine::new(fast_endpoint(), Box::new(SineSource::new(440.0)))
}

fn wait_for_state(engine: &PlayerEngine, expected: PlayerState, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        let state = engine.get_state();
        if state == expected {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {:?}; currently {:?} (last_error: {})",
            expected,
            state,
            engine.get_status().last_error
        );
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Wait for an observable condition; seek/replay leave the state at
/// Playing, so waiting on the state alone would race the command.
fn wait_until(engine: &PlayerEngine, what: &str, timeout: Duration, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + timeout;
    while !cond() {
        assert!(
            Instant::now() < deadline,
            "timed out waiting until {} (state {:?}, last_error: {})",
            what,
            engine.get_state(),
            engine.get_status().last_error
        );
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn play_reaches_playing_and_position_advances() {
    let engine = sine_engine();
    assert_eq!(engine.get_state(), PlayerState::Idle);

    engine.play();
    wait_for_state(&engine, PlayerState::Playing, Duration::from_secs(5));

    std::thread::sleep(Duration::from_millis(500));
    let status = engine.get_status();
    assert!(
        status.position_seconds > 0.2,
        "position stuck at {}",
        status.position_seconds
    );
    assert!(status.buffered_seconds > 0.0);
    assert!(status.produced_frames_total > 0);

    engine.quit();
}

#[test]
fn pause_freezes_position_and_resume_continues() {
    let engine = sine_engine();
    engine.play();
    wait_for_state(&engine, PlayerState::Playing, Duration::from_secs(5));
    std::thread::sleep(Duration::from_millis(300));

    engine.pause();
    wait_for_state(&engine, PlayerState::Paused, Duration::from_secs(5));
    let paused_at = engine.get_status().position_seconds;

    std::thread::sleep(Duration::from_millis(300));
    let still_paused = engine.get_status();
    assert_eq!(still_paused.position_seconds, paused_at);

    engine.resume();
    wait_for_state(&engine, PlayerState::Playing, Duration::from_secs(5));
    std::thread::sleep(Duration::from_millis(400));
    assert!(engine.get_status().position_seconds > paused_at);

    engine.quit();
}

#[test]
fn stop_resets_position_and_buffering() {
    let engine = sine_engine();
    engine.play();
    wait_for_state(&engine, PlayerState::Playing, Duration::from_secs(5));
    std::thread::sleep(Duration::from_millis(300));

    engine.stop();
    wait_for_state(&engine, PlayerState::Stopped, Duration::from_secs(5));

    // Give the engine loop one tick to republish buffered_seconds.
    std::thread::sleep(Duration::from_millis(100));
    let status = engine.get_status();
    assert_eq!(status.position_seconds, 0.0);
    assert_eq!(status.buffered_seconds, 0.0);
    assert_eq!(status.seek_target_frame, -1);

    engine.quit();
}

#[test]
fn seek_while_playing_repositions_exactly() {
    let engine = sine_engine();
    engine.play();
    wait_for_state(&engine, PlayerState::Playing, Duration::from_secs(5));

    let epoch_before = engine.get_status().decode_epoch;

    engine.seek_seconds(10.0);
    wait_until(&engine, "seek applied", Duration::from_secs(5), || {
        let s = engine.get_status();
        s.decode_epoch == epoch_before + 1 && s.state == PlayerState::Playing
    });

    let status = engine.get_status();
    assert_eq!(status.seek_target_frame, 10 * SAMPLE_RATE as i64);
    assert_eq!(status.decode_epoch, epoch_before + 1);
    assert!(
        status.position_seconds >= 10.0,
        "position {} below seek target",
        status.position_seconds
    );
    assert!(status.decoded_frame_cursor >= 10 * SAMPLE_RATE as i64);

    engine.quit();
}

#[test]
fn seek_clamps_negative_targets_to_zero() {
    let engine = sine_engine();
    engine.play();
    wait_for_state(&engine, PlayerState::Playing, Duration::from_secs(5));

    engine.seek_seconds(-3.5);
    wait_until(&engine, "seek applied", Duration::from_secs(5), || {
        let s = engine.get_status();
        s.seek_target_frame == 0 && s.state == PlayerState::Playing
    });

    let status = engine.get_status();
    assert_eq!(status.seek_target_frame, 0);
    assert!(status.position_seconds < 2.0);

    engine.quit();
}

#[test]
fn seek_while_paused_stays_paused() {
    let engine = sine_engine();
    engine.play();
    wait_for_state(&engine, PlayerState::Playing, Duration::from_secs(5));

    engine.pause();
    wait_for_state(&engine, PlayerState::Paused, Duration::from_secs(5));

    engine.seek_seconds(4.0);
    wait_until(&engine, "seek applied", Duration::from_secs(5), || {
        let s = engine.get_status();
        s.seek_target_frame == 4 * SAMPLE_RATE as i64 && s.state == PlayerState::Paused
    });

    let status = engine.get_status();
    assert_eq!(status.seek_target_frame, 4 * SAMPLE_RATE as i64);
    // Position reflects the seek even though nothing is rendering.
    assert_eq!(status.position_seconds, 4.0);

    engine.quit();
}

#[test]
fn replay_restarts_from_zero() {
    let engine = sine_engine();
    engine.play();
    wait_for_state(&engine, PlayerState::Playing, Duration::from_secs(5));
    std::thread::sleep(Duration::from_millis(500));

    let epoch_before = engine.get_status().decode_epoch;

    engine.replay();
    wait_until(&engine, "replay applied", Duration::from_secs(5), || {
        let s = engine.get_status();
        s.decode_epoch == epoch_before + 1 && s.state == PlayerState::Playing
    });

    let status = engine.get_status();
    assert_eq!(status.seek_target_frame, 0);
    assert_eq!(status.decode_epoch, epoch_before + 1);
    assert!(
        status.position_seconds < 1.0,
        "replay did not rewind: {}",
        status.position_seconds
    );

    engine.quit();
}

#[test]
fn quit_while_playing_joins_workers_within_a_second() {
    let engine = sine_engine();
    engine.play();
    wait_for_state(&engine, PlayerState::Playing, Duration::from_secs(5));

    engine.quit();

    // Terminal non-Playing state.
    wait_for_state(&engine, PlayerState::Stopped, Duration::from_secs(1));

    // Commands after Quit have no effect.
    engine.play();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(engine.get_state(), PlayerState::Stopped);

    // Dropping joins both worker threads; bounded time.
    let started = Instant::now();
    drop(engine);
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "worker join took {:?}",
        started.elapsed()
    );
}

#[test]
fn endpoint_rejecting_float32_surfaces_error_state() {
    let endpoint = SimulatedEndpoint::new().refuse_float32();
    let engine = PlayerEngine::new(endpoint, Box::new(SineSource::new(440.0)));

    engine.play();
    wait_for_state(&engine, PlayerState::Error, Duration::from_secs(5));

    let status = engine.get_status();
    assert!(!status.last_error.is_empty());

    engine.quit();
}

/// Ramp source of fixed length, for end-of-stream behavior.
struct FiniteRampSource {
    total_frames: u64,
}

impl PcmSource for FiniteRampSource {
    fn fill(&mut self, start_frame: u64, _sample_rate: u32, channels: u16, dst: &mut [f32]) -> usize {
        let channels = channels as usize;
        let requested = dst.len() / channels;
        let remaining = self.total_frames.saturating_sub(start_frame) as usize;
        let frames = requested.min(remaining);
        for frame in 0..frames {
            let value = ((start_frame + frame as u64) % 997) as f32 / 997.0;
            for ch in 0..channels {
                dst[frame * channels + ch] = value;
            }
        }
        frames
    }

    fn duration_frames(&self) -> Option<u64> {
        Some(self.total_frames)
    }
}

#[test]
fn finite_source_drains_to_finished() {
    // Half a second of audio at the device rate.
    let source = FiniteRampSource {
        total_frames: SAMPLE_RATE as u64 / 2,
    };
    let engine = PlayerEngine::new(fast_endpoint(), Box::new(source));

    engine.play();
    wait_for_state(&engine, PlayerState::Playing, Duration::from_secs(5));
    wait_for_state(&engine, PlayerState::Finished, Duration::from_secs(10));

    let status = engine.get_status();
    assert_eq!(status.duration_seconds, 0.5);
    assert_eq!(status.buffered_seconds, 0.0);
    assert!(status.position_seconds <= 0.5 + 0.1);

    engine.quit();
}

#[test]
fn command_order_is_fifo() {
    let engine = sine_engine();

    // A burst enqueued back-to-back lands in order; the last one wins.
    engine.play();
    engine.pause();
    engine.resume();
    engine.pause();

    wait_for_state(&engine, PlayerState::Paused, Duration::from_secs(10));
    engine.quit();
}
