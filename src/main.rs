//! Playhead demo driver
//!
//! Plays a sine tone through the full engine pipeline on the simulated
//! endpoint: repeated start/stop cycles, optional CPU stress load, and an
//! engine smoke mode that exercises every command and dumps JSON status
//! snapshots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::bail;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use playhead::audio::simulated::SimulatedEndpoint;
use playhead::playback::{PlayerEngine, PlayerState, SineSource};

/// Playhead - real-time playback core demo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of start/stop cycles
    #[arg(long, default_value_t = 3)]
    repeat: u32,

    /// Seconds per cycle
    #[arg(long, default_value_t = 2.0)]
    seconds: f64,

    /// Tone frequency in Hz
    #[arg(long, default_value_t = 440.0)]
    frequency: f32,

    /// Run CPU load on all cores during playback
    #[arg(long)]
    stress: bool,

    /// Exercise the full command set and print status snapshots
    #[arg(long = "engine_smoke")]
    engine_smoke: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let bad_args = e.use_stderr();
            let _ = e.print();
            std::process::exit(if bad_args { 1 } else { 0 });
        }
    };

    if let Err(e) = run(args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(mut args: Args) -> anyhow::Result<()> {
    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("playhead={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.repeat < 1 {
        args.repeat = 1;
    }
    if args.seconds <= 0.0 {
        args.seconds = 0.5;
    }
    if args.frequency < 1.0 {
        args.frequency = 440.0;
    }

    info!(
        repeat = args.repeat,
        seconds = args.seconds,
        frequency = args.frequency,
        stress = args.stress,
        "starting demo"
    );

    let endpoint = SimulatedEndpoint::new();
    let engine = PlayerEngine::new(endpoint, Box::new(SineSource::new(args.frequency)));

    let stress_running = Arc::new(AtomicBool::new(false));
    let mut stress_threads = Vec::new();
    if args.stress {
        stress_running.store(true, Ordering::Release);
        let thread_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        for _ in 0..thread_count {
            let running = Arc::clone(&stress_running);
            stress_threads.push(std::thread::spawn(move || stress_worker(&running)));
        }
        info!(threads = stress_threads.len(), "stress load running");
    }

    let result = if args.engine_smoke {
        run_engine_smoke(&engine)
    } else {
        run_tone_cycles(&engine, args.repeat, args.seconds)
    };

    if args.stress {
        stress_running.store(false, Ordering::Release);
        for handle in stress_threads {
            let _ = handle.join();
        }
    }

    engine.quit();
    result
}

/// Repeated play/stop cycles, matching the endpoint's real-time pace.
fn run_tone_cycles(engine: &PlayerEngine, repeat: u32, seconds: f64) -> anyhow::Result<()> {
    for cycle in 0..repeat {
        engine.play();
        wait_for_state(engine, PlayerState::Playing, Duration::from_secs(5))?;

        std::thread::sleep(Duration::from_secs_f64(seconds));

        let status = engine.get_status();
        info!(
            cycle,
            position_seconds = status.position_seconds,
            buffered_seconds = status.buffered_seconds,
            underrun_wakes = status.underrun_wake_count,
            underrun_frames = status.underrun_frames_total,
            dropped_frames = status.dropped_frames,
            "cycle complete"
        );
        if status.underrun_wake_count > 0 {
            warn!(
                underrun_wakes = status.underrun_wake_count,
                "render worker saw underruns this cycle"
            );
        }

        engine.stop();
        std::thread::sleep(Duration::from_millis(200));
    }
    Ok(())
}

/// Exercise Play/Seek/Pause/Resume/Replay and print a snapshot after each.
fn run_engine_smoke(engine: &PlayerEngine) -> anyhow::Result<()> {
    engine.play();
    wait_for_state(engine, PlayerState::Playing, Duration::from_secs(5))?;
    print_status(engine, "play")?;
    std::thread::sleep(Duration::from_millis(300));

    engine.seek_seconds(1.5);
    wait_for_state(engine, PlayerState::Playing, Duration::from_secs(5))?;
    print_status(engine, "seek 1.5s")?;
    std::thread::sleep(Duration::from_millis(300));

    engine.pause();
    wait_for_state(engine, PlayerState::Paused, Duration::from_secs(5))?;
    print_status(engine, "pause")?;

    engine.resume();
    wait_for_state(engine, PlayerState::Playing, Duration::from_secs(5))?;
    print_status(engine, "resume")?;
    std::thread::sleep(Duration::from_millis(300));

    engine.replay();
    wait_for_state(engine, PlayerState::Playing, Duration::from_secs(5))?;
    print_status(engine, "replay")?;
    std::thread::sleep(Duration::from_millis(300));

    engine.stop();
    wait_for_state(engine, PlayerState::Stopped, Duration::from_secs(5))?;
    print_status(engine, "stop")?;

    Ok(())
}

fn print_status(engine: &PlayerEngine, label: &str) -> anyhow::Result<()> {
    let status = engine.get_status();
    println!("=== {} ===", label);
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn wait_for_state(
    engine: &PlayerEngine,
    expected: PlayerState,
    timeout: Duration,
) -> anyhow::Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let state = engine.get_state();
        if state == expected {
            return Ok(());
        }
        if state == PlayerState::Error {
            let status = engine.get_status();
            bail!("engine entered error state: {}", status.last_error);
        }
        if Instant::now() >= deadline {
            bail!("timed out waiting for state {} (currently {})", expected, state);
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Busy-spin worker for the --stress option.
fn stress_worker(running: &AtomicBool) {
    let mut value = 0.0f64;
    while running.load(Ordering::Relaxed) {
        value += 0.000_001;
        if value > 1000.0 {
            value = 0.0;
        }
        std::hint::black_box(value);
    }
}
