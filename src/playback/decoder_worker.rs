//! Decode worker thread and engine→decoder control block
//!
//! The decode worker is a dedicated OS thread that polls [`DecodeControl`]
//! with acquire ordering and produces fixed chunks of PCM into the ring
//! buffer while Running. The engine never calls into decoder logic
//! directly; it mutates the control block and, when it must know the
//! decoder has stopped touching the ring, waits on the idle gate.
//!
//! Epoch protocol: any transition that invalidates in-flight decode work
//! (stop, seek, replay, quit) publishes a new target frame and bumps the
//! epoch. The worker adopts the new epoch at its next tick, repositioning
//! its logical cursor when a target is set. Because the engine drains the
//! ring before raising the epoch, in-order reads guarantee no stale frame
//! survives into the new epoch.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::config::EngineTuning;
use crate::playback::ring_buffer::AudioRingBuffer;
use crate::playback::source::PcmSource;
use crate::playback::state::DecodeMode;

/// Engine→decoder control block, atomically visible.
///
/// The engine thread is the sole writer; the decode worker (and status
/// snapshots) read with acquire ordering.
#[derive(Debug)]
pub struct DecodeControl {
    epoch: AtomicU64,
    mode: AtomicU8,
    /// Frame index to reposition to on the next epoch adoption; -1 means
    /// "continue from the current cursor".
    target_frame: AtomicI64,
}

impl DecodeControl {
    pub fn new() -> Self {
        Self {
            epoch: AtomicU64::new(0),
            mode: AtomicU8::new(DecodeMode::Stopped.as_u8()),
            target_frame: AtomicI64::new(-1),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Invalidate in-flight decode work. Callers publish the target frame
    /// first; the acquire on the epoch read makes it visible to the worker.
    pub fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub fn mode(&self) -> DecodeMode {
        DecodeMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    pub fn set_mode(&self, mode: DecodeMode) {
        self.mode.store(mode.as_u8(), Ordering::Release);
    }

    pub fn target_frame(&self) -> i64 {
        self.target_frame.load(Ordering::Acquire)
    }

    pub fn set_target_frame(&self, frame: i64) {
        self.target_frame.store(frame, Ordering::Release);
    }
}

impl Default for DecodeControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Idle handshake between engine and decode worker.
///
/// The worker publishes idle whenever it observes a non-Running mode; the
/// engine blocks on `wait_idle` before draining or resetting the ring.
#[derive(Debug)]
pub(crate) struct IdleGate {
    idle: Mutex<bool>,
    cv: Condvar,
}

impl IdleGate {
    pub fn new() -> Self {
        Self {
            idle: Mutex::new(true),
            cv: Condvar::new(),
        }
    }

    pub fn set(&self, idle: bool) {
        let mut guard = self.idle.lock().unwrap();
        if *guard != idle {
            *guard = idle;
            if idle {
                self.cv.notify_all();
            }
        }
    }

    pub fn wait_idle(&self) {
        let mut guard = self.idle.lock().unwrap();
        while !*guard {
            guard = self.cv.wait(guard).unwrap();
        }
    }

    pub fn is_idle(&self) -> bool {
        *self.idle.lock().unwrap()
    }
}

/// State shared between the engine, the decode worker, and status readers.
#[derive(Debug)]
pub(crate) struct DecodeShared {
    pub control: DecodeControl,
    pub idle: IdleGate,
    /// Device sample rate; 0 until the endpoint is initialized.
    pub sample_rate: AtomicU32,
    pub decoded_frame_cursor: AtomicI64,
    pub produced_frames_total: AtomicU64,
    pub dropped_frames: AtomicU64,
    /// Latched when the source produces a short fill; cleared on epoch
    /// adoption since the cursor moves.
    pub source_exhausted: AtomicBool,
}

impl DecodeShared {
    pub fn new() -> Self {
        Self {
            control: DecodeControl::new(),
            idle: IdleGate::new(),
            sample_rate: AtomicU32::new(0),
            decoded_frame_cursor: AtomicI64::new(0),
            produced_frames_total: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
            source_exhausted: AtomicBool::new(false),
        }
    }
}

/// Decode worker body.
///
/// Runs until it observes `DecodeMode::Quit`. While Running it produces
/// fixed chunks from the source, tolerates ring shortfalls (counted as
/// dropped frames), and paces itself by sleeping for the duration of the
/// frames it managed to write, approximating real time so the ring never
/// overfills.
pub(crate) fn decode_loop(
    shared: Arc<DecodeShared>,
    ring: Arc<AudioRingBuffer>,
    mut source: Box<dyn PcmSource>,
    tuning: EngineTuning,
) {
    let chunk_frames = tuning.decode_chunk_frames as usize;
    let channels = ring.channels();
    let mut scratch = vec![0.0f32; chunk_frames * channels as usize];

    let mut local_epoch = shared.control.epoch();
    let mut cursor: i64 = 0;
    shared.decoded_frame_cursor.store(cursor, Ordering::Release);

    info!("decode worker started");

    loop {
        let mode = shared.control.mode();
        if mode == DecodeMode::Quit {
            shared.idle.set(true);
            break;
        }

        let current_epoch = shared.control.epoch();
        if current_epoch != local_epoch {
            local_epoch = current_epoch;
            let target = shared.control.target_frame();
            cursor = if target >= 0 { target } else { 0 };
            shared.decoded_frame_cursor.store(cursor, Ordering::Release);
            shared.source_exhausted.store(false, Ordering::Release);
            debug!(epoch = current_epoch, cursor, "adopted new decode epoch");
        }

        match mode {
            DecodeMode::Stopped | DecodeMode::Paused => {
                shared.idle.set(true);
                std::thread::sleep(tuning.decode_idle_poll);
            }
            DecodeMode::Running => {
                shared.idle.set(false);

                let sample_rate = shared.sample_rate.load(Ordering::Acquire);
                if sample_rate == 0 {
                    std::thread::sleep(tuning.decode_retry_poll);
                    continue;
                }

                let produced = source
                    .fill(cursor as u64, sample_rate, channels, &mut scratch)
                    .min(chunk_frames);
                if produced < chunk_frames
                    && !shared.source_exhausted.swap(true, Ordering::AcqRel)
                {
                    debug!(cursor, produced, "decode source exhausted");
                }
                if produced == 0 {
                    std::thread::sleep(tuning.decode_retry_poll);
                    continue;
                }

                let written = ring.write(
                    &scratch[..produced * channels as usize],
                    produced as u32,
                );
                if (written as usize) < produced {
                    shared
                        .dropped_frames
                        .fetch_add((produced - written as usize) as u64, Ordering::AcqRel);
                }
                if written == 0 {
                    std::thread::sleep(tuning.decode_retry_poll);
                    continue;
                }

                cursor += written as i64;
                shared.decoded_frame_cursor.store(cursor, Ordering::Release);
                shared
                    .produced_frames_total
                    .fetch_add(written as u64, Ordering::AcqRel);
                trace!(cursor, written, "decoded chunk");

                std::thread::sleep(Duration::from_secs_f64(
                    written as f64 / sample_rate as f64,
                ));
            }
            DecodeMode::Quit => unreachable!("handled before the match"),
        }
    }

    info!("decode worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::source::SilenceSource;

    #[test]
    fn test_control_defaults() {
        let control = DecodeControl::new();
        assert_eq!(control.epoch(), 0);
        assert_eq!(control.mode(), DecodeMode::Stopped);
        assert_eq!(control.target_frame(), -1);
    }

    #[test]
    fn test_epoch_is_monotonic() {
        let control = DecodeControl::new();
        control.bump_epoch();
        control.bump_epoch();
        assert_eq!(control.epoch(), 2);
    }

    #[test]
    fn test_idle_gate_wait_returns_once_idle() {
        let gate = Arc::new(IdleGate::new());
        gate.set(false);
        assert!(!gate.is_idle());

        let setter = {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                gate.set(true);
            })
        };

        gate.wait_idle();
        assert!(gate.is_idle());
        setter.join().unwrap();
    }

    #[test]
    fn test_worker_produces_then_quits() {
        let shared = Arc::new(DecodeShared::new());
        shared.sample_rate.store(48_000, Ordering::Release);
        let ring = Arc::new(AudioRingBuffer::new(8192, 2));

        let worker = {
            let shared = Arc::clone(&shared);
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                decode_loop(shared, ring, Box::new(SilenceSource), EngineTuning::default())
            })
        };

        shared.control.set_mode(DecodeMode::Running);
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while ring.available_to_read() == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(ring.available_to_read() > 0, "worker never produced frames");

        shared.control.set_mode(DecodeMode::Paused);
        shared.idle.wait_idle();

        shared.control.set_mode(DecodeMode::Quit);
        worker.join().unwrap();
        assert!(shared.idle.is_idle());
        assert!(shared.produced_frames_total.load(Ordering::Acquire) > 0);
    }

    #[test]
    fn test_worker_adopts_seek_target_on_epoch_change() {
        let shared = Arc::new(DecodeShared::new());
        shared.sample_rate.store(48_000, Ordering::Release);
        let ring = Arc::new(AudioRingBuffer::new(8192, 2));

        let worker = {
            let shared = Arc::clone(&shared);
            let ring = Arc::clone(&ring);
            std::thread::spawn(move || {
                decode_loop(shared, ring, Box::new(SilenceSource), EngineTuning::default())
            })
        };

        // Target is published before the epoch bump; the paused worker
        // adopts it on its next poll.
        shared.control.set_target_frame(480_000);
        shared.control.bump_epoch();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while shared.decoded_frame_cursor.load(Ordering::Acquire) != 480_000
            && std::time::Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(shared.decoded_frame_cursor.load(Ordering::Acquire), 480_000);

        shared.control.set_mode(DecodeMode::Quit);
        worker.join().unwrap();
    }
}
