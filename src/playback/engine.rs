//! Playback engine: command queue, state machine, worker coordination
//!
//! `PlayerEngine` owns the sole mutator role for `PlayerState` and
//! `DecodeControl`. External callers enqueue commands from any thread; a
//! dedicated engine thread consumes them strictly in order and applies the
//! transitions. The engine never calls decoder logic directly: it mutates
//! the control block, waits on the idle gate when it needs the ring to
//! itself, and starts or stops the audio output.
//!
//! Destruction order: Quit, join decoder, join render (inside the output's
//! stop), tear down the endpoint, then the ring buffer goes with the last
//! Arc.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::audio::endpoint::EndpointClient;
use crate::audio::output::{AudioOutput, RenderCounters};
use crate::config::EngineTuning;
use crate::playback::decoder_worker::{decode_loop, DecodeShared};
use crate::playback::ring_buffer::AudioRingBuffer;
use crate::playback::source::PcmSource;
use crate::playback::state::{DecodeMode, PlayerState, PlayerStatus};

/// Priming threshold divisor for Play (sample_rate / 5 = 200ms).
const PRIME_PLAY_DIVISOR: u32 = 5;
/// Priming threshold divisor for Resume (sample_rate / 20 = 50ms).
const PRIME_RESUME_DIVISOR: u32 = 20;

/// Commands consumed by the engine thread.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    Play,
    Pause,
    Resume,
    Stop,
    Seek { seconds: f64 },
    Replay,
    Quit,
}

/// FIFO command queue: producers are arbitrary caller threads, the
/// consumer is the engine thread. Mutex + condvar because commands are
/// dynamically enqueued; the consumer uses a timed wait so the engine loop
/// also ticks its periodic work when no commands arrive.
struct CommandQueue {
    queue: Mutex<VecDeque<Command>>,
    cv: Condvar,
}

impl CommandQueue {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
        }
    }

    fn push(&self, command: Command) {
        self.queue.lock().unwrap().push_back(command);
        self.cv.notify_one();
    }

    fn pop_timeout(&self, timeout: Duration) -> Option<Command> {
        let mut queue = self.queue.lock().unwrap();
        if queue.is_empty() {
            let (guard, _) = self.cv.wait_timeout(queue, timeout).unwrap();
            queue = guard;
        }
        queue.pop_front()
    }
}

/// State shared between the public handle, the engine thread, the decode
/// worker, and status readers.
struct EngineShared {
    queue: CommandQueue,
    /// Flipped exactly once by Quit; commands enqueued afterwards are
    /// dropped.
    running: AtomicBool,
    state: AtomicU8,
    /// f64 bit pattern; seconds of audio sitting in the ring.
    buffered_seconds: AtomicU64,
    /// Source duration in frames; -1 when unknown.
    duration_frames: AtomicI64,
    /// Added to the render worker's frame counter to form the position
    /// clock; set by seek/replay, cleared by stop.
    render_frame_offset: AtomicI64,
    decode: Arc<DecodeShared>,
    render: Arc<RenderCounters>,
    /// Mutex-protected because strings are not atomic.
    last_error: Mutex<String>,
}

impl EngineShared {
    fn set_buffered_seconds(&self, seconds: f64) {
        self.buffered_seconds
            .store(seconds.to_bits(), Ordering::Release);
    }

    fn get_buffered_seconds(&self) -> f64 {
        f64::from_bits(self.buffered_seconds.load(Ordering::Acquire))
    }
}

/// Command-driven playback state machine.
///
/// Public methods enqueue and return immediately; observable results
/// arrive through [`get_state`](Self::get_state) and
/// [`get_status`](Self::get_status). After [`quit`](Self::quit) the engine
/// is terminal and further commands are dropped.
pub struct PlayerEngine {
    shared: Arc<EngineShared>,
    decode_thread: Option<JoinHandle<()>>,
    engine_thread: Option<JoinHandle<()>>,
}

impl PlayerEngine {
    /// Build the pipeline on the given endpoint and source with default
    /// tuning. Worker threads start immediately; playback starts on the
    /// first Play command.
    pub fn new<E: EndpointClient>(endpoint: E, source: Box<dyn PcmSource>) -> Self {
        Self::with_tuning(endpoint, source, EngineTuning::default())
    }

    pub fn with_tuning<E: EndpointClient>(
        endpoint: E,
        source: Box<dyn PcmSource>,
        tuning: EngineTuning,
    ) -> Self {
        let render = Arc::new(RenderCounters::new());
        let decode = Arc::new(DecodeShared::new());
        let duration_frames = source
            .duration_frames()
            .map(|frames| frames as i64)
            .unwrap_or(-1);

        let shared = Arc::new(EngineShared {
            queue: CommandQueue::new(),
            running: AtomicBool::new(true),
            state: AtomicU8::new(PlayerState::Idle.as_u8()),
            buffered_seconds: AtomicU64::new(0.0f64.to_bits()),
            duration_frames: AtomicI64::new(duration_frames),
            render_frame_offset: AtomicI64::new(0),
            decode: Arc::clone(&decode),
            render: Arc::clone(&render),
            last_error: Mutex::new(String::new()),
        });

        let ring = Arc::new(AudioRingBuffer::new(
            tuning.ring_capacity_frames,
            tuning.ring_channels,
        ));

        let decode_thread = {
            let decode = Arc::clone(&decode);
            let ring = Arc::clone(&ring);
            let tuning = tuning.clone();
            std::thread::Builder::new()
                .name("decode-worker".to_string())
                .spawn(move || decode_loop(decode, ring, source, tuning))
                .expect("failed to spawn decode worker")
        };

        let engine_thread = {
            let core = EngineCore {
                shared: Arc::clone(&shared),
                output: AudioOutput::new(endpoint, render),
                ring,
                tuning,
                output_initialized: false,
            };
            std::thread::Builder::new()
                .name("playback-engine".to_string())
                .spawn(move || engine_loop(core))
                .expect("failed to spawn engine thread")
        };

        Self {
            shared,
            decode_thread: Some(decode_thread),
            engine_thread: Some(engine_thread),
        }
    }

    /// Enqueue Play. Non-blocking.
    pub fn play(&self) {
        self.enqueue(Command::Play);
    }

    /// Enqueue Pause. Non-blocking.
    pub fn pause(&self) {
        self.enqueue(Command::Pause);
    }

    /// Enqueue Resume. Non-blocking.
    pub fn resume(&self) {
        self.enqueue(Command::Resume);
    }

    /// Enqueue Stop. Non-blocking.
    pub fn stop(&self) {
        self.enqueue(Command::Stop);
    }

    /// Enqueue a seek to `seconds` (clamped to >= 0 when applied).
    pub fn seek_seconds(&self, seconds: f64) {
        self.enqueue(Command::Seek { seconds });
    }

    /// Enqueue Replay: seek to 0 and play.
    pub fn replay(&self) {
        self.enqueue(Command::Replay);
    }

    /// Terminal: shut the pipeline down. Idempotent; commands enqueued
    /// after this are dropped.
    pub fn quit(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.queue.push(Command::Quit);
    }

    /// Last committed playback state. Wait-free.
    pub fn get_state(&self) -> PlayerState {
        PlayerState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Point-in-time status snapshot. Wait-free apart from the last-error
    /// string.
    pub fn get_status(&self) -> PlayerStatus {
        let shared = &self.shared;
        let sample_rate = shared.decode.sample_rate.load(Ordering::Acquire);
        let rendered = shared.render.rendered_frames_total();
        let offset = shared.render_frame_offset.load(Ordering::Acquire);

        let position_seconds = if sample_rate > 0 {
            (rendered as i64 + offset) as f64 / sample_rate as f64
        } else {
            0.0
        };
        let duration_frames = shared.duration_frames.load(Ordering::Acquire);
        let duration_seconds = if sample_rate > 0 && duration_frames >= 0 {
            duration_frames as f64 / sample_rate as f64
        } else {
            0.0
        };

        PlayerStatus {
            state: self.get_state(),
            position_seconds,
            duration_seconds,
            buffered_seconds: shared.get_buffered_seconds(),
            underrun_wake_count: shared.render.underrun_wake_count(),
            underrun_frames_total: shared.render.underrun_frame_count(),
            dropped_frames: shared.decode.dropped_frames.load(Ordering::Acquire),
            decode_epoch: shared.decode.control.epoch(),
            decode_mode: shared.decode.control.mode(),
            seek_target_frame: shared.decode.control.target_frame(),
            decoded_frame_cursor: shared.decode.decoded_frame_cursor.load(Ordering::Acquire),
            produced_frames_total: shared.decode.produced_frames_total.load(Ordering::Acquire),
            last_error: shared.last_error.lock().unwrap().clone(),
        }
    }

    fn enqueue(&self, command: Command) {
        if !self.shared.running.load(Ordering::Acquire) {
            debug!(?command, "command dropped after quit");
            return;
        }
        self.shared.queue.push(command);
    }
}

impl Drop for PlayerEngine {
    fn drop(&mut self) {
        self.quit();
        if let Some(handle) = self.decode_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.engine_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Engine-thread-owned half of the pipeline.
struct EngineCore<E: EndpointClient> {
    shared: Arc<EngineShared>,
    output: AudioOutput<E>,
    ring: Arc<AudioRingBuffer>,
    tuning: EngineTuning,
    output_initialized: bool,
}

fn engine_loop<E: EndpointClient>(mut core: EngineCore<E>) {
    info!("engine thread started");

    loop {
        let command = core.shared.queue.pop_timeout(core.tuning.command_wait);

        if let Some(command) = command {
            debug!(?command, "engine command");
            if command == Command::Quit {
                core.handle_quit();
                break;
            }
            core.handle_command(command);
        }

        core.publish_buffered_seconds();
        core.check_stream_end();
    }

    info!("engine thread stopped");
}

impl<E: EndpointClient> EngineCore<E> {
    fn state(&self) -> PlayerState {
        PlayerState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PlayerState) {
        self.shared.state.store(state.as_u8(), Ordering::Release);
    }

    fn set_last_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        *self.shared.last_error.lock().unwrap() = message;
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Play => {
                if self.state() == PlayerState::Playing {
                    debug!("already playing; Play ignored");
                    return;
                }
                self.set_state(PlayerState::Starting);
                if self.start_playback_with_priming(PRIME_PLAY_DIVISOR, false) {
                    self.set_state(PlayerState::Playing);
                } else {
                    self.set_state(PlayerState::Error);
                }
            }
            Command::Pause => {
                self.commit_paused();
            }
            Command::Resume => {
                if self.state() == PlayerState::Playing {
                    debug!("already playing; Resume ignored");
                    return;
                }
                self.set_state(PlayerState::Starting);
                if self.start_playback_with_priming(PRIME_RESUME_DIVISOR, true) {
                    self.set_state(PlayerState::Playing);
                } else {
                    self.set_state(PlayerState::Error);
                }
            }
            Command::Stop => {
                self.stop_output_and_reset_rendered();
                self.set_state(PlayerState::Stopped);
                self.shared.render_frame_offset.store(0, Ordering::Release);
                self.shared.decode.control.set_mode(DecodeMode::Stopped);
                self.shared.decode.idle.wait_idle();
                self.reset_buffering_state();
                self.begin_new_epoch(None);
            }
            Command::Seek { seconds } => {
                let prior_state = self.state();
                self.set_state(PlayerState::Seeking);

                let clamped = seconds.max(0.0);
                let sample_rate = self.shared.decode.sample_rate.load(Ordering::Acquire);
                let target_frame = (clamped * sample_rate as f64).round() as i64;

                self.stop_output_and_reset_rendered();
                self.shared
                    .render_frame_offset
                    .store(target_frame, Ordering::Release);
                self.shared.decode.control.set_mode(DecodeMode::Paused);
                self.shared.decode.idle.wait_idle();
                self.reset_buffering_state();
                self.begin_new_epoch(Some(target_frame));

                if prior_state == PlayerState::Paused {
                    self.commit_paused();
                } else {
                    self.set_state(PlayerState::Starting);
                    if self.start_playback_with_priming(PRIME_PLAY_DIVISOR, false) {
                        self.set_state(PlayerState::Playing);
                    } else {
                        self.set_state(PlayerState::Error);
                    }
                }
            }
            Command::Replay => {
                // Seek(0) then Play, as one transition.
                self.set_state(PlayerState::Starting);
                self.stop_output_and_reset_rendered();
                self.shared.render_frame_offset.store(0, Ordering::Release);
                self.shared.decode.control.set_mode(DecodeMode::Paused);
                self.shared.decode.idle.wait_idle();
                self.reset_buffering_state();
                self.begin_new_epoch(Some(0));
                if self.start_playback_with_priming(PRIME_PLAY_DIVISOR, false) {
                    self.set_state(PlayerState::Playing);
                } else {
                    self.set_state(PlayerState::Error);
                }
            }
            Command::Quit => unreachable!("Quit is handled by the engine loop"),
        }
    }

    fn handle_quit(&mut self) {
        self.shared.decode.control.set_mode(DecodeMode::Quit);
        self.shared.decode.control.bump_epoch();
        self.output.stop();
        self.output.shutdown();
        self.output_initialized = false;
        self.set_state(PlayerState::Stopped);
    }

    /// Pause transition: output stopped, decode paused, buffers retained.
    fn commit_paused(&mut self) {
        self.output.stop();
        self.set_state(PlayerState::Paused);
        self.shared.decode.control.set_mode(DecodeMode::Paused);
    }

    /// Keep the render clock consistent across stop/seek/replay.
    fn stop_output_and_reset_rendered(&mut self) {
        self.output.stop();
        self.output.reset_rendered_frames();
    }

    /// Drain and reset the ring. Only called with the decoder idle and the
    /// render thread stopped, which is what makes the engine a legitimate
    /// temporary consumer here.
    fn reset_buffering_state(&self) {
        let channels = self.ring.channels() as usize;
        let mut scratch = vec![0.0f32; 1024 * channels];
        loop {
            let available = self.ring.available_to_read();
            if available == 0 {
                break;
            }
            let to_read = available.min(1024);
            self.ring.read(&mut scratch, to_read);
        }
        self.ring.reset();
        self.shared.set_buffered_seconds(0.0);
    }

    /// Publish the target frame, then bump the epoch: the worker adopts
    /// the epoch with acquire ordering, which makes the target visible.
    fn begin_new_epoch(&self, target_frame: Option<i64>) {
        self.shared
            .decode
            .control
            .set_target_frame(target_frame.unwrap_or(-1));
        self.shared.decode.control.bump_epoch();
    }

    fn start_playback_with_priming(&mut self, threshold_divisor: u32, allow_empty: bool) -> bool {
        if !self.ensure_output_initialized() {
            return false;
        }
        self.shared.decode.control.set_mode(DecodeMode::Running);
        let threshold_frames = self.output.sample_rate() / threshold_divisor;
        self.prime_and_start(threshold_frames, allow_empty)
    }

    fn ensure_output_initialized(&mut self) -> bool {
        if self.output_initialized {
            return true;
        }

        if let Err(e) = self.output.init_default_device() {
            self.set_last_error(format!("failed to initialize audio endpoint: {}", e));
            return false;
        }

        let sample_rate = self.output.sample_rate();
        let channels = self.output.channels();
        if sample_rate == 0 || channels == 0 {
            self.set_last_error("endpoint reported a degenerate mix format");
            self.output.shutdown();
            return false;
        }
        if channels != self.ring.channels() {
            self.set_last_error(format!(
                "endpoint negotiated {} channels but the ring buffer carries {}",
                channels,
                self.ring.channels()
            ));
            self.output.shutdown();
            return false;
        }

        self.shared
            .decode
            .sample_rate
            .store(sample_rate, Ordering::Release);

        // Park the decoder before touching the ring.
        self.shared.decode.control.set_mode(DecodeMode::Paused);
        self.shared.decode.idle.wait_idle();
        self.reset_buffering_state();

        self.output.set_ring_buffer(Arc::clone(&self.ring));
        self.shared.render_frame_offset.store(0, Ordering::Release);
        self.output.reset_rendered_frames();

        self.output_initialized = true;
        true
    }

    /// Fill the ring to `threshold_frames` before starting the endpoint so
    /// playback does not begin with an immediate underrun.
    ///
    /// With `allow_empty`, start as soon as the ring has any data or the
    /// short budget elapses (a warm buffer may already exist on Resume).
    /// An exhausted source also ends priming: the drain check settles the
    /// final state instead of wedging the engine thread here.
    fn prime_and_start(&mut self, threshold_frames: u32, allow_empty: bool) -> bool {
        let wait_started = Instant::now();
        loop {
            let available = self.ring.available_to_read();
            if available >= threshold_frames {
                break;
            }
            if allow_empty
                && (available > 0
                    || wait_started.elapsed() >= self.tuning.prime_allow_empty_budget)
            {
                break;
            }
            if self.shared.decode.source_exhausted.load(Ordering::Acquire) {
                break;
            }
            std::thread::sleep(self.tuning.prime_poll);
        }

        match self.output.start() {
            Ok(()) => true,
            Err(e) => {
                self.set_last_error(format!("failed to start audio endpoint: {}", e));
                false
            }
        }
    }

    fn publish_buffered_seconds(&self) {
        let sample_rate = self.shared.decode.sample_rate.load(Ordering::Acquire);
        let buffered = if sample_rate > 0 {
            self.ring.available_to_read() as f64 / sample_rate as f64
        } else {
            0.0
        };
        self.shared.set_buffered_seconds(buffered);
    }

    /// End-of-stream drain check: once the source is exhausted and the
    /// ring has drained, playback is finished.
    fn check_stream_end(&mut self) {
        if self.state() != PlayerState::Playing {
            return;
        }
        if !self.shared.decode.source_exhausted.load(Ordering::Acquire) {
            return;
        }
        if self.ring.available_to_read() > 0 {
            return;
        }

        info!("source exhausted and ring drained; playback finished");
        self.output.stop();
        self.shared.decode.control.set_mode(DecodeMode::Stopped);
        self.set_state(PlayerState::Finished);
    }
}
