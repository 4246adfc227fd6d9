//! Endpoint adapter traits and render-thread wake event
//!
//! The host audio client is expressed as two traits split along the thread
//! ownership line: [`EndpointClient`] is mutated only by the engine thread
//! (initialize, start/stop/reset, event handle), while [`RenderClient`] is
//! the padding/get-buffer/release-buffer triplet owned exclusively by the
//! render thread. Production wires a real device behind these traits; tests
//! substitute fakes, which is the whole point of the seam.

use std::sync::{Arc, Condvar, Mutex};

use crate::audio::types::MixFormat;
use crate::error::Result;

/// Release-buffer flag: the committed region should be treated as silence
/// regardless of its contents.
pub const BUFFER_FLAG_SILENT: u32 = 0x2;

/// Endpoint's answer to a format-support probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatSupport {
    /// The requested format is supported as-is.
    Exact,
    /// The endpoint proposes a different format instead.
    Closest(MixFormat),
    /// The requested format is not supported.
    Rejected,
}

/// Why the render thread woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The endpoint signalled a hardware period tick.
    Audio,
    /// Stop was requested; the render loop must exit.
    Stop,
}

/// Two-lane wake event for the render thread.
///
/// Models the pair of OS events the render loop blocks on: an auto-reset
/// audio tick set by the endpoint once per hardware period, and a
/// manual-reset stop lane controlled by the output. [`RenderSignal::wait`]
/// gives the stop lane priority, so a stop request wins even when both are
/// pending.
#[derive(Debug)]
pub struct RenderSignal {
    state: Mutex<SignalLanes>,
    cv: Condvar,
}

#[derive(Debug, Default)]
struct SignalLanes {
    audio_pending: bool,
    stop_pending: bool,
}

impl RenderSignal {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SignalLanes::default()),
            cv: Condvar::new(),
        }
    }

    /// Pulse the audio lane (auto-reset: consumed by one wait).
    pub fn signal_audio(&self) {
        let mut lanes = self.state.lock().unwrap();
        lanes.audio_pending = true;
        self.cv.notify_one();
    }

    /// Latch the stop lane (manual-reset: stays set until cleared).
    pub fn signal_stop(&self) {
        let mut lanes = self.state.lock().unwrap();
        lanes.stop_pending = true;
        self.cv.notify_all();
    }

    /// Clear the stop lane before (re)starting the render thread.
    pub fn clear_stop(&self) {
        let mut lanes = self.state.lock().unwrap();
        lanes.stop_pending = false;
        lanes.audio_pending = false;
    }

    /// Block until one of the lanes fires. Stop wins over audio.
    pub fn wait(&self) -> Wake {
        let mut lanes = self.state.lock().unwrap();
        loop {
            if lanes.stop_pending {
                return Wake::Stop;
            }
            if lanes.audio_pending {
                lanes.audio_pending = false;
                return Wake::Audio;
            }
            lanes = self.cv.wait(lanes).unwrap();
        }
    }
}

impl Default for RenderSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine-thread surface of the host audio client.
///
/// Lifecycle: `mix_format` / `is_format_supported` may be called before
/// `initialize`; everything else requires a successful `initialize` first.
/// `render_client` vends the render-thread half; the returned client is
/// moved onto the render thread and must not be touched from anywhere else.
pub trait EndpointClient: Send + 'static {
    type Renderer: RenderClient;

    /// The device's native mix format.
    fn mix_format(&self) -> Result<MixFormat>;

    /// Ask whether the endpoint supports `format` (shared mode when
    /// `shared` is true).
    fn is_format_supported(&self, shared: bool, format: &MixFormat) -> Result<FormatSupport>;

    /// Initialize the stream. Returns the endpoint buffer size in frames.
    fn initialize(&mut self, shared: bool, event_driven: bool, format: &MixFormat) -> Result<u32>;

    /// Register the event the endpoint pulses once per hardware period.
    fn set_event_handle(&mut self, signal: Arc<RenderSignal>) -> Result<()>;

    /// Obtain the render-thread client for the initialized stream.
    fn render_client(&mut self) -> Result<Self::Renderer>;

    /// Begin consuming queued frames.
    fn start(&mut self) -> Result<()>;

    /// Stop consuming frames; queued data is retained.
    fn stop(&mut self) -> Result<()>;

    /// Discard queued frames and rewind the stream position.
    fn reset(&mut self) -> Result<()>;
}

/// Render-thread surface of the host audio client.
///
/// Every successful `get_buffer` must be matched by exactly one
/// `release_buffer` carrying the same frame count before the next
/// `get_buffer`.
pub trait RenderClient: Send + 'static {
    /// Frames currently queued at the hardware.
    fn current_padding(&mut self) -> Result<u32>;

    /// Writable region for exactly `frames` frames, laid out per the
    /// negotiated format's block alignment.
    fn get_buffer(&mut self, frames: u32) -> Result<&mut [u8]>;

    /// Commit `frames` written frames. `flags` may carry
    /// [`BUFFER_FLAG_SILENT`].
    fn release_buffer(&mut self, frames: u32, flags: u32) -> Result<()>;
}
