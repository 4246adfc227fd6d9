//! Simulated shared-mode audio endpoint
//!
//! A headless stand-in for the platform audio client implementing the full
//! [`EndpointClient`] / [`RenderClient`] contract: a native mix format, an
//! exact-match float32 negotiation answer, an endpoint buffer with padding
//! bookkeeping, and a ticker thread that retires queued frames against a
//! monotonic clock while pulsing the render event once per period.
//!
//! The demo binary and the engine integration tests run on this endpoint;
//! a real device backend would implement the same traits.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::audio::endpoint::{
    EndpointClient, FormatSupport, RenderClient, RenderSignal, BUFFER_FLAG_SILENT,
};
use crate::audio::format::detect_sample_format;
use crate::audio::types::{MixFormat, SampleFormat};
use crate::error::{Error, Result};

/// Endpoint buffer length as a fraction of the sample rate (100 ms).
const BUFFER_DIVISOR: u32 = 10;

/// Default hardware period.
const DEFAULT_PERIOD: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct StreamState {
    buffer_frames: u32,
    block_align: u16,
    sample_rate: u32,
    padding_frames: u32,
    last_retire: Instant,
}

impl StreamState {
    /// Retire queued frames that have "played" since the last retire tick.
    fn retire_elapsed(&mut self) {
        let now = Instant::now();
        let elapsed_frames =
            (now.duration_since(self.last_retire).as_secs_f64() * self.sample_rate as f64) as u64;
        if elapsed_frames == 0 {
            return;
        }
        let consumed = (self.padding_frames as u64).min(elapsed_frames) as u32;
        self.padding_frames -= consumed;
        self.last_retire = now;
    }
}

#[derive(Debug)]
struct DeviceState {
    signal: Mutex<Option<Arc<RenderSignal>>>,
    stream: Mutex<Option<StreamState>>,
    started: AtomicBool,
    released_frames: AtomicU64,
    silent_released_frames: AtomicU64,
}

/// Event-driven simulated endpoint.
pub struct SimulatedEndpoint {
    native_format: MixFormat,
    supports_float32: bool,
    period: Duration,
    state: Arc<DeviceState>,
    ticker: Option<JoinHandle<()>>,
    ticker_run: Arc<AtomicBool>,
    initialized: bool,
}

impl SimulatedEndpoint {
    /// Endpoint with the default native format: 48 kHz stereo extensible
    /// float32, front left/right channel mask.
    pub fn new() -> Self {
        Self::with_mix_format(MixFormat::extensible_float32(48_000, 2, Some(0x3)))
    }

    /// Endpoint advertising the given native mix format.
    pub fn with_mix_format(native_format: MixFormat) -> Self {
        Self {
            native_format,
            supports_float32: true,
            period: DEFAULT_PERIOD,
            state: Arc::new(DeviceState {
                signal: Mutex::new(None),
                stream: Mutex::new(None),
                started: AtomicBool::new(false),
                released_frames: AtomicU64::new(0),
                silent_released_frames: AtomicU64::new(0),
            }),
            ticker: None,
            ticker_run: Arc::new(AtomicBool::new(false)),
            initialized: false,
        }
    }

    /// Override the hardware period (test knob).
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Make format negotiation reject float32 (test knob for the
    /// initialization-failure path).
    pub fn refuse_float32(mut self) -> Self {
        self.supports_float32 = false;
        self
    }

    /// Total frames committed with real content.
    pub fn released_frames(&self) -> u64 {
        self.state.released_frames.load(Ordering::Relaxed)
    }

    /// Total frames committed with the silent flag.
    pub fn silent_released_frames(&self) -> u64 {
        self.state.silent_released_frames.load(Ordering::Relaxed)
    }
}

impl Default for SimulatedEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointClient for SimulatedEndpoint {
    type Renderer = SimulatedRenderClient;

    fn mix_format(&self) -> Result<MixFormat> {
        Ok(self.native_format.clone())
    }

    fn is_format_supported(&self, shared: bool, format: &MixFormat) -> Result<FormatSupport> {
        if !shared {
            return Ok(FormatSupport::Rejected);
        }
        let is_native_rate = format.sample_rate == self.native_format.sample_rate
            && format.channels == self.native_format.channels;
        if self.supports_float32
            && is_native_rate
            && detect_sample_format(format) == SampleFormat::Float32
        {
            return Ok(FormatSupport::Exact);
        }
        Ok(FormatSupport::Rejected)
    }

    fn initialize(&mut self, shared: bool, event_driven: bool, format: &MixFormat) -> Result<u32> {
        if self.initialized {
            return Err(Error::InvalidState(
                "simulated endpoint already initialized".to_string(),
            ));
        }
        if !shared || !event_driven {
            return Err(Error::EndpointInit(
                "simulated endpoint supports only event-driven shared mode".to_string(),
            ));
        }
        if self.is_format_supported(true, format)? != FormatSupport::Exact {
            return Err(Error::EndpointInit(
                "requested format is not supported".to_string(),
            ));
        }

        let buffer_frames = (format.sample_rate / BUFFER_DIVISOR).max(1);
        *self.state.stream.lock().unwrap() = Some(StreamState {
            buffer_frames,
            block_align: format.block_align,
            sample_rate: format.sample_rate,
            padding_frames: 0,
            last_retire: Instant::now(),
        });

        self.ticker_run.store(true, Ordering::Release);
        let state = Arc::clone(&self.state);
        let run = Arc::clone(&self.ticker_run);
        let period = self.period;
        self.ticker = Some(
            std::thread::Builder::new()
                .name("sim-endpoint-tick".to_string())
                .spawn(move || ticker_loop(state, run, period))
                .map_err(|e| Error::EndpointInit(format!("failed to spawn ticker: {}", e)))?,
        );

        self.initialized = true;
        debug!(buffer_frames, period_ms = period.as_millis() as u64, "simulated endpoint initialized");
        Ok(buffer_frames)
    }

    fn set_event_handle(&mut self, signal: Arc<RenderSignal>) -> Result<()> {
        *self.state.signal.lock().unwrap() = Some(signal);
        Ok(())
    }

    fn render_client(&mut self) -> Result<SimulatedRenderClient> {
        let stream = self.state.stream.lock().unwrap();
        let stream = stream
            .as_ref()
            .ok_or_else(|| Error::InvalidState("endpoint not initialized".to_string()))?;
        let staging_bytes = stream.buffer_frames as usize * stream.block_align as usize;
        Ok(SimulatedRenderClient {
            state: Arc::clone(&self.state),
            staging: vec![0u8; staging_bytes],
            pending: None,
        })
    }

    fn start(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(Error::EndpointStart("endpoint not initialized".to_string()));
        }
        if let Some(stream) = self.state.stream.lock().unwrap().as_mut() {
            stream.last_retire = Instant::now();
        }
        self.state.started.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.state.started.store(false, Ordering::Release);
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        if let Some(stream) = self.state.stream.lock().unwrap().as_mut() {
            stream.padding_frames = 0;
        }
        Ok(())
    }
}

impl Drop for SimulatedEndpoint {
    fn drop(&mut self) {
        self.ticker_run.store(false, Ordering::Release);
        if let Some(handle) = self.ticker.take() {
            let _ = handle.join();
        }
    }
}

/// Ticker body: once per period, retire played frames and pulse the render
/// event while the stream is started.
fn ticker_loop(state: Arc<DeviceState>, run: Arc<AtomicBool>, period: Duration) {
    while run.load(Ordering::Acquire) {
        std::thread::sleep(period);
        if !state.started.load(Ordering::Acquire) {
            continue;
        }
        if let Some(stream) = state.stream.lock().unwrap().as_mut() {
            stream.retire_elapsed();
        }
        let signal = state.signal.lock().unwrap().clone();
        if let Some(signal) = signal {
            signal.signal_audio();
        }
    }
    trace!("simulated endpoint ticker exited");
}

/// Render-thread half of the simulated endpoint.
pub struct SimulatedRenderClient {
    state: Arc<DeviceState>,
    staging: Vec<u8>,
    pending: Option<u32>,
}

impl RenderClient for SimulatedRenderClient {
    fn current_padding(&mut self) -> Result<u32> {
        let mut stream = self.state.stream.lock().unwrap();
        let stream = stream
            .as_mut()
            .ok_or_else(|| Error::RenderCycle("stream not initialized".to_string()))?;
        if self.state.started.load(Ordering::Acquire) {
            stream.retire_elapsed();
        }
        Ok(stream.padding_frames)
    }

    fn get_buffer(&mut self, frames: u32) -> Result<&mut [u8]> {
        if self.pending.is_some() {
            return Err(Error::RenderCycle(
                "get_buffer called with a region still outstanding".to_string(),
            ));
        }
        let bytes = {
            let stream = self.state.stream.lock().unwrap();
            let stream = stream
                .as_ref()
                .ok_or_else(|| Error::RenderCycle("stream not initialized".to_string()))?;
            if frames > stream.buffer_frames {
                return Err(Error::RenderCycle(format!(
                    "requested {} frames exceeds endpoint buffer of {}",
                    frames, stream.buffer_frames
                )));
            }
            frames as usize * stream.block_align as usize
        };
        self.pending = Some(frames);
        Ok(&mut self.staging[..bytes])
    }

    fn release_buffer(&mut self, frames: u32, flags: u32) -> Result<()> {
        match self.pending.take() {
            Some(pending) if pending == frames => {}
            Some(pending) => {
                return Err(Error::RenderCycle(format!(
                    "release of {} frames does not match acquired {}",
                    frames, pending
                )));
            }
            None => {
                return Err(Error::RenderCycle(
                    "release_buffer without matching get_buffer".to_string(),
                ));
            }
        }

        let mut stream = self.state.stream.lock().unwrap();
        let stream = stream
            .as_mut()
            .ok_or_else(|| Error::RenderCycle("stream not initialized".to_string()))?;
        stream.padding_frames = (stream.padding_frames + frames).min(stream.buffer_frames);

        if flags & BUFFER_FLAG_SILENT != 0 {
            self.state
                .silent_released_frames
                .fetch_add(frames as u64, Ordering::Relaxed);
        } else {
            self.state
                .released_frames
                .fetch_add(frames as u64, Ordering::Relaxed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initialized_endpoint() -> SimulatedEndpoint {
        let mut endpoint = SimulatedEndpoint::new();
        let mix = endpoint.mix_format().unwrap();
        endpoint.initialize(true, true, &mix).unwrap();
        endpoint
    }

    #[test]
    fn test_negotiation_accepts_native_float32() {
        let endpoint = SimulatedEndpoint::new();
        let mix = endpoint.mix_format().unwrap();
        assert_eq!(
            endpoint.is_format_supported(true, &mix).unwrap(),
            FormatSupport::Exact
        );
    }

    #[test]
    fn test_negotiation_rejects_wrong_rate() {
        let endpoint = SimulatedEndpoint::new();
        let other = MixFormat::extensible_float32(44_100, 2, None);
        assert_eq!(
            endpoint.is_format_supported(true, &other).unwrap(),
            FormatSupport::Rejected
        );
    }

    #[test]
    fn test_initialize_reports_buffer_frames() {
        let mut endpoint = SimulatedEndpoint::new();
        let mix = endpoint.mix_format().unwrap();
        let frames = endpoint.initialize(true, true, &mix).unwrap();
        assert_eq!(frames, 4800); // 100ms @ 48kHz
    }

    #[test]
    fn test_release_updates_padding_and_counters() {
        let mut endpoint = initialized_endpoint();
        let mut renderer = endpoint.render_client().unwrap();

        let region = renderer.get_buffer(128).unwrap();
        region.fill(0);
        renderer.release_buffer(128, 0).unwrap();
        assert_eq!(renderer.current_padding().unwrap(), 128);
        assert_eq!(endpoint.released_frames(), 128);

        let _ = renderer.get_buffer(64).unwrap();
        renderer.release_buffer(64, BUFFER_FLAG_SILENT).unwrap();
        assert_eq!(endpoint.silent_released_frames(), 64);
    }

    #[test]
    fn test_release_must_match_get() {
        let mut endpoint = initialized_endpoint();
        let mut renderer = endpoint.render_client().unwrap();

        assert!(renderer.release_buffer(10, 0).is_err());

        let _ = renderer.get_buffer(32).unwrap();
        assert!(renderer.release_buffer(16, 0).is_err());
    }

    #[test]
    fn test_padding_retires_while_started() {
        let mut endpoint = initialized_endpoint();
        let mut renderer = endpoint.render_client().unwrap();

        let _ = renderer.get_buffer(480).unwrap();
        renderer.release_buffer(480, 0).unwrap();
        endpoint.start().unwrap();

        // 480 frames is 10ms @ 48kHz; well inside 200ms everything retires.
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(renderer.current_padding().unwrap(), 0);
    }
}
