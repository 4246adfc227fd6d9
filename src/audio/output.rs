//! Event-driven audio output and render worker
//!
//! `AudioOutput` owns the endpoint adapter and the dedicated render thread.
//! The render thread blocks on the endpoint's per-period event and a stop
//! lane; each audio wake runs exactly one render cycle: query padding,
//! acquire the writable region, pull frames from the frame source, release
//! once with the same frame count. The cycle never allocates, never blocks,
//! and never takes a lock; failures inside a cycle are swallowed and the
//! next hardware event retries.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, trace, warn};

use crate::audio::endpoint::{
    EndpointClient, RenderClient, RenderSignal, Wake, BUFFER_FLAG_SILENT,
};
use crate::audio::format::{detect_sample_format, select_float32_format};
use crate::audio::types::{convert_float_to_pcm16, EndpointFormat, SampleFormat};
use crate::error::{Error, Result};
use crate::playback::ring_buffer::AudioRingBuffer;

/// Supplier of interleaved float32 frames for the render cycle.
///
/// Implementations must be wait-free: the render thread calls
/// `pull_frames` once per hardware period.
pub trait FrameSource: Send + Sync {
    /// Fill up to `frames` frames into `dst`; returns frames delivered.
    fn pull_frames(&self, dst: &mut [f32], frames: u32) -> u32;
}

impl FrameSource for AudioRingBuffer {
    fn pull_frames(&self, dst: &mut [f32], frames: u32) -> u32 {
        self.read(dst, frames)
    }
}

/// Counters published by the render worker.
///
/// `rendered_frames` advances only by frames actually pulled from the
/// source, so the position clock never runs ahead of produced audio.
#[derive(Debug, Default)]
pub struct RenderCounters {
    underrun_wakes: AtomicU64,
    underrun_frames: AtomicU64,
    rendered_frames: AtomicU64,
}

impl RenderCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render wakes that saw a short read.
    pub fn underrun_wake_count(&self) -> u64 {
        self.underrun_wakes.load(Ordering::Relaxed)
    }

    /// Frames zero-filled due to underrun.
    pub fn underrun_frame_count(&self) -> u64 {
        self.underrun_frames.load(Ordering::Relaxed)
    }

    /// Frames rendered since the last reset.
    pub fn rendered_frames_total(&self) -> u64 {
        self.rendered_frames.load(Ordering::Relaxed)
    }

    /// Re-zero the rendered-frames clock (stop/seek/replay transitions).
    pub fn reset_rendered_frames(&self) {
        self.rendered_frames.store(0, Ordering::Relaxed);
    }

    fn note_underrun(&self, shortfall: u32) {
        self.underrun_wakes.fetch_add(1, Ordering::Relaxed);
        self.underrun_frames
            .fetch_add(shortfall as u64, Ordering::Relaxed);
    }

    fn add_rendered(&self, frames: u32) {
        self.rendered_frames.fetch_add(frames as u64, Ordering::Relaxed);
    }
}

/// Pull `frames_requested` frames from `source` into `dst`, zero-filling
/// any underrun tail within the same cycle and recording the shortfall.
///
/// Returns the frames actually delivered by the source.
pub fn consume_frames(
    source: &dyn FrameSource,
    dst: &mut [f32],
    frames_requested: u32,
    channels: u16,
    counters: &RenderCounters,
) -> u32 {
    if frames_requested == 0 || channels == 0 {
        return 0;
    }
    debug_assert!(dst.len() >= frames_requested as usize * channels as usize);

    let frames_read = source.pull_frames(dst, frames_requested);

    if frames_read < frames_requested {
        let sample_offset = frames_read as usize * channels as usize;
        let sample_end = frames_requested as usize * channels as usize;
        dst[sample_offset..sample_end].fill(0.0);
        counters.note_underrun(frames_requested - frames_read);
    }

    frames_read
}

/// One render cycle against an endpoint render client.
///
/// Contract: every successful `get_buffer` is matched by exactly one
/// `release_buffer` passing the same frame count; the silent flag is set
/// iff zero frames were produced this cycle. Early returns (padding query
/// failure, full endpoint buffer, get-buffer failure) release nothing; the
/// endpoint wakes the worker again on the next period.
pub fn run_render_cycle<R: RenderClient>(
    renderer: &mut R,
    source: Option<&dyn FrameSource>,
    format: &EndpointFormat,
    endpoint_buffer_frames: u32,
    scratch: Option<&mut [f32]>,
    counters: &RenderCounters,
) {
    let padding = match renderer.current_padding() {
        Ok(padding) => padding,
        Err(_) => return,
    };

    if padding >= endpoint_buffer_frames {
        return;
    }
    let frames_available = endpoint_buffer_frames - padding;

    let channels = format.channels;
    let samples = frames_available as usize * channels as usize;

    let region = match renderer.get_buffer(frames_available) {
        Ok(region) => region,
        Err(_) => return,
    };

    match format.sample_format {
        SampleFormat::Float32 => {
            let out = match region_as_f32(region, samples) {
                Some(out) => out,
                None => {
                    let _ = renderer.release_buffer(frames_available, BUFFER_FLAG_SILENT);
                    return;
                }
            };
            let frames_read = match source {
                Some(source) => consume_frames(source, out, frames_available, channels, counters),
                None => 0,
            };
            let flags = if frames_read == 0 { BUFFER_FLAG_SILENT } else { 0 };
            let _ = renderer.release_buffer(frames_available, flags);
            counters.add_rendered(frames_read);
        }
        SampleFormat::Pcm16 => {
            // Conversion goes through the pre-allocated float scratch; a
            // missing scratch means the cycle can only commit silence.
            let (source, scratch) = match (source, scratch) {
                (Some(source), Some(scratch)) if scratch.len() >= samples => (source, scratch),
                _ => {
                    let _ = renderer.release_buffer(frames_available, BUFFER_FLAG_SILENT);
                    return;
                }
            };
            let out = match region_as_i16(region, samples) {
                Some(out) => out,
                None => {
                    let _ = renderer.release_buffer(frames_available, BUFFER_FLAG_SILENT);
                    return;
                }
            };
            let scratch = &mut scratch[..samples];
            let frames_read = consume_frames(source, scratch, frames_available, channels, counters);
            convert_float_to_pcm16(scratch, out);
            let flags = if frames_read == 0 { BUFFER_FLAG_SILENT } else { 0 };
            let _ = renderer.release_buffer(frames_available, flags);
            counters.add_rendered(frames_read);
        }
        SampleFormat::Unsupported => {
            let _ = renderer.release_buffer(frames_available, BUFFER_FLAG_SILENT);
        }
    }
}

fn region_as_f32(region: &mut [u8], samples: usize) -> Option<&mut [f32]> {
    let bytes = samples * std::mem::size_of::<f32>();
    if region.len() < bytes || region.as_ptr() as usize % std::mem::align_of::<f32>() != 0 {
        return None;
    }
    // SAFETY: length and alignment checked above; the endpoint hands out an
    // exclusive region for the duration of the get/release pair.
    Some(unsafe { std::slice::from_raw_parts_mut(region.as_mut_ptr() as *mut f32, samples) })
}

fn region_as_i16(region: &mut [u8], samples: usize) -> Option<&mut [i16]> {
    let bytes = samples * std::mem::size_of::<i16>();
    if region.len() < bytes || region.as_ptr() as usize % std::mem::align_of::<i16>() != 0 {
        return None;
    }
    // SAFETY: length and alignment checked above.
    Some(unsafe { std::slice::from_raw_parts_mut(region.as_mut_ptr() as *mut i16, samples) })
}

/// Shared-mode audio output with an event-driven render thread.
///
/// Lifecycle is owned by the engine thread: `init_default_device`, then
/// `set_ring_buffer`, then `start`/`stop` pairs, then `shutdown`. The
/// render thread lives strictly between `start` and `stop`; `stop` joins it
/// before the endpoint is stopped and reset.
pub struct AudioOutput<E: EndpointClient> {
    endpoint: E,
    signal: Arc<RenderSignal>,
    counters: Arc<RenderCounters>,
    ring: Option<Arc<AudioRingBuffer>>,
    format: Option<EndpointFormat>,
    buffer_frames: u32,
    running: Arc<AtomicBool>,
    render_thread: Option<JoinHandle<()>>,
}

impl<E: EndpointClient> AudioOutput<E> {
    pub fn new(endpoint: E, counters: Arc<RenderCounters>) -> Self {
        Self {
            endpoint,
            signal: Arc::new(RenderSignal::new()),
            counters,
            ring: None,
            format: None,
            buffer_frames: 0,
            running: Arc::new(AtomicBool::new(false)),
            render_thread: None,
        }
    }

    /// Negotiate float32 shared mode on the default device and initialize
    /// the event-driven stream.
    pub fn init_default_device(&mut self) -> Result<()> {
        if self.format.is_some() {
            return Err(Error::InvalidState(
                "endpoint already initialized".to_string(),
            ));
        }

        let mix = self.endpoint.mix_format()?;
        debug!(
            sample_rate = mix.sample_rate,
            channels = mix.channels,
            bits = mix.bits_per_sample,
            "device mix format"
        );

        let requested = select_float32_format(&self.endpoint, &mix)?;
        let sample_format = detect_sample_format(&requested);

        let buffer_frames = self.endpoint.initialize(true, true, &requested)?;
        self.endpoint.set_event_handle(Arc::clone(&self.signal))?;

        let format = EndpointFormat::from_mix(&requested, sample_format);
        info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            %sample_format,
            buffer_frames,
            "audio endpoint initialized"
        );

        self.format = Some(format);
        self.buffer_frames = buffer_frames;
        Ok(())
    }

    /// Attach the frame ring the render thread will drain.
    ///
    /// Must be called before `start` and never while the render thread is
    /// running; the ring must outlive every start/stop pair.
    pub fn set_ring_buffer(&mut self, ring: Arc<AudioRingBuffer>) {
        debug_assert!(!self.running.load(Ordering::Relaxed));
        self.ring = Some(ring);
    }

    /// Spawn the render thread and start the endpoint.
    ///
    /// Requires a successful `init_default_device`, an attached ring, and a
    /// ring channel count matching the negotiated format. A start failure
    /// unwinds deterministically: the render thread is signalled and joined
    /// before the error is returned.
    pub fn start(&mut self) -> Result<()> {
        let format = self
            .format
            .ok_or_else(|| Error::EndpointStart("endpoint not initialized".to_string()))?;
        let ring = self
            .ring
            .clone()
            .ok_or_else(|| Error::EndpointStart("no ring buffer attached".to_string()))?;
        if ring.channels() != format.channels {
            return Err(Error::EndpointStart(format!(
                "ring buffer has {} channels but endpoint negotiated {}",
                ring.channels(),
                format.channels
            )));
        }

        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::InvalidState("output already running".to_string()));
        }

        self.signal.clear_stop();

        let renderer = match self.endpoint.render_client() {
            Ok(renderer) => renderer,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(e);
            }
        };

        // Any scratch the render path needs is allocated here, before the
        // real-time loop begins.
        let scratch = (format.sample_format == SampleFormat::Pcm16)
            .then(|| vec![0.0f32; self.buffer_frames as usize * format.channels as usize]);

        let signal = Arc::clone(&self.signal);
        let running = Arc::clone(&self.running);
        let counters = Arc::clone(&self.counters);
        let buffer_frames = self.buffer_frames;

        let handle = std::thread::Builder::new()
            .name("audio-render".to_string())
            .spawn(move || {
                render_loop(
                    renderer,
                    ring,
                    format,
                    buffer_frames,
                    signal,
                    running,
                    counters,
                    scratch,
                )
            })
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                Error::EndpointStart(format!("failed to spawn render thread: {}", e))
            })?;
        self.render_thread = Some(handle);

        if let Err(e) = self.endpoint.start() {
            self.running.store(false, Ordering::Release);
            self.signal.signal_stop();
            if let Some(handle) = self.render_thread.take() {
                let _ = handle.join();
            }
            return Err(e);
        }

        info!("audio output started");
        Ok(())
    }

    /// Quiesce the render thread, then stop and reset the endpoint.
    ///
    /// Safe to call when not running. No render cycle executes after this
    /// returns.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        self.signal.signal_stop();
        if let Some(handle) = self.render_thread.take() {
            let _ = handle.join();
        }

        if let Err(e) = self.endpoint.stop() {
            warn!("endpoint stop failed: {}", e);
        }
        if let Err(e) = self.endpoint.reset() {
            warn!("endpoint reset failed: {}", e);
        }
        info!("audio output stopped");
    }

    /// Stop and return to the uninitialized state.
    pub fn shutdown(&mut self) {
        self.stop();
        self.format = None;
        self.buffer_frames = 0;
    }

    /// Device mix sample rate in Hz; 0 if uninitialized.
    pub fn sample_rate(&self) -> u32 {
        self.format.map(|f| f.sample_rate).unwrap_or(0)
    }

    /// Device channel count; 0 if uninitialized.
    pub fn channels(&self) -> u16 {
        self.format.map(|f| f.channels).unwrap_or(0)
    }

    /// Negotiated sample format.
    pub fn sample_format(&self) -> SampleFormat {
        self.format
            .map(|f| f.sample_format)
            .unwrap_or(SampleFormat::Unsupported)
    }

    /// Endpoint buffer size in frames; 0 if uninitialized.
    pub fn buffer_frames(&self) -> u32 {
        self.buffer_frames
    }

    /// Negotiated endpoint format, if initialized.
    pub fn endpoint_format(&self) -> Option<EndpointFormat> {
        self.format
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn underrun_wake_count(&self) -> u64 {
        self.counters.underrun_wake_count()
    }

    pub fn underrun_frame_count(&self) -> u64 {
        self.counters.underrun_frame_count()
    }

    pub fn rendered_frames_total(&self) -> u64 {
        self.counters.rendered_frames_total()
    }

    pub fn reset_rendered_frames(&self) {
        self.counters.reset_rendered_frames();
    }
}

impl<E: EndpointClient> Drop for AudioOutput<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Render thread body: wait on the wake signal, render one cycle per audio
/// wake, exit on any stop wake.
#[allow(clippy::too_many_arguments)]
fn render_loop<R: RenderClient>(
    mut renderer: R,
    ring: Arc<AudioRingBuffer>,
    format: EndpointFormat,
    buffer_frames: u32,
    signal: Arc<RenderSignal>,
    running: Arc<AtomicBool>,
    counters: Arc<RenderCounters>,
    mut scratch: Option<Vec<f32>>,
) {
    promote_render_thread();

    while running.load(Ordering::Acquire) {
        match signal.wait() {
            Wake::Stop => break,
            Wake::Audio => {
                if !running.load(Ordering::Acquire) {
                    break;
                }
                run_render_cycle(
                    &mut renderer,
                    Some(&*ring as &dyn FrameSource),
                    &format,
                    buffer_frames,
                    scratch.as_deref_mut(),
                    &counters,
                );
            }
        }
    }

    trace!("render loop exited");
}

/// Best-effort promotion to an audio scheduling class.
///
/// The MMCSS/SCHED_FIFO style promotion is host-specific; without one the
/// loop still runs correctly at normal priority, it just competes with
/// other threads under load.
fn promote_render_thread() {
    debug!("render thread running at default scheduling priority");
}
