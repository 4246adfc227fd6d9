//! Lock-free ring buffer for interleaved audio frames
//!
//! Single-producer single-consumer frame queue between the decoder thread
//! (producer) and the real-time render thread (consumer). Storage is a
//! fixed block of interleaved float32 samples; positions are monotonic
//! 64-bit frame cursors that never wrap, with the storage index taken as
//! `cursor % capacity`.
//!
//! Real-time constraints: no allocation, no locks, no blocking in
//! `write`/`read`. Short reads and writes are normal operation, reported
//! through diagnostic counters rather than errors.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace, warn};

/// Log every Nth overrun/overrun event so the counters stay the source of
/// truth and the log does not flood under sustained pressure.
const SHORT_OP_LOG_INTERVAL: u64 = 1000;

/// Wait-free SPSC ring buffer holding interleaved float32 frames.
///
/// ## Concurrency contract
///
/// Exactly one producer thread calls [`write`](Self::write) /
/// [`available_to_write`](Self::available_to_write) and exactly one consumer
/// thread calls [`read`](Self::read) /
/// [`available_to_read`](Self::available_to_read). The producer publishes
/// the write cursor with release ordering after copying samples in; the
/// consumer acquires it before copying samples out, and mirrors the same
/// protocol on the read cursor. Counters are statistics and use relaxed
/// ordering throughout.
///
/// [`reset`](Self::reset) is the one exception: it may only run while
/// neither producer nor consumer is active on the buffer.
pub struct AudioRingBuffer {
    capacity_frames: u32,
    channels: u16,

    /// Interleaved sample storage, `capacity_frames * channels` long.
    /// Written by the producer and read by the consumer in disjoint regions
    /// delimited by the cursors.
    storage: Box<[UnsafeCell<f32>]>,

    /// Monotonic frame cursors; never wrapped, never decreased.
    write_pos_frames: AtomicU64,
    read_pos_frames: AtomicU64,

    /// One underrun event per short read request, regardless of size.
    underruns: AtomicU64,
    /// One overrun event per short write request, regardless of size.
    overruns: AtomicU64,
    /// Cursor-invariant violations observed (release builds fail soft).
    invariant_violations: AtomicU64,
}

// SAFETY: the storage is only mutated through `write`, which touches the
// region [write_pos, write_pos + n) before publishing the new write cursor
// with release ordering, and only read through `read`, which acquires the
// write cursor first. Under the documented SPSC discipline the producer and
// consumer never alias the same samples.
unsafe impl Send for AudioRingBuffer {}
unsafe impl Sync for AudioRingBuffer {}

impl AudioRingBuffer {
    /// Create a ring buffer with fixed capacity (frames) and channel count.
    ///
    /// Storage is allocated here and never again; capacity and channel
    /// count are immutable for the buffer's lifetime.
    pub fn new(capacity_frames: u32, channels: u16) -> Self {
        debug!(
            capacity_frames,
            channels, "creating audio ring buffer"
        );

        let samples = capacity_frames as usize * channels as usize;
        let storage = (0..samples)
            .map(|_| UnsafeCell::new(0.0f32))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            capacity_frames,
            channels,
            storage,
            write_pos_frames: AtomicU64::new(0),
            read_pos_frames: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            invariant_violations: AtomicU64::new(0),
        }
    }

    /// Buffer capacity in frames.
    pub fn capacity(&self) -> u32 {
        self.capacity_frames
    }

    /// Channel count fixed at construction.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Frames that can be written without overwriting unread data.
    pub fn available_to_write(&self) -> u32 {
        let read_pos = self.read_pos_frames.load(Ordering::Acquire);
        let write_pos = self.write_pos_frames.load(Ordering::Relaxed);
        self.capacity_frames - self.readable_frames(write_pos, read_pos)
    }

    /// Frames that can be read without underrunning.
    pub fn available_to_read(&self) -> u32 {
        let write_pos = self.write_pos_frames.load(Ordering::Acquire);
        let read_pos = self.read_pos_frames.load(Ordering::Relaxed);
        self.readable_frames(write_pos, read_pos)
    }

    /// Write up to `frames_requested` interleaved frames from `src`.
    ///
    /// Returns the frames actually written: `min(requested, available)`.
    /// A short write increments the overrun counter exactly once. Producer
    /// thread only.
    pub fn write(&self, src: &[f32], frames_requested: u32) -> u32 {
        if frames_requested > 0 {
            debug_assert!(src.len() >= frames_requested as usize * self.channels as usize);
        }
        if self.storage.is_empty() || self.capacity_frames == 0 || self.channels == 0 {
            return 0;
        }

        let read_pos = self.read_pos_frames.load(Ordering::Acquire);
        let write_pos = self.write_pos_frames.load(Ordering::Relaxed);
        let available_write = self.capacity_frames - self.readable_frames(write_pos, read_pos);

        let frames_to_write = frames_requested.min(available_write);
        if frames_to_write == 0 {
            if frames_requested != 0 {
                self.note_overrun();
            }
            return 0;
        }

        let write_index = (write_pos % self.capacity_frames as u64) as u32;
        let frames_until_end = self.capacity_frames - write_index;
        let first_chunk = frames_to_write.min(frames_until_end);
        let second_chunk = frames_to_write - first_chunk;

        let channels = self.channels as usize;
        let sample_offset = write_index as usize * channels;
        let first_samples = first_chunk as usize * channels;
        let second_samples = second_chunk as usize * channels;

        // SAFETY: the region [write_pos, write_pos + frames_to_write) is not
        // readable until the release store below, so the consumer cannot
        // observe these samples mid-copy.
        unsafe {
            self.copy_in(&src[..first_samples], sample_offset);
            if second_chunk > 0 {
                self.copy_in(&src[first_samples..first_samples + second_samples], 0);
            }
        }

        self.write_pos_frames
            .store(write_pos + frames_to_write as u64, Ordering::Release);

        if frames_to_write < frames_requested {
            self.note_overrun();
        }

        frames_to_write
    }

    /// Read up to `frames_requested` interleaved frames into `dst`.
    ///
    /// Returns the frames actually read: `min(requested, available)`. A
    /// short read increments the underrun counter exactly once. Consumer
    /// thread only.
    pub fn read(&self, dst: &mut [f32], frames_requested: u32) -> u32 {
        if frames_requested > 0 {
            debug_assert!(dst.len() >= frames_requested as usize * self.channels as usize);
        }
        if self.storage.is_empty() || self.capacity_frames == 0 || self.channels == 0 {
            return 0;
        }

        let write_pos = self.write_pos_frames.load(Ordering::Acquire);
        let read_pos = self.read_pos_frames.load(Ordering::Relaxed);
        let available_read = self.readable_frames(write_pos, read_pos);

        let frames_to_read = frames_requested.min(available_read);
        if frames_to_read == 0 {
            if frames_requested != 0 {
                self.note_underrun();
            }
            return 0;
        }

        let read_index = (read_pos % self.capacity_frames as u64) as u32;
        let frames_until_end = self.capacity_frames - read_index;
        let first_chunk = frames_to_read.min(frames_until_end);
        let second_chunk = frames_to_read - first_chunk;

        let channels = self.channels as usize;
        let sample_offset = read_index as usize * channels;
        let first_samples = first_chunk as usize * channels;
        let second_samples = second_chunk as usize * channels;

        // SAFETY: the region [read_pos, read_pos + frames_to_read) was
        // published by the producer's release store, which the acquire load
        // of the write cursor above synchronizes with. The producer will not
        // overwrite it until the release store of the read cursor below.
        unsafe {
            self.copy_out(sample_offset, &mut dst[..first_samples]);
            if second_chunk > 0 {
                self.copy_out(0, &mut dst[first_samples..first_samples + second_samples]);
            }
        }

        self.read_pos_frames
            .store(read_pos + frames_to_read as u64, Ordering::Release);

        if frames_to_read < frames_requested {
            self.note_underrun();
        }

        frames_to_read
    }

    /// Reset cursors and counters.
    ///
    /// Permitted only while neither producer nor consumer is active on the
    /// buffer; the engine guarantees this by parking the decoder and
    /// stopping the render worker first.
    pub fn reset(&self) {
        self.write_pos_frames.store(0, Ordering::Relaxed);
        self.read_pos_frames.store(0, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
        self.invariant_violations.store(0, Ordering::Relaxed);
        debug!("audio ring buffer reset");
    }

    /// Underrun events observed by the consumer.
    pub fn underrun_count(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    /// Overrun events observed by the producer.
    pub fn overrun_count(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Cursor-invariant violations observed (always 0 under the SPSC
    /// contract).
    pub fn invariant_violation_count(&self) -> u64 {
        self.invariant_violations.load(Ordering::Relaxed)
    }

    /// Snapshot of buffer state for monitoring.
    pub fn stats(&self) -> RingBufferStats {
        let occupied = self.available_to_read();
        RingBufferStats {
            capacity: self.capacity_frames,
            occupied,
            free: self.capacity_frames - occupied,
            underruns: self.underrun_count(),
            overruns: self.overrun_count(),
            invariant_violations: self.invariant_violation_count(),
        }
    }

    /// Readable distance between cursors, with the SPSC invariant enforced:
    /// `write >= read` and `write - read <= capacity`. Debug builds assert;
    /// release builds clamp to a safe value and count the violation.
    fn readable_frames(&self, write_pos: u64, read_pos: u64) -> u32 {
        debug_assert!(write_pos >= read_pos, "ring cursor inversion");
        debug_assert!(
            write_pos - read_pos <= self.capacity_frames as u64,
            "ring cursor distance exceeds capacity"
        );

        if write_pos < read_pos {
            self.invariant_violations.fetch_add(1, Ordering::Relaxed);
            return 0;
        }
        let available = write_pos - read_pos;
        if available > self.capacity_frames as u64 {
            self.invariant_violations.fetch_add(1, Ordering::Relaxed);
            return self.capacity_frames;
        }
        available as u32
    }

    /// SAFETY: caller must hold the producer role and the destination range
    /// must be unpublished (between the read cursor's view and the pending
    /// write cursor store).
    unsafe fn copy_in(&self, src: &[f32], sample_offset: usize) {
        let dst = self.storage.as_ptr() as *mut f32;
        std::ptr::copy_nonoverlapping(src.as_ptr(), dst.add(sample_offset), src.len());
    }

    /// SAFETY: caller must hold the consumer role and the source range must
    /// be published (covered by an acquire load of the write cursor).
    unsafe fn copy_out(&self, sample_offset: usize, dst: &mut [f32]) {
        let src = self.storage.as_ptr() as *const f32;
        std::ptr::copy_nonoverlapping(src.add(sample_offset), dst.as_mut_ptr(), dst.len());
    }

    fn note_overrun(&self) {
        let count = self.overruns.fetch_add(1, Ordering::Relaxed) + 1;
        if count % SHORT_OP_LOG_INTERVAL == 0 {
            warn!("audio ring buffer overrun (total: {})", count);
        } else {
            trace!("audio ring buffer overrun (total: {})", count);
        }
    }

    fn note_underrun(&self) {
        let count = self.underruns.fetch_add(1, Ordering::Relaxed) + 1;
        if count % SHORT_OP_LOG_INTERVAL == 0 {
            warn!("audio ring buffer underrun (total: {})", count);
        } else {
            trace!("audio ring buffer underrun (total: {})", count);
        }
    }
}

impl std::fmt::Debug for AudioRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioRingBuffer")
            .field("capacity_frames", &self.capacity_frames)
            .field("channels", &self.channels)
            .field("occupied", &self.available_to_read())
            .field("underruns", &self.underrun_count())
            .field("overruns", &self.overrun_count())
            .finish()
    }
}

/// Ring buffer statistics snapshot
#[derive(Debug, Clone, Copy)]
pub struct RingBufferStats {
    /// Total buffer capacity in frames
    pub capacity: u32,
    /// Currently occupied frames
    pub occupied: u32,
    /// Currently free frames
    pub free: u32,
    /// Total underrun events
    pub underruns: u64,
    /// Total overrun events
    pub overruns: u64,
    /// Total invariant violations
    pub invariant_violations: u64,
}

impl RingBufferStats {
    /// Fill level as a fraction in [0.0, 1.0].
    pub fn fill_fraction(&self) -> f32 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.occupied as f32 / self.capacity as f32
    }
}
