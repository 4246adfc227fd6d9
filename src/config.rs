//! Engine tuning parameters
//!
//! Central struct for the timing and sizing constants the pipeline runs on.
//! These are construction-time values; there is no persistence layer and no
//! runtime reconfiguration.

use std::time::Duration;

/// Tuning knobs for the playback pipeline.
///
/// Defaults are sized for a 48 kHz stereo endpoint: a two-second ring,
/// 1024-frame decode chunks, and poll intervals matched to the engine's
/// 50 ms command cadence.
#[derive(Debug, Clone)]
pub struct EngineTuning {
    /// Ring buffer capacity in frames (default: 96,000 = 2.0s @ 48kHz)
    pub ring_capacity_frames: u32,

    /// Ring buffer channel count, fixed at construction (default: 2)
    pub ring_channels: u16,

    /// Frames the decoder produces per tick (default: 1024)
    pub decode_chunk_frames: u32,

    /// Decoder sleep while Stopped/Paused (default: 20ms)
    pub decode_idle_poll: Duration,

    /// Decoder sleep after a zero-progress tick (default: 10ms)
    pub decode_retry_poll: Duration,

    /// Engine command-queue timed wait (default: 50ms)
    pub command_wait: Duration,

    /// Poll interval while priming the ring before start (default: 10ms)
    pub prime_poll: Duration,

    /// How long an `allow_empty` prime waits for first data before starting
    /// anyway (default: 250ms)
    pub prime_allow_empty_budget: Duration,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            ring_capacity_frames: 96_000,
            ring_channels: 2,
            decode_chunk_frames: 1024,
            decode_idle_poll: Duration::from_millis(20),
            decode_retry_poll: Duration::from_millis(10),
            command_wait: Duration::from_millis(50),
            prime_poll: Duration::from_millis(10),
            prime_allow_empty_budget: Duration::from_millis(250),
        }
    }
}
