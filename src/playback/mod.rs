//! Playback pipeline: ring buffer, decode worker, and engine

pub mod decoder_worker;
pub mod engine;
pub mod ring_buffer;
pub mod source;
pub mod state;

pub use decoder_worker::DecodeControl;
pub use engine::PlayerEngine;
pub use ring_buffer::{AudioRingBuffer, RingBufferStats};
pub use source::{PcmSource, SilenceSource, SineSource};
pub use state::{DecodeMode, PlayerState, PlayerStatus};
