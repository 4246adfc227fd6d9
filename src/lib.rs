//! # Playhead
//!
//! Real-time audio playback core: a three-thread pipeline that moves
//! interleaved float32 PCM from an abstract decoder into a shared-mode
//! audio endpoint with deterministic low-latency rendering.
//!
//! **Pipeline:** a decode worker writes frames into a wait-free SPSC ring
//! buffer; an event-driven render worker drains it into the endpoint's
//! hardware buffer under a strict real-time contract; a command-driven
//! engine owns the playback state machine and coordinates both workers
//! through an epoch-based invalidation protocol.
//!
//! Codec/demuxer decoding, device enumeration, and any outward control
//! surface are external collaborators: the decoder is the
//! [`playback::PcmSource`] trait, the endpoint is the
//! [`audio::EndpointClient`] / [`audio::RenderClient`] trait pair.

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;

pub use error::{Error, Result};
