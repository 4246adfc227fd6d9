//! Core audio format types and sample conversion
//!
//! A *frame* is one sample per channel at a single time step; all
//! inter-thread audio traffic in this crate is frame-counted. Samples are
//! interleaved float32 (stereo is LRLR...).

use serde::{Deserialize, Serialize};

/// Sample representation negotiated with the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// 32-bit IEEE float
    Float32,
    /// 16-bit signed linear PCM
    Pcm16,
    /// Anything the render path cannot produce
    Unsupported,
}

impl std::fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleFormat::Float32 => write!(f, "float32"),
            SampleFormat::Pcm16 => write!(f, "pcm16"),
            SampleFormat::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Wave-format tag of a host mix-format descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatTag {
    /// Linear PCM
    Pcm,
    /// IEEE floating point
    IeeeFloat,
    /// Extensible container; the embedded subformat identifies the encoding
    Extensible(SubFormat),
}

/// Subformat identifier embedded in an extensible descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubFormat {
    Pcm,
    IeeeFloat,
    Other,
}

/// Host mix-format descriptor, as reported by (or requested from) an
/// endpoint. Mirrors the fields of the platform wave-format structure that
/// the format probe inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixFormat {
    pub tag: FormatTag,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub block_align: u16,
    /// Speaker-position mask; present only on extensible descriptors.
    pub channel_mask: Option<u32>,
}

impl MixFormat {
    /// Extensible IEEE-float descriptor at the given rate and channel count.
    pub fn extensible_float32(sample_rate: u32, channels: u16, channel_mask: Option<u32>) -> Self {
        let block_align = channels * std::mem::size_of::<f32>() as u16;
        Self {
            tag: FormatTag::Extensible(SubFormat::IeeeFloat),
            sample_rate,
            channels,
            bits_per_sample: 32,
            block_align,
            channel_mask,
        }
    }
}

/// Endpoint format negotiated during initialization; immutable for the
/// lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub block_align: u16,
    pub sample_format: SampleFormat,
}

impl EndpointFormat {
    /// Build the negotiated format from an accepted mix-format descriptor.
    pub fn from_mix(mix: &MixFormat, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate: mix.sample_rate,
            channels: mix.channels,
            bits_per_sample: mix.bits_per_sample,
            block_align: mix.block_align,
            sample_format,
        }
    }

    /// Bytes per frame as the endpoint lays them out.
    pub fn frame_bytes(&self) -> usize {
        self.block_align as usize
    }
}

/// Convert float samples to 16-bit PCM with clamping.
///
/// Each input is clamped to [-1.0, 1.0] and scaled by 32767, so full-scale
/// float maps to ±32767.
pub fn convert_float_to_pcm16(input: &[f32], output: &mut [i16]) {
    debug_assert_eq!(input.len(), output.len());
    for (dst, src) in output.iter_mut().zip(input.iter()) {
        *dst = (src.clamp(-1.0, 1.0) * 32767.0) as i16;
    }
}
