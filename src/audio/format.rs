//! Mix-format probe and float32 shared-mode selection
//!
//! Classifies an endpoint's native mix format and builds the float32
//! shared-mode request the render path runs on. Shared mode dictates the
//! device mix rate and channel count; only the sample representation is
//! negotiated.

use tracing::debug;

use crate::audio::endpoint::{EndpointClient, FormatSupport};
use crate::audio::types::{FormatTag, MixFormat, SampleFormat, SubFormat};
use crate::error::{Error, Result};

/// Classify a mix-format descriptor into the formats the render path can
/// produce.
///
/// Rules, applied in order:
/// - IEEE-float tag with 32 bits per sample is `Float32`.
/// - Linear PCM tag with 16 bits per sample is `Pcm16`.
/// - An extensible container is classified by its embedded subformat under
///   the same two rules.
/// - Anything else is `Unsupported`.
pub fn detect_sample_format(format: &MixFormat) -> SampleFormat {
    match format.tag {
        FormatTag::IeeeFloat if format.bits_per_sample == 32 => SampleFormat::Float32,
        FormatTag::Pcm if format.bits_per_sample == 16 => SampleFormat::Pcm16,
        FormatTag::Extensible(SubFormat::IeeeFloat) if format.bits_per_sample == 32 => {
            SampleFormat::Float32
        }
        FormatTag::Extensible(SubFormat::Pcm) if format.bits_per_sample == 16 => {
            SampleFormat::Pcm16
        }
        _ => SampleFormat::Unsupported,
    }
}

/// Build a float32 shared-mode format at the device's native rate and
/// channel count and confirm the endpoint supports it exactly.
///
/// The channel mask is copied from the device mix format when present.
/// Anything short of an exact-match answer fails initialization; the render
/// path does not chase "closest" formats.
pub fn select_float32_format<E: EndpointClient + ?Sized>(
    endpoint: &E,
    device_mix_format: &MixFormat,
) -> Result<MixFormat> {
    if device_mix_format.sample_rate == 0 || device_mix_format.channels == 0 {
        return Err(Error::FormatNegotiation(format!(
            "device mix format is degenerate: {} Hz, {} ch",
            device_mix_format.sample_rate, device_mix_format.channels
        )));
    }

    let requested = MixFormat::extensible_float32(
        device_mix_format.sample_rate,
        device_mix_format.channels,
        device_mix_format.channel_mask,
    );

    match endpoint.is_format_supported(true, &requested)? {
        FormatSupport::Exact => {
            debug!(
                sample_rate = requested.sample_rate,
                channels = requested.channels,
                "endpoint accepted float32 shared-mode format"
            );
            Ok(requested)
        }
        FormatSupport::Closest(closest) => Err(Error::FormatNegotiation(format!(
            "endpoint offered a different format ({} Hz, {} ch, {} bits) instead of float32",
            closest.sample_rate, closest.channels, closest.bits_per_sample
        ))),
        FormatSupport::Rejected => Err(Error::FormatNegotiation(
            "endpoint rejected float32 shared-mode format".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_format(tag: FormatTag, bits: u16) -> MixFormat {
        MixFormat {
            tag,
            sample_rate: 48_000,
            channels: 2,
            bits_per_sample: bits,
            block_align: 2 * bits / 8,
            channel_mask: None,
        }
    }

    #[test]
    fn test_detect_ieee_float_32() {
        let fmt = base_format(FormatTag::IeeeFloat, 32);
        assert_eq!(detect_sample_format(&fmt), SampleFormat::Float32);
    }

    #[test]
    fn test_detect_pcm_16() {
        let fmt = base_format(FormatTag::Pcm, 16);
        assert_eq!(detect_sample_format(&fmt), SampleFormat::Pcm16);
    }

    #[test]
    fn test_detect_extensible_float() {
        let fmt = base_format(FormatTag::Extensible(SubFormat::IeeeFloat), 32);
        assert_eq!(detect_sample_format(&fmt), SampleFormat::Float32);
    }

    #[test]
    fn test_detect_extensible_pcm() {
        let fmt = base_format(FormatTag::Extensible(SubFormat::Pcm), 16);
        assert_eq!(detect_sample_format(&fmt), SampleFormat::Pcm16);
    }

    use crate::audio::endpoint::{RenderClient, RenderSignal};
    use crate::error::Error;
    use std::sync::{Arc, Mutex};

    /// Probe-only endpoint: records the requested format and returns a
    /// scripted support answer. The render half is never reached.
    struct ProbeEndpoint {
        native: MixFormat,
        answer: FormatSupport,
        requested: Arc<Mutex<Option<MixFormat>>>,
    }

    struct NoRenderer;

    impl RenderClient for NoRenderer {
        fn current_padding(&mut self) -> crate::error::Result<u32> {
            Err(Error::RenderCycle("probe endpoint".to_string()))
        }
        fn get_buffer(&mut self, _frames: u32) -> crate::error::Result<&mut [u8]> {
            Err(Error::RenderCycle("probe endpoint".to_string()))
        }
        fn release_buffer(&mut self, _frames: u32, _flags: u32) -> crate::error::Result<()> {
            Err(Error::RenderCycle("probe endpoint".to_string()))
        }
    }

    impl EndpointClient for ProbeEndpoint {
        type Renderer = NoRenderer;

        fn mix_format(&self) -> crate::error::Result<MixFormat> {
            Ok(self.native.clone())
        }
        fn is_format_supported(
            &self,
            _shared: bool,
            format: &MixFormat,
        ) -> crate::error::Result<FormatSupport> {
            *self.requested.lock().unwrap() = Some(format.clone());
            Ok(self.answer.clone())
        }
        fn initialize(
            &mut self,
            _shared: bool,
            _event_driven: bool,
            _format: &MixFormat,
        ) -> crate::error::Result<u32> {
            Err(Error::EndpointInit("probe endpoint".to_string()))
        }
        fn set_event_handle(&mut self, _signal: Arc<RenderSignal>) -> crate::error::Result<()> {
            Ok(())
        }
        fn render_client(&mut self) -> crate::error::Result<NoRenderer> {
            Ok(NoRenderer)
        }
        fn start(&mut self) -> crate::error::Result<()> {
            Ok(())
        }
        fn stop(&mut self) -> crate::error::Result<()> {
            Ok(())
        }
        fn reset(&mut self) -> crate::error::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_selection_requests_float32_at_native_rate_with_mask() {
        let native = MixFormat {
            tag: FormatTag::Extensible(SubFormat::Pcm),
            sample_rate: 44_100,
            channels: 2,
            bits_per_sample: 16,
            block_align: 4,
            channel_mask: Some(0x3),
        };
        let requested = Arc::new(Mutex::new(None));
        let endpoint = ProbeEndpoint {
            native: native.clone(),
            answer: FormatSupport::Exact,
            requested: Arc::clone(&requested),
        };

        let selected = select_float32_format(&endpoint, &native).unwrap();

        assert_eq!(selected.tag, FormatTag::Extensible(SubFormat::IeeeFloat));
        assert_eq!(selected.sample_rate, 44_100);
        assert_eq!(selected.channels, 2);
        assert_eq!(selected.bits_per_sample, 32);
        assert_eq!(selected.channel_mask, Some(0x3));
        assert_eq!(requested.lock().unwrap().as_ref(), Some(&selected));
    }

    #[test]
    fn test_selection_fails_on_closest_match() {
        let native = MixFormat::extensible_float32(48_000, 2, None);
        let endpoint = ProbeEndpoint {
            native: native.clone(),
            answer: FormatSupport::Closest(MixFormat::extensible_float32(44_100, 2, None)),
            requested: Arc::new(Mutex::new(None)),
        };

        assert!(select_float32_format(&endpoint, &native).is_err());
    }

    #[test]
    fn test_selection_fails_on_rejection() {
        let native = MixFormat::extensible_float32(48_000, 2, None);
        let endpoint = ProbeEndpoint {
            native: native.clone(),
            answer: FormatSupport::Rejected,
            requested: Arc::new(Mutex::new(None)),
        };

        assert!(select_float32_format(&endpoint, &native).is_err());
    }

    #[test]
    fn test_selection_fails_on_degenerate_device_format() {
        let mut native = MixFormat::extensible_float32(48_000, 2, None);
        native.sample_rate = 0;
        let endpoint = ProbeEndpoint {
            native: native.clone(),
            answer: FormatSupport::Exact,
            requested: Arc::new(Mutex::new(None)),
        };

        assert!(select_float32_format(&endpoint, &native).is_err());
    }

    #[test]
    fn test_detect_unsupported_variants() {
        // 24-bit PCM in an extensible container
        let fmt = base_format(FormatTag::Extensible(SubFormat::Pcm), 24);
        assert_eq!(detect_sample_format(&fmt), SampleFormat::Unsupported);

        // Float with the wrong width
        let fmt = base_format(FormatTag::IeeeFloat, 64);
        assert_eq!(detect_sample_format(&fmt), SampleFormat::Unsupported);

        // Unknown subformat
        let fmt = base_format(FormatTag::Extensible(SubFormat::Other), 32);
        assert_eq!(detect_sample_format(&fmt), SampleFormat::Unsupported);

        // PCM with float width
        let fmt = base_format(FormatTag::Pcm, 32);
        assert_eq!(detect_sample_format(&fmt), SampleFormat::Unsupported);
    }
}
