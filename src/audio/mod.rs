//! Audio endpoint adapter, format negotiation, and render worker

pub mod endpoint;
pub mod format;
pub mod output;
pub mod simulated;
pub mod types;

pub use endpoint::{
    EndpointClient, FormatSupport, RenderClient, RenderSignal, Wake, BUFFER_FLAG_SILENT,
};
pub use output::{AudioOutput, FrameSource, RenderCounters};
pub use types::{EndpointFormat, MixFormat, SampleFormat};
