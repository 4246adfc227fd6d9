//! Error types for the playback core
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. Worker threads never panic on recoverable faults; failures
//! that matter to callers surface through `PlayerStatus::last_error`.

use thiserror::Error;

/// Main error type for the playback core
#[derive(Error, Debug)]
pub enum Error {
    /// Endpoint device/format negotiation rejected
    #[error("Endpoint initialization error: {0}")]
    EndpointInit(String),

    /// Endpoint start call rejected
    #[error("Endpoint start error: {0}")]
    EndpointStart(String),

    /// Mix format could not be negotiated to float32 shared mode
    #[error("Unsupported endpoint format: {0}")]
    FormatNegotiation(String),

    /// Failure within a single render cycle (padding query, get-buffer,
    /// release). Swallowed by the render worker; the cycle returns early and
    /// the next event wakes it again.
    #[error("Render cycle error: {0}")]
    RenderCycle(String),

    /// Operation not valid in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Convenience Result type using the playback core Error
pub type Result<T> = std::result::Result<T, Error>;
