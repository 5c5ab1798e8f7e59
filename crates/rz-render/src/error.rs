//! Error types for the render pipeline

use thiserror::Error;

use crate::backend::BufferId;

/// Result type alias using the backend error type
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors raised by a [`GpuBackend`](crate::GpuBackend) or the scheduler
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// `render` was called before a successful `build`
    #[error("No scene has been built")]
    NotBuilt,

    /// The image has no pixels
    #[error("Invalid render size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    /// A pass referenced a pipeline the backend does not know
    #[error("Unknown pipeline handle {0}")]
    UnknownPipeline(u64),

    /// A pass read a buffer that was never allocated
    #[error("Buffer {0:?} is not allocated")]
    MissingBuffer(BufferId),

    /// Mapping a buffer back to the CPU failed
    #[error("Readback failed: {0}")]
    Readback(String),

    /// The device rejected a command
    #[error("GPU error: {0}")]
    Device(String),
}
