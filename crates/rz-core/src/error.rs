//! Error types for rz

use thiserror::Error;

/// Result type alias using rz's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while describing a scene
#[derive(Error, Debug)]
pub enum Error {
    /// The scene hierarchy cannot be compiled as described
    #[error("Invalid scene: {0}")]
    InvalidScene(String),

    /// A component is missing something the compiler needs
    #[error("Invalid component '{name}': {reason}")]
    InvalidComponent { name: String, reason: String },

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}
