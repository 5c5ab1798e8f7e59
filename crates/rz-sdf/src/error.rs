//! Error types for the shader compiler

use thiserror::Error;

/// Result type alias using the compiler's error type
pub type Result<T> = std::result::Result<T, ShaderError>;

/// Errors raised while turning a hierarchy into kernel source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShaderError {
    /// A component body references a parameter it does not declare
    #[error("Component '{component}' references unknown parameter '{name}'")]
    UnknownParameter { component: String, name: String },

    /// A `${` placeholder is never closed
    #[error("Component '{component}' has an unterminated placeholder")]
    UnterminatedPlaceholder { component: String },

    /// Sentinel tokens survived substitution
    #[error("Unresolved tokens in '{label}': {tokens:?}")]
    UnresolvedTokens { label: String, tokens: Vec<String> },

    /// The hierarchy cannot be streamed
    #[error("Invalid hierarchy: {0}")]
    InvalidHierarchy(String),

    /// The GPU backend rejected the module
    #[error("Backend error: {0}")]
    Backend(String),
}
