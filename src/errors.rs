//! Error types for data-provider
//!
//! Every failure a node can observe is a [`ProviderError`]. The type is `Clone`
//! because a single in-flight read is shared between all of its callers, and each
//! of them receives the same settled error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by providers, selectors and the registry
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProviderError {
    /// The fetch routine of a provider (or a selector's dependency chain) failed
    #[error("Fetch failed: {0}")]
    Fetch(String),
    /// A query value could not be turned into a canonical key
    #[error("Invalid query value: {0}")]
    InvalidQuery(String),
    /// A value could not be serialized or deserialized
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A named method was invoked on a node that does not implement it
    #[error("Node '{node}' has no method '{method}'")]
    MissingMethod { node: String, method: String },
    /// A named query was invoked on a node that does not define it
    #[error("Node '{node}' has no query named '{name}'")]
    MissingQuery { node: String, name: String },
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// A spawned read finished without reporting a result
    #[error("Read task for '{0}' ended before settling")]
    ReadAborted(String),
    /// Free-form error raised by user code
    #[error("{0}")]
    Custom(String),
}

impl ProviderError {
    /// Shorthand for building a [`ProviderError::Fetch`]
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch(message.into())
    }

    /// Shorthand for building a [`ProviderError::Custom`]
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Serialization(err.to_string())
    }
}

impl From<String> for ProviderError {
    fn from(message: String) -> Self {
        ProviderError::Custom(message)
    }
}

impl From<&str> for ProviderError {
    fn from(message: &str) -> Self {
        ProviderError::Custom(message.to_string())
    }
}

/// Result type used across the crate
pub type ProviderResult<T> = Result<T, ProviderError>;
