//! Provider trait and common types for the generative text service

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Shape of the text the service should answer with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Freeform,
    Structured,
}

/// Error type for provider operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Response parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Authentication failed: {0}")]
    AuthError(String),
}

impl ProviderError {
    /// Rate limits, timeouts, connection trouble and server-side errors are
    /// worth another attempt; malformed requests are not
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. }
            | ProviderError::Timeout
            | ProviderError::RequestFailed(_) => true,
            ProviderError::ApiError { status, .. } => *status == 408 || *status >= 500,
            ProviderError::ParseError(_)
            | ProviderError::ConfigError(_)
            | ProviderError::AuthError(_) => false,
        }
    }

    /// Least wait the service asked for before trying again
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after_ms } => retry_after_ms.map(Duration::from_millis),
            _ => None,
        }
    }
}

/// A single completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub format: ResponseFormat,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            format: ResponseFormat::Freeform,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }
}

/// Trait every generative text backend implements
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Get the provider name for logging/display
    fn name(&self) -> &'static str;

    /// Check if this provider is properly configured and ready
    fn is_configured(&self) -> bool;

    /// Send a prompt and get text back
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError>;
}
