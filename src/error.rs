//! Error types for the Ariadne crawler

use thiserror::Error;

/// Main error type for crawler operations
#[derive(Debug, Error)]
pub enum AriadneError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Browser error: {0}")]
    BrowserError(String),

    #[error("Automation protocol error: {0}")]
    CdpError(String),

    #[error("Unsupported URL: {0}")]
    UnsupportedUrl(String),

    #[error("Result sink error: {0}")]
    SinkError(String),

    #[error("Task source error: {0}")]
    TaskSourceError(String),

    #[error("Tab pool closed")]
    PoolClosed,

    #[error("Operation timed out after {0} ms")]
    Timeout(u64),
}

impl From<chromiumoxide::error::CdpError> for AriadneError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AriadneError::CdpError(err.to_string())
    }
}

/// Result type alias for crawler operations
pub type Result<T> = std::result::Result<T, AriadneError>;
