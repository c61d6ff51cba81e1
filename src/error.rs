//! Error types for the channel relay.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),
}

/// Configuration-related errors. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid channel reference {reference:?}: {reason}")]
    InvalidChannel { reference: String, reason: String },
}

/// Errors surfaced by the messaging-platform client.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Cannot resolve channel {channel}: {reason}")]
    ResolveFailed { channel: String, reason: String },

    #[error("Platform rejected message formatting: {reason}")]
    FormattingRejected { reason: String },

    #[error("Rate limited by platform, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Failed to send to {channel}: {reason}")]
    SendFailed { channel: String, reason: String },

    #[error("Failed to download media: {reason}")]
    DownloadFailed { reason: String },

    #[error("Message has no media to relay")]
    NoMedia,

    #[error("Subscription closed: {0}")]
    SubscriptionClosed(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl ChannelError {
    /// Whether a retry in plain-text mode can succeed where this failed.
    pub fn is_formatting_rejection(&self) -> bool {
        matches!(self, Self::FormattingRejected { .. })
    }
}

/// Durable dedup-state errors. Logged and swallowed by the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt fingerprint file {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the relay loop itself.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("No source channels configured")]
    NoSources,

    #[error("Target channel {channel} is not accessible: {source}")]
    TargetUnavailable {
        channel: String,
        #[source]
        source: ChannelError,
    },

    #[error("Tick panicked: {0}")]
    TickPanicked(String),
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
