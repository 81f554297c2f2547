//! Error types for persona-reply.

use std::time::Duration;

/// Top-level error type for the daemon.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mail gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed for channel {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Channel {name} failed to list messages: {reason}")]
    ListFailed { name: String, reason: String },

    #[error("Channel {name} failed to fetch message {id}: {reason}")]
    FetchFailed {
        name: String,
        id: String,
        reason: String,
    },

    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reply ledger errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed ledger row {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// Reply generation failures. Never fatal; the caller falls back.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Completion provider failed: {0}")]
    Provider(#[from] LlmError),

    #[error("Completion provider returned an empty reply")]
    Empty,
}

/// Errors that abort a single loop iteration.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Iteration panicked: {0}")]
    Panicked(String),
}

/// Result type for daemon startup.
pub type Result<T> = std::result::Result<T, Error>;
