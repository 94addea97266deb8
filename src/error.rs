//! Error types for Recruit Assist.

use std::time::Duration;

/// Top-level error type for the agent.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Interaction error: {0}")]
    Interaction(#[from] InteractionError),

    #[error("Classification error: {0}")]
    Classification(#[from] ClassificationError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse profile: {0}")]
    ProfileParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence errors.
///
/// `Conflict` signals a lost optimistic-concurrency race on a per-key
/// update; callers retry once with a fresh read before giving up.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Concurrent modification of {entity} {id}: expected version {expected}")]
    Conflict {
        entity: String,
        id: String,
        expected: i64,
    },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Channel transport errors (email/SMS fetch and send).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Fetch failed on channel {channel}: {reason}")]
    FetchFailed { channel: String, reason: String },

    #[error("Send failed on channel {channel}: {reason}")]
    SendFailed { channel: String, reason: String },

    #[error("Authentication failed for channel {channel}: {reason}")]
    AuthFailed { channel: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Channel {channel} timed out after {timeout:?}")]
    Timeout { channel: String, timeout: Duration },
}

/// Response generator (LLM) errors.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Generator request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Generator rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Invalid generator response: {reason}")]
    InvalidResponse { reason: String },

    #[error("Generation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Retry budget exhausted after {attempts} attempts: {last}")]
    BudgetExhausted { attempts: u32, last: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Browser automation errors.
#[derive(Debug, thiserror::Error)]
pub enum InteractionError {
    #[error("Failed to open {url}: {reason}")]
    OpenFailed { url: String, reason: String },

    #[error("Page load timed out after {timeout:?}")]
    LoadTimeout { timeout: Duration },

    #[error("Content extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Action {action} on {target} failed: {reason}")]
    ActionFailed {
        action: String,
        target: String,
        reason: String,
    },

    #[error("Action {action} is not supported by this driver")]
    Unsupported { action: String },

    #[error("No browser lease available within {timeout:?}")]
    LeaseTimeout { timeout: Duration },

    #[error("Session handle is no longer valid")]
    StaleHandle,
}

/// Stage classification errors.
#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("Conversation {thread_id} is in terminal stage {stage}")]
    TerminalStage { thread_id: String, stage: String },
}

/// Result type alias for the agent.
pub type Result<T> = std::result::Result<T, Error>;
