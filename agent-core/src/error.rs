use crate::types::{ActivityRecord, Stage};
use thiserror::Error;

/// Every fallible call below the pipeline returns this.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("moltbook: {0}")]
    Platform(#[from] PlatformError),

    #[error("activity store: {0}")]
    Database(#[from] DatabaseError),

    #[error("language model: {0}")]
    Llm(#[from] LlmError),

    #[error("settings: {0}")]
    Config(#[from] ConfigError),

    #[error("malformed JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transport failure: {0}")]
    Network(#[from] reqwest::Error),

    #[error("rejected input: {message}")]
    InvalidInput { message: String },

    #[error("gave up (timeout after {seconds}s)")]
    Timeout { seconds: u64 },

    #[error("no such {resource}")]
    NotFound { resource: String },

    #[error("bug: {message}")]
    Internal { message: String },
}

/// Failures reported by the Moltbook platform, either on feed reads or on
/// post/comment/upvote calls.
#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("API key refused: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("throttled by the platform for {retry_after}s")]
    RateLimitExceeded { retry_after: u64 },

    #[error("not allowed to touch {resource}")]
    Forbidden { resource: String },

    #[error("post {post_id} does not exist")]
    PostNotFound { post_id: String },

    #[error("platform did not answer in time")]
    RequestTimeout,

    #[error("unreadable response body: {details}")]
    InvalidResponse { details: String },

    #[error("platform fault (HTTP {status_code})")]
    ServerError { status_code: u16 },

    #[error("HTTP {status}: {message}")]
    Rejected { status: u16, message: String },
}

impl PlatformError {
    /// HTTP status the platform answered with, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            PlatformError::AuthenticationFailed { .. } => Some(401),
            PlatformError::Forbidden { .. } => Some(403),
            PlatformError::PostNotFound { .. } => Some(404),
            PlatformError::RateLimitExceeded { .. } => Some(429),
            PlatformError::ServerError { status_code } => Some(*status_code),
            PlatformError::Rejected { status, .. } => Some(*status),
            PlatformError::RequestTimeout | PlatformError::InvalidResponse { .. } => None,
        }
    }
}

/// Activity store failures.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("cannot open: {reason}")]
    ConnectionFailed { reason: String },

    #[error("schema upgrade failed: {migration}")]
    MigrationFailed { migration: String },

    #[error("duplicate entry ({constraint})")]
    ConstraintViolation { constraint: String },

    #[error("locked by another writer")]
    DatabaseLocked,

    #[error("unreadable row: {details}")]
    CorruptRecord { details: String },

    #[error("sqlite: {0}")]
    Sql(#[from] sqlx::Error),
}

/// Errors from the content generator and quality evaluator.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("{provider} refused the credentials")]
    AuthenticationFailed { provider: String },

    #[error("no usable API key for {provider}")]
    InvalidApiKey { provider: String },

    #[error("{provider} throttled us for {retry_after}s")]
    RateLimitExceeded { provider: String, retry_after: u64 },

    #[error("model {model} is not served")]
    ModelNotAvailable { model: String },

    #[error("completion withheld by moderation: {reason}")]
    ContentFiltered { reason: String },

    #[error("{provider} is down")]
    ServiceUnavailable { provider: String },

    #[error("{provider} did not answer in time")]
    RequestTimeout { provider: String },

    #[error("{provider} account has no credits left")]
    InsufficientCredits { provider: String },

    #[error("{provider} returned an unparseable completion")]
    InvalidResponseFormat { provider: String },

    #[error("unusable proposal: {reason}")]
    InvalidDecision { reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read settings file {path}")]
    FileNotFound { path: String },

    #[error("{field} must be set")]
    MissingField { field: String },

    #[error("{field} cannot be {value}")]
    InvalidValue { field: String, value: String },

    #[error("{var_name} is not set")]
    MissingEnvironmentVariable { var_name: String },

    #[error("inconsistent settings: {reason}")]
    ValidationFailed { reason: String },

    #[error("bad TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Why a call to the pipeline did not hand back a clean record.
///
/// Non-fault terminations (a `none` decision, a rejected draft, a guard block)
/// are not errors; they come back as an `Ok` record with the matching outcome.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("A pipeline run is already in progress")]
    Busy,

    #[error("Autonomous mode is disabled; scheduled run not started")]
    AutonomousModeDisabled,

    #[error("Run {run_id} failed during {stage}: {message}")]
    Fault {
        run_id: String,
        stage: Stage,
        message: String,
        record: Box<ActivityRecord>,
    },

    #[error("Activity store unavailable: {0}")]
    Store(#[source] CoreError),
}

impl RunError {
    /// The persisted record, for faults that still reached the Log stage.
    pub fn record(&self) -> Option<&ActivityRecord> {
        match self {
            RunError::Fault { record, .. } => Some(record),
            _ => None,
        }
    }
}
