//! Retry classification and operator-facing wording for the error types.

use crate::error::*;
use std::fmt::Display;
use std::time::Duration;
use tracing::{error, info, warn};

pub trait ErrorExt: Display {
    /// Stable upper-snake code for logs and the CLI.
    fn error_code(&self) -> &'static str;

    /// The same request may succeed if sent again unchanged.
    fn is_retryable(&self) -> bool;

    /// Wait the failing side asked for before trying again, if it named one.
    fn retry_after(&self) -> Option<Duration>;

    fn user_friendly_message(&self) -> String;

    fn log_error(&self) -> &Self
    where
        Self: Sized,
    {
        error!(code = self.error_code(), "{}", self);
        self
    }
}

impl ErrorExt for CoreError {
    fn error_code(&self) -> &'static str {
        match self {
            CoreError::Platform(e) => e.error_code(),
            CoreError::Database(e) => e.error_code(),
            CoreError::Llm(e) => e.error_code(),
            CoreError::Config(e) => e.error_code(),
            CoreError::Serialization(_) => "SERIALIZATION",
            CoreError::Network(_) => "NETWORK",
            CoreError::InvalidInput { .. } => "INVALID_INPUT",
            CoreError::Timeout { .. } => "TIMEOUT",
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::Internal { .. } => "INTERNAL",
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            CoreError::Platform(e) => e.is_retryable(),
            CoreError::Database(e) => e.is_retryable(),
            CoreError::Llm(e) => e.is_retryable(),
            CoreError::Network(e) => e.is_timeout() || e.is_connect(),
            CoreError::Timeout { .. } => true,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::Platform(e) => e.retry_after(),
            CoreError::Llm(e) => e.retry_after(),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CoreError::Platform(e) => e.user_friendly_message(),
            CoreError::Database(e) => e.user_friendly_message(),
            CoreError::Llm(e) => e.user_friendly_message(),
            CoreError::Config(e) => e.user_friendly_message(),
            CoreError::Network(_) => {
                "Could not reach the service. Check the network connection.".to_string()
            }
            CoreError::Timeout { seconds } => {
                format!("Gave up after waiting {} seconds for a response.", seconds)
            }
            CoreError::NotFound { resource } => format!("Could not find {}.", resource),
            CoreError::InvalidInput { message } => message.clone(),
            CoreError::Serialization(_) | CoreError::Internal { .. } => {
                format!("Unexpected internal error: {}", self)
            }
        }
    }
}

impl ErrorExt for PlatformError {
    fn error_code(&self) -> &'static str {
        match self {
            PlatformError::AuthenticationFailed { .. } => "PLATFORM_AUTH",
            PlatformError::RateLimitExceeded { .. } => "PLATFORM_RATE_LIMITED",
            PlatformError::Forbidden { .. } => "PLATFORM_FORBIDDEN",
            PlatformError::PostNotFound { .. } => "PLATFORM_POST_NOT_FOUND",
            PlatformError::RequestTimeout => "PLATFORM_TIMEOUT",
            PlatformError::InvalidResponse { .. } => "PLATFORM_BAD_RESPONSE",
            PlatformError::ServerError { .. } => "PLATFORM_SERVER",
            PlatformError::Rejected { .. } => "PLATFORM_REJECTED",
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            PlatformError::RateLimitExceeded { .. }
                | PlatformError::RequestTimeout
                | PlatformError::ServerError { .. }
                | PlatformError::InvalidResponse { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            PlatformError::RateLimitExceeded { retry_after } => {
                Some(Duration::from_secs(*retry_after))
            }
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            PlatformError::AuthenticationFailed { .. } => {
                "Moltbook refused the API key. Check MOLTBOOK_API_KEY.".to_string()
            }
            PlatformError::RateLimitExceeded { retry_after } => format!(
                "Moltbook is rate limiting this agent; next attempt allowed in {} seconds.",
                retry_after
            ),
            PlatformError::Forbidden { resource } => format!(
                "Moltbook denied access to {}. The agent may not be claimed yet.",
                resource
            ),
            PlatformError::PostNotFound { post_id } => {
                format!("Post {} no longer exists on Moltbook.", post_id)
            }
            PlatformError::RequestTimeout => "Moltbook did not answer in time.".to_string(),
            PlatformError::InvalidResponse { details } => {
                format!("Moltbook sent a response the agent could not read: {}", details)
            }
            PlatformError::ServerError { status_code } => {
                format!("Moltbook is having trouble (HTTP {}).", status_code)
            }
            PlatformError::Rejected { message, .. } => {
                format!("Moltbook rejected the request: {}", message)
            }
        }
    }
}

impl ErrorExt for DatabaseError {
    fn error_code(&self) -> &'static str {
        match self {
            DatabaseError::ConnectionFailed { .. } => "DB_CONNECTION",
            DatabaseError::MigrationFailed { .. } => "DB_MIGRATION",
            DatabaseError::ConstraintViolation { .. } => "DB_CONSTRAINT",
            DatabaseError::DatabaseLocked => "DB_LOCKED",
            DatabaseError::CorruptRecord { .. } => "DB_CORRUPT_RECORD",
            DatabaseError::Sql(_) => "DB_SQL",
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            DatabaseError::DatabaseLocked | DatabaseError::ConnectionFailed { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn user_friendly_message(&self) -> String {
        match self {
            DatabaseError::ConnectionFailed { reason } => {
                format!("Could not open the activity database: {}", reason)
            }
            DatabaseError::DatabaseLocked => {
                "The activity database is locked by another process.".to_string()
            }
            DatabaseError::ConstraintViolation { constraint } => {
                format!("Refused to overwrite an existing entry ({}).", constraint)
            }
            DatabaseError::CorruptRecord { details } => {
                format!("A stored activity record could not be read: {}", details)
            }
            DatabaseError::MigrationFailed { .. } | DatabaseError::Sql(_) => {
                format!("Activity database error: {}", self)
            }
        }
    }
}

impl ErrorExt for LlmError {
    fn error_code(&self) -> &'static str {
        match self {
            LlmError::AuthenticationFailed { .. } => "LLM_AUTH",
            LlmError::InvalidApiKey { .. } => "LLM_INVALID_API_KEY",
            LlmError::RateLimitExceeded { .. } => "LLM_RATE_LIMITED",
            LlmError::ModelNotAvailable { .. } => "LLM_MODEL_UNAVAILABLE",
            LlmError::ContentFiltered { .. } => "LLM_CONTENT_FILTERED",
            LlmError::ServiceUnavailable { .. } => "LLM_UNAVAILABLE",
            LlmError::RequestTimeout { .. } => "LLM_TIMEOUT",
            LlmError::InsufficientCredits { .. } => "LLM_NO_CREDITS",
            LlmError::InvalidResponseFormat { .. } => "LLM_BAD_RESPONSE",
            LlmError::InvalidDecision { .. } => "LLM_INVALID_DECISION",
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimitExceeded { .. }
                | LlmError::ServiceUnavailable { .. }
                | LlmError::RequestTimeout { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimitExceeded { retry_after, .. } => {
                Some(Duration::from_secs(*retry_after))
            }
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            LlmError::AuthenticationFailed { provider } | LlmError::InvalidApiKey { provider } => {
                format!("{} refused the API key. Check OPENROUTER_API_KEY.", provider)
            }
            LlmError::InsufficientCredits { provider } => {
                format!("The {} account is out of credits.", provider)
            }
            LlmError::ModelNotAvailable { model } => {
                format!("Model {} is not available. Set AGENT_MODEL to another one.", model)
            }
            LlmError::InvalidDecision { reason } => {
                format!("The model proposed an action the agent cannot take: {}", reason)
            }
            LlmError::InvalidResponseFormat { .. } => {
                "The model's reply could not be understood.".to_string()
            }
            _ => format!("Language model error: {}", self),
        }
    }
}

impl ErrorExt for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            ConfigError::FileNotFound { .. } => "CONFIG_FILE_NOT_FOUND",
            ConfigError::MissingField { .. } => "CONFIG_MISSING_FIELD",
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE",
            ConfigError::MissingEnvironmentVariable { .. } => "CONFIG_MISSING_ENV",
            ConfigError::ValidationFailed { .. } => "CONFIG_INVALID",
            ConfigError::Parse(_) => "CONFIG_PARSE",
        }
    }

    // Fixing configuration needs the operator.
    fn is_retryable(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn user_friendly_message(&self) -> String {
        match self {
            ConfigError::MissingEnvironmentVariable { var_name } => {
                format!("Set {} before starting the agent.", var_name)
            }
            ConfigError::MissingField { field } => format!("Setting '{}' is required.", field),
            ConfigError::InvalidValue { field, value } => {
                format!("'{}' is not a valid value for {}.", value, field)
            }
            _ => format!("Settings problem: {}", self),
        }
    }
}

/// Logs faults from runs nobody is waiting on: scheduler ticks and queued
/// manual triggers.
#[derive(Debug, Clone, Copy)]
pub struct ErrorReporter {
    source: &'static str,
}

impl ErrorReporter {
    pub fn new(source: &'static str) -> Self {
        Self { source }
    }

    pub fn report_error(&self, error: &CoreError) {
        error!(source = self.source, code = error.error_code(), "{}", error);
        info!(source = self.source, "{}", error.user_friendly_message());
    }

    /// Busy and disabled runs are expected conditions and only warn.
    pub fn report_run_error(&self, error: &RunError) {
        match error {
            RunError::Busy | RunError::AutonomousModeDisabled => {
                warn!(source = self.source, "Run not started: {}", error)
            }
            RunError::Fault {
                run_id,
                stage,
                message,
                ..
            } => error!(
                source = self.source,
                run_id = %run_id,
                "Run failed in {} stage: {}",
                stage,
                message
            ),
            RunError::Store(e) => self.report_error(e),
        }
    }
}
