//! Structured error types for engine operations.

use serde::Serialize;
use std::fmt;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors
    MissingRequiredField,
    InvalidFieldValue,
    InvalidState,
    MalformedId,

    // Not found errors
    TaskNotFound,
    IntentNotFound,

    // Resolution and integrity errors
    AmbiguousId,
    IntegrityViolation,
    DependencyReferenced,
    AlreadyExists,

    // Capacity errors
    QueueOverflow,
    Cancelled,

    // Sync errors
    MirrorConflict,

    // Internal errors
    StoreError,
    InternalError,
}

/// Structured error returned by every fallible engine operation.
#[derive(Debug, Clone, Serialize)]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl EngineError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            details: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    // Convenience constructors

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("{} is required", field),
        )
        .with_field(field)
    }

    pub fn invalid_value(field: &str, reason: &str) -> Self {
        Self::new(ErrorCode::InvalidFieldValue, reason).with_field(field)
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidState, reason)
    }

    pub fn task_not_found(task_id: &str) -> Self {
        Self::new(
            ErrorCode::TaskNotFound,
            format!("Task not found: {}", task_id),
        )
    }

    pub fn intent_not_found(intent_id: &str) -> Self {
        Self::new(
            ErrorCode::IntentNotFound,
            format!("Intent not found: {}", intent_id),
        )
    }

    pub fn already_exists(task_id: &str) -> Self {
        Self::new(
            ErrorCode::AlreadyExists,
            format!("Task already exists: {}", task_id),
        )
    }

    pub fn dependency_referenced(task_id: &str, referrers: &[String]) -> Self {
        Self::new(
            ErrorCode::DependencyReferenced,
            format!(
                "Task {} is still referenced by: {}",
                task_id,
                referrers.join(", ")
            ),
        )
    }

    pub fn integrity(errors: &[String]) -> Self {
        Self::new(
            ErrorCode::IntegrityViolation,
            format!("Commit would introduce integrity errors: {}", errors.join("; ")),
        )
    }

    pub fn queue_overflow(max_size: usize) -> Self {
        Self::new(
            ErrorCode::QueueOverflow,
            format!("Queue overflow: {} operations already pending", max_size),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(
            ErrorCode::Cancelled,
            "Operation was cancelled before it completed",
        )
    }

    pub fn mirror_conflict(path: &str) -> Self {
        Self::new(
            ErrorCode::MirrorConflict,
            format!("Mirror file {} was edited since the last sync", path),
        )
    }

    pub fn store(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::StoreError, err.to_string())
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, err.to_string())
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EngineError {}

// Allow using ? with anyhow errors by converting them
impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<EngineError>() {
            Ok(engine_err) => engine_err,
            Err(err) => EngineError::internal(err),
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
