//! # Resilience Error Types
//!
//! Structured errors for the resilience layer using thiserror. The key split is
//! between *availability* failures (the dependency could not be reached in time)
//! and *application* failures (the dependency answered and said no). Only the
//! former trip circuit breakers or activate fallbacks.

use crate::resilience::CircuitBreakerError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the breaker, registry and resilient wrappers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResilienceError {
    #[error("Circuit breaker is open for {dependency}, retry after {retry_after_ms}ms")]
    CircuitBreakerOpen {
        dependency: String,
        retry_after_ms: u64,
    },

    #[error("Operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Database unavailable for {operation}: {reason} (retry after {retry_after_ms}ms)")]
    DatabaseUnavailable {
        operation: String,
        retry_after_ms: u64,
        reason: String,
    },

    #[error("Connection error: {dependency}: {message}")]
    Connection { dependency: String, message: String },

    #[error("Operation rejected by {dependency}: {message}")]
    Operation { dependency: String, message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ResilienceError {
    /// Create a circuit-open error
    pub fn circuit_open(dependency: impl Into<String>, retry_after: Duration) -> Self {
        Self::CircuitBreakerOpen {
            dependency: dependency.into(),
            retry_after_ms: retry_after.as_millis() as u64,
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a database-unavailable error
    pub fn database_unavailable(
        operation: impl Into<String>,
        retry_after: Duration,
        reason: impl Into<String>,
    ) -> Self {
        Self::DatabaseUnavailable {
            operation: operation.into(),
            retry_after_ms: retry_after.as_millis() as u64,
            reason: reason.into(),
        }
    }

    /// Create a connection (availability) error
    pub fn connection(dependency: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            dependency: dependency.into(),
            message: message.into(),
        }
    }

    /// Create an operation (application) error
    pub fn operation(dependency: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Operation {
            dependency: dependency.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether this error means the dependency is unreachable, slow or gated
    pub fn is_availability_failure(&self) -> bool {
        matches!(
            self,
            Self::CircuitBreakerOpen { .. }
                | Self::Timeout { .. }
                | Self::DatabaseUnavailable { .. }
                | Self::Connection { .. }
        )
    }

    /// Caller-actionable retry hint, when the error carries one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitBreakerOpen { retry_after_ms, .. }
            | Self::DatabaseUnavailable { retry_after_ms, .. } => {
                Some(Duration::from_millis(*retry_after_ms))
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ResilienceError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<CircuitBreakerError<ResilienceError>> for ResilienceError {
    fn from(err: CircuitBreakerError<ResilienceError>) -> Self {
        match err {
            CircuitBreakerError::CircuitOpen {
                component,
                retry_after,
            } => Self::circuit_open(component, retry_after),
            CircuitBreakerError::OperationFailed(inner) => inner,
        }
    }
}

/// Result type for resilience operations
pub type Result<T> = std::result::Result<T, ResilienceError>;

/// Classifies an operation error for breaker accounting.
///
/// Errors default to availability failures; override for error types that can
/// also describe application-level rejections.
pub trait FailureClassification {
    fn is_availability_failure(&self) -> bool {
        true
    }
}

impl FailureClassification for ResilienceError {
    fn is_availability_failure(&self) -> bool {
        ResilienceError::is_availability_failure(self)
    }
}

impl FailureClassification for String {}
impl FailureClassification for &str {}
impl FailureClassification for std::io::Error {}
impl FailureClassification for anyhow::Error {}
