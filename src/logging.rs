//! # Structured Logging Module
//!
//! Environment-aware structured logging for the resilience layer. Breakers and
//! the registry never log on their own account beyond the listener hook; the
//! wrappers use the helpers here so every record carries the dependency name,
//! the operation and its duration.

use chrono::Utc;
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// `RUST_LOG` wins over the environment default level. Set
/// `RESILIENCE_LOG_FORMAT=json` for machine-readable output. Safe to call more
/// than once, and a no-op when another global subscriber is already installed.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json = use_json_format();

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json = json,
            "STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("RESILIENCE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn use_json_format() -> bool {
    std::env::var("RESILIENCE_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Latency class of a successful but slow operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlowOperationSeverity {
    Warning,
    Error,
}

/// Log structured data for a protected dependency call
pub fn log_dependency_operation(
    dependency: &str,
    operation: &str,
    status: &str,
    duration: Duration,
    details: Option<&str>,
) {
    tracing::debug!(
        dependency = %dependency,
        operation = %operation,
        status = %status,
        duration_ms = duration.as_millis() as u64,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "DEPENDENCY_OPERATION"
    );
}

/// Log an operation that succeeded but exceeded a latency threshold.
///
/// Monitoring signal only; slow success is never a breaker failure.
pub fn log_slow_operation(
    dependency: &str,
    operation: &str,
    duration: Duration,
    threshold: Duration,
    severity: SlowOperationSeverity,
) {
    let duration_ms = duration.as_millis() as u64;
    let threshold_ms = threshold.as_millis() as u64;
    match severity {
        SlowOperationSeverity::Warning => tracing::warn!(
            dependency = %dependency,
            operation = %operation,
            duration_ms = duration_ms,
            threshold_ms = threshold_ms,
            "SLOW_OPERATION"
        ),
        SlowOperationSeverity::Error => tracing::error!(
            dependency = %dependency,
            operation = %operation,
            duration_ms = duration_ms,
            threshold_ms = threshold_ms,
            "VERY_SLOW_OPERATION"
        ),
    }
}

/// Log a fallback served in place of the dependency's answer
pub fn log_fallback(dependency: &str, operation: &str, reason: &str) {
    tracing::warn!(
        dependency = %dependency,
        operation = %operation,
        reason = %reason,
        timestamp = %Utc::now().to_rfc3339(),
        "FALLBACK_SERVED"
    );
}

/// Log error with full context
pub fn log_error(dependency: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        dependency = %dependency,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "DEPENDENCY_ERROR"
    );
}
