//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` variants into user-facing errors with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use wpfleet_config::ConfigError;
use wpfleet_core::CoreError;
use wpfleet_server::ServerError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the wpfleet backend at {url}")]
    #[diagnostic(
        code(wpfleet::connection_failed),
        help(
            "Check that the backend is running: wpfleet serve\n\
             Or point at another one with --api-url or WPFLEET_API_BASE_URL.\n\
             Cause: {reason}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(wpfleet::timeout),
        help("Increase the timeout with --timeout or check backend responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── Sites ────────────────────────────────────────────────────────
    #[error("{message}")]
    #[diagnostic(code(wpfleet::not_found), help("Run: wpfleet sites list"))]
    NotFound { message: String },

    #[error("{message}")]
    #[diagnostic(
        code(wpfleet::conflict),
        help("Stop the site first: wpfleet sites stop <id> --wait")
    )]
    Conflict { message: String },

    #[error("{message}")]
    #[diagnostic(
        code(wpfleet::busy),
        help("Another command is still in flight for this site. Retry once it settles.")
    )]
    Busy { message: String },

    #[error("{message}")]
    #[diagnostic(
        code(wpfleet::provision),
        help("The container runtime reported a failure. Check the backend logs.")
    )]
    Provision { message: String },

    #[error("Site {id} did not settle within {seconds}s")]
    #[diagnostic(
        code(wpfleet::wait_timeout),
        help("It may still finish. Check with: wpfleet sites get {id}")
    )]
    WaitTimeout { id: String, seconds: u64 },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error ({code}): {message}")]
    #[diagnostic(code(wpfleet::api_error))]
    ApiError { code: String, message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(wpfleet::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(wpfleet::config),
        help("Inspect the resolved configuration with: wpfleet config show")
    )]
    Config(#[from] ConfigError),

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(code(wpfleet::config_exists), help("Use --force to overwrite it."))]
    ConfigExists { path: String },

    // ── Server ───────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(wpfleet::server))]
    Server(#[from] ServerError),

    // ── Interactive ──────────────────────────────────────────────────
    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(wpfleet::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── IO ───────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } | Self::WaitTimeout { .. } => exit_code::TIMEOUT,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } | Self::Busy { .. } => exit_code::CONFLICT,
            Self::Validation { .. }
            | Self::NonInteractiveRequiresYes { .. }
            | Self::ConfigExists { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Network { url, reason } => CliError::ConnectionFailed { url, reason },

            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },

            CoreError::NotFound { message } => CliError::NotFound { message },

            CoreError::Conflict { message } => CliError::Conflict { message },

            CoreError::Busy { message } => CliError::Busy { message },

            CoreError::Provision { message } => CliError::Provision { message },

            CoreError::Validation { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::Api { message, code, .. } => CliError::ApiError {
                code: code.unwrap_or_else(|| "unknown".into()),
                message,
            },

            err @ (CoreError::Storage { .. } | CoreError::Internal(_)) => CliError::ApiError {
                code: err.code().into(),
                message: err.to_string(),
            },
        }
    }
}
