// ── Core error types ──
//
// The lifecycle error taxonomy. Consumers of wpfleet-core never see raw
// HTTP statuses: the `From<wpfleet_api::Error>` impl folds status codes
// and the server's machine-readable `code` into these variants, and
// `wpfleet-server` maps them back onto the wire.

use thiserror::Error;

use crate::model::SiteId;
use crate::provisioner::ProvisionError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Caller errors ────────────────────────────────────────────────
    /// Bad user input; raised before any network or provisioner call.
    #[error("{message}")]
    Validation { message: String },

    #[error("{message}")]
    NotFound { message: String },

    /// Illegal transition (e.g. deleting a running site).
    #[error("{message}")]
    Conflict { message: String },

    /// Another command is already in flight for this site.
    #[error("{message}")]
    Busy { message: String },

    // ── Effect errors ────────────────────────────────────────────────
    #[error("Provisioning failed: {message}")]
    Provision { message: String },

    // ── Transport errors ─────────────────────────────────────────────
    #[error("Cannot reach the site API at {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Server reported a failure outside the taxonomy.
    #[error("{message}")]
    Api {
        message: String,
        code: Option<String>,
        status: Option<u16>,
    },

    // ── Local errors ─────────────────────────────────────────────────
    #[error("Registry storage error: {message}")]
    Storage { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(id: &SiteId) -> Self {
        Self::NotFound {
            message: format!("Site {id} not found"),
        }
    }

    pub fn busy(id: &SiteId) -> Self {
        Self::Busy {
            message: format!("Site {id} is busy with another operation"),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Stable machine-readable code, as carried in `{ error, code }`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Busy { .. } => "busy",
            Self::Provision { .. } => "provision",
            Self::Network { .. } => "network",
            Self::Timeout { .. } => "timeout",
            Self::Api { .. } => "api",
            Self::Storage { .. } => "storage",
            Self::Config { .. } => "config",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<ProvisionError> for CoreError {
    fn from(err: ProvisionError) -> Self {
        Self::Provision {
            message: err.to_string(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<wpfleet_api::Error> for CoreError {
    fn from(err: wpfleet_api::Error) -> Self {
        match err {
            wpfleet_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else {
                    CoreError::Network {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                }
            }
            wpfleet_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            wpfleet_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            wpfleet_api::Error::InvalidBaseUrl(url) => CoreError::Config {
                message: format!("Base URL cannot be used for API requests: {url}"),
            },
            wpfleet_api::Error::ClientBuild(message) => CoreError::Config { message },
            wpfleet_api::Error::Api {
                status,
                message,
                code,
            } => from_api_status(status, message, code),
            wpfleet_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

fn from_api_status(status: u16, message: String, code: Option<String>) -> CoreError {
    let by_code = match code.as_deref() {
        Some("validation") => Some(CoreError::Validation {
            message: message.clone(),
        }),
        Some("not_found") => Some(CoreError::NotFound {
            message: message.clone(),
        }),
        Some("conflict") => Some(CoreError::Conflict {
            message: message.clone(),
        }),
        Some("busy") => Some(CoreError::Busy {
            message: message.clone(),
        }),
        Some("provision") => Some(CoreError::Provision {
            message: message.clone(),
        }),
        _ => None,
    };
    if let Some(err) = by_code {
        return err;
    }

    match status {
        400 | 422 => CoreError::Validation { message },
        404 => CoreError::NotFound { message },
        409 => CoreError::Conflict { message },
        423 => CoreError::Busy { message },
        502 => CoreError::Provision { message },
        _ => CoreError::Api {
            message,
            code,
            status: Some(status),
        },
    }
}
