//! Site provisioners.
//!
//! A provisioner owns the runtime resource behind a site: the container
//! stack and the host port it listens on. The lifecycle controller treats
//! every call as potentially slow and potentially failing, and bounds each
//! one with its own timeout.
//!
//! Implementations must be idempotent per site: starting the same site
//! twice must not lease a second port.

mod compose;
mod ports;
mod runner;
mod simulated;

pub use compose::{ComposeProvisioner, ComposeSettings, project_name};
pub use ports::PortAllocator;
pub use runner::{CommandOutput, CommandRunner, TokioCommandRunner};
pub use simulated::{Fault, SimulatedProvisioner};

use async_trait::async_trait;
use strum::{Display, IntoStaticStr};
use thiserror::Error;

use crate::model::SiteId;
use crate::registry::SiteRecord;

/// Everything a provisioner needs to know about a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub site_id: SiteId,
    pub name: String,
    /// Port the site used last time; reused when still free.
    pub preferred_port: Option<u16>,
}

impl From<&SiteRecord> for ProvisionRequest {
    fn from(record: &SiteRecord) -> Self {
        Self {
            site_id: record.id.clone(),
            name: record.name.clone(),
            preferred_port: record.port,
        }
    }
}

/// Where a started site can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub port: u16,
    pub url: String,
}

/// Provisioner operation, used for logging and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Operation {
    Start,
    Stop,
    Delete,
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("no free port in range {start}-{end}")]
    PortsExhausted { start: u16, end: u16 },

    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("`{command}` timed out after {timeout_secs}s")]
    CommandTimeout { command: String, timeout_secs: u64 },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot render compose file: {0}")]
    Render(String),

    #[error("{operation} failed for site {site_id}: {message}")]
    Failed {
        operation: Operation,
        site_id: SiteId,
        message: String,
    },
}

impl ProvisionError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Creates, stops and destroys the runtime resource behind a site.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Short name for logs (`compose`, `simulated`).
    fn name(&self) -> &'static str;

    /// Bring the site up and return where it listens.
    async fn provision_start(&self, request: &ProvisionRequest) -> Result<Endpoint, ProvisionError>;

    /// Stop the site, keeping its data. Releases the port lease.
    async fn provision_stop(&self, request: &ProvisionRequest) -> Result<(), ProvisionError>;

    /// Tear the site down including its data. Releases the port lease.
    async fn provision_delete(&self, request: &ProvisionRequest) -> Result<(), ProvisionError>;

    /// Re-establish the lease of a site found running at startup.
    async fn restore(&self, request: &ProvisionRequest, port: u16) -> Result<(), ProvisionError>;
}
