//! Site lifecycle orchestration for wpfleet.
//!
//! This crate owns the domain model and both ends of the lifecycle:
//!
//! - **[`SiteRegistry`]**: Durable, creation-ordered store of site records.
//!   Every mutation is persisted atomically and bumps a version counter
//!   that feeds the change long-poll.
//!
//! - **[`LifecycleController`]**: Enforces legal transitions and holds a
//!   per-site exclusive lock for the whole command, provisioner call and
//!   registry update. A second command on a busy site fails with
//!   [`CoreError::Busy`] instead of queuing.
//!
//! - **[`Provisioner`]**: The effectful seam: a Docker Compose
//!   implementation for real hosts and a simulated one with fault
//!   injection for tests and demos. Ports come from a shared
//!   [`PortAllocator`] with per-site leases.
//!
//! - **[`SyncClient`]**: Client-side view over the HTTP API: wholesale
//!   snapshot refreshes, optimistic create, fire-and-refresh commands and
//!   an optional change listener.

pub mod config;
pub mod convert;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod provisioner;
pub mod registry;
pub mod sync;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{LifecycleConfig, SyncConfig};
pub use error::CoreError;
pub use lifecycle::{LifecycleController, Ticket};
pub use model::{LifecyclePhase, Site, SiteId, SiteStatus};
pub use provisioner::{
    ComposeProvisioner, ComposeSettings, Endpoint, Fault, Operation, PortAllocator,
    ProvisionError, ProvisionRequest, Provisioner, SimulatedProvisioner, TokioCommandRunner,
};
pub use registry::{SiteRecord, SiteRegistry};
pub use sync::{DeleteOutcome, SiteSnapshot, SyncClient};
