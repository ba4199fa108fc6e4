//! HTTP backend for wpfleet.
//!
//! Exposes the `/api/sites` contract on top of a
//! [`LifecycleController`](wpfleet_core::LifecycleController):
//!
//! - **[`router`]**: The axum routes, CORS and request tracing.
//! - **[`AppState`]**: Shared handler state; [`AppState::bootstrap`] wires
//!   the registry, port allocator and provisioner from configuration and
//!   runs crash recovery.
//! - **[`spawn_server`]**: Binds and serves until [`ServerHandle::shutdown`].
//!
//! Core errors map onto HTTP as `{ error, code }` bodies: validation 400,
//! not found 404, conflict 409, busy 423, provisioning 502, timeout 504.

pub mod error;
pub mod routes;
pub mod server;
pub mod state;

pub use error::{ApiError, ServerError};
pub use routes::router;
pub use server::{ServerHandle, shutdown_signal, spawn_server};
pub use state::AppState;
