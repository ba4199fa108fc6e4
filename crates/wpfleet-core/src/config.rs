// ── Runtime configuration ──
//
// These types describe how the controller and the sync client behave.
// They never touch disk: `wpfleet-config` builds them from the layered
// configuration and hands them in.

use std::time::Duration;

use url::Url;

/// Tuning for the lifecycle controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Upper bound for a single provisioner call.
    pub provision_timeout: Duration,
    /// Dispatch a start right after create.
    pub auto_start: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            provision_timeout: Duration::from_secs(300),
            auto_start: true,
        }
    }
}

/// How the sync client talks to a backend.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Backend root, e.g. `http://localhost:5000`.
    pub base_url: Url,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Delay before the reconciling refresh that follows a create.
    pub refresh_delay: Duration,
    /// Wait window of each change long-poll.
    pub long_poll_wait: Duration,
}

impl SyncConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: Duration::from_secs(30),
            refresh_delay: Duration::from_millis(2000),
            long_poll_wait: Duration::from_secs(25),
        }
    }
}
