// ── Site domain types ──
//
// `SiteStatus` is what callers see; `LifecyclePhase` is what the
// controller tracks. Transient phases collapse into visible statuses via
// `LifecyclePhase::visible`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

// ── SiteId ──────────────────────────────────────────────────────────

/// Opaque site identifier, assigned once and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(String);

impl SiteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id for the `n`th site ever created (`s1`, `s2`, ...).
    pub fn from_sequence(n: u64) -> Self {
        Self(format!("s{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SiteId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl From<&str> for SiteId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for SiteId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── SiteStatus ──────────────────────────────────────────────────────

/// Externally visible site status.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SiteStatus {
    Created,
    Running,
    Stopped,
    Exited,
    Restarting,
}

impl SiteStatus {
    /// Whether a site in this status holds its port exclusively.
    pub fn occupies_port(self) -> bool {
        matches!(self, Self::Running | Self::Restarting)
    }

    pub fn can_delete(self) -> bool {
        !self.occupies_port()
    }

    /// Parse a status string from any backend. Docker's `paused` reads as
    /// stopped; anything unrecognised reads as exited.
    pub fn parse_lenient(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "paused" => Self::Stopped,
            other => other.parse().unwrap_or(Self::Exited),
        }
    }
}

// ── LifecyclePhase ──────────────────────────────────────────────────

/// Controller-side state of a site, including transient phases.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LifecyclePhase {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Exited,
    Deleting,
}

impl LifecyclePhase {
    pub fn visible(self) -> SiteStatus {
        match self {
            Self::Created => SiteStatus::Created,
            Self::Running => SiteStatus::Running,
            Self::Starting | Self::Stopping => SiteStatus::Restarting,
            Self::Stopped | Self::Deleting => SiteStatus::Stopped,
            Self::Exited => SiteStatus::Exited,
        }
    }

    /// Phases only ever observed while a command holds the site lock.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Starting | Self::Stopping | Self::Deleting)
    }
}

// ── Site ────────────────────────────────────────────────────────────

/// A managed WordPress deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub name: String,
    pub description: String,
    /// Host port; `None` until a start has succeeded.
    pub port: Option<u16>,
    pub status: SiteStatus,
    /// Reachable URL, present only while running.
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Last lifecycle failure, cleared by the next successful transition.
    pub error: Option<String>,
}

impl Site {
    /// True once a create or start has come up or failed.
    pub fn is_start_settled(&self) -> bool {
        !matches!(self.status, SiteStatus::Created | SiteStatus::Restarting)
    }

    /// True once no command can be in flight from this view's perspective.
    pub fn is_settled(&self) -> bool {
        self.status != SiteStatus::Restarting
    }
}
