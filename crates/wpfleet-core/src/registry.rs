// ── Site registry ──
//
// Single source of truth for site records. All mutations run under one
// write lock, are persisted atomically (temp file + rename) before they
// become visible, and bump a version counter that drives the change
// long-poll.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, watch};
use tracing::{debug, info};

use crate::error::CoreError;
use crate::model::{LifecyclePhase, Site, SiteId, SiteStatus};

/// A registry row: the persisted form of a site, including its
/// controller-side phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub id: SiteId,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub phase: LifecyclePhase,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SiteRecord {
    pub fn status(&self) -> SiteStatus {
        self.phase.visible()
    }

    /// Project the record into the public view. The URL is derived here
    /// and only while running.
    pub fn to_site(&self, public_host: &str) -> Site {
        let url = match (self.phase, self.port) {
            (LifecyclePhase::Running, Some(port)) => Some(site_url(public_host, port)),
            _ => None,
        };
        Site {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            port: self.port,
            status: self.status(),
            url,
            created_at: self.created_at,
            error: self.error.clone(),
        }
    }
}

/// `http://{host}:{port}`
pub fn site_url(public_host: &str, port: u16) -> String {
    format!("http://{public_host}:{port}")
}

#[derive(Debug, Clone, Default)]
struct RegistryState {
    next_id: u64,
    /// Survives restarts so long-poll cursors keep moving forward.
    version: u64,
    sites: IndexMap<SiteId, SiteRecord>,
}

/// On-disk layout of the registry file.
#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    sites: Vec<SiteRecord>,
}

/// Durable, ordered store of site records.
pub struct SiteRegistry {
    state: RwLock<RegistryState>,
    path: Option<PathBuf>,
    public_host: String,
    version: watch::Sender<u64>,
}

impl SiteRegistry {
    /// A registry that lives only in memory.
    pub fn in_memory(public_host: impl Into<String>) -> Self {
        Self::from_state(
            RegistryState {
                next_id: 1,
                ..RegistryState::default()
            },
            None,
            public_host.into(),
        )
    }

    /// Open (or start) the registry file at `path`.
    ///
    /// A missing file is an empty registry. A file that cannot be parsed
    /// is a `Storage` error; it is never silently replaced.
    pub async fn open(path: impl Into<PathBuf>, public_host: impl Into<String>) -> Result<Self, CoreError> {
        let path = path.into();
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => parse_registry_file(&path, &raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no registry file yet, starting empty");
                RegistryState {
                    next_id: 1,
                    ..RegistryState::default()
                }
            }
            Err(e) => {
                return Err(CoreError::Storage {
                    message: format!("cannot read {}: {e}", path.display()),
                });
            }
        };
        info!(
            path = %path.display(),
            sites = state.sites.len(),
            "site registry loaded"
        );
        Ok(Self::from_state(state, Some(path), public_host.into()))
    }

    fn from_state(state: RegistryState, path: Option<PathBuf>, public_host: String) -> Self {
        let (version, _) = watch::channel(state.version);
        Self {
            state: RwLock::new(state),
            path,
            public_host,
            version,
        }
    }

    pub fn public_host(&self) -> &str {
        &self.public_host
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub async fn get(&self, id: &SiteId) -> Result<Site, CoreError> {
        Ok(self.record(id).await?.to_site(&self.public_host))
    }

    pub async fn record(&self, id: &SiteId) -> Result<SiteRecord, CoreError> {
        self.state
            .read()
            .await
            .sites
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(id))
    }

    /// All sites in creation order.
    pub async fn list(&self) -> Vec<Site> {
        self.list_versioned().await.1
    }

    pub async fn records(&self) -> Vec<SiteRecord> {
        self.state.read().await.sites.values().cloned().collect()
    }

    /// All sites together with the version they were read at.
    pub async fn list_versioned(&self) -> (u64, Vec<Site>) {
        let state = self.state.read().await;
        let version = state.version;
        let sites = state
            .sites
            .values()
            .map(|r| r.to_site(&self.public_host))
            .collect();
        (version, sites)
    }

    // ── Change notification ──────────────────────────────────────────

    /// Current registry version; bumped by every successful mutation.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Wait until the version moves past `since` or `wait` elapses, then
    /// return the current state.
    ///
    /// Only a cursor equal to the current version waits. A cursor ahead of
    /// it was issued by another registry and is answered at once.
    pub async fn changes_since(&self, since: u64, wait: Duration) -> (u64, Vec<Site>) {
        self.changes_until(since, wait, std::future::pending()).await
    }

    /// As [`changes_since`](Self::changes_since), also returning early when
    /// `stop` resolves.
    pub async fn changes_until(
        &self,
        since: u64,
        wait: Duration,
        stop: impl Future<Output = ()>,
    ) -> (u64, Vec<Site>) {
        let mut rx = self.subscribe();
        if *rx.borrow_and_update() == since {
            // Elapsed, stopped and a closed channel all mean "report what we have".
            tokio::select! {
                _ = tokio::time::timeout(wait, rx.wait_for(|v| *v != since)) => {}
                () = stop => {}
            }
        }
        self.list_versioned().await
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Insert a new site with status `created`, no port and no URL.
    pub async fn create(&self, name: &str, description: &str) -> Result<Site, CoreError> {
        let (name, description) = validate_site_input(name, description)?;
        let record = self
            .mutate(|state| {
                let id = SiteId::from_sequence(state.next_id);
                state.next_id += 1;
                let record = SiteRecord {
                    id: id.clone(),
                    name,
                    description,
                    port: None,
                    phase: LifecyclePhase::Created,
                    created_at: Utc::now(),
                    error: None,
                };
                state.sites.insert(id, record.clone());
                Ok(record)
            })
            .await?;
        info!(site_id = %record.id, name = %record.name, "site created");
        Ok(record.to_site(&self.public_host))
    }

    /// Move a site to `phase`, setting its port and recorded error.
    ///
    /// Rejects a port already held by another running or restarting site.
    pub async fn update_status(
        &self,
        id: &SiteId,
        phase: LifecyclePhase,
        port: Option<u16>,
        error: Option<String>,
    ) -> Result<Site, CoreError> {
        if phase == LifecyclePhase::Running && port.is_none() {
            return Err(CoreError::Internal(format!(
                "site {id} cannot be running without a port"
            )));
        }

        let (previous, record) = self
            .mutate(|state| {
                if let Some(p) = port.filter(|_| phase.visible().occupies_port()) {
                    let holder = state.sites.values().find(|r| {
                        r.id != *id && r.port == Some(p) && r.status().occupies_port()
                    });
                    if let Some(holder) = holder {
                        return Err(CoreError::conflict(format!(
                            "Port {p} is already in use by site {}",
                            holder.id
                        )));
                    }
                }

                let record = state
                    .sites
                    .get_mut(id)
                    .ok_or_else(|| CoreError::not_found(id))?;
                let previous = record.phase;
                record.phase = phase;
                record.port = port;
                record.error = error;
                Ok((previous, record.clone()))
            })
            .await?;

        info!(
            site_id = %id,
            from = %previous,
            to = %phase,
            port = ?record.port,
            "site transitioned"
        );
        Ok(record.to_site(&self.public_host))
    }

    /// Remove a site. Running and restarting sites cannot be removed.
    pub async fn delete(&self, id: &SiteId) -> Result<(), CoreError> {
        self.mutate(|state| {
            let record = state.sites.get(id).ok_or_else(|| CoreError::not_found(id))?;
            if !record.status().can_delete() {
                return Err(delete_running_conflict());
            }
            state.sites.shift_remove(id);
            Ok(())
        })
        .await?;
        info!(site_id = %id, "site removed from registry");
        Ok(())
    }

    /// Apply `f` to a copy of the state, persist it, then publish it.
    /// Nothing changes if `f` or the write fails.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut RegistryState) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        next.version += 1;
        self.persist(&next).await?;
        let version = next.version;
        *guard = next;
        self.version.send_replace(version);
        Ok(out)
    }

    async fn persist(&self, state: &RegistryState) -> Result<(), CoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = RegistryFile {
            next_id: state.next_id,
            version: state.version,
            sites: state.sites.values().cloned().collect(),
        };
        let json = serde_json::to_vec_pretty(&file).map_err(|e| CoreError::Storage {
            message: format!("cannot serialize registry: {e}"),
        })?;

        let storage = |e: std::io::Error| CoreError::Storage {
            message: format!("cannot write {}: {e}", path.display()),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(storage)?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(storage)?;
        tokio::fs::rename(&tmp, path).await.map_err(storage)?;
        debug!(path = %path.display(), sites = state.sites.len(), "registry persisted");
        Ok(())
    }
}

pub(crate) fn delete_running_conflict() -> CoreError {
    CoreError::conflict("Cannot delete a running site. Please stop it first.")
}

/// Trim and check user input for a new site.
pub fn validate_site_input(name: &str, description: &str) -> Result<(String, String), CoreError> {
    let name = name.trim();
    let description = description.trim();
    if name.is_empty() || description.is_empty() {
        return Err(CoreError::validation(
            "Site name and description are required",
        ));
    }
    Ok((name.to_owned(), description.to_owned()))
}

fn parse_registry_file(path: &Path, raw: &str) -> Result<RegistryState, CoreError> {
    if raw.trim().is_empty() {
        return Ok(RegistryState {
            next_id: 1,
            ..RegistryState::default()
        });
    }
    let file: RegistryFile = serde_json::from_str(raw).map_err(|e| CoreError::Storage {
        message: format!("malformed registry file {}: {e}", path.display()),
    })?;

    // Never hand out an id at or below one already on disk.
    let highest = file
        .sites
        .iter()
        .filter_map(|r| r.id.as_str().strip_prefix('s')?.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    let next_id = file.next_id.max(highest + 1).max(1);

    let mut sites = IndexMap::with_capacity(file.sites.len());
    for record in file.sites {
        if sites.insert(record.id.clone(), record).is_some() {
            return Err(CoreError::Storage {
                message: format!("duplicate site id in {}", path.display()),
            });
        }
    }
    Ok(RegistryState {
        next_id,
        version: file.version,
        sites,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let registry = SiteRegistry::in_memory("localhost");
        let created = registry.create("  Blog ", "My blog").await.unwrap();

        assert_eq!(created.id.as_str(), "s1");
        let fetched = registry.get(&created.id).await.unwrap();
        assert_eq!(fetched.name, "Blog");
        assert_eq!(fetched.description, "My blog");
        assert_eq!(fetched.status, SiteStatus::Created);
        assert_eq!(fetched.port, None);
        assert_eq!(fetched.url, None);
    }

    #[tokio::test]
    async fn create_rejects_blank_input() {
        let registry = SiteRegistry::in_memory("localhost");
        let err = registry.create("   ", "x").await.unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }), "got: {err:?}");
        let err = registry.create("Blog", "\t").await.unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }), "got: {err:?}");
        assert!(registry.list().await.is_empty());
        assert_eq!(registry.version(), 0);
    }

    #[tokio::test]
    async fn list_keeps_creation_order_after_delete() {
        let registry = SiteRegistry::in_memory("localhost");
        for name in ["a", "b", "c"] {
            registry.create(name, "d").await.unwrap();
        }
        registry.delete(&SiteId::from("s2")).await.unwrap();
        let next = registry.create("d", "d").await.unwrap();

        let ids: Vec<_> = registry
            .list()
            .await
            .into_iter()
            .map(|s| s.id.to_string())
            .collect();
        assert_eq!(ids, ["s1", "s3", "s4"]);
        assert_eq!(next.id.as_str(), "s4");
    }

    #[tokio::test]
    async fn url_is_derived_only_while_running() {
        let registry = SiteRegistry::in_memory("example.test");
        let id = registry.create("Blog", "My blog").await.unwrap().id;

        let running = registry
            .update_status(&id, LifecyclePhase::Running, Some(8000), None)
            .await
            .unwrap();
        assert_eq!(running.url.as_deref(), Some("http://example.test:8000"));

        let stopping = registry
            .update_status(&id, LifecyclePhase::Stopping, Some(8000), None)
            .await
            .unwrap();
        assert_eq!(stopping.status, SiteStatus::Restarting);
        assert_eq!(stopping.url, None);
    }

    #[tokio::test]
    async fn running_ports_are_unique() {
        let registry = SiteRegistry::in_memory("localhost");
        let a = registry.create("a", "a").await.unwrap().id;
        let b = registry.create("b", "b").await.unwrap().id;
        registry
            .update_status(&a, LifecyclePhase::Running, Some(8000), None)
            .await
            .unwrap();

        let err = registry
            .update_status(&b, LifecyclePhase::Running, Some(8000), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }), "got: {err:?}");
        assert_eq!(registry.get(&b).await.unwrap().status, SiteStatus::Created);

        // Reclaimable once the holder has stopped.
        registry
            .update_status(&a, LifecyclePhase::Stopped, Some(8000), None)
            .await
            .unwrap();
        registry
            .update_status(&b, LifecyclePhase::Running, Some(8000), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_running_site_is_conflict_and_leaves_registry_unchanged() {
        let registry = SiteRegistry::in_memory("localhost");
        let id = registry.create("Blog", "My blog").await.unwrap().id;
        registry
            .update_status(&id, LifecyclePhase::Running, Some(8000), None)
            .await
            .unwrap();
        let before = registry.list_versioned().await;

        let err = registry.delete(&id).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }), "got: {err:?}");
        assert_eq!(registry.list_versioned().await, before);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let registry = SiteRegistry::in_memory("localhost");
        let missing = SiteId::from("s42");
        assert!(matches!(
            registry.get(&missing).await,
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(
            registry
                .update_status(&missing, LifecyclePhase::Stopped, None, None)
                .await,
            Err(CoreError::NotFound { .. })
        ));
        assert!(matches!(
            registry.delete(&missing).await,
            Err(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn changes_since_returns_immediately_when_behind() {
        let registry = SiteRegistry::in_memory("localhost");
        registry.create("Blog", "My blog").await.unwrap();

        let (version, sites) = registry.changes_since(0, Duration::from_secs(30)).await;
        assert_eq!(version, 1);
        assert_eq!(sites.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn changes_since_times_out_with_current_state() {
        let registry = SiteRegistry::in_memory("localhost");
        let started = tokio::time::Instant::now();

        let (version, sites) = registry.changes_since(0, Duration::from_secs(5)).await;
        assert_eq!(version, 0);
        assert!(sites.is_empty());
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[test]
    fn next_id_never_goes_below_existing_ids() {
        let raw = r#"{
            "sites": [{
                "id": "s7",
                "name": "Blog",
                "description": "My blog",
                "phase": "stopped",
                "port": 8000,
                "created_at": "2024-06-15T10:30:00Z"
            }]
        }"#;
        let state = parse_registry_file(Path::new("sites.json"), raw).unwrap();
        assert_eq!(state.next_id, 8);
        assert_eq!(state.sites.len(), 1);
    }
}
