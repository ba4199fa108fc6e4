// ── Sync client ──
//
// Client-side view of a backend's sites. The view is an immutable
// snapshot swapped wholesale on every refresh, never merged field by
// field. Commands never hold locks: per-site exclusion is the server's
// job, and its `Busy` answers come back as ordinary errors.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use wpfleet_api::{SitesClient, TransportConfig};

use crate::config::SyncConfig;
use crate::convert::{site_from_api, sites_from_api};
use crate::error::CoreError;
use crate::model::{Site, SiteId};
use crate::registry::validate_site_input;

/// Poll interval used when the backend has no change endpoint.
const FALLBACK_POLL: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

// ── SiteSnapshot ─────────────────────────────────────────────────

/// One immutable view of the site list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteSnapshot {
    /// Bumped on every local publish (refresh or optimistic update).
    pub generation: u64,
    pub sites: Vec<Site>,
    /// When the last authoritative fetch completed.
    pub fetched_at: Option<DateTime<Utc>>,
    /// Registry version reported by the server, if it reports one.
    pub server_version: Option<u64>,
}

impl SiteSnapshot {
    pub fn find(&self, id: &SiteId) -> Option<&Site> {
        self.sites.iter().find(|s| s.id == *id)
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

/// Outcome of a confirmed delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The confirmation step declined; nothing was sent.
    Cancelled,
    Deleted,
}

// ── SyncClient ───────────────────────────────────────────────────

/// Issues lifecycle commands against a backend and keeps a reconciled
/// local view of its sites. Cheaply cloneable.
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    api: SitesClient,
    config: SyncConfig,
    snapshot: ArcSwap<SiteSnapshot>,
    changed: watch::Sender<u64>,
    last_error: ArcSwapOption<String>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl SyncClient {
    pub fn new(config: SyncConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig::with_timeout(config.timeout);
        let api = SitesClient::new(config.base_url.clone(), &transport)?;
        Ok(Self::with_api(api, config))
    }

    /// Build around an existing API client.
    pub fn with_api(api: SitesClient, config: SyncConfig) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            inner: Arc::new(SyncInner {
                api,
                config,
                snapshot: ArcSwap::from_pointee(SiteSnapshot::default()),
                changed,
                last_error: ArcSwapOption::empty(),
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    // ── View ─────────────────────────────────────────────────────

    pub fn snapshot(&self) -> Arc<SiteSnapshot> {
        self.inner.snapshot.load_full()
    }

    /// Receives the snapshot generation after every publish.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.changed.subscribe()
    }

    /// The single user-visible error message, if one is pending.
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.load_full().map(|e| (*e).clone())
    }

    pub fn dismiss_error(&self) {
        self.inner.last_error.store(None);
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Replace the local view with the server's full list.
    pub async fn fetch_all(&self) -> Result<Arc<SiteSnapshot>, CoreError> {
        self.inner.fetch_all().await
    }

    /// Read one site from the server without touching the local view.
    pub async fn get(&self, id: &SiteId) -> Result<Site, CoreError> {
        let api = self
            .inner
            .api
            .get_site(id.as_str())
            .await
            .map_err(|e| self.inner.fail(e.into()))?;
        site_from_api(api, Utc::now())
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Create a site. Blank input fails before any request is sent.
    ///
    /// The returned site is appended to the view immediately, and a full
    /// refresh is scheduled after `refresh_delay`, since provisioning
    /// finishes asynchronously.
    pub async fn create(&self, name: &str, description: &str) -> Result<Site, CoreError> {
        let (name, description) =
            validate_site_input(name, description).map_err(|e| self.inner.fail(e))?;

        let api = self
            .inner
            .api
            .create_site(&name, &description)
            .await
            .map_err(|e| self.inner.fail(e.into()))?;
        let site = site_from_api(api, Utc::now())?;
        info!(site_id = %site.id, "site created");

        let current = self.inner.snapshot.load_full();
        let mut sites: Vec<Site> = current
            .sites
            .iter()
            .filter(|s| s.id != site.id)
            .cloned()
            .collect();
        sites.push(site.clone());
        self.inner.publish(sites, current.fetched_at, current.server_version);

        self.schedule_refresh(self.inner.config.refresh_delay);
        Ok(site)
    }

    /// Ask the server to start a site, then refresh the view whatever the
    /// outcome.
    pub async fn start(&self, id: &SiteId) -> Result<(), CoreError> {
        let result = self.inner.api.start_site(id.as_str()).await;
        self.command_then_refresh("start", id, result).await
    }

    /// Ask the server to stop a site, then refresh the view whatever the
    /// outcome.
    pub async fn stop(&self, id: &SiteId) -> Result<(), CoreError> {
        let result = self.inner.api.stop_site(id.as_str()).await;
        self.command_then_refresh("stop", id, result).await
    }

    /// Delete a site once `confirm` agrees. `confirm` sees the locally
    /// known site, if any; declining sends nothing.
    pub async fn delete<F>(&self, id: &SiteId, confirm: F) -> Result<DeleteOutcome, CoreError>
    where
        F: FnOnce(Option<&Site>) -> bool,
    {
        let snapshot = self.inner.snapshot.load_full();
        if !confirm(snapshot.find(id)) {
            debug!(site_id = %id, "delete cancelled");
            return Ok(DeleteOutcome::Cancelled);
        }
        let result = self.inner.api.delete_site(id.as_str()).await;
        self.command_then_refresh("delete", id, result).await?;
        Ok(DeleteOutcome::Deleted)
    }

    async fn command_then_refresh<T>(
        &self,
        command: &str,
        id: &SiteId,
        result: Result<T, wpfleet_api::Error>,
    ) -> Result<(), CoreError> {
        let command_result = result.map(|_| ()).map_err(|e| {
            let err = CoreError::from(e);
            warn!(site_id = %id, command, error = %err, "command rejected");
            self.inner.fail(err)
        });
        // A rejected command keeps its own message as the visible error.
        let refreshed = if command_result.is_ok() {
            self.inner.fetch_all().await
        } else {
            self.inner.refresh().await
        };
        if let Err(e) = refreshed {
            debug!(error = %e, "refresh after {command} failed");
        }
        if command_result.is_ok() {
            debug!(site_id = %id, command, "command accepted");
        }
        command_result
    }

    // ── Waiting ──────────────────────────────────────────────────

    /// Refresh until `id` satisfies `done`, it disappears, or `timeout`
    /// elapses. Uses the change long-poll when the server offers it.
    pub async fn wait_until<F>(
        &self,
        id: &SiteId,
        timeout: Duration,
        done: F,
    ) -> Result<Site, CoreError>
    where
        F: Fn(&Site) -> bool,
    {
        let wait = async {
            loop {
                let snapshot = self.inner.fetch_all().await?;
                match snapshot.find(id) {
                    Some(site) if done(site) => return Ok(site.clone()),
                    Some(_) => {}
                    None => return Err(CoreError::not_found(id)),
                }
                self.inner.wait_for_change(snapshot.server_version).await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| CoreError::Timeout {
                timeout_secs: timeout.as_secs(),
            })?
    }

    /// Wait until a started or freshly created site has either come up or
    /// failed.
    pub async fn wait_until_settled(&self, id: &SiteId, timeout: Duration) -> Result<Site, CoreError> {
        self.wait_until(id, timeout, Site::is_start_settled).await
    }

    // ── Background work ──────────────────────────────────────────

    /// Refresh once after `delay`. Errors only land in `last_error`.
    pub fn schedule_refresh(&self, delay: Duration) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        self.inner.tasks.spawn(async move {
            tokio::select! {
                biased;
                () = inner.cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Err(e) = inner.fetch_all().await {
                        debug!(error = %e, "delayed refresh failed");
                    }
                }
            }
        })
    }

    /// Keep the view current from the server's change long-poll, falling
    /// back to periodic refresh if the endpoint is missing.
    pub fn spawn_change_listener(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        self.inner.tasks.spawn(async move { inner.listen().await })
    }

    /// Cancel background work and wait for it.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }
}

impl SyncInner {
    async fn fetch_all(&self) -> Result<Arc<SiteSnapshot>, CoreError> {
        self.refresh().await.map_err(|e| self.fail(e))
    }

    /// Like `fetch_all`, but leaves `last_error` alone.
    async fn refresh(&self) -> Result<Arc<SiteSnapshot>, CoreError> {
        let list = self.api.list_sites().await?;
        let sites = sites_from_api(list.sites)?;
        debug!(count = sites.len(), version = ?list.version, "site list fetched");
        Ok(self.publish(sites, Some(Utc::now()), list.version))
    }

    fn publish(
        &self,
        sites: Vec<Site>,
        fetched_at: Option<DateTime<Utc>>,
        server_version: Option<u64>,
    ) -> Arc<SiteSnapshot> {
        let mut published = None;
        self.snapshot.rcu(|current| {
            let next = Arc::new(SiteSnapshot {
                generation: current.generation + 1,
                sites: sites.clone(),
                fetched_at,
                server_version,
            });
            published = Some(Arc::clone(&next));
            next
        });
        let snapshot = published.unwrap_or_else(|| self.snapshot.load_full());
        self.changed.send_replace(snapshot.generation);
        snapshot
    }

    /// Remember `err` as the user-visible message and hand it back.
    fn fail(&self, err: CoreError) -> CoreError {
        self.last_error.store(Some(Arc::new(err.to_string())));
        err
    }

    /// Block until the server reports a version past `since`, or for the
    /// fallback interval when it cannot.
    async fn wait_for_change(&self, since: Option<u64>) {
        let Some(since) = since else {
            tokio::time::sleep(FALLBACK_POLL).await;
            return;
        };
        if let Err(e) = self
            .api
            .wait_for_changes(since, self.config.long_poll_wait)
            .await
        {
            debug!(error = %e, "change long-poll failed, polling instead");
            tokio::time::sleep(FALLBACK_POLL).await;
        }
    }

    async fn listen(&self) {
        let mut backoff = FALLBACK_POLL;
        let mut since: Option<u64> = None;
        info!("change listener started");

        loop {
            let current = since;
            let step = async move {
                match current {
                    None => self.fetch_all().await.map(|s| s.server_version),
                    Some(version) => {
                        match self
                            .api
                            .wait_for_changes(version, self.config.long_poll_wait)
                            .await
                        {
                            Ok(changes) => {
                                if changes.version != version {
                                    let sites = sites_from_api(changes.sites)?;
                                    self.publish(sites, Some(Utc::now()), Some(changes.version));
                                }
                                Ok(Some(changes.version))
                            }
                            Err(e) if e.is_not_found() => {
                                debug!("backend has no change endpoint, polling");
                                Ok(None)
                            }
                            Err(e) => Err(self.fail(e.into())),
                        }
                    }
                }
            };

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                result = step => match result {
                    Ok(Some(version)) => {
                        since = Some(version);
                        backoff = FALLBACK_POLL;
                    }
                    // Server without versions: poll on the long-poll cadence.
                    Ok(None) => {
                        since = None;
                        backoff = FALLBACK_POLL;
                        tokio::select! {
                            biased;
                            () = self.cancel.cancelled() => break,
                            () = tokio::time::sleep(self.config.long_poll_wait) => {}
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, retry_in = ?backoff, "change listener error");
                        since = None;
                        tokio::select! {
                            biased;
                            () = self.cancel.cancelled() => break,
                            () = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                },
            }
        }
        info!("change listener stopped");
    }
}
