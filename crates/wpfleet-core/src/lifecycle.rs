// ── Lifecycle controller ──
//
// Enforces legal site transitions and per-site exclusivity. A command
// records its immediate transition synchronously, then hands the
// provisioner call to a tracked background job together with the site's
// lock guard, so the lock is released on every exit path of that job.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::LifecycleConfig;
use crate::error::CoreError;
use crate::model::{LifecyclePhase, Site, SiteId};
use crate::provisioner::{Operation, ProvisionError, ProvisionRequest, Provisioner};
use crate::registry::{SiteRecord, SiteRegistry, delete_running_conflict};

// ── Ticket ───────────────────────────────────────────────────────

/// Result of an accepted command.
///
/// `site` is the state right after the immediate transition. When the
/// command needed a provisioner call, the ticket also carries the job;
/// dropping the ticket does not cancel it.
#[derive(Debug)]
pub struct Ticket {
    site: Site,
    job: Option<JoinHandle<()>>,
}

impl Ticket {
    fn settled(site: Site) -> Self {
        Self { site, job: None }
    }

    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn into_site(self) -> Site {
        self.site
    }

    /// `false` for idempotent no-ops.
    pub fn is_pending(&self) -> bool {
        self.job.is_some()
    }

    /// Wait for the background job, if any, to finish.
    pub async fn finished(self) {
        if let Some(job) = self.job {
            if let Err(e) = job.await {
                error!(site_id = %self.site.id, error = %e, "lifecycle job aborted");
            }
        }
    }
}

// ── LifecycleController ──────────────────────────────────────────

/// The authority over site status transitions.
///
/// Cheaply cloneable. Commands on different sites run in parallel; a
/// second command on a site with one in flight fails with `Busy`.
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    registry: Arc<SiteRegistry>,
    provisioner: Arc<dyn Provisioner>,
    config: LifecycleConfig,
    locks: DashMap<SiteId, Arc<Mutex<()>>>,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl LifecycleController {
    pub fn new(
        registry: Arc<SiteRegistry>,
        provisioner: Arc<dyn Provisioner>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                registry,
                provisioner,
                config,
                locks: DashMap::new(),
                tasks: TaskTracker::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<SiteRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.inner.config
    }

    pub fn provisioner_name(&self) -> &'static str {
        self.inner.provisioner.name()
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Insert a site as `created` and, with `auto_start`, dispatch a
    /// start in the background. The returned site is always `created`.
    pub async fn create(&self, name: &str, description: &str) -> Result<Ticket, CoreError> {
        let site = self.inner.registry.create(name, description).await?;
        if !self.inner.config.auto_start {
            return Ok(Ticket::settled(site));
        }

        // The row is already visible, so a command on its id may win the
        // lock. That command owns the site now; the create still succeeded.
        let guard = match self.try_lock(&site.id) {
            Ok(guard) => guard,
            Err(CoreError::Busy { .. }) => {
                debug!(site_id = %site.id, "auto-start skipped, another command took the site");
                return Ok(Ticket::settled(site));
            }
            Err(e) => return Err(e),
        };
        let record = match self.inner.registry.record(&site.id).await {
            Ok(record) if record.phase == LifecyclePhase::Created => record,
            Ok(_) | Err(CoreError::NotFound { .. }) => {
                debug!(site_id = %site.id, "auto-start skipped, site changed before dispatch");
                return Ok(Ticket::settled(site));
            }
            Err(e) => return Err(e),
        };
        let request = ProvisionRequest::from(&record);
        let inner = Arc::clone(&self.inner);
        let job = self.inner.tasks.spawn(async move {
            match inner
                .registry
                .update_status(&request.site_id, LifecyclePhase::Starting, None, None)
                .await
            {
                Ok(_) => inner.finish_start(guard, request).await,
                Err(e) => warn!(site_id = %request.site_id, error = %e, "auto-start not dispatched"),
            }
        });
        Ok(Ticket {
            site,
            job: Some(job),
        })
    }

    /// Start a created, stopped or exited site. No-op when running.
    pub async fn start(&self, id: &SiteId) -> Result<Ticket, CoreError> {
        let (guard, record) = self.lock_existing(id).await?;
        match record.phase {
            LifecyclePhase::Running => {
                debug!(site_id = %id, "start ignored, already running");
                Ok(Ticket::settled(record.to_site(self.inner.registry.public_host())))
            }
            LifecyclePhase::Created | LifecyclePhase::Stopped | LifecyclePhase::Exited => {
                let site = self
                    .inner
                    .registry
                    .update_status(id, LifecyclePhase::Starting, None, None)
                    .await?;
                let request = ProvisionRequest::from(&record);
                let inner = Arc::clone(&self.inner);
                let job = self
                    .inner
                    .tasks
                    .spawn(async move { inner.finish_start(guard, request).await });
                Ok(Ticket {
                    site,
                    job: Some(job),
                })
            }
            LifecyclePhase::Starting | LifecyclePhase::Stopping | LifecyclePhase::Deleting => {
                Err(CoreError::busy(id))
            }
        }
    }

    /// Stop a running site. No-op when not running.
    pub async fn stop(&self, id: &SiteId) -> Result<Ticket, CoreError> {
        let (guard, record) = self.lock_existing(id).await?;
        match record.phase {
            LifecyclePhase::Running => {
                let site = self
                    .inner
                    .registry
                    .update_status(id, LifecyclePhase::Stopping, record.port, None)
                    .await?;
                let request = ProvisionRequest::from(&record);
                let port = record.port;
                let inner = Arc::clone(&self.inner);
                let job = self
                    .inner
                    .tasks
                    .spawn(async move { inner.finish_stop(guard, request, port).await });
                Ok(Ticket {
                    site,
                    job: Some(job),
                })
            }
            LifecyclePhase::Created | LifecyclePhase::Stopped | LifecyclePhase::Exited => {
                debug!(site_id = %id, phase = %record.phase, "stop ignored, not running");
                Ok(Ticket::settled(record.to_site(self.inner.registry.public_host())))
            }
            LifecyclePhase::Starting | LifecyclePhase::Stopping | LifecyclePhase::Deleting => {
                Err(CoreError::busy(id))
            }
        }
    }

    /// Tear a site down and remove its row. Running or restarting sites
    /// are rejected with `Conflict`.
    pub async fn delete(&self, id: &SiteId) -> Result<Ticket, CoreError> {
        let record = self.inner.registry.record(id).await?;
        if !record.status().can_delete() {
            return Err(delete_running_conflict());
        }

        let (guard, record) = self.lock_existing(id).await?;
        if !record.status().can_delete() {
            return Err(delete_running_conflict());
        }
        if record.phase.is_transient() {
            return Err(CoreError::busy(id));
        }

        let site = self
            .inner
            .registry
            .update_status(id, LifecyclePhase::Deleting, record.port, None)
            .await?;
        let request = ProvisionRequest::from(&record);
        let port = record.port;
        let inner = Arc::clone(&self.inner);
        let job = self
            .inner
            .tasks
            .spawn(async move { inner.finish_delete(guard, request, port).await });
        Ok(Ticket {
            site,
            job: Some(job),
        })
    }

    // ── Startup / shutdown ───────────────────────────────────────

    /// Resolve sites a previous process left mid-transition and re-lease
    /// the ports of running sites. Call once, before accepting commands.
    pub async fn recover(&self) -> Result<usize, CoreError> {
        let registry = &self.inner.registry;
        let mut resolved = 0;
        for record in registry.records().await {
            let (phase, port, message) = match record.phase {
                LifecyclePhase::Starting => (
                    LifecyclePhase::Exited,
                    None,
                    "start interrupted by a restart",
                ),
                LifecyclePhase::Stopping => (
                    LifecyclePhase::Exited,
                    record.port,
                    "stop interrupted by a restart",
                ),
                LifecyclePhase::Deleting => (
                    LifecyclePhase::Stopped,
                    record.port,
                    "delete interrupted by a restart",
                ),
                LifecyclePhase::Running => {
                    if let Some(port) = record.port {
                        self.inner
                            .provisioner
                            .restore(&ProvisionRequest::from(&record), port)
                            .await?;
                    }
                    continue;
                }
                LifecyclePhase::Created | LifecyclePhase::Stopped | LifecyclePhase::Exited => {
                    continue;
                }
            };
            warn!(site_id = %record.id, from = %record.phase, to = %phase, "recovering interrupted site");
            registry
                .update_status(&record.id, phase, port, Some(message.to_owned()))
                .await?;
            resolved += 1;
        }
        if resolved > 0 {
            info!(resolved, "recovered interrupted sites");
        }
        Ok(resolved)
    }

    /// Stop accepting work, cancel in-flight jobs and wait for them.
    ///
    /// Cancelled jobs leave their site in its transient phase; `recover`
    /// resolves it on the next start.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        debug!("lifecycle controller stopped");
    }

    // ── Locking ──────────────────────────────────────────────────

    fn try_lock(&self, id: &SiteId) -> Result<OwnedMutexGuard<()>, CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::Internal("lifecycle controller is shutting down".into()));
        }
        let lock = Arc::clone(&self.inner.locks.entry(id.clone()).or_default());
        lock.try_lock_owned().map_err(|_| CoreError::busy(id))
    }

    /// Check the site exists, take its lock, then re-read it under the lock.
    async fn lock_existing(
        &self,
        id: &SiteId,
    ) -> Result<(OwnedMutexGuard<()>, SiteRecord), CoreError> {
        self.inner.registry.record(id).await?;
        let guard = self.try_lock(id)?;
        match self.inner.registry.record(id).await {
            Ok(record) => Ok((guard, record)),
            Err(e) => {
                // Deleted between the check and the lock.
                drop(guard);
                self.inner.locks.remove(id);
                Err(e)
            }
        }
    }
}

// ── Background jobs ──────────────────────────────────────────────

/// How a bounded provisioner call ended.
enum Outcome<T> {
    Done(T),
    Failed(String),
    TimedOut(String),
    /// The controller is shutting down; the site is left for `recover`.
    Cancelled,
}

impl ControllerInner {
    async fn bounded<T, F>(&self, operation: Operation, id: &SiteId, call: F) -> Outcome<T>
    where
        F: Future<Output = Result<T, ProvisionError>>,
    {
        let timeout = self.config.provision_timeout;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                warn!(site_id = %id, %operation, "shutdown during provisioner call, left for recovery");
                Outcome::Cancelled
            }
            result = tokio::time::timeout(timeout, call) => match result {
                Ok(Ok(value)) => Outcome::Done(value),
                Ok(Err(e)) => {
                    warn!(site_id = %id, %operation, error = %e, "provisioner call failed");
                    Outcome::Failed(e.to_string())
                }
                Err(_) => {
                    warn!(
                        site_id = %id,
                        %operation,
                        timeout_secs = timeout.as_secs(),
                        "provisioner call timed out"
                    );
                    Outcome::TimedOut(format!("{operation} timed out after {}s", timeout.as_secs()))
                }
            },
        }
    }

    async fn finish_start(&self, guard: OwnedMutexGuard<()>, request: ProvisionRequest) {
        let id = &request.site_id;
        let failure = match self
            .bounded(Operation::Start, id, self.provisioner.provision_start(&request))
            .await
        {
            Outcome::Cancelled => return,
            Outcome::Done(endpoint) => match self
                .registry
                .update_status(id, LifecyclePhase::Running, Some(endpoint.port), None)
                .await
            {
                Ok(_) => {
                    info!(site_id = %id, port = endpoint.port, url = %endpoint.url, "site running");
                    None
                }
                Err(e) => Some(e.to_string()),
            },
            Outcome::Failed(message) | Outcome::TimedOut(message) => Some(message),
        };

        if let Some(message) = failure {
            // Release whatever the provisioner may still hold.
            let cleanup = tokio::time::timeout(
                self.config.provision_timeout,
                self.provisioner.provision_stop(&request),
            )
            .await;
            if !matches!(cleanup, Ok(Ok(()))) {
                debug!(site_id = %id, "best-effort stop after failed start did not complete");
            }
            self.record(id, LifecyclePhase::Exited, None, message).await;
        }
        drop(guard);
    }

    async fn finish_stop(
        &self,
        guard: OwnedMutexGuard<()>,
        request: ProvisionRequest,
        port: Option<u16>,
    ) {
        let id = &request.site_id;
        match self
            .bounded(Operation::Stop, id, self.provisioner.provision_stop(&request))
            .await
        {
            Outcome::Cancelled => {}
            Outcome::Done(()) => {
                if let Err(e) = self
                    .registry
                    .update_status(id, LifecyclePhase::Stopped, port, None)
                    .await
                {
                    error!(site_id = %id, error = %e, "cannot record stop");
                }
            }
            // The container may still be up; keep it out of the running set.
            Outcome::TimedOut(message) => {
                self.record(id, LifecyclePhase::Stopped, port, message).await;
            }
            Outcome::Failed(message) => {
                self.record(id, LifecyclePhase::Running, port, message).await;
            }
        }
        drop(guard);
    }

    async fn finish_delete(
        &self,
        guard: OwnedMutexGuard<()>,
        request: ProvisionRequest,
        port: Option<u16>,
    ) {
        let id = &request.site_id;
        match self
            .bounded(Operation::Delete, id, self.provisioner.provision_delete(&request))
            .await
        {
            Outcome::Cancelled => {}
            Outcome::Done(()) => match self.registry.delete(id).await {
                Ok(()) => {
                    drop(guard);
                    self.locks.remove(id);
                    return;
                }
                Err(e) => {
                    self.record(id, LifecyclePhase::Stopped, port, e.to_string())
                        .await;
                }
            },
            Outcome::Failed(message) | Outcome::TimedOut(message) => {
                self.record(id, LifecyclePhase::Stopped, port, message).await;
            }
        }
        drop(guard);
    }

    /// Record a failed outcome; logs if even that cannot be written.
    async fn record(&self, id: &SiteId, phase: LifecyclePhase, port: Option<u16>, message: String) {
        if let Err(e) = self
            .registry
            .update_status(id, phase, port, Some(message))
            .await
        {
            error!(site_id = %id, to = %phase, error = %e, "cannot record lifecycle failure");
        }
    }
}
