// ── Shared handler state ──

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use wpfleet_config::{ProvisionerKind, ServerSettings};
use wpfleet_core::{
    ComposeProvisioner, LifecycleController, PortAllocator, Provisioner, SimulatedProvisioner,
    SiteRegistry, TokioCommandRunner,
};

/// State handed to every handler. Cheaply cloneable.
#[derive(Clone)]
pub struct AppState {
    controller: LifecycleController,
    stopping: CancellationToken,
}

impl AppState {
    pub fn new(controller: LifecycleController) -> Self {
        Self {
            controller,
            stopping: CancellationToken::new(),
        }
    }

    /// Open the registry, build the configured provisioner and resolve
    /// anything a previous process left mid-transition.
    pub async fn bootstrap(settings: &ServerSettings) -> Result<Self, crate::ServerError> {
        let registry = Arc::new(
            SiteRegistry::open(settings.registry_path(), settings.public_host.clone()).await?,
        );
        let ports = Arc::new(PortAllocator::new(settings.port_range()?));
        let provisioner: Arc<dyn Provisioner> = match settings.provisioner {
            ProvisionerKind::Compose => Arc::new(
                ComposeProvisioner::new(
                    settings.compose_settings()?,
                    ports,
                    Arc::new(TokioCommandRunner),
                )
                .map_err(wpfleet_core::CoreError::from)?,
            ),
            ProvisionerKind::Simulated => Arc::new(SimulatedProvisioner::new(
                ports,
                settings.public_host.clone(),
            )),
        };

        let controller =
            LifecycleController::new(registry, provisioner, settings.lifecycle_config()?);
        controller.recover().await?;
        info!(
            provisioner = controller.provisioner_name(),
            data_dir = %settings.data_dir.display(),
            "lifecycle controller ready"
        );
        Ok(Self::new(controller))
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    pub fn registry(&self) -> &SiteRegistry {
        self.controller.registry()
    }

    /// Cancelled once the server starts draining; parked long-polls
    /// answer immediately.
    pub fn stopping(&self) -> &CancellationToken {
        &self.stopping
    }
}
