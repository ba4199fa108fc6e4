// In-process provisioner.
//
// Leases real ports and sleeps for a configurable latency instead of
// touching Docker. Faults can be injected per operation to exercise the
// controller's failure and timeout paths.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use super::{Endpoint, Operation, PortAllocator, ProvisionError, ProvisionRequest, Provisioner};
use crate::registry::site_url;

/// Injected misbehaviour for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail with the given message.
    Fail(String),
    /// Never complete.
    Hang,
}

pub struct SimulatedProvisioner {
    ports: Arc<PortAllocator>,
    public_host: String,
    latency: Duration,
    faults: DashMap<Operation, Fault>,
    calls: DashMap<Operation, AtomicUsize>,
}

impl SimulatedProvisioner {
    pub fn new(ports: Arc<PortAllocator>, public_host: impl Into<String>) -> Self {
        Self {
            ports,
            public_host: public_host.into(),
            latency: Duration::ZERO,
            faults: DashMap::new(),
            calls: DashMap::new(),
        }
    }

    /// Time every operation takes before completing.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn ports(&self) -> &Arc<PortAllocator> {
        &self.ports
    }

    /// Make every subsequent `operation` misbehave until cleared.
    pub fn inject(&self, operation: Operation, fault: Fault) {
        self.faults.insert(operation, fault);
    }

    pub fn clear(&self, operation: Operation) {
        self.faults.remove(&operation);
    }

    /// How many times `operation` has been invoked.
    pub fn calls(&self, operation: Operation) -> usize {
        self.calls
            .get(&operation)
            .map_or(0, |c| c.load(Ordering::SeqCst))
    }

    async fn enter(&self, operation: Operation, request: &ProvisionRequest) -> Result<(), ProvisionError> {
        self.calls
            .entry(operation)
            .or_default()
            .fetch_add(1, Ordering::SeqCst);
        debug!(site_id = %request.site_id, %operation, "simulated provisioner call");

        // Clone out of the map so no shard lock is held across an await.
        let fault = self.faults.get(&operation).map(|f| f.value().clone());
        match fault {
            Some(Fault::Hang) => {
                warn!(site_id = %request.site_id, %operation, "simulated hang");
                std::future::pending::<()>().await;
                Ok(())
            }
            Some(Fault::Fail(message)) => {
                tokio::time::sleep(self.latency).await;
                Err(ProvisionError::Failed {
                    operation,
                    site_id: request.site_id.clone(),
                    message,
                })
            }
            None => {
                tokio::time::sleep(self.latency).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Provisioner for SimulatedProvisioner {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn provision_start(&self, request: &ProvisionRequest) -> Result<Endpoint, ProvisionError> {
        let port = self
            .ports
            .lease(&request.site_id, request.preferred_port)
            .await?;
        if let Err(e) = self.enter(Operation::Start, request).await {
            self.ports.release(&request.site_id).await;
            return Err(e);
        }
        Ok(Endpoint {
            port,
            url: site_url(&self.public_host, port),
        })
    }

    async fn provision_stop(&self, request: &ProvisionRequest) -> Result<(), ProvisionError> {
        self.enter(Operation::Stop, request).await?;
        self.ports.release(&request.site_id).await;
        Ok(())
    }

    async fn provision_delete(&self, request: &ProvisionRequest) -> Result<(), ProvisionError> {
        self.enter(Operation::Delete, request).await?;
        self.ports.release(&request.site_id).await;
        Ok(())
    }

    async fn restore(&self, request: &ProvisionRequest, port: u16) -> Result<(), ProvisionError> {
        self.ports.reserve(&request.site_id, port).await;
        Ok(())
    }
}
