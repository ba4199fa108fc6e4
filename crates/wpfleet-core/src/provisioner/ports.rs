// Host port leases.
//
// A lease is keyed by site id, so leasing twice for the same site
// returns the same port. Ports are handed out lowest-first from the
// configured range unless the caller's preferred port is free.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use tokio::sync::Mutex;
use tracing::debug;

use super::ProvisionError;
use crate::model::SiteId;

#[derive(Debug)]
pub struct PortAllocator {
    range: RangeInclusive<u16>,
    leases: Mutex<HashMap<SiteId, u16>>,
}

impl PortAllocator {
    pub fn new(range: RangeInclusive<u16>) -> Self {
        Self {
            range,
            leases: Mutex::new(HashMap::new()),
        }
    }

    pub fn range(&self) -> &RangeInclusive<u16> {
        &self.range
    }

    /// Lease a port for `site`, returning its existing lease if it has one.
    pub async fn lease(&self, site: &SiteId, preferred: Option<u16>) -> Result<u16, ProvisionError> {
        let mut leases = self.leases.lock().await;
        if let Some(&port) = leases.get(site) {
            return Ok(port);
        }

        let taken = |port: u16| leases.values().any(|&p| p == port);
        let port = preferred
            .filter(|p| self.range.contains(p) && !taken(*p))
            .or_else(|| self.range.clone().find(|p| !taken(*p)))
            .ok_or(ProvisionError::PortsExhausted {
                start: *self.range.start(),
                end: *self.range.end(),
            })?;

        leases.insert(site.clone(), port);
        debug!(site_id = %site, port, "port leased");
        Ok(port)
    }

    /// Pin `port` to `site` regardless of the range (used when adopting
    /// sites that were already running).
    pub async fn reserve(&self, site: &SiteId, port: u16) {
        self.leases.lock().await.insert(site.clone(), port);
    }

    pub async fn release(&self, site: &SiteId) -> Option<u16> {
        let released = self.leases.lock().await.remove(site);
        if let Some(port) = released {
            debug!(site_id = %site, port, "port released");
        }
        released
    }

    pub async fn leased(&self, site: &SiteId) -> Option<u16> {
        self.leases.lock().await.get(site).copied()
    }
}
