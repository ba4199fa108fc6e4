// Site endpoints
//
// Lifecycle commands (start / stop / delete) are acknowledged once the
// backend has accepted them; the resulting state is observed through a
// later `list_sites` or `wait_for_changes`.

use std::time::Duration;

use tracing::debug;

use crate::client::SitesClient;
use crate::error::Error;
use crate::models::{ApiSite, CommandAck, CreateSiteRequest, SiteBody, SiteChanges, SiteList};

impl SitesClient {
    /// List every site in creation order.
    ///
    /// `GET /api/sites`
    pub async fn list_sites(&self) -> Result<SiteList, Error> {
        let url = self.api_url(&["sites"])?;
        debug!("listing sites");
        self.get(url).await
    }

    /// Fetch a single site.
    ///
    /// `GET /api/sites/{id}`; accepts both `{ site }` and a bare object.
    pub async fn get_site(&self, id: &str) -> Result<ApiSite, Error> {
        let url = self.api_url(&["sites", id])?;
        debug!(id, "fetching site");
        let body: SiteBody = self.get(url).await?;
        Ok(body.into_site())
    }

    /// Create a site record.
    ///
    /// `POST /api/sites` with `{"name": "...", "description": "..."}`
    pub async fn create_site(&self, name: &str, description: &str) -> Result<ApiSite, Error> {
        let url = self.api_url(&["sites"])?;
        debug!(name, "creating site");
        let body: SiteBody = self
            .post(
                url,
                &CreateSiteRequest {
                    name: name.to_owned(),
                    description: description.to_owned(),
                },
            )
            .await?;
        Ok(body.into_site())
    }

    /// Ask the backend to start a site.
    ///
    /// `POST /api/sites/{id}/start`
    pub async fn start_site(&self, id: &str) -> Result<CommandAck, Error> {
        let url = self.api_url(&["sites", id, "start"])?;
        debug!(id, "starting site");
        self.post_empty(url).await
    }

    /// Ask the backend to stop a site.
    ///
    /// `POST /api/sites/{id}/stop`
    pub async fn stop_site(&self, id: &str) -> Result<CommandAck, Error> {
        let url = self.api_url(&["sites", id, "stop"])?;
        debug!(id, "stopping site");
        self.post_empty(url).await
    }

    /// Delete a site.
    ///
    /// `DELETE /api/sites/{id}`
    pub async fn delete_site(&self, id: &str) -> Result<CommandAck, Error> {
        let url = self.api_url(&["sites", id])?;
        debug!(id, "deleting site");
        self.delete(url).await
    }

    /// Long-poll for a registry version newer than `since`.
    ///
    /// `GET /api/sites/changes?since={n}&wait={secs}`. The server answers
    /// as soon as the version moves, or with the unchanged version once
    /// `wait` elapses. The request timeout is widened accordingly.
    pub async fn wait_for_changes(&self, since: u64, wait: Duration) -> Result<SiteChanges, Error> {
        let mut url = self.api_url(&["sites", "changes"])?;
        url.query_pairs_mut()
            .append_pair("since", &since.to_string())
            .append_pair("wait", &wait.as_secs().to_string());
        let timeout = self.timeout() + wait + self.long_poll_grace();
        self.get_with_timeout(url, timeout).await
    }
}
