// Site API HTTP client
//
// Wraps `reqwest::Client` with URL construction under `/api`, uniform
// timeout handling, and `{ error }` payload decoding. The endpoint
// methods live in `sites.rs` as inherent methods so this module stays
// focused on transport mechanics.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::models::ErrorBody;
use crate::transport::TransportConfig;

/// Raw HTTP client for the site management backend.
///
/// Every request carries an explicit timeout. Non-success responses are
/// turned into [`Error::Api`] with the server's message when one is
/// provided, and `HTTP error! status: N` otherwise.
#[derive(Debug, Clone)]
pub struct SitesClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    long_poll_grace: Duration,
}

impl SitesClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// `base_url` is the backend root, e.g. `http://localhost:5000`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        ensure_base(&base_url)?;
        Ok(Self {
            http: transport.build_client()?,
            base_url,
            timeout: transport.timeout,
            long_poll_grace: transport.long_poll_grace,
        })
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        let defaults = TransportConfig::default();
        Self {
            http,
            base_url,
            timeout: defaults.timeout,
            long_poll_grace: defaults.long_poll_grace,
        }
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The backend base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn long_poll_grace(&self) -> Duration {
        self.long_poll_grace
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build `{base}/api/{segments...}`, percent-encoding each segment.
    pub(crate) fn api_url(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| Error::InvalidBaseUrl(self.base_url.to_string()))?;
            path.pop_if_empty().push("api").extend(segments);
        }
        Ok(url)
    }

    // ── Request helpers ──────────────────────────────────────────────

    pub(crate) async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);
        self.send(self.http.get(url), self.timeout).await
    }

    /// GET with a caller-chosen timeout (used by long-polls).
    pub(crate) async fn get_with_timeout<T: DeserializeOwned>(
        &self,
        url: Url,
        timeout: Duration,
    ) -> Result<T, Error> {
        debug!(?timeout, "GET {}", url);
        self.send(self.http.get(url), timeout).await
    }

    pub(crate) async fn post<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &(impl Serialize + Sync),
    ) -> Result<T, Error> {
        debug!("POST {}", url);
        self.send(self.http.post(url).json(body), self.timeout)
            .await
    }

    /// POST without a body; an empty response yields `T::default()`.
    pub(crate) async fn post_empty<T: DeserializeOwned + Default>(
        &self,
        url: Url,
    ) -> Result<T, Error> {
        debug!("POST {}", url);
        self.send_allow_empty(self.http.post(url), self.timeout)
            .await
    }

    /// DELETE; an empty (e.g. 204) response yields `T::default()`.
    pub(crate) async fn delete<T: DeserializeOwned + Default>(&self, url: Url) -> Result<T, Error> {
        debug!("DELETE {}", url);
        self.send_allow_empty(self.http.delete(url), self.timeout)
            .await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<T, Error> {
        let body = self.execute(builder, timeout).await?;
        parse_body(&body)
    }

    async fn send_allow_empty<T: DeserializeOwned + Default>(
        &self,
        builder: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<T, Error> {
        let body = self.execute(builder, timeout).await?;
        if body.trim().is_empty() {
            return Ok(T::default());
        }
        parse_body(&body)
    }

    /// Send the request, enforce the timeout, and return the body of a
    /// successful response.
    async fn execute(
        &self,
        builder: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<String, Error> {
        let timeout_err = || Error::Timeout {
            timeout_secs: timeout.as_secs(),
        };

        let resp = builder.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                timeout_err()
            } else {
                Error::Transport(e)
            }
        })?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                timeout_err()
            } else {
                Error::Transport(e)
            }
        })?;
        trace!(status = status.as_u16(), len = body.len(), "response received");

        if status.is_success() {
            Ok(body)
        } else {
            Err(api_error(status.as_u16(), &body))
        }
    }
}

fn ensure_base(url: &Url) -> Result<(), Error> {
    if url.cannot_be_a_base() {
        return Err(Error::InvalidBaseUrl(url.to_string()));
    }
    Ok(())
}

/// Decode a non-success body into [`Error::Api`].
fn api_error(status: u16, body: &str) -> Error {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(payload) if !payload.error.trim().is_empty() => Error::Api {
            status,
            message: payload.error,
            code: payload.code,
        },
        _ => Error::Api {
            status,
            message: format!("HTTP error! status: {status}"),
            code: None,
        },
    }
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, Error> {
    serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        Error::Deserialization {
            message: format!("{e} (body preview: {preview:?})"),
            body: body.to_owned(),
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client(base: &str) -> SitesClient {
        SitesClient::with_client(reqwest::Client::new(), Url::parse(base).unwrap())
    }

    #[test]
    fn api_url_handles_trailing_slash_and_prefix() {
        assert_eq!(
            client("http://localhost:5000").api_url(&["sites"]).unwrap().as_str(),
            "http://localhost:5000/api/sites"
        );
        assert_eq!(
            client("http://host/backend/")
                .api_url(&["sites", "s1", "start"])
                .unwrap()
                .as_str(),
            "http://host/backend/api/sites/s1/start"
        );
    }

    #[test]
    fn api_url_encodes_ids() {
        let url = client("http://localhost:5000")
            .api_url(&["sites", "a/b c"])
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/api/sites/a%2Fb%20c");
    }

    #[test]
    fn error_body_without_message_falls_back_to_status() {
        let err = api_error(500, "<html>oops</html>");
        assert_eq!(err.to_string(), "HTTP error! status: 500");

        let err = api_error(423, r#"{"error":"Site s1 is busy","code":"busy"}"#);
        assert_eq!(err.to_string(), "Site s1 is busy");
        assert_eq!(err.api_error_code(), Some("busy"));
    }
}
