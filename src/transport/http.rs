//! HTTP implementation of the [`RemoteServer`] collaborator.
//!
//! Talks the enveloped-JSON wire protocol: every response is wrapped in
//! `{"type": "sync" | "async" | "error", "metadata": ..., "error": ...}`,
//! with the interesting payload under `metadata`. Event streaming upgrades
//! to a websocket on the same host and is only available when the
//! `websocket` feature is enabled as well.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::error::{Error, Result};
use crate::transport::{EventStream, RemoteServer};
use crate::types::OperationSnapshot;

/// [`RemoteServer`] backed by a reqwest HTTP client.
///
/// # Examples
///
/// ```no_run
/// use opstream::transport::http::HttpRemoteServer;
/// use url::Url;
///
/// let server = HttpRemoteServer::new(Url::parse("https://jobs.example:8443/").unwrap());
/// ```
#[derive(Debug, Clone)]
pub struct HttpRemoteServer {
    base: Url,
    http: reqwest::Client,
}

/// Response envelope used by the wire protocol.
#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    error: String,
}

impl ResponseEnvelope {
    /// Unwraps the payload, converting error envelopes into errors.
    fn into_metadata(self) -> Result<Value> {
        if self.kind == "error" || !self.error.is_empty() {
            return Err(Error::Transport(if self.error.is_empty() {
                "server returned an error response".to_string()
            } else {
                self.error
            }));
        }

        Ok(self.metadata)
    }
}

impl HttpRemoteServer {
    /// Creates a server handle with a default reqwest client.
    pub fn new(base: Url) -> Self {
        Self {
            base,
            http: reqwest::Client::new(),
        }
    }

    /// Creates a server handle reusing a preconfigured client (custom TLS,
    /// proxies, default headers).
    pub fn with_client(base: Url, http: reqwest::Client) -> Self {
        Self { base, http }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|err| Error::Transport(format!("invalid endpoint {path}: {err}")))
    }

    async fn read_envelope(response: reqwest::Response) -> Result<ResponseEnvelope> {
        let status = response.status();
        match response.json::<ResponseEnvelope>().await {
            Ok(envelope) => Ok(envelope),
            Err(_) if !status.is_success() => {
                Err(Error::Transport(format!("request failed with {status}")))
            },
            Err(err) => Err(Error::Transport(err.to_string())),
        }
    }
}

#[async_trait]
impl RemoteServer for HttpRemoteServer {
    async fn open_event_stream(&self) -> Result<Box<dyn EventStream>> {
        #[cfg(feature = "websocket")]
        {
            let mut url = self.endpoint("1.0/events")?;
            let scheme = match url.scheme() {
                "https" => "wss",
                _ => "ws",
            };
            url.set_scheme(scheme)
                .map_err(|()| Error::transport("cannot derive websocket scheme"))?;

            let stream = crate::transport::ws::WsEventStream::connect(url).await?;
            Ok(Box::new(stream))
        }

        #[cfg(not(feature = "websocket"))]
        {
            Err(Error::transport(
                "event streaming requires the websocket feature",
            ))
        }
    }

    async fn fetch_operation(&self, id: &str) -> Result<OperationSnapshot> {
        let url = self.endpoint(&format!("1.0/operations/{id}"))?;
        tracing::debug!(%url, "fetching operation");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;

        let metadata = Self::read_envelope(response).await?.into_metadata()?;
        Ok(serde_json::from_value(metadata)?)
    }

    async fn cancel_operation(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&format!("1.0/operations/{id}"))?;
        tracing::debug!(%url, "requesting cancellation");

        let response = self
            .http
            .delete(url)
            .send()
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;

        Self::read_envelope(response).await?.into_metadata()?;
        Ok(())
    }

    fn supports_events(&self) -> bool {
        cfg!(feature = "websocket")
    }
}
