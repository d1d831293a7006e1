//! The long-lived HTTP transport shared by a session and its query clients.

use std::sync::Arc;
use std::time::Duration;

use domain::{AuthToken, ClientError, IncomingResponse, RequestInterceptor};
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use crate::client::{HttpQueryClient, MetadataCache};
use crate::error::TransportError;

/// Path segment of the service root replaced to reach the side channel.
const QUERY_SEGMENT: &str = "/odata";

/// HTTP settings applied to every connection the transport opens.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpTransportConfig {
    /// Skip TLS certificate validation. Server trust is assumed to be
    /// established out of band, so this defaults to `true`.
    pub accept_invalid_certs: bool,
    /// Per-request timeout in seconds. `None` leaves requests unbounded.
    pub timeout_secs: Option<u64>,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            accept_invalid_certs: true,
            timeout_secs: None,
            user_agent: concat!("domain-api-client/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

/// Endpoints outside the query protocol, reached by substituting the
/// `/odata` segment of the service root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideChannel {
    Login,
    Logout,
}

impl SideChannel {
    fn segment(self) -> &'static str {
        match self {
            SideChannel::Login => "/Login",
            SideChannel::Logout => "/Logout",
        }
    }
}

/// One HTTP connection pool bound to one service root.
///
/// Clones share the pool. Every [`HttpQueryClient`] created from a transport
/// reuses its pool; nothing is pooled per session.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    service_root: Url,
}

impl HttpTransport {
    /// Builds a transport for `service_root`
    /// (e.g. `https://host/api/domain/odata/`).
    pub fn new(service_root: &str, config: &HttpTransportConfig) -> Result<Self, TransportError> {
        let service_root = normalize_service_root(service_root)?;

        let mut builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .user_agent(config.user_agent.clone());
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder.build().map_err(TransportError::Build)?;

        Ok(Self { http, service_root })
    }

    /// The service root, always ending with `/`.
    pub fn service_root(&self) -> &Url {
        &self.service_root
    }

    /// The URL of a side-channel endpoint.
    pub fn side_channel_url(&self, channel: SideChannel) -> String {
        self.service_root
            .as_str()
            .replace(QUERY_SEGMENT, channel.segment())
            .trim_end_matches('/')
            .to_owned()
    }

    /// POSTs a JSON payload (or an empty body) to a side-channel endpoint,
    /// with `token` as the `Authorization` header when given.
    ///
    /// The response is returned whatever its status; the caller decides what
    /// a non-success status means. Only transport failures are errors.
    pub async fn post_side_channel(
        &self,
        channel: SideChannel,
        payload: Option<&serde_json::Value>,
        token: Option<&AuthToken>,
    ) -> Result<IncomingResponse, ClientError> {
        let url = self.side_channel_url(channel);
        let body = payload.map(|p| p.to_string()).unwrap_or_default();

        let mut builder = self
            .http
            .post(url.as_str())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(token) = token {
            builder = builder.header(reqwest::header::AUTHORIZATION, token.as_str());
        }
        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::Transport {
                message: e.to_string(),
            })?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| ClientError::Transport {
            message: e.to_string(),
        })?;
        debug!(?channel, status, "Side channel response");

        Ok(IncomingResponse { status, url, body })
    }

    /// Creates a query client that runs `interceptor` around every request.
    pub fn query_client(
        &self,
        interceptor: Option<Arc<dyn RequestInterceptor>>,
        metadata: MetadataCache,
    ) -> HttpQueryClient {
        HttpQueryClient::new(
            self.http.clone(),
            self.service_root.clone(),
            interceptor,
            metadata,
        )
    }
}

fn normalize_service_root(raw: &str) -> Result<Url, TransportError> {
    let invalid = |reason: String| TransportError::InvalidServiceRoot {
        url: raw.to_owned(),
        reason,
    };
    let mut url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
