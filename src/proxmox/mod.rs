//! [`ControlPlane`](crate::control_plane::ControlPlane) implementation for the
//! Proxmox VE REST API.
//!
//! Responses arrive wrapped in a `{"data": ...}` envelope and writes are sent
//! as form bodies. Long running operations return a task identifier that the
//! provisioning layer polls.

mod api;
mod session;

use std::time::Duration;

use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ProxmoxConfig;
use crate::control_plane::{ConfigParams, ControlPlane, ControlPlaneError};

pub use session::Credentials;
use session::Session;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// HTTP client for one Proxmox VE cluster.
pub struct ProxmoxClient {
    http: reqwest::Client,
    base: Url,
    session: Session,
}

impl ProxmoxClient {
    /// Builds a client from connection settings without contacting the
    /// server.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError::Authentication`] when no credentials are
    /// configured and [`ControlPlaneError::Connection`] when the base URL or
    /// HTTP client cannot be built.
    pub fn new(config: &ProxmoxConfig) -> Result<Self, ControlPlaneError> {
        let base = Url::parse(&config.base_url()).map_err(|err| {
            ControlPlaneError::Connection(format!("invalid API URL {}: {err}", config.base_url()))
        })?;
        Self::with_base_url(base, Credentials::from_config(config)?, config.verify_ssl)
    }

    /// Builds a client for an explicit API base URL such as
    /// `https://pve.lab:8006/api2/json`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError::Connection`] when the HTTP client cannot
    /// be built.
    pub fn with_base_url(
        base: Url,
        credentials: Credentials,
        verify_ssl: bool,
    ) -> Result<Self, ControlPlaneError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .danger_accept_invalid_certs(!verify_ssl)
            .build()
            .map_err(|err| ControlPlaneError::Connection(err.to_string()))?;
        Ok(Self {
            http,
            base,
            session: Session::new(credentials),
        })
    }

    /// Builds a client and checks that the API answers.
    ///
    /// # Errors
    ///
    /// Returns the construction errors of [`ProxmoxClient::new`] plus any
    /// failure of the version probe.
    pub async fn connect(config: &ProxmoxConfig) -> Result<Self, ControlPlaneError> {
        let client = Self::new(config)?;
        let version = client.version().await?;
        info!(host = %config.host, version = %version.version, "connected to Proxmox VE");
        Ok(client)
    }

    /// API base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    /// Forgets the cached ticket and probes the API, logging in again when
    /// ticket authentication is in use.
    ///
    /// # Errors
    ///
    /// Returns the probe failure.
    pub async fn reconnect(&self) -> Result<(), ControlPlaneError> {
        self.session.invalidate().await;
        self.version().await.map(|_| ())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ControlPlaneError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ControlPlaneError::Connection(format!("invalid API base URL {}", self.base))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ControlPlaneError> {
        self.call(Method::GET, segments, &[], None).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, &str)],
        form: Option<&ConfigParams>,
    ) -> Result<T, ControlPlaneError> {
        let url = self.endpoint(segments)?;
        let first = self.send(&method, url.clone(), query, form).await?;
        let response = if first.status() == StatusCode::UNAUTHORIZED && self.session.is_renewable()
        {
            warn!(path = url.path(), "ticket rejected; logging in again");
            self.session.invalidate().await;
            self.send(&method, url, query, form).await?
        } else {
            first
        };
        decode(response).await
    }

    async fn send(
        &self,
        method: &Method,
        url: Url,
        query: &[(&str, &str)],
        form: Option<&ConfigParams>,
    ) -> Result<Response, ControlPlaneError> {
        let authorisation = self.session.authorisation(&self.http, &self.base).await?;
        debug!(%method, path = url.path(), "proxmox request");
        let mut request = authorisation.apply(
            self.http.request(method.clone(), url).query(query),
            *method != Method::GET,
        );
        if let Some(params) = form {
            request = request.form(params);
        }
        request
            .send()
            .await
            .map_err(|err| ControlPlaneError::Connection(err.to_string()))
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ControlPlaneError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| ControlPlaneError::Connection(err.to_string()))?;
    if !status.is_success() {
        return Err(ControlPlaneError::from_response(
            status.as_u16(),
            error_message(status, &body),
        ));
    }
    serde_json::from_str::<Envelope<T>>(&body)
        .map(|envelope| envelope.data)
        .map_err(|err| ControlPlaneError::Decode(err.to_string()))
}

/// Extracts the most specific reason from an error body: per-parameter
/// `errors`, then `message`, then the raw body, then the status reason.
fn error_message(status: StatusCode, body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let detail = parsed.as_ref().and_then(|value| {
        value
            .get("errors")
            .and_then(Value::as_object)
            .filter(|errors| !errors.is_empty())
            .map(|errors| {
                errors
                    .iter()
                    .map(|(field, reason)| {
                        format!("{field}: {}", reason.as_str().unwrap_or_default().trim())
                    })
                    .collect::<Vec<_>>()
                    .join("; ")
            })
            .or_else(|| {
                value
                    .get("message")
                    .and_then(Value::as_str)
                    .map(|message| message.trim().to_owned())
            })
    });
    match detail {
        Some(text) if !text.is_empty() => text,
        _ if parsed.is_none() && !body.trim().is_empty() => body.trim().to_owned(),
        _ => status
            .canonical_reason()
            .map_or_else(|| status.to_string(), str::to_owned),
    }
}
