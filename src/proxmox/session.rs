//! Authentication state for the Proxmox API.
//!
//! API tokens are stateless. Password credentials are exchanged for a ticket
//! that is cached behind an async mutex and renewed when the server rejects
//! it.

use reqwest::{Client, RequestBuilder, header};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::config::ProxmoxConfig;
use crate::control_plane::ControlPlaneError;

/// How the client proves its identity.
#[derive(Clone)]
pub enum Credentials {
    /// Pre-shared API token, sent on every request.
    Token {
        /// Full `Authorization` header value.
        header: String,
    },
    /// User and password exchanged for a ticket.
    Password {
        /// User with realm, for example `root@pam`.
        username: String,
        /// Password.
        password: String,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token { .. } => formatter.write_str("Credentials::Token(..)"),
            Self::Password { username, .. } => formatter
                .debug_struct("Credentials::Password")
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

impl Credentials {
    /// Token credentials. `token_id` may be bare (`vmforge`) or already
    /// qualified with the user (`root@pam!vmforge`).
    #[must_use]
    pub fn token(user: &str, token_id: &str, secret: &str) -> Self {
        let qualified = if token_id.contains('!') {
            token_id.to_owned()
        } else {
            format!("{user}!{token_id}")
        };
        Self::Token {
            header: format!("PVEAPIToken={qualified}={secret}"),
        }
    }

    /// Password credentials.
    #[must_use]
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Password {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Picks the token when one is configured, else the password.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError::Authentication`] when neither is set.
    pub fn from_config(config: &ProxmoxConfig) -> Result<Self, ControlPlaneError> {
        if let Some((token_id, secret)) = config.api_token() {
            return Ok(Self::token(&config.user, token_id, secret));
        }
        match config.password.as_deref() {
            Some(password) if !password.is_empty() => {
                Ok(Self::password(config.user.clone(), password))
            }
            _ => Err(ControlPlaneError::Authentication(String::from(
                "no password or API token configured",
            ))),
        }
    }
}

/// Ticket issued by `POST /access/ticket`.
#[derive(Clone, Deserialize)]
pub(super) struct Ticket {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_token: String,
}

#[derive(Deserialize)]
struct TicketEnvelope {
    data: Ticket,
}

/// Authorisation material for one request.
#[derive(Clone)]
pub(super) enum Authorisation {
    Token(String),
    Ticket(Ticket),
}

impl Authorisation {
    /// Attaches the material; tickets also need the CSRF header on writes.
    pub(super) fn apply(&self, request: RequestBuilder, mutating: bool) -> RequestBuilder {
        match self {
            Self::Token(value) => request.header(header::AUTHORIZATION, value),
            Self::Ticket(ticket) => {
                let with_cookie =
                    request.header(header::COOKIE, format!("PVEAuthCookie={}", ticket.ticket));
                if mutating {
                    with_cookie.header("CSRFPreventionToken", &ticket.csrf_token)
                } else {
                    with_cookie
                }
            }
        }
    }
}

pub(super) struct Session {
    credentials: Credentials,
    ticket: Mutex<Option<Ticket>>,
}

impl Session {
    pub(super) const fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            ticket: Mutex::const_new(None),
        }
    }

    /// Whether a rejected request can be retried with fresh credentials.
    pub(super) const fn is_renewable(&self) -> bool {
        matches!(self.credentials, Credentials::Password { .. })
    }

    /// Returns valid authorisation, logging in first when no ticket is cached.
    pub(super) async fn authorisation(
        &self,
        http: &Client,
        base: &Url,
    ) -> Result<Authorisation, ControlPlaneError> {
        let (username, password) = match &self.credentials {
            Credentials::Token { header } => return Ok(Authorisation::Token(header.clone())),
            Credentials::Password { username, password } => (username, password),
        };
        let mut cached = self.ticket.lock().await;
        if let Some(ticket) = cached.as_ref() {
            return Ok(Authorisation::Ticket(ticket.clone()));
        }
        let ticket = login(http, base, username, password).await?;
        *cached = Some(ticket.clone());
        Ok(Authorisation::Ticket(ticket))
    }

    /// Drops the cached ticket so the next request logs in again.
    pub(super) async fn invalidate(&self) {
        *self.ticket.lock().await = None;
    }
}

async fn login(
    http: &Client,
    base: &Url,
    username: &str,
    password: &str,
) -> Result<Ticket, ControlPlaneError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| ControlPlaneError::Connection(format!("invalid API base URL {base}")))?
        .pop_if_empty()
        .extend(["access", "ticket"]);
    debug!(%url, username, "requesting ticket");

    let response = http
        .post(url)
        .form(&[("username", username), ("password", password)])
        .send()
        .await
        .map_err(|err| ControlPlaneError::Connection(err.to_string()))?;
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(ControlPlaneError::Authentication(format!(
            "login rejected for {username}"
        )));
    }
    let body = response
        .text()
        .await
        .map_err(|err| ControlPlaneError::Connection(err.to_string()))?;
    if !status.is_success() {
        return Err(ControlPlaneError::from_response(status.as_u16(), body));
    }
    let envelope: TicketEnvelope = serde_json::from_str(&body)
        .map_err(|err| ControlPlaneError::Decode(format!("ticket response: {err}")))?;
    info!(username, "logged in to Proxmox");
    Ok(envelope.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("vmforge", "PVEAPIToken=root@pam!vmforge=s3cret")]
    #[case("ops@pve!ci", "PVEAPIToken=ops@pve!ci=s3cret")]
    fn token_header_qualifies_bare_ids(#[case] token_id: &str, #[case] expected: &str) {
        let Credentials::Token { header } = Credentials::token("root@pam", token_id, "s3cret")
        else {
            panic!("expected token credentials");
        };
        assert_eq!(header, expected);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let rendered = format!("{:?}", Credentials::password("root@pam", "hunter2"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("root@pam"));
    }
}
