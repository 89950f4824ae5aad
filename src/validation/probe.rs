//! TCP reachability probes.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::{Instant, timeout};

/// Why a probe failed.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeFailure {
    /// No answer within the connect timeout.
    Timeout,
    /// The host actively refused the connection.
    Refused,
    /// The host name could not be resolved.
    Dns,
    /// Any other I/O failure.
    Other,
}

/// Outcome of a single TCP connect attempt.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProbeReport {
    /// Whether the port accepted the connection.
    pub passed: bool,
    /// Same as `passed`; kept for consumers that read reachability.
    pub reachable: bool,
    /// Connect latency in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Failure class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ProbeFailure>,
    /// Low level error text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Human readable summary.
    pub message: String,
}

impl ProbeReport {
    /// Report for a port that accepted the connection.
    #[must_use]
    pub fn open(port: u16, latency: Duration) -> Self {
        Self {
            passed: true,
            reachable: true,
            latency_ms: Some(u64::try_from(latency.as_millis()).unwrap_or(u64::MAX)),
            failure: None,
            error: None,
            message: format!("Port {port} is open and responding"),
        }
    }

    /// Report for a connect attempt that timed out.
    #[must_use]
    pub fn timed_out(port: u16) -> Self {
        Self::failed(
            ProbeFailure::Timeout,
            "Connection timeout",
            format!("Port {port} is not reachable (timeout)"),
        )
    }

    /// Report for a refused connection.
    #[must_use]
    pub fn refused(port: u16) -> Self {
        Self::failed(
            ProbeFailure::Refused,
            "Connection refused",
            format!("Port {port} is closed or refusing connections"),
        )
    }

    /// Report for a host name that did not resolve.
    #[must_use]
    pub fn unresolved(host: &str, detail: &str) -> Self {
        Self::failed(
            ProbeFailure::Dns,
            format!("DNS resolution failed: {detail}"),
            format!("Cannot resolve hostname {host}"),
        )
    }

    /// Report for any other failure.
    #[must_use]
    pub fn other(port: u16, detail: &str) -> Self {
        Self::failed(
            ProbeFailure::Other,
            detail,
            format!("Failed to check port {port}: {detail}"),
        )
    }

    fn failed(failure: ProbeFailure, error: impl Into<String>, message: String) -> Self {
        Self {
            passed: false,
            reachable: false,
            latency_ms: None,
            failure: Some(failure),
            error: Some(error.into()),
            message,
        }
    }
}

/// Future returned by [`PortProber::probe`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = ProbeReport> + Send + 'a>>;

/// Checks whether a TCP port accepts connections.
pub trait PortProber: Send + Sync {
    /// Attempts one connection to `host:port`.
    fn probe<'a>(&'a self, host: &'a str, port: u16) -> ProbeFuture<'a>;
}

/// Probes with a real TCP connect.
#[derive(Clone, Copy, Debug)]
pub struct TcpPortProber {
    connect_timeout: Duration,
}

impl Default for TcpPortProber {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

enum Attempt {
    Connected,
    Unresolved(String),
    Failed(io::Error),
}

impl TcpPortProber {
    /// Creates a prober bounded by `connect_timeout`, which covers name
    /// resolution and the connect itself.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn attempt(host: &str, port: u16) -> Attempt {
        let addresses: Vec<SocketAddr> = match lookup_host((host, port)).await {
            Ok(found) => found.collect(),
            Err(err) => return Attempt::Unresolved(err.to_string()),
        };
        if addresses.is_empty() {
            return Attempt::Unresolved(String::from("no addresses returned"));
        }
        match TcpStream::connect(addresses.as_slice()).await {
            Ok(_stream) => Attempt::Connected,
            Err(err) => Attempt::Failed(err),
        }
    }
}

impl PortProber for TcpPortProber {
    fn probe<'a>(&'a self, host: &'a str, port: u16) -> ProbeFuture<'a> {
        Box::pin(async move {
            let started = Instant::now();
            match timeout(self.connect_timeout, Self::attempt(host, port)).await {
                Err(_) => ProbeReport::timed_out(port),
                Ok(Attempt::Connected) => ProbeReport::open(port, started.elapsed()),
                Ok(Attempt::Unresolved(detail)) => ProbeReport::unresolved(host, &detail),
                Ok(Attempt::Failed(err)) if err.kind() == io::ErrorKind::ConnectionRefused => {
                    ProbeReport::refused(port)
                }
                Ok(Attempt::Failed(err)) if err.kind() == io::ErrorKind::TimedOut => {
                    ProbeReport::timed_out(port)
                }
                Ok(Attempt::Failed(err)) => ProbeReport::other(port, &err.to_string()),
            }
        })
    }
}
