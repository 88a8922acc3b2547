use std::{future::Future, io, sync::Arc, time::Duration};

use async_trait::async_trait;
use rustls::{ClientConfig, RootCertStore, pki_types::ServerName};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    time::Instant,
};
use tokio_rustls::TlsConnector;
use url::{Host, Url};

use crate::outcome::{ProbeFailure, Stage};

/// A byte stream a probe can run over: plain TCP, TLS, or an in-memory pipe.
pub trait Conn: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Conn for T {}

/// Where a probe connects, resolved from its url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host to resolve, without IPv6 brackets.
    pub host: String,
    pub port: u16,
    /// `https` or `wss`.
    pub secure: bool,
    /// Value of the `Host` header.
    pub authority: String,
    /// Path and query sent on the request line.
    pub target: String,
}

impl Endpoint {
    pub fn from_url(url: &Url) -> Result<Self, String> {
        let host = match url.host() {
            Some(Host::Domain(d)) => d.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(format!("{url} has no host")),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| format!("{url} has no port"))?;
        let host_str = url.host_str().unwrap_or(&host);
        let authority = match url.port() {
            Some(p) => format!("{host_str}:{p}"),
            None => host_str.to_string(),
        };
        let target = match url.query() {
            Some(q) => format!("{}?{q}", url.path()),
            None => url.path().to_string(),
        };

        Ok(Self {
            host,
            port,
            secure: matches!(url.scheme(), "https" | "wss"),
            authority,
            target,
        })
    }
}

/// Opens the byte stream for an [`Endpoint`].
///
/// [`NetConnector`] is the real network; tests substitute their own.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> io::Result<Box<dyn Conn>>;
}

/// TCP, with rustls on top for secure endpoints.
#[derive(Clone)]
pub struct NetConnector {
    tls: Arc<ClientConfig>,
}

impl NetConnector {
    #[must_use]
    pub fn new() -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self {
            tls: Arc::new(config),
        }
    }
}

impl Default for NetConnector {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl Connector for NetConnector {
    async fn connect(&self, endpoint: &Endpoint) -> io::Result<Box<dyn Conn>> {
        let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        tcp.set_nodelay(true)?;
        tracing::debug!(
            host = %endpoint.host,
            port = endpoint.port,
            secure = endpoint.secure,
            "tcp connected"
        );
        if !endpoint.secure {
            return Ok(Box::new(tcp));
        }

        let name = ServerName::try_from(endpoint.host.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let tls = TlsConnector::from(Arc::clone(&self.tls))
            .connect(name, tcp)
            .await?;
        Ok(Box::new(tls))
    }
}

/// Optional point in time by which the whole probe must finish.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    pub(crate) fn after(timeout: Option<Duration>) -> Self {
        Self(timeout.map(|t| Instant::now() + t))
    }

    /// Runs `fut`, failing with `stage` and "timeout" once the deadline passes.
    pub(crate) async fn run<F: Future>(self, stage: Stage, fut: F) -> Result<F::Output, ProbeFailure> {
        match self.0 {
            Some(at) => tokio::time::timeout_at(at, fut)
                .await
                .map_err(|_| ProbeFailure::timeout(stage)),
            None => Ok(fut.await),
        }
    }

    /// Resolves when the deadline passes, never if there is none.
    pub(crate) async fn expired(self) {
        match self.0 {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(url: &str) -> Endpoint { Endpoint::from_url(&Url::parse(url).unwrap()).unwrap() }

    #[test]
    fn default_ports_per_scheme() {
        assert_eq!(endpoint("ws://example.com/ws").port, 80);
        assert_eq!(endpoint("wss://example.com/ws").port, 443);
        assert_eq!(endpoint("https://example.com").port, 443);
        assert!(endpoint("wss://example.com").secure);
        assert!(!endpoint("http://example.com").secure);
    }

    #[test]
    fn authority_and_target() {
        let ep = endpoint("http://localhost:8000/create-game?x=1");
        assert_eq!(ep.host, "localhost");
        assert_eq!(ep.port, 8000);
        assert_eq!(ep.authority, "localhost:8000");
        assert_eq!(ep.target, "/create-game?x=1");

        let ep = endpoint("ws://[::1]:9001");
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.authority, "[::1]:9001");
        assert_eq!(ep.target, "/");
    }

    #[tokio::test]
    async fn deadline_times_out_with_stage() {
        let deadline = Deadline::after(Some(Duration::from_millis(10)));
        let res = deadline
            .run(Stage::Receive, std::future::pending::<()>())
            .await;
        assert_eq!(res, Err(ProbeFailure::new(Stage::Receive, "timeout")));

        let res = Deadline::after(None).run(Stage::Connect, async { 7 }).await;
        assert_eq!(res, Ok(7));
    }
}
