use std::{sync::Arc, time::Duration};

use tracing::Instrument;

use crate::{
    http,
    outcome::ProbeOutcome,
    request::{HttpProbeRequest, ProbeRequest, WsProbeRequest},
    transport::{Connector, NetConnector},
    ws::WsSession,
};

/// Knobs shared by both probe modes. Everything is off by default.
#[derive(Debug, Copy, Clone, Default)]
pub struct ProbeOptions {
    /// Overall deadline for one probe.
    pub timeout: Option<Duration>,
    /// Close a WebSocket session after this long without an inbound message.
    pub linger: Option<Duration>,
}

/// Issues one outbound operation per call and reports its outcome.
///
/// HTTP probes go through a fresh `reqwest` client each time. WebSocket
/// sessions dial through the [`Connector`], which tests can replace.
#[derive(Clone)]
pub struct Probe {
    connector: Arc<dyn Connector>,
    options: ProbeOptions,
}

impl Default for Probe {
    fn default() -> Self { Self::new(ProbeOptions::default()) }
}

impl Probe {
    #[must_use]
    pub fn new(options: ProbeOptions) -> Self { Self::with_connector(NetConnector::new(), options) }

    pub fn with_connector(connector: impl Connector + 'static, options: ProbeOptions) -> Self {
        Self {
            connector: Arc::new(connector),
            options,
        }
    }

    #[must_use]
    pub fn options(&self) -> ProbeOptions { self.options }

    pub async fn run(&self, req: impl Into<ProbeRequest>) -> ProbeOutcome {
        match req.into() {
            ProbeRequest::Http(req) => self.run_http(req).await,
            ProbeRequest::Ws(req) => self.run_ws(req).await,
        }
    }

    /// Any response is `HttpSuccess`, whatever its status.
    pub async fn run_http(&self, req: HttpProbeRequest) -> ProbeOutcome {
        let span = tracing::info_span!("http", method = %req.method, url = %req.url);
        match http::exchange(&req, self.options.timeout)
            .instrument(span)
            .await
        {
            Ok((status, body)) => {
                tracing::info!(status, "response received");
                ProbeOutcome::HttpSuccess { status, body }
            }
            Err(failure) => {
                tracing::warn!(stage = %failure.stage, message = %failure.message, "http probe failed");
                failure.into()
            }
        }
    }

    /// Runs a session to its end and returns the collected log.
    pub async fn run_ws(&self, req: WsProbeRequest) -> ProbeOutcome {
        self.open_ws(req).outcome().await
    }

    /// Starts a session whose events can be consumed as they happen.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn open_ws(&self, req: WsProbeRequest) -> WsSession {
        tracing::info!(url = %req.url, "opening websocket probe");
        WsSession::spawn(Arc::clone(&self.connector), req, self.options)
    }
}
