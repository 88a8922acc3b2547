use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Where in the probe a failure happened.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Resolving, connecting, TLS, the upgrade handshake, or a timeout before open.
    Connect,
    /// Writing to an open connection.
    Send,
    /// Reading from an open connection, or a timeout after open.
    Receive,
    /// The payload was not valid text or structured data.
    Decode,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::Send => "send",
            Self::Receive => "receive",
            Self::Decode => "decode",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeFailure {
    pub stage: Stage,
    pub message: String,
}

impl ProbeFailure {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }

    pub(crate) fn timeout(stage: Stage) -> Self { Self::new(stage, "timeout") }
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.message)
    }
}

impl std::error::Error for ProbeFailure {}

/// One observable occurrence during a WebSocket session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WsEvent {
    Opened,
    MessageReceived { text: String },
    Closed { code: u16, reason: String },
    ErrorOccurred { message: String },
}

impl WsEvent {
    /// `Closed` and `ErrorOccurred` end a session.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::ErrorOccurred { .. })
    }
}

/// Every event of a session that ended in a close, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WsSessionLog {
    pub events: Vec<WsEvent>,
}

impl WsSessionLog {
    #[must_use]
    pub fn close_status(&self) -> Option<(u16, &str)> {
        self.events.iter().rev().find_map(|e| match e {
            WsEvent::Closed { code, reason } => Some((*code, reason.as_str())),
            _ => None,
        })
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.events.iter().filter_map(|e| match e {
            WsEvent::MessageReceived { text } => Some(text.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProbeOutcome {
    HttpSuccess { status: u16, body: Value },
    WsSessionLog(WsSessionLog),
    ProbeFailure(ProbeFailure),
}

impl ProbeOutcome {
    #[must_use]
    pub fn is_failure(&self) -> bool { matches!(self, Self::ProbeFailure(_)) }

    #[must_use]
    pub fn failure(&self) -> Option<&ProbeFailure> {
        match self {
            Self::ProbeFailure(f) => Some(f),
            _ => None,
        }
    }
}

impl From<ProbeFailure> for ProbeOutcome {
    fn from(f: ProbeFailure) -> Self { Self::ProbeFailure(f) }
}

impl From<Result<WsSessionLog, ProbeFailure>> for ProbeOutcome {
    fn from(res: Result<WsSessionLog, ProbeFailure>) -> Self {
        res.map_or_else(Self::ProbeFailure, Self::WsSessionLog)
    }
}
