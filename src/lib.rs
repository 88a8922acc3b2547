#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::empty_docs,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

mod error;
mod frames;
mod http;
mod outcome;
mod probe;
mod protocol;
mod request;
mod role;
mod server;
mod transport;
mod ws;

pub use error::CloseReason;
pub use outcome::{ProbeFailure, ProbeOutcome, Stage, WsEvent, WsSessionLog};
pub use probe::{Probe, ProbeOptions};
pub use request::{HttpProbeRequest, Method, ProbeRequest, RequestError, WsProbeRequest};
pub use server::{FixtureServer, MessageHandler, RouteHandler, WsReply};
pub use transport::{Conn, Connector, Endpoint, NetConnector};
pub use ws::WsSession;

pub(crate) const MAX_FRAME_PAYLOAD: usize = 32 * 1024;
pub(crate) const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
pub(crate) const MAX_HEAD_SIZE: usize = 16 * 1024;
