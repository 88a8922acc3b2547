mod handshake;
mod session;

pub(crate) use handshake::accept_key;
pub use session::WsSession;
