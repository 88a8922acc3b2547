use std::fmt;

use base64::engine::{Engine, general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncWriteExt, BufReader};

use crate::{
    http::{HttpError, read_head},
    transport::{Conn, Endpoint},
};

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Errors that can occur when upgrading a stream to a WebSocket.
#[derive(Debug)]
pub(crate) enum HandshakeError {
    /// Failed to write the upgrade request.
    Write(std::io::Error),
    /// Failed to read or parse the response head.
    Head(HttpError),
    /// Server answered with something other than `101`.
    StatusLine(String),
    /// A handshake header did not match expectations.
    Header {
        field: &'static str,
        expected: String,
        got: Option<String>,
    },
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write(e) => write!(f, "writing upgrade request: {e}"),
            Self::Head(e) => write!(f, "reading upgrade response: {e}"),
            Self::StatusLine(line) => write!(f, "upgrade rejected: {line}"),
            Self::Header {
                field,
                expected,
                got,
            } => write!(f, "bad {field} header: expected {expected:?}, got {got:?}"),
        }
    }
}

/// `Sec-WebSocket-Accept` value for a given `Sec-WebSocket-Key`.
pub(crate) fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key);
    hasher.update(WS_GUID);
    BASE64.encode(hasher.finalize())
}

/// Performs the client side of the opening handshake.
///
/// Returns the stream plus any bytes the server sent right after the
/// response head, which belong to the first frames.
pub(crate) async fn upgrade(
    mut conn: Box<dyn Conn>,
    endpoint: &Endpoint,
) -> Result<(Box<dyn Conn>, Vec<u8>), HandshakeError> {
    let sec_websocket_key = {
        let mut key_bytes = [0u8; 16];
        rand::fill(&mut key_bytes);
        BASE64.encode(key_bytes)
    };

    let req = format!(
        "GET {} HTTP/1.1\r\n\
        Host: {}\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: {sec_websocket_key}\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n",
        endpoint.target, endpoint.authority,
    );
    conn.write_all(req.as_bytes())
        .await
        .map_err(HandshakeError::Write)?;
    conn.flush().await.map_err(HandshakeError::Write)?;

    let mut reader = BufReader::new(conn);
    let head = read_head(&mut reader).await.map_err(HandshakeError::Head)?;

    let mut status_parts = head.start_line.split_whitespace();
    if status_parts.next().is_none() || status_parts.next() != Some("101") {
        return Err(HandshakeError::StatusLine(head.start_line));
    }

    let header = |field: &'static str, expected: &str, ok: bool| {
        if ok {
            Ok(())
        } else {
            Err(HandshakeError::Header {
                field,
                expected: expected.to_string(),
                got: head.headers.get(field).map(str::to_string),
            })
        }
    };
    header(
        "Upgrade",
        "websocket",
        head.headers.has_token("Upgrade", "websocket"),
    )?;
    header(
        "Connection",
        "upgrade",
        head.headers.has_token("Connection", "upgrade"),
    )?;
    let expected_accept = accept_key(&sec_websocket_key);
    header(
        "Sec-WebSocket-Accept",
        &expected_accept,
        head.headers.get("Sec-WebSocket-Accept") == Some(expected_accept.as_str()),
    )?;

    let leftover = reader.buffer().to_vec();
    tracing::info!(
        host = %endpoint.authority,
        path = %endpoint.target,
        "websocket upgraded"
    );
    Ok((reader.into_inner(), leftover))
}
