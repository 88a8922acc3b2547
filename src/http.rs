use std::{error::Error as _, fmt, io, time::Duration};

use reqwest::{header::CONTENT_LENGTH, redirect};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::{
    MAX_HEAD_SIZE, MAX_MESSAGE_SIZE,
    outcome::{ProbeFailure, Stage},
    request::{HttpProbeRequest, Method},
};

type Result<T> = std::result::Result<T, HttpError>;

#[derive(Debug)]
pub(crate) enum HttpError {
    /// Reading from the stream failed.
    Io(io::Error),
    /// The stream ended before a complete head arrived.
    Truncated,
    /// Start line or header could not be parsed.
    Malformed(String),
    /// Head or body exceeds the configured limits.
    TooLarge,
    /// Body was neither JSON nor UTF-8 text.
    Utf8,
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "{e}"),
            Self::Truncated => f.write_str("connection closed mid-head"),
            Self::Malformed(what) => write!(f, "malformed head: {what}"),
            Self::TooLarge => f.write_str("response too large"),
            Self::Utf8 => f.write_str("response body is not valid UTF-8"),
        }
    }
}

impl From<io::Error> for HttpError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Self::Truncated
        } else {
            Self::Io(e)
        }
    }
}

impl From<HttpError> for ProbeFailure {
    fn from(e: HttpError) -> Self {
        let stage = match e {
            HttpError::Utf8 => Stage::Decode,
            _ => Stage::Receive,
        };
        ProbeFailure::new(stage, e.to_string())
    }
}

/// Header fields in arrival order; names compare case-insensitively.
#[derive(Debug, Default)]
pub(crate) struct Headers(Vec<(String, String)>);

impl Headers {
    pub(crate) fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// True if the comma separated header `name` lists `token`.
    pub(crate) fn has_token(&self, name: &str, token: &str) -> bool {
        self.get(name)
            .is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
    }

    pub(crate) fn content_length(&self) -> Result<Option<usize>> {
        self.get("Content-Length")
            .map(|v| {
                v.parse()
                    .map_err(|_| HttpError::Malformed(format!("content-length {v:?}")))
            })
            .transpose()
    }
}

/// Start line plus headers of a request or response.
#[derive(Debug)]
pub(crate) struct Head {
    pub(crate) start_line: String,
    pub(crate) headers: Headers,
}

impl Head {
    /// Status code of a response head.
    pub(crate) fn status(&self) -> Result<u16> {
        let mut parts = self.start_line.split_whitespace();
        match (parts.next(), parts.next().map(str::parse)) {
            (Some(v), Some(Ok(code))) if v.starts_with("HTTP/") => Ok(code),
            _ => Err(HttpError::Malformed(format!(
                "status line {:?}",
                self.start_line
            ))),
        }
    }
}

/// Reads lines up to and including the blank line ending a head.
///
/// Never buffers more than `MAX_HEAD_SIZE` bytes, newline or not.
pub(crate) async fn read_head<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Head> {
    let mut total = 0;
    let mut start_line = None;
    let mut headers = vec![];
    loop {
        let remaining = MAX_HEAD_SIZE - total;
        if remaining == 0 {
            return Err(HttpError::TooLarge);
        }
        let mut line = String::new();
        let n = (&mut *reader)
            .take(remaining as u64)
            .read_line(&mut line)
            .await?;
        total += n;
        if !line.ends_with('\n') {
            return Err(if n == remaining {
                HttpError::TooLarge
            } else {
                HttpError::Truncated
            });
        }

        let line = line.trim_end(); // remove \r\n
        if start_line.is_none() {
            start_line = Some(line.to_string());
            continue;
        }
        if line.is_empty() {
            break;
        }
        match line.split_once(':') {
            Some((name, value)) => headers.push((name.trim().to_string(), value.trim().to_string())),
            None => return Err(HttpError::Malformed(format!("header line {line:?}"))),
        }
    }

    Ok(Head {
        start_line: start_line.unwrap_or_default(),
        headers: Headers(headers),
    })
}

/// Sends one request and reads the whole response.
///
/// The deadline covers the whole exchange. It is a `Connect` failure while
/// the connection is still being set up and a `Receive` failure once it is
/// established, even if the request is still being written.
pub(crate) async fn exchange(
    req: &HttpProbeRequest,
    timeout: Option<Duration>,
) -> std::result::Result<(u16, Value), ProbeFailure> {
    let mut builder = reqwest::Client::builder()
        .redirect(redirect::Policy::none())
        .user_agent(concat!("wust-probe/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout).connect_timeout(timeout);
    }
    let client = builder
        .build()
        .map_err(|e| ProbeFailure::new(Stage::Connect, error_chain(&e)))?;

    let mut request = client.request(req.method.into(), req.url.clone());
    if !req.body.is_null() {
        request = request.json(&req.body);
    } else if matches!(req.method, Method::Post | Method::Put | Method::Patch) {
        request = request.header(CONTENT_LENGTH, "0");
    }

    let mut res = request.send().await.map_err(|e| send_failure(&e))?;
    let status = res.status().as_u16();
    tracing::debug!(status, version = ?res.version(), "response head");

    let mut body = vec![];
    while let Some(chunk) = res.chunk().await.map_err(|e| read_failure(&e))? {
        if body.len() + chunk.len() > MAX_MESSAGE_SIZE {
            return Err(HttpError::TooLarge.into());
        }
        body.extend_from_slice(&chunk);
    }
    Ok((status, decode_body(body)?))
}

fn send_failure(e: &reqwest::Error) -> ProbeFailure {
    if e.is_connect() {
        if e.is_timeout() {
            ProbeFailure::timeout(Stage::Connect)
        } else {
            ProbeFailure::new(Stage::Connect, error_chain(e))
        }
    } else if e.is_timeout() {
        ProbeFailure::timeout(Stage::Receive)
    } else if e.is_body() || e.is_builder() {
        ProbeFailure::new(Stage::Send, error_chain(e))
    } else {
        ProbeFailure::new(Stage::Receive, error_chain(e))
    }
}

fn read_failure(e: &reqwest::Error) -> ProbeFailure {
    if e.is_timeout() {
        ProbeFailure::timeout(Stage::Receive)
    } else {
        ProbeFailure::new(Stage::Receive, error_chain(e))
    }
}

/// reqwest keeps the interesting part (refused, dns, tls) in the sources.
fn error_chain(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

/// JSON if it parses, otherwise the text as a JSON string; empty is `null`.
pub(crate) fn decode_body(body: Vec<u8>) -> Result<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    if let Ok(v) = serde_json::from_slice(&body) {
        return Ok(v);
    }
    String::from_utf8(body)
        .map(Value::String)
        .map_err(|_| HttpError::Utf8)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::BufReader;

    use super::*;

    async fn head(raw: &str) -> Result<Head> {
        let mut reader = BufReader::new(raw.as_bytes());
        read_head(&mut reader).await
    }

    #[tokio::test]
    async fn reads_status_and_headers() {
        let head = head("HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: keep-alive, Upgrade\r\n\r\nleftover")
            .await
            .unwrap();
        assert_eq!(head.status().unwrap(), 101);
        assert_eq!(head.headers.get("upgrade"), Some("websocket"));
        assert!(head.headers.has_token("Connection", "upgrade"));
        assert_eq!(head.headers.content_length().unwrap(), None);
    }

    #[tokio::test]
    async fn malformed_and_truncated_heads() {
        assert!(matches!(
            head("SSH-2.0-OpenSSH\r\n\r\n").await.unwrap().status(),
            Err(HttpError::Malformed(_))
        ));
        assert!(matches!(
            head("HTTP/1.1 200 OK\r\nno colon here\r\n\r\n").await,
            Err(HttpError::Malformed(_))
        ));
        assert!(matches!(head("HTTP/1.1 200 OK\r\n").await, Err(HttpError::Truncated)));
        assert!(matches!(head("HTTP/1.1 200 O").await, Err(HttpError::Truncated)));
    }

    #[tokio::test]
    async fn endless_line_stops_at_head_limit() {
        let mut reader = BufReader::new(tokio::io::repeat(b'a'));
        assert!(matches!(read_head(&mut reader).await, Err(HttpError::TooLarge)));
    }

    #[tokio::test]
    async fn too_many_headers_stop_at_head_limit() {
        let raw = format!("GET / HTTP/1.1\r\n{}", "X-Filler: 0123456789\r\n".repeat(1000));
        assert!(matches!(head(&raw).await, Err(HttpError::TooLarge)));
    }

    #[test]
    fn decodes_json_text_and_empty_bodies() {
        assert_eq!(decode_body(b"{\"ok\":true}".to_vec()).unwrap(), json!({"ok": true}));
        assert_eq!(decode_body(b"oops".to_vec()).unwrap(), json!("oops"));
        assert_eq!(decode_body(b"\r\n".to_vec()).unwrap(), Value::Null);
    }

    #[test]
    fn non_utf8_body_is_decode_failure() {
        let err = decode_body(vec![0xff, 0x00, 0xfe]).unwrap_err();
        assert_eq!(ProbeFailure::from(err).stage, Stage::Decode);
    }
}
