//! A small stand-in for the game server the probe is pointed at.
//!
//! Serves the HTTP routes `GET /` and `POST /create-game` plus a WebSocket
//! endpoint at `/ws`. Text messages on the socket go to a [`MessageHandler`].

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, ToSocketAddrs, tcp::OwnedWriteHalf},
    task::JoinHandle,
};

use crate::{
    CloseReason, MAX_FRAME_PAYLOAD, MAX_MESSAGE_SIZE,
    error::parse_close_payload,
    frames::{ControlFrame, DataFrame, DecodedFrame, FrameDecoder, FrameParseError, FrameState, Opcode},
    http::{Head, read_head},
    protocol::{MessageError, PartialMessage},
    role::Server,
    ws::accept_key,
};

const GAME_ID_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CLOSE_WAIT: Duration = Duration::from_secs(5);

/// What the server sends back for one inbound text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsReply {
    Nothing,
    Text(String),
    /// Send the text, then close with the given code.
    TextThenClose(String, u16),
    Close(u16),
}

#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn on_text(&self, text: String) -> WsReply;

    async fn on_close(&self, _code: u16) {}
}

/// Answers a `ping_n8n` route envelope with `pong_n8n` and a normal close;
/// echoes every other message behind `echo_prefix`.
#[derive(Debug, Clone, Default)]
pub struct RouteHandler {
    echo_prefix: String,
}

impl RouteHandler {
    pub fn new(echo_prefix: impl Into<String>) -> Self {
        Self {
            echo_prefix: echo_prefix.into(),
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    route: String,
}

#[async_trait]
impl MessageHandler for RouteHandler {
    async fn on_text(&self, text: String) -> WsReply {
        match serde_json::from_str::<Envelope>(&text) {
            Ok(env) if env.route == "ping_n8n" => WsReply::TextThenClose(
                json!({"route": "pong_n8n"}).to_string(),
                CloseReason::Normal.code(),
            ),
            _ => WsReply::Text(format!("{}{text}", self.echo_prefix)),
        }
    }

    async fn on_close(&self, code: u16) {
        tracing::info!(code, "client closed");
    }
}

pub struct FixtureServer<H = RouteHandler> {
    listener: TcpListener,
    handler: Arc<H>,
}

impl FixtureServer {
    pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "listening");
        Ok(Self {
            listener,
            handler: Arc::new(RouteHandler::default()),
        })
    }
}

impl<H: MessageHandler> FixtureServer<H> {
    #[must_use]
    pub fn with_handler<T: MessageHandler>(self, handler: T) -> FixtureServer<T> {
        FixtureServer {
            listener: self.listener,
            handler: Arc::new(handler),
        }
    }

    pub fn addr(&self) -> io::Result<SocketAddr> { self.listener.local_addr() }

    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::debug!(peer = %peer, "accepted");
                    tokio::spawn(serve_conn(stream, Arc::clone(&self.handler)));
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            }
        }
    }

    /// Runs the server on a background task.
    pub fn spawn(self) -> JoinHandle<()> { tokio::spawn(self.run()) }
}

async fn serve_conn<H: MessageHandler>(stream: TcpStream, handler: Arc<H>) {
    let mut reader = BufReader::new(stream);
    let head = match read_head(&mut reader).await {
        Ok(head) => head,
        Err(e) => {
            tracing::debug!(error = %e, "bad request head");
            return;
        }
    };
    let mut parts = head.start_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts
        .next()
        .and_then(|p| p.split('?').next())
        .unwrap_or_default()
        .to_string();
    tracing::info!(method = %method, path = %path, "request");

    if head.headers.has_token("Upgrade", "websocket") {
        upgrade(reader, &head, &path, handler).await;
        return;
    }

    let body = match head.headers.content_length() {
        Ok(Some(len)) if len <= MAX_MESSAGE_SIZE => {
            let mut body = vec![0; len];
            if reader.read_exact(&mut body).await.is_err() {
                return;
            }
            body
        }
        Ok(None) => vec![],
        _ => {
            let res = response(400, &json!({"detail": "Bad Content-Length"}));
            let _ = reader.into_inner().write_all(&res).await;
            return;
        }
    };

    let (status, value) = route(&method, &path, &body);
    let _ = reader.into_inner().write_all(&response(status, &value)).await;
}

async fn upgrade<H: MessageHandler>(
    mut reader: BufReader<TcpStream>,
    head: &Head,
    path: &str,
    handler: Arc<H>,
) {
    let key = head.headers.get("Sec-WebSocket-Key");
    let (status, detail) = match key {
        _ if path != "/ws" => (404, "Not Found"),
        None => (400, "Missing Sec-WebSocket-Key"),
        Some(_) => (101, ""),
    };
    let Some(key) = key.filter(|_| status == 101) else {
        let _ = reader
            .get_mut()
            .write_all(&response(status, &json!({ "detail": detail })))
            .await;
        return;
    };

    let res = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(key)
    );
    if reader.get_mut().write_all(res.as_bytes()).await.is_err() {
        return;
    }

    let leftover = reader.buffer().to_vec();
    serve_ws(reader.into_inner(), leftover, handler.as_ref()).await;
}

enum Step {
    Continue,
    /// We sent a close frame and wait for the peer's.
    Closing,
    Done,
}

async fn serve_ws<H: MessageHandler>(stream: TcpStream, leftover: Vec<u8>, handler: &H) {
    let (mut reader, mut writer) = stream.into_split();
    let mut fd = FrameDecoder::<Server>::new();
    fd.push_bytes(&leftover);
    let mut partial = None;
    let mut closing = false;
    let mut buf = vec![0; MAX_FRAME_PAYLOAD];

    loop {
        match fd.next_frame() {
            Ok(Some(FrameState::Complete(frame))) => {
                match on_frame(&frame, &mut partial, handler, closing, &mut writer).await {
                    Ok(Step::Continue) => {}
                    Ok(Step::Closing) => closing = true,
                    Ok(Step::Done) | Err(_) => return,
                }
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "closing connection");
                let code = match e {
                    FrameParseError::ProtoError(_) => CloseReason::ProtoError,
                    FrameParseError::SizeErr => CloseReason::TooBig,
                };
                let _ = writer
                    .write_all(&ControlFrame::<Server>::close_with(code.code(), ""))
                    .await;
                return;
            }
        }

        let read = reader.read(&mut buf);
        let n = if closing {
            match tokio::time::timeout(CLOSE_WAIT, read).await {
                Ok(n) => n,
                Err(_) => return,
            }
        } else {
            read.await
        };
        match n {
            Ok(0) | Err(_) => return,
            Ok(n) => fd.push_bytes(&buf[..n]),
        }
    }
}

async fn on_frame<H: MessageHandler>(
    frame: &DecodedFrame,
    partial: &mut Option<PartialMessage>,
    handler: &H,
    closing: bool,
    writer: &mut OwnedWriteHalf,
) -> io::Result<Step> {
    let close = |code: CloseReason| ControlFrame::<Server>::close_with(code.code(), "");

    match frame.opcode {
        Opcode::Ping => {
            writer
                .write_all(&ControlFrame::<Server>::pong(&frame.payload).encode())
                .await?;
        }
        Opcode::Pong => {}
        Opcode::Close => {
            let (code, _) = parse_close_payload(&frame.payload);
            handler.on_close(code).await;
            if !closing {
                let echo = ControlFrame::<Server>::close(&frame.payload[..frame.payload.len().min(2)]);
                writer.write_all(&echo.encode()).await?;
            }
            return Ok(Step::Done);
        }
        Opcode::Text | Opcode::Bin | Opcode::Cont => {
            let msg = match (partial.as_mut(), frame.opcode) {
                (None, Opcode::Text) => partial.insert(PartialMessage::Text(vec![])),
                (None, Opcode::Bin) => partial.insert(PartialMessage::Binary(vec![])),
                (Some(p), Opcode::Cont) => p,
                _ => {
                    writer.write_all(&close(CloseReason::ProtoError)).await?;
                    return Ok(Step::Closing);
                }
            };
            if msg.len() + frame.payload.len() > MAX_MESSAGE_SIZE {
                writer.write_all(&close(CloseReason::TooBig)).await?;
                return Ok(Step::Closing);
            }
            msg.push_bytes(&frame.payload);
            if !frame.is_fin {
                return Ok(Step::Continue);
            }

            let Some(msg) = partial.take() else {
                return Ok(Step::Continue);
            };
            let text = match msg.into_text() {
                Ok(text) => text,
                Err(e) => {
                    tracing::info!(error = %e, "rejecting message");
                    let code = match e {
                        MessageError::Binary(_) => CloseReason::DataType,
                        MessageError::Utf8 => CloseReason::DataError,
                    };
                    writer.write_all(&close(code)).await?;
                    return Ok(Step::Closing);
                }
            };
            tracing::info!(len = text.len(), "got text message");

            if closing {
                return Ok(Step::Continue);
            }
            match handler.on_text(text).await {
                WsReply::Nothing => {}
                WsReply::Text(t) => writer.write_all(&DataFrame::<Server>::text(&t).encode()).await?,
                WsReply::TextThenClose(t, code) => {
                    writer.write_all(&DataFrame::<Server>::text(&t).encode()).await?;
                    writer
                        .write_all(&ControlFrame::<Server>::close_with(code, ""))
                        .await?;
                    return Ok(Step::Closing);
                }
                WsReply::Close(code) => {
                    writer
                        .write_all(&ControlFrame::<Server>::close_with(code, ""))
                        .await?;
                    return Ok(Step::Closing);
                }
            }
        }
    }
    Ok(Step::Continue)
}

fn route(method: &str, path: &str, body: &[u8]) -> (u16, Value) {
    match (method, path) {
        ("GET", "/") => (200, json!({"message": "WebSocket server is running!"})),
        ("POST", "/create-game") => create_game(body),
        (_, "/" | "/create-game") => (405, json!({"detail": "Method Not Allowed"})),
        _ => (404, json!({"detail": "Not Found"})),
    }
}

#[derive(Deserialize)]
struct GameCreate {
    owner: String,
    number_people: i64,
}

fn create_game(body: &[u8]) -> (u16, Value) {
    let game: GameCreate = match serde_json::from_slice(body) {
        Ok(game) => game,
        Err(e) => return (422, json!({"detail": e.to_string()})),
    };
    if !(2..=20).contains(&game.number_people) {
        return (422, json!({"detail": "number_people must be 20 >= n > 1"}));
    }

    let game_id = game_id();
    tracing::info!(game_id = %game_id, owner = %game.owner, "created game");
    (
        200,
        json!({
            "game_id": game_id,
            "owner": game.owner,
            "number_people": game.number_people,
        }),
    )
}

fn game_id() -> String {
    let mut rng = rand::rng();
    (0..6)
        .map(|_| char::from(GAME_ID_CHARS[rng.random_range(0..GAME_ID_CHARS.len())]))
        .collect()
}

fn response(status: u16, body: &Value) -> Vec<u8> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        422 => "Unprocessable Entity",
        _ => "",
    };
    let body = body.to_string();
    format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n\
         {body}",
        body.len()
    )
    .into_bytes()
}
