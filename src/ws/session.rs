use std::{pin::Pin, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::mpsc::{self, UnboundedSender},
    task::JoinHandle,
    time::{Instant, Sleep},
};

use super::handshake;
use crate::{
    CloseReason, MAX_FRAME_PAYLOAD, MAX_MESSAGE_SIZE,
    error::parse_close_payload,
    frames::{ControlFrame, DataFrame, DecodedFrame, FrameDecoder, FrameParseError, FrameState, Opcode},
    outcome::{ProbeFailure, ProbeOutcome, Stage, WsEvent, WsSessionLog},
    probe::ProbeOptions,
    protocol::{MessageError, PartialMessage},
    request::WsProbeRequest,
    role::Client,
    transport::{Conn, Connector, Deadline, Endpoint},
};

/// How long to wait for the peer to answer our close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// A running WebSocket probe.
///
/// Events arrive in order through [`WsSession::recv`]; the session ends
/// after exactly one `Closed` or `ErrorOccurred`. Dropping the session
/// aborts it and releases the connection.
pub struct WsSession {
    events: mpsc::UnboundedReceiver<WsEvent>,
    close_tx: mpsc::Sender<()>,
    task: Option<JoinHandle<Result<WsSessionLog, ProbeFailure>>>,
}

impl WsSession {
    pub(crate) fn spawn(
        connector: Arc<dyn Connector>,
        req: WsProbeRequest,
        options: ProbeOptions,
    ) -> Self {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = mpsc::channel(1);
        let driver = Driver {
            event_tx,
            log: vec![],
            deadline: Deadline::after(options.timeout),
            linger: options.linger,
        };
        let task = tokio::spawn(driver.run(connector, req, close_rx));
        Self {
            events,
            close_tx,
            task: Some(task),
        }
    }

    /// Next event, or `None` once the session has ended and all events
    /// were delivered.
    pub async fn recv(&mut self) -> Option<WsEvent> { self.events.recv().await }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<WsEvent> {
        tokio::time::timeout(timeout, self.events.recv())
            .await
            .unwrap_or_default()
    }

    /// Asks an open session to close normally. No effect once closing.
    pub fn close(&self) { let _ = self.close_tx.try_send(()); }

    /// Stops the session immediately, dropping the connection.
    pub fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    /// Waits for the session to end.
    pub async fn outcome(mut self) -> ProbeOutcome {
        let Some(task) = self.task.take() else {
            return ProbeFailure::new(Stage::Receive, "session already finished").into();
        };
        match task.await {
            Ok(res) => res.into(),
            Err(e) if e.is_cancelled() => ProbeFailure::new(Stage::Receive, "aborted").into(),
            Err(e) => ProbeFailure::new(Stage::Receive, e.to_string()).into(),
        }
    }
}

impl Drop for WsSession {
    fn drop(&mut self) { self.abort(); }
}

/// How the open state ended without failing.
type CloseStatus = (u16, String);

enum Flow {
    Continue,
    Closed(CloseStatus),
}

struct Driver {
    event_tx: UnboundedSender<WsEvent>,
    log: Vec<WsEvent>,
    deadline: Deadline,
    linger: Option<Duration>,
}

/// Everything owned while the connection is open.
struct Open {
    reader: ReadHalf<Box<dyn Conn>>,
    writer: WriteHalf<Box<dyn Conn>>,
    decoder: FrameDecoder<Client>,
    partial: Option<PartialMessage>,
    closing: bool,
    idle: Option<Pin<Box<Sleep>>>,
}

impl Driver {
    fn emit(&mut self, event: WsEvent) {
        tracing::debug!(event = ?event, "ws event");
        let _ = self.event_tx.send(event.clone());
        self.log.push(event);
    }

    async fn run(
        mut self,
        connector: Arc<dyn Connector>,
        req: WsProbeRequest,
        close_rx: mpsc::Receiver<()>,
    ) -> Result<WsSessionLog, ProbeFailure> {
        let connect_err = |e: String| ProbeFailure::new(Stage::Connect, e);

        let endpoint = Endpoint::from_url(&req.url).map_err(connect_err)?;
        let conn = self
            .deadline
            .run(Stage::Connect, connector.connect(&endpoint))
            .await?
            .map_err(|e| connect_err(e.to_string()))?;
        let (conn, leftover) = self
            .deadline
            .run(Stage::Connect, handshake::upgrade(conn, &endpoint))
            .await?
            .map_err(|e| connect_err(e.to_string()))?;

        self.emit(WsEvent::Opened);

        let (reader, writer) = tokio::io::split(conn);
        let mut decoder = FrameDecoder::new();
        decoder.push_bytes(&leftover);
        let mut open = Open {
            reader,
            writer,
            decoder,
            partial: None,
            closing: false,
            idle: self.linger.map(|d| Box::pin(tokio::time::sleep(d))),
        };

        match self.open(&mut open, &req.initial_message, close_rx).await {
            Ok((code, reason)) => {
                tracing::info!(code, reason = %reason, "websocket closed");
                self.emit(WsEvent::Closed { code, reason });
                Ok(WsSessionLog { events: self.log })
            }
            Err(failure) => {
                tracing::warn!(stage = %failure.stage, message = %failure.message, "websocket failed");
                self.emit(WsEvent::ErrorOccurred {
                    message: failure.message.clone(),
                });
                Err(failure)
            }
        }
    }

    async fn open(
        &mut self,
        open: &mut Open,
        initial_message: &str,
        mut close_rx: mpsc::Receiver<()>,
    ) -> Result<CloseStatus, ProbeFailure> {
        let frame = DataFrame::<Client>::text(initial_message).encode();
        self.deadline
            .run(Stage::Receive, open.send(&frame))
            .await??;

        let mut buf = vec![0; MAX_FRAME_PAYLOAD];
        let mut close_live = true;
        loop {
            if let Flow::Closed(status) = self.drain_frames(open).await? {
                return Ok(status);
            }

            tokio::select! {
                n = open.reader.read(&mut buf) => match n {
                    Ok(0) => {
                        tracing::info!("TCP FIN without close frame");
                        return Ok((CloseReason::Abnormal.code(), String::new()));
                    }
                    Ok(n) => {
                        tracing::trace!(bytes = n, "read socket");
                        open.decoder.push_bytes(&buf[..n]);
                    }
                    Err(e) => return Err(ProbeFailure::new(Stage::Receive, e.to_string())),
                },
                req = close_rx.recv(), if close_live && !open.closing => match req {
                    Some(()) => {
                        tracing::info!("close requested by caller");
                        open.start_close().await?;
                    }
                    None => close_live = false,
                },
                () = idle_expired(&mut open.idle) => {
                    if open.closing {
                        tracing::warn!("peer did not answer close frame");
                        return Ok((CloseReason::Abnormal.code(), "close handshake timed out".into()));
                    }
                    tracing::info!(linger = ?self.linger, "idle, closing");
                    open.start_close().await?;
                }
                () = self.deadline.expired() => return Err(ProbeFailure::timeout(Stage::Receive)),
            }
        }
    }

    async fn drain_frames(&mut self, open: &mut Open) -> Result<Flow, ProbeFailure> {
        loop {
            match open.decoder.next_frame() {
                Ok(Some(FrameState::Complete(frame))) => {
                    if let Flow::Closed(status) = self.handle_frame(open, &frame).await? {
                        return Ok(Flow::Closed(status));
                    }
                }
                Ok(Some(FrameState::Incomplete) | None) => return Ok(Flow::Continue),
                Err(e) => {
                    let code = match e {
                        FrameParseError::ProtoError(_) => CloseReason::ProtoError,
                        FrameParseError::SizeErr => CloseReason::TooBig,
                    };
                    let _ = open.send(&ControlFrame::<Client>::close_with(code.code(), "")).await;
                    return Err(ProbeFailure::new(Stage::Receive, e.to_string()));
                }
            }
        }
    }

    async fn handle_frame(
        &mut self,
        open: &mut Open,
        frame: &DecodedFrame,
    ) -> Result<Flow, ProbeFailure> {
        match frame.opcode {
            Opcode::Ping => {
                if !open.closing {
                    open.send(&ControlFrame::<Client>::pong(&frame.payload).encode())
                        .await?;
                }
            }
            Opcode::Pong => tracing::debug!("unsolicited PONG"),
            Opcode::Close => {
                let (code, reason) = parse_close_payload(&frame.payload);
                tracing::info!(code, reason = %reason, "received Close frame");
                if !open.closing {
                    // echo the status back, an empty close stays empty
                    let echo = ControlFrame::<Client>::close(&frame.payload[..frame.payload.len().min(2)]);
                    let _ = open.send(&echo.encode()).await;
                }
                return Ok(Flow::Closed((code, reason)));
            }
            Opcode::Text | Opcode::Bin | Opcode::Cont => {
                if let Some(text) = open.assemble(frame).await? {
                    self.emit(WsEvent::MessageReceived { text });
                    if let (false, Some(idle), Some(linger)) =
                        (open.closing, open.idle.as_mut(), self.linger)
                    {
                        idle.as_mut().reset(Instant::now() + linger);
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }
}

impl Open {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), ProbeFailure> {
        let send_err = |e: std::io::Error| ProbeFailure::new(Stage::Send, e.to_string());
        self.writer.write_all(bytes).await.map_err(send_err)?;
        self.writer.flush().await.map_err(send_err)
    }

    async fn start_close(&mut self) -> Result<(), ProbeFailure> {
        self.closing = true;
        self.send(&ControlFrame::<Client>::close_with(CloseReason::Normal.code(), ""))
            .await?;
        // wait a bounded time for the peer's close frame
        self.idle = Some(Box::pin(tokio::time::sleep(CLOSE_GRACE)));
        Ok(())
    }

    /// Feeds a data frame into the current message, returning the text
    /// once the final fragment arrives.
    async fn assemble(&mut self, frame: &DecodedFrame) -> Result<Option<String>, ProbeFailure> {
        let partial = match (self.partial.as_mut(), frame.opcode) {
            (None, Opcode::Text) => self.partial.insert(PartialMessage::Text(vec![])),
            (None, Opcode::Bin) => self.partial.insert(PartialMessage::Binary(vec![])),
            (Some(p), Opcode::Cont) => p,
            _ => {
                let _ = self
                    .send(&ControlFrame::<Client>::close_with(
                        CloseReason::ProtoError.code(),
                        "Unexpected frame",
                    ))
                    .await;
                return Err(ProbeFailure::new(
                    Stage::Receive,
                    format!("protocol violation: unexpected {:?} frame", frame.opcode),
                ));
            }
        };

        if partial.len() + frame.payload.len() > MAX_MESSAGE_SIZE {
            let _ = self
                .send(&ControlFrame::<Client>::close_with(
                    CloseReason::TooBig.code(),
                    "Message exceeded maximum size",
                ))
                .await;
            return Err(ProbeFailure::new(Stage::Receive, "message exceeded maximum size"));
        }
        partial.push_bytes(&frame.payload);

        if !frame.is_fin {
            return Ok(None);
        }
        let Some(msg) = self.partial.take() else {
            return Ok(None);
        };
        match msg.into_text() {
            Ok(text) => Ok(Some(text)),
            Err(e) => {
                let code = match e {
                    MessageError::Binary(_) => CloseReason::DataType,
                    MessageError::Utf8 => CloseReason::DataError,
                };
                let _ = self
                    .send(&ControlFrame::<Client>::close_with(code.code(), ""))
                    .await;
                Err(ProbeFailure::new(Stage::Decode, e.to_string()))
            }
        }
    }
}

/// Resolves when the idle timer fires, never if there is none.
async fn idle_expired(idle: &mut Option<Pin<Box<Sleep>>>) {
    match idle {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
