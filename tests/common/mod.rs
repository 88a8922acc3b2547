#![allow(dead_code)]

use std::collections::HashMap;

use base64::engine::{Engine, general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};

pub async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// A port nothing is listening on.
pub async fn refused_port() -> u16 { listener().await.1 }

/// Request line and lowercased headers.
pub async fn read_head<S: AsyncRead + Unpin>(
    reader: &mut BufReader<S>,
) -> (String, HashMap<String, String>) {
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await.unwrap();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    (request_line.trim_end().to_string(), headers)
}

/// Reads one request head and its content-length body.
async fn read_request(
    reader: &mut BufReader<TcpStream>,
) -> (String, HashMap<String, String>, Vec<u8>) {
    let (request_line, headers) = read_head(reader).await;
    let len: usize = headers
        .get("content-length")
        .map_or(0, |v| v.parse().unwrap());
    let mut body = vec![0; len];
    reader.read_exact(&mut body).await.unwrap();
    (request_line, headers, body)
}

/// Accepts one connection and answers its HTTP request by echoing the body.
pub async fn echo_http_once(listener: TcpListener, status: u16) -> String {
    let (stream, _) = listener.accept().await.unwrap();
    let mut reader = BufReader::new(stream);
    let (request_line, _, body) = read_request(&mut reader).await;

    let resp = format!(
        "HTTP/1.1 {status} Whatever\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\r\n",
        body.len()
    );
    let stream = reader.get_mut();
    stream.write_all(resp.as_bytes()).await.unwrap();
    stream.write_all(&body).await.unwrap();
    request_line
}

/// Accepts one connection, reads its request and writes `raw` back verbatim
/// before hanging up.
pub async fn respond_once(listener: TcpListener, raw: Vec<u8>) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut reader = BufReader::new(stream);
    let _ = read_request(&mut reader).await;
    // the client may hang up early on oversized responses
    let _ = reader.get_mut().write_all(&raw).await;
}

/// Accepts one connection and completes the WebSocket handshake.
pub async fn accept_ws(listener: &TcpListener) -> BufReader<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    handshake(stream).await
}

/// Server side of the WebSocket handshake over any stream.
pub async fn handshake<S: AsyncRead + AsyncWrite + Unpin>(stream: S) -> BufReader<S> {
    let mut reader = BufReader::new(stream);
    let (_, headers) = read_head(&mut reader).await;

    let mut hasher = Sha1::new();
    hasher.update(&headers["sec-websocket-key"]);
    hasher.update("258EAFA5-E914-47DA-95CA-C5AB0DC85B11");
    let accept = BASE64.encode(hasher.finalize());

    let resp = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    );
    reader.get_mut().write_all(resp.as_bytes()).await.unwrap();
    reader
}

/// Reads one masked client frame, returning opcode byte and unmasked payload.
pub async fn read_client_frame<S: AsyncRead + Unpin>(reader: &mut BufReader<S>) -> (u8, Vec<u8>) {
    let b0 = reader.read_u8().await.unwrap();
    let b1 = reader.read_u8().await.unwrap();
    assert!(b1 & 0x80 != 0, "client frames must be masked");
    let len = match b1 & 0x7f {
        126 => usize::from(reader.read_u16().await.unwrap()),
        127 => usize::try_from(reader.read_u64().await.unwrap()).unwrap(),
        n => usize::from(n),
    };
    let mut key = [0; 4];
    reader.read_exact(&mut key).await.unwrap();
    let mut payload = vec![0; len];
    reader.read_exact(&mut payload).await.unwrap();
    for (i, b) in payload.iter_mut().enumerate() {
        *b ^= key[i % 4];
    }
    (b0, payload)
}

/// Unmasked server frame.
pub fn server_frame(first_byte: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![first_byte];
    match payload.len() {
        n @ 0..=125 => frame.push(u8::try_from(n).unwrap()),
        n @ 126..=0xFFFF => {
            frame.push(126);
            frame.extend_from_slice(&u16::try_from(n).unwrap().to_be_bytes());
        }
        n => {
            frame.push(127);
            frame.extend_from_slice(&(n as u64).to_be_bytes());
        }
    }
    frame.extend_from_slice(payload);
    frame
}

/// Close frame payload: status code then reason.
pub fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = code.to_be_bytes().to_vec();
    payload.extend_from_slice(reason.as_bytes());
    payload
}
