use std::{marker::PhantomData, ops::Deref};

use bytes::{Bytes, BytesMut};

use super::Opcode;
use crate::{MAX_FRAME_PAYLOAD, MAX_MESSAGE_SIZE, role::RolePolicy};

type Result<T> = std::result::Result<T, FrameParseError>;

#[derive(Debug)]
pub(crate) struct DecodedFrame {
    pub(crate) opcode: Opcode,
    pub(crate) payload: Bytes,
    pub(crate) is_fin: bool,
}

#[derive(Debug)]
pub(crate) enum FrameState {
    Complete(DecodedFrame),
    Incomplete,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FrameParseError {
    ProtoError(&'static str),
    SizeErr,
}

impl std::fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProtoError(why) => write!(f, "protocol violation: {why}"),
            Self::SizeErr => f.write_str("frame exceeded maximum size"),
        }
    }
}

/// Incremental frame decoder: push raw socket bytes in, pull frames out.
pub(crate) struct FrameDecoder<R: RolePolicy> {
    buf: BytesMut,
    state: DecodeState,
    ctx: DecodeContext,
    _p: PhantomData<R>,
}

#[derive(Debug)]
enum DecodeState {
    Header1,
    Header2,
    ExtendedLen,
    Mask,
    Payload,
}

#[derive(Debug)]
struct DecodeContext {
    is_fin: bool,
    opcode: Opcode,
    payload_len: usize,
    mask_key: [u8; 4],
}

impl DecodeContext {
    fn empty() -> Self {
        Self {
            is_fin: false,
            opcode: Opcode::Cont,
            payload_len: 0,
            mask_key: [0; 4],
        }
    }
}

impl<R: RolePolicy> FrameDecoder<R> {
    pub(crate) fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(MAX_FRAME_PAYLOAD),
            state: DecodeState::Header1,
            ctx: DecodeContext::empty(),
            _p: PhantomData,
        }
    }

    pub(crate) fn push_bytes(&mut self, bytes: &[u8]) { self.buf.extend_from_slice(bytes); }

    /// `Ok(None)` means the buffer is drained at a frame boundary.
    pub(crate) fn next_frame(&mut self) -> Result<Option<FrameState>> {
        loop {
            let next_state = match self.state {
                DecodeState::Header1 => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let b = self.buf.split_to(1)[0];
                    self.parse_header1(b)?
                }
                DecodeState::Header2 => match self.parse_header2()? {
                    Some(state) => state,
                    None => return Ok(Some(FrameState::Incomplete)),
                },
                DecodeState::ExtendedLen => match self.parse_extended_len()? {
                    Some(state) => state,
                    None => return Ok(Some(FrameState::Incomplete)),
                },
                DecodeState::Mask => {
                    let Some(key) = self.pop_n() else {
                        return Ok(Some(FrameState::Incomplete));
                    };
                    self.ctx.mask_key = key;
                    DecodeState::Payload
                }
                DecodeState::Payload => {
                    let Some(payload) = self.parse_payload()? else {
                        return Ok(Some(FrameState::Incomplete));
                    };
                    self.state = DecodeState::Header1;

                    tracing::trace!(
                        opcode = ?self.ctx.opcode,
                        fin = self.ctx.is_fin,
                        payload_len = payload.len(),
                        "frame decoded"
                    );
                    return Ok(Some(FrameState::Complete(DecodedFrame {
                        opcode: self.ctx.opcode,
                        payload: payload.freeze(),
                        is_fin: self.ctx.is_fin,
                    })));
                }
            };
            self.state = next_state;
        }
    }

    fn parse_header1(&mut self, b: u8) -> Result<DecodeState> {
        // 0   | 1 2 3 | 4 5 6 7
        // Fin | Rsv   | Opcode
        if b & 0b0111_0000 != 0 {
            return Err(FrameParseError::ProtoError("reserved bits set"));
        }

        self.ctx = DecodeContext {
            is_fin: b & 0b1000_0000 != 0,
            opcode: Opcode::try_from(b & 0b1111)
                .map_err(|()| FrameParseError::ProtoError("unknown opcode"))?,
            ..DecodeContext::empty()
        };

        Ok(DecodeState::Header2)
    }

    fn parse_header2(&mut self) -> Result<Option<DecodeState>> {
        // 0    | 1 2 3 4 5 6 7
        // Mask | Payload len
        if self.buf.is_empty() {
            return Ok(None);
        }

        let b = self.buf.split_to(1)[0];
        let masked = b & 0b1000_0000 != 0;
        // only frames sent by clients are masked
        if R::SERVER != masked {
            return Err(FrameParseError::ProtoError("frame masking violates role"));
        }

        self.ctx.payload_len = usize::from(b & 0b0111_1111);

        if self.ctx.opcode.is_control() && (!self.ctx.is_fin || self.ctx.payload_len > 125) {
            return Err(FrameParseError::ProtoError("invalid control frame"));
        }

        Ok(Some(if self.ctx.payload_len > 125 {
            DecodeState::ExtendedLen
        } else {
            self.after_len()
        }))
    }

    fn parse_extended_len(&mut self) -> Result<Option<DecodeState>> {
        self.ctx.payload_len = if self.ctx.payload_len == 126 {
            let Some(len_bytes) = self.pop_n() else {
                return Ok(None);
            };
            usize::from(u16::from_be_bytes(len_bytes))
        } else {
            let Some(len_bytes) = self.pop_n() else {
                return Ok(None);
            };
            usize::try_from(u64::from_be_bytes(len_bytes)).map_err(|_| FrameParseError::SizeErr)?
        };

        if self.ctx.payload_len > Self::max_payload() {
            return Err(FrameParseError::SizeErr);
        }

        Ok(Some(self.after_len()))
    }

    /// Peers may send a whole message as one frame; we only fragment
    /// outbound at `MAX_FRAME_PAYLOAD`.
    fn max_payload() -> usize {
        if R::CLIENT {
            MAX_MESSAGE_SIZE
        } else {
            MAX_FRAME_PAYLOAD
        }
    }

    fn after_len(&self) -> DecodeState {
        if R::SERVER {
            DecodeState::Mask
        } else {
            DecodeState::Payload
        }
    }

    fn parse_payload(&mut self) -> Result<Option<BytesMut>> {
        if self.buf.len() < self.ctx.payload_len {
            return Ok(None);
        }

        let mut payload = self.buf.split_to(self.ctx.payload_len);

        if R::SERVER {
            crate::protocol::mask(&mut payload, self.ctx.mask_key);
        }

        if self.ctx.opcode == Opcode::Close && !is_valid_close_payload(&payload) {
            return Err(FrameParseError::ProtoError("invalid close payload"));
        }

        Ok(Some(payload))
    }

    fn pop_n<const N: usize>(&mut self) -> Option<[u8; N]> {
        if N > self.buf.len() {
            return None;
        }
        self.buf.split_to(N).deref().try_into().ok()
    }
}

fn is_valid_close_payload(bytes: &[u8]) -> bool {
    match bytes.len() {
        0 => true,
        1 => false,
        _ => {
            let code = u16::from_be_bytes([bytes[0], bytes[1]]);
            matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
                && str::from_utf8(&bytes[2..]).is_ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::{collection::vec, prelude::*};

    use super::*;
    use crate::{
        frames::{ControlFrame, DataFrame},
        role::{Client, Server},
    };

    fn opcode_strategy() -> impl Strategy<Value = Opcode> {
        prop_oneof![
            Just(Opcode::Text),
            Just(Opcode::Bin),
            Just(Opcode::Cont),
            Just(Opcode::Ping),
            Just(Opcode::Pong),
        ]
    }

    // unmasked frame as a server would send it
    fn build_frame_bytes(opcode: Opcode, payload: &[u8], fin: bool) -> Vec<u8> {
        #![allow(clippy::cast_possible_truncation)]
        let mut bytes = vec![if fin { 0x80 } else { 0 } | opcode as u8];
        if payload.len() <= 125 {
            bytes.push(payload.len() as u8);
        } else {
            bytes.push(126);
            bytes.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        }
        bytes.extend_from_slice(payload);
        bytes
    }

    fn decode_all<R: RolePolicy>(bytes: &[u8]) -> Vec<DecodedFrame> {
        let mut fd = FrameDecoder::<R>::new();
        fd.push_bytes(bytes);
        let mut frames = vec![];
        while let Ok(Some(FrameState::Complete(frame))) = fd.next_frame() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn client_text_decodes_on_server() {
        let text = "x".repeat(MAX_FRAME_PAYLOAD + 10);
        let frames = decode_all::<Server>(&DataFrame::<Client>::text(&text).encode());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].opcode, Opcode::Text);
        assert!(!frames[0].is_fin);
        assert_eq!(frames[1].opcode, Opcode::Cont);
        assert!(frames[1].is_fin);
        assert_eq!(frames[0].payload.len() + frames[1].payload.len(), text.len());
    }

    #[test]
    fn server_close_decodes_on_client() {
        let frames = decode_all::<Client>(&ControlFrame::<Server>::close_with(1000, "done"));
        assert_eq!(frames[0].opcode, Opcode::Close);
        assert_eq!(&frames[0].payload[..], &[0x03, 0xE8, b'd', b'o', b'n', b'e']);
    }

    #[test]
    fn split_header_is_incomplete() {
        let bytes = build_frame_bytes(Opcode::Text, b"hello", true);
        let mut fd = FrameDecoder::<Client>::new();
        fd.push_bytes(&bytes[..1]);
        assert!(matches!(fd.next_frame(), Ok(Some(FrameState::Incomplete))));
        fd.push_bytes(&bytes[1..4]);
        assert!(matches!(fd.next_frame(), Ok(Some(FrameState::Incomplete))));
        fd.push_bytes(&bytes[4..]);
        match fd.next_frame() {
            Ok(Some(FrameState::Complete(frame))) => assert_eq!(&frame.payload[..], b"hello"),
            other => panic!("expected frame, got {other:?}"),
        }
        assert!(matches!(fd.next_frame(), Ok(None)));
    }

    #[test]
    fn client_accepts_large_unfragmented_frame() {
        let text = "y".repeat(40 * 1024);
        let frames = decode_all::<Client>(&build_frame_bytes(Opcode::Text, text.as_bytes(), true));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.len(), text.len());

        let mut header = vec![0x81, 127];
        header.extend_from_slice(&(MAX_MESSAGE_SIZE as u64 + 1).to_be_bytes());
        let mut fd = FrameDecoder::<Client>::new();
        fd.push_bytes(&header);
        assert_eq!(fd.next_frame().unwrap_err(), FrameParseError::SizeErr);
    }

    #[test]
    fn masked_frame_rejected_by_client() {
        let bytes = DataFrame::<Client>::text("hi").encode();
        let mut fd = FrameDecoder::<Client>::new();
        fd.push_bytes(&bytes);
        assert!(matches!(fd.next_frame(), Err(FrameParseError::ProtoError(_))));
    }

    #[test]
    fn bad_close_code_is_rejected() {
        let mut fd = FrameDecoder::<Client>::new();
        fd.push_bytes(&[0x88, 0x02, 0x03, 0xED]); // 1005 must never be sent
        assert!(matches!(fd.next_frame(), Err(FrameParseError::ProtoError(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        #[test]
        fn decoder_handles_random_frames(
            opcode in opcode_strategy(),
            fin in any::<bool>(),
            payload in vec(any::<u8>(), 0..=1024),
        ) {
            let payload = if opcode.is_control() { &payload[..payload.len().min(125)] } else { &payload[..] };
            let fin = fin || opcode.is_control();
            let frames = decode_all::<Client>(&build_frame_bytes(opcode, payload, fin));
            prop_assert_eq!(frames.len(), 1);
            prop_assert_eq!(&frames[0].payload[..], payload);
            prop_assert_eq!(frames[0].opcode, opcode);
            prop_assert_eq!(frames[0].is_fin, fin);
        }

        #[test]
        fn fuzz_decoder(buf in vec(any::<u8>(), 0..2048)) {
            let mut fd = FrameDecoder::<Client>::new();
            fd.push_bytes(&buf);
            while let Ok(Some(FrameState::Complete(_))) = fd.next_frame() {}
        }
    }
}
