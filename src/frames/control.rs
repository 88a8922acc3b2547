use std::marker::PhantomData;

use super::{Opcode, header::write_frame};
use crate::{error::close_payload, role::RolePolicy};

// Control frames are never fragmented and carry at most 125 bytes.
pub(crate) struct ControlFrame<'a, R: RolePolicy> {
    opcode: Opcode,
    payload: &'a [u8],
    _p: PhantomData<R>,
}

impl<'a, R: RolePolicy> ControlFrame<'a, R> {
    fn new(opcode: Opcode, payload: &'a [u8]) -> Self {
        Self {
            opcode,
            payload: &payload[..payload.len().min(125)],
            _p: PhantomData,
        }
    }

    pub(crate) fn pong(payload: &'a [u8]) -> Self { Self::new(Opcode::Pong, payload) }

    pub(crate) fn close(payload: &'a [u8]) -> Self { Self::new(Opcode::Close, payload) }

    /// Encoded close frame carrying `code` and `text`.
    pub(crate) fn close_with(code: u16, text: &str) -> Vec<u8> {
        ControlFrame::<R>::close(&close_payload(code, text)).encode()
    }

    pub(crate) fn encode(self) -> Vec<u8> {
        tracing::trace!(
            opcode = ?self.opcode,
            len = self.payload.len(),
            "encoding CTRL"
        );
        let mut buf = Vec::with_capacity(self.payload.len() + 6);
        write_frame::<R>(&mut buf, self.opcode, true, self.payload);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::{Client, Server};

    #[test]
    fn server_close_is_unmasked() {
        let bytes = ControlFrame::<Server>::close_with(1000, "");
        assert_eq!(bytes, [0x88, 0x02, 0x03, 0xE8]);
    }

    #[test]
    fn client_pong_is_masked() {
        let bytes = ControlFrame::<Client>::pong(b"hi").encode();
        assert_eq!(bytes[0], 0x8A);
        assert_eq!(bytes[1], 0x80 | 2);
        assert_eq!(bytes.len(), 2 + 4 + 2);
    }
}
