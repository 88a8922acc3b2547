use std::marker::PhantomData;

use super::{Opcode, header::write_frame};
use crate::{MAX_FRAME_PAYLOAD, role::RolePolicy};

// Data frames are split into chunks of at most MAX_FRAME_PAYLOAD bytes.
pub(crate) struct DataFrame<'a, R: RolePolicy> {
    opcode: Opcode,
    payload: &'a [u8],
    _p: PhantomData<R>,
}

impl<'a, R: RolePolicy> DataFrame<'a, R> {
    pub(crate) fn text(text: &'a str) -> Self {
        Self {
            opcode: Opcode::Text,
            payload: text.as_bytes(),
            _p: PhantomData,
        }
    }

    /// Encodes the whole message, fragmenting it when needed, into one buffer.
    pub(crate) fn encode(self) -> Vec<u8> {
        let chunks = self.payload.len().div_ceil(MAX_FRAME_PAYLOAD).max(1);
        let mut buf = Vec::with_capacity(self.payload.len() + chunks * 14);

        if self.payload.is_empty() {
            write_frame::<R>(&mut buf, self.opcode, true, &[]);
        } else {
            let mut iter = self.payload.chunks(MAX_FRAME_PAYLOAD).peekable();
            let mut opcode = self.opcode;
            while let Some(chunk) = iter.next() {
                write_frame::<R>(&mut buf, opcode, iter.peek().is_none(), chunk);
                opcode = Opcode::Cont;
            }
        }

        tracing::debug!(
            len = self.payload.len(),
            frames = chunks,
            client = R::CLIENT,
            "encoded DATA"
        );
        buf
    }
}
