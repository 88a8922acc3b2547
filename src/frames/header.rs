use crate::role::RolePolicy;

use super::Opcode;

/// Writes one complete frame into `buf`, masking the payload when the
/// role requires it.
pub(super) fn write_frame<R: RolePolicy>(
    buf: &mut Vec<u8>,
    opcode: Opcode,
    fin: bool,
    payload: &[u8],
) {
    buf.push(if fin { 0x80 } else { 0 } | opcode as u8);

    let mask_bit = if R::CLIENT { 0x80 } else { 0 };
    #[allow(clippy::cast_possible_truncation)]
    match payload.len() {
        0..=125 => buf.push(mask_bit | payload.len() as u8),
        126..=65535 => {
            buf.push(mask_bit | 126);
            buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        }
        _ => {
            buf.push(mask_bit | 127);
            buf.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        }
    }

    // Clients must SEND masked
    if R::CLIENT {
        let mut mask_key = [0u8; 4];
        rand::fill(&mut mask_key);
        buf.extend_from_slice(&mask_key);

        let start = buf.len();
        buf.extend_from_slice(payload);
        crate::protocol::mask(&mut buf[start..], mask_key);
    } else {
        buf.extend_from_slice(payload);
    }
}
