/// Close status codes as specified in
/// [RFC 6455](https://www.rfc-editor.org/rfc/rfc6455.html#section-7.4)
#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Normal close
    Normal = 1000,
    /// Going away
    GoingAway = 1001,
    /// Websocket protocol violation
    ProtoError = 1002,
    /// Unsupported data type
    DataType = 1003,
    /// No status code present in the close frame
    NoneGiven = 1005,
    /// Connection dropped without a close frame
    Abnormal = 1006,
    /// Invalid UTF-8 in Text message
    DataError = 1007,
    /// Generic policy violation
    Policy = 1008,
    /// Messages are too big
    TooBig = 1009,
    /// Unexpected condition on the peer
    Unexpected = 1011,
}

impl CloseReason {
    #[must_use]
    pub fn code(self) -> u16 { self as u16 }
}

/// Splits a close frame payload into its status code and reason text.
///
/// An empty payload carries no status, which is reported as 1005.
pub(crate) fn parse_close_payload(payload: &[u8]) -> (u16, String) {
    match payload {
        [hi, lo, rest @ ..] => (
            u16::from_be_bytes([*hi, *lo]),
            String::from_utf8_lossy(rest).into_owned(),
        ),
        _ => (CloseReason::NoneGiven.code(), String::new()),
    }
}

/// Builds a close frame payload, truncating `text` to fit a control frame.
pub(crate) fn close_payload(code: u16, text: &str) -> Vec<u8> {
    // control payloads are at most 125 bytes, 2 of which are the code
    let mut len = text.len().min(123);
    while !text.is_char_boundary(len) {
        len -= 1;
    }
    let mut payload = Vec::with_capacity(2 + len);
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(&text.as_bytes()[..len]);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_close_payload_has_no_status() {
        assert_eq!(parse_close_payload(&[]), (1005, String::new()));
    }

    #[test]
    fn close_payload_round_trips_code_and_reason() {
        let payload = close_payload(CloseReason::Normal.code(), "bye");
        assert_eq!(payload, [0x03, 0xE8, b'b', b'y', b'e']);
        assert_eq!(parse_close_payload(&payload), (1000, "bye".to_string()));
    }

    #[test]
    fn long_reason_is_cut_on_char_boundary() {
        let text = "é".repeat(100);
        let payload = close_payload(1000, &text);
        assert!(payload.len() <= 125);
        assert!(str::from_utf8(&payload[2..]).is_ok());
    }
}
