/// A message whose fragments are still arriving.
#[derive(Debug)]
pub(crate) enum PartialMessage {
    Text(Vec<u8>),
    Binary(Vec<u8>),
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum MessageError {
    /// The probe only reports text; binary payloads are rejected.
    Binary(usize),
    Utf8,
}

impl PartialMessage {
    pub(crate) fn push_bytes(&mut self, bytes: &[u8]) {
        match self {
            Self::Text(v) | Self::Binary(v) => v.extend_from_slice(bytes),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Text(v) | Self::Binary(v) => v.len(),
        }
    }

    pub(crate) fn into_text(self) -> Result<String, MessageError> {
        match self {
            Self::Text(v) => String::from_utf8(v).map_err(|_| MessageError::Utf8),
            Self::Binary(v) => Err(MessageError::Binary(v.len())),
        }
    }
}

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binary(n) => write!(f, "received binary message of {n} bytes"),
            Self::Utf8 => f.write_str("text message is not valid UTF-8"),
        }
    }
}
