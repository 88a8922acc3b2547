mod mask;
mod message;

pub(crate) use mask::mask;
pub(crate) use message::{MessageError, PartialMessage};
