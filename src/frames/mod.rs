mod control;
mod data;
mod decode;
mod header;
mod opcode;

pub(crate) use control::ControlFrame;
pub(crate) use data::DataFrame;
pub(crate) use decode::{DecodedFrame, FrameDecoder, FrameParseError, FrameState};
pub(crate) use opcode::Opcode;
