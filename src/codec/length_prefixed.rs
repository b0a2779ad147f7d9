//! Length-prefixed JSON stream (`application/stream+json`).
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes of
//! JSON. End of input at a frame boundary ends the stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::CodecError;

pub const MIME: &str = "application/stream+json";

const PREFIX_LEN: usize = 4;

pub fn encode_frame(json: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(PREFIX_LEN + json.len());
    frame.put_u32(json.len() as u32);
    frame.put_slice(json);
    frame.freeze()
}

/// Split a buffered body into frame payloads.
pub fn decode_frames(mut body: Bytes) -> Result<Vec<Bytes>, CodecError> {
    let mut frames = Vec::new();
    while body.has_remaining() {
        if body.remaining() < PREFIX_LEN {
            return Err(CodecError::Truncated {
                expected: PREFIX_LEN,
                actual: body.remaining(),
            });
        }
        let len = body.get_u32() as usize;
        if body.remaining() < len {
            return Err(CodecError::Truncated {
                expected: len,
                actual: body.remaining(),
            });
        }
        frames.push(body.split_to(len));
    }
    Ok(frames)
}
