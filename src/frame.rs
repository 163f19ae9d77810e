//! Frame handling: decode a buffer that holds one or more consecutive messages.
//!
//! A message that decodes but fails validation is removed and decoding continues after it.
//! A message the machine rejects ends the frame: the rest of the buffer is reported as
//! removed, since its extent is unknown.

use crate::codec::{Codec, CodecError};
use crate::engine::Fields;

/// Result of decoding a frame: valid messages and the byte ranges that were dropped.
#[derive(Debug)]
pub struct FrameDecodeResult {
    /// Messages that decoded and passed validation.
    pub messages: Vec<DecodedMessage>,
    /// Byte ranges that were removed (non-compliant or undecodable).
    pub removed: Vec<RemovedMessage>,
}

#[derive(Debug)]
pub struct DecodedMessage {
    pub name: String,
    pub values: Fields,
    pub byte_range: (usize, usize),
}

#[derive(Debug)]
pub struct RemovedMessage {
    pub name: String,
    pub byte_range: (usize, usize),
    pub reason: String,
}

/// Decode consecutive `message_name` messages until the buffer is exhausted, a message
/// fails to decode, or a message matches zero bytes.
pub fn decode_frame(
    codec: &Codec,
    message_name: &str,
    bytes: &[u8],
) -> Result<FrameDecodeResult, CodecError> {
    if codec.machine(message_name).is_none() {
        return Err(CodecError::UnknownMessage(message_name.to_string()));
    }

    let mut messages = Vec::new();
    let mut removed = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let (consumed, result) = codec.decode_message_with_extent(message_name, &bytes[offset..]);
        match result {
            Ok(_) if consumed == 0 => break,
            Ok(values) => {
                messages.push(DecodedMessage {
                    name: message_name.to_string(),
                    values,
                    byte_range: (offset, offset + consumed),
                });
            }
            Err(e @ CodecError::Validation(_)) if consumed > 0 => {
                removed.push(RemovedMessage {
                    name: message_name.to_string(),
                    byte_range: (offset, offset + consumed),
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                removed.push(RemovedMessage {
                    name: message_name.to_string(),
                    byte_range: (offset, bytes.len()),
                    reason: e.to_string(),
                });
                break;
            }
        }
        offset += consumed;
    }

    Ok(FrameDecodeResult { messages, removed })
}
