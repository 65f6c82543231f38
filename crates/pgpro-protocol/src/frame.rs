//! Raw message framing.
//!
//! A [`RawFrame`] is one complete message exactly as it appeared on the wire,
//! tag and length prefix included.

use bytes::{Buf, Bytes, BytesMut};

use crate::MAX_MESSAGE_LEN;
use crate::error::ProtocolError;

/// One complete tagged message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    tag: u8,
    bytes: Bytes,
}

impl RawFrame {
    /// Build a frame from a tag and a body.
    pub fn new(tag: u8, body: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(body.len() + 5);
        buf.extend_from_slice(&[tag]);
        buf.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
        buf.extend_from_slice(body);
        Self {
            tag,
            bytes: buf.freeze(),
        }
    }

    /// Message type byte.
    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// The whole frame, tag and length included.
    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    /// The message body after the tag and length.
    pub fn body(&self) -> &[u8] {
        &self.bytes[5..]
    }
}

/// Split one tagged frame off the front of `src`, if it is complete.
pub(crate) fn split_tagged(src: &mut BytesMut) -> Result<Option<RawFrame>, ProtocolError> {
    if src.len() < 5 {
        return Ok(None);
    }

    let tag = src[0];
    let len = i32::from_be_bytes([src[1], src[2], src[3], src[4]]);
    if len < 4 || len as usize > MAX_MESSAGE_LEN {
        return Err(ProtocolError::InvalidLength {
            tag: tag as char,
            len: len as i64,
        });
    }

    let total = len as usize + 1;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    let bytes = src.split_to(total).freeze();
    Ok(Some(RawFrame { tag, bytes }))
}

/// Split one untagged startup packet off the front of `src`.
///
/// Returns the request code and the remaining body.
pub(crate) fn split_startup(src: &mut BytesMut) -> Result<Option<(i32, Bytes)>, ProtocolError> {
    if src.len() < 4 {
        return Ok(None);
    }

    let len = i32::from_be_bytes([src[0], src[1], src[2], src[3]]);
    if len < 8 || len as usize > MAX_MESSAGE_LEN {
        return Err(ProtocolError::InvalidLength {
            tag: '\0',
            len: len as i64,
        });
    }

    let len = len as usize;
    if src.len() < len {
        src.reserve(len - src.len());
        return Ok(None);
    }

    let mut packet = src.split_to(len);
    packet.advance(4);
    let code = packet.get_i32();
    Ok(Some((code, packet.freeze())))
}
