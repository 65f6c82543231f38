//! `tokio_util` codecs for both sides of the proxy.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::backend::BackendMessage;
use crate::error::ProtocolError;
use crate::frame::{split_startup, split_tagged, RawFrame};
use crate::frontend::FrontendMessage;

/// Where a client connection is in its lifecycle, as far as framing goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecState {
    /// Untagged startup packets (StartupMessage, SSLRequest, ...).
    Startup,
    /// Tagged messages; `p` is a password response.
    Authentication,
    /// Tagged messages; `p` is passed through.
    Ready,
}

/// Codec for the client-facing side: decodes frontend messages, encodes
/// backend messages.
///
/// The codec leaves the startup state on its own once a StartupMessage has
/// been decoded. Encryption and cancel requests keep it in the startup state,
/// since the client starts over after them.
#[derive(Debug, Clone)]
pub struct ServerCodec {
    state: CodecState,
}

impl ServerCodec {
    pub fn new() -> Self {
        Self {
            state: CodecState::Startup,
        }
    }

    pub fn state(&self) -> CodecState {
        self.state
    }

    /// Called by the session once authentication has completed.
    pub fn set_ready(&mut self) {
        self.state = CodecState::Ready;
    }
}

impl Default for ServerCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ServerCodec {
    type Item = FrontendMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.state {
            CodecState::Startup => {
                let Some((code, body)) = split_startup(src)? else {
                    return Ok(None);
                };
                let message = FrontendMessage::from_startup(code, &body)?;
                if matches!(message, FrontendMessage::Startup(_)) {
                    self.state = CodecState::Authentication;
                }
                Ok(Some(message))
            }
            CodecState::Authentication | CodecState::Ready => {
                let Some(frame) = split_tagged(src)? else {
                    return Ok(None);
                };
                trace!(tag = %(frame.tag() as char), len = frame.as_bytes().len(), "Decoded frame");
                FrontendMessage::from_frame(frame, self.state == CodecState::Authentication)
                    .map(Some)
            }
        }
    }
}

impl Encoder<BackendMessage> for ServerCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: BackendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        msg.encode(dst);
        Ok(())
    }
}

/// Codec for upstream connections: decodes raw backend frames, writes
/// pre-encoded frontend bytes.
#[derive(Debug, Clone, Default)]
pub struct ClientCodec;

impl Decoder for ClientCodec {
    type Item = RawFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        split_tagged(src)
    }
}

impl Encoder<Bytes> for ClientCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}
