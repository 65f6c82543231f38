//! Messages sent by clients (frontend to backend).
//!
//! The proxy understands a closed set of message kinds. Everything else is
//! kept as a [`RawFrame`] in [`FrontendMessage::Passthrough`] and relayed
//! verbatim to the primary.

use bytes::{BufMut, BytesMut};

use crate::buf::{begin, finish, put_cstr, Reader};
use crate::error::ProtocolError;
use crate::frame::RawFrame;
use crate::{CANCEL_REQUEST_CODE, GSSENC_REQUEST_CODE, PROTOCOL_VERSION, SSL_REQUEST_CODE};

/// Parameters of a StartupMessage, in the order the client sent them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupMessage {
    pub protocol_version: i32,
    pub parameters: Vec<(String, String)>,
}

impl StartupMessage {
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The requested user name.
    pub fn user(&self) -> Option<&str> {
        self.parameter("user")
    }

    /// The requested database, defaulting to the user name.
    pub fn database(&self) -> Option<&str> {
        self.parameter("database").or_else(|| self.user())
    }
}

/// A decoded client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage {
    /// Connection start, carries `user` and friends.
    Startup(StartupMessage),
    /// Request to switch to TLS.
    SslRequest,
    /// Request to switch to GSSAPI encryption.
    GssEncRequest,
    /// Out-of-band cancellation of a running query.
    CancelRequest { process_id: i32, secret_key: i32 },
    /// Password response to an authentication challenge.
    Password(String),
    /// Simple query.
    Query(String),
    /// Extended protocol: prepare a statement.
    Parse {
        name: String,
        query: String,
        param_types: Vec<u32>,
    },
    /// Extended protocol: describe a statement (`S`) or portal (`P`).
    Describe { target: u8, name: String },
    /// Extended protocol: end of an extended query cycle.
    Sync,
    /// Extended protocol: run a portal.
    Execute { portal: String, max_rows: i32 },
    /// Orderly connection close.
    Terminate,
    /// Any message the proxy does not handle itself.
    Passthrough(RawFrame),
}

impl FrontendMessage {
    /// Short name for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            FrontendMessage::Startup(_) => "StartupMessage",
            FrontendMessage::SslRequest => "SSLRequest",
            FrontendMessage::GssEncRequest => "GSSENCRequest",
            FrontendMessage::CancelRequest { .. } => "CancelRequest",
            FrontendMessage::Password(_) => "PasswordMessage",
            FrontendMessage::Query(_) => "Query",
            FrontendMessage::Parse { .. } => "Parse",
            FrontendMessage::Describe { .. } => "Describe",
            FrontendMessage::Sync => "Sync",
            FrontendMessage::Execute { .. } => "Execute",
            FrontendMessage::Terminate => "Terminate",
            FrontendMessage::Passthrough(_) => "Passthrough",
        }
    }

    /// Decode an untagged startup packet.
    pub(crate) fn from_startup(code: i32, body: &[u8]) -> Result<Self, ProtocolError> {
        match code {
            SSL_REQUEST_CODE => Ok(FrontendMessage::SslRequest),
            GSSENC_REQUEST_CODE => Ok(FrontendMessage::GssEncRequest),
            CANCEL_REQUEST_CODE => {
                let mut r = Reader::new(0, body);
                Ok(FrontendMessage::CancelRequest {
                    process_id: r.i32()?,
                    secret_key: r.i32()?,
                })
            }
            PROTOCOL_VERSION => {
                let mut r = Reader::new(0, body);
                let mut parameters = Vec::new();
                while r.peek().is_some_and(|b| b != 0) {
                    let key = r.cstr()?;
                    let value = r.cstr()?;
                    parameters.push((key, value));
                }
                Ok(FrontendMessage::Startup(StartupMessage {
                    protocol_version: code,
                    parameters,
                }))
            }
            other => Err(ProtocolError::UnsupportedStartup(other)),
        }
    }

    /// Decode a tagged message. `p` is only understood as a password while
    /// `expect_password` is set; afterwards it is passed through like any
    /// other unhandled message.
    pub(crate) fn from_frame(frame: RawFrame, expect_password: bool) -> Result<Self, ProtocolError> {
        let tag = frame.tag();
        let mut r = Reader::new(tag, frame.body());

        let message = match tag {
            b'p' if expect_password => FrontendMessage::Password(r.cstr()?),
            b'Q' => FrontendMessage::Query(r.cstr()?),
            b'P' => {
                let name = r.cstr()?;
                let query = r.cstr()?;
                let count = r.i16()?;
                if count < 0 {
                    return Err(ProtocolError::malformed(tag, "negative parameter count"));
                }
                let mut param_types = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    param_types.push(r.u32()?);
                }
                FrontendMessage::Parse {
                    name,
                    query,
                    param_types,
                }
            }
            b'D' => {
                let target = r.u8()?;
                let name = r.cstr()?;
                FrontendMessage::Describe { target, name }
            }
            b'S' => FrontendMessage::Sync,
            b'E' => {
                let portal = r.cstr()?;
                let max_rows = r.i32()?;
                FrontendMessage::Execute { portal, max_rows }
            }
            b'X' => FrontendMessage::Terminate,
            _ => return Ok(FrontendMessage::Passthrough(frame)),
        };

        Ok(message)
    }
}

// ============================================================================
// Client-side encoders, used for upstream connections
// ============================================================================

/// StartupMessage with the given parameters.
pub fn encode_startup(dst: &mut BytesMut, parameters: &[(&str, &str)]) {
    let len_pos = dst.len();
    dst.put_i32(0);
    dst.put_i32(PROTOCOL_VERSION);
    for (key, value) in parameters {
        put_cstr(dst, key);
        put_cstr(dst, value);
    }
    dst.put_u8(0);
    let len = (dst.len() - len_pos) as i32;
    dst[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
}

/// PasswordMessage (cleartext or MD5 response).
pub fn encode_password(dst: &mut BytesMut, password: &str) {
    let pos = begin(dst, b'p');
    put_cstr(dst, password);
    finish(dst, pos);
}

/// SASLInitialResponse.
pub fn encode_sasl_initial(dst: &mut BytesMut, mechanism: &str, data: &[u8]) {
    let pos = begin(dst, b'p');
    put_cstr(dst, mechanism);
    dst.put_i32(data.len() as i32);
    dst.put_slice(data);
    finish(dst, pos);
}

/// SASLResponse.
pub fn encode_sasl_response(dst: &mut BytesMut, data: &[u8]) {
    let pos = begin(dst, b'p');
    dst.put_slice(data);
    finish(dst, pos);
}

/// Simple Query.
pub fn encode_query(dst: &mut BytesMut, sql: &str) {
    let pos = begin(dst, b'Q');
    put_cstr(dst, sql);
    finish(dst, pos);
}

/// CopyFail, aborting a COPY FROM STDIN.
pub fn encode_copy_fail(dst: &mut BytesMut, reason: &str) {
    let pos = begin(dst, b'f');
    put_cstr(dst, reason);
    finish(dst, pos);
}

/// Terminate.
pub fn encode_terminate(dst: &mut BytesMut) {
    dst.put_u8(b'X');
    dst.put_i32(4);
}

/// SSLRequest, as sent by clients before a StartupMessage.
pub fn encode_ssl_request(dst: &mut BytesMut) {
    dst.put_i32(8);
    dst.put_i32(SSL_REQUEST_CODE);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn frame(bytes: BytesMut) -> RawFrame {
        RawFrame::new(bytes[0], &bytes[5..])
    }

    #[test]
    fn test_startup_parameters() {
        let mut buf = BytesMut::new();
        encode_startup(&mut buf, &[("user", "alice"), ("application_name", "psql")]);

        let body = &buf[8..];
        let msg = FrontendMessage::from_startup(PROTOCOL_VERSION, body).unwrap();
        let FrontendMessage::Startup(startup) = msg else {
            panic!("expected startup message");
        };
        assert_eq!(startup.user(), Some("alice"));
        assert_eq!(startup.database(), Some("alice"));
        assert_eq!(startup.parameter("application_name"), Some("psql"));
    }

    #[test]
    fn test_unknown_startup_code() {
        assert!(matches!(
            FrontendMessage::from_startup(12345, &[]),
            Err(ProtocolError::UnsupportedStartup(12345))
        ));
    }

    #[test]
    fn test_parse_message() {
        let mut body = BytesMut::new();
        put_cstr(&mut body, "s1");
        put_cstr(&mut body, "SELECT $1");
        body.put_i16(1);
        body.put_u32(23);
        let msg = FrontendMessage::from_frame(RawFrame::new(b'P', &body), false).unwrap();
        assert_eq!(
            msg,
            FrontendMessage::Parse {
                name: "s1".to_string(),
                query: "SELECT $1".to_string(),
                param_types: vec![23],
            }
        );
    }

    #[test]
    fn test_password_only_while_expected() {
        let mut buf = BytesMut::new();
        encode_password(&mut buf, "md5abc");

        let msg = FrontendMessage::from_frame(frame(buf.clone()), true).unwrap();
        assert_eq!(msg, FrontendMessage::Password("md5abc".to_string()));

        let msg = FrontendMessage::from_frame(frame(buf), false).unwrap();
        assert!(matches!(msg, FrontendMessage::Passthrough(f) if f.tag() == b'p'));
    }

    #[test]
    fn test_unknown_tag_is_passthrough_with_raw_bytes() {
        let raw = RawFrame::new(b'B', b"\0\0\0\0\0\0\0");
        let msg = FrontendMessage::from_frame(raw.clone(), false).unwrap();
        assert_eq!(msg, FrontendMessage::Passthrough(raw));
    }

    #[test]
    fn test_truncated_execute_is_malformed() {
        let msg = FrontendMessage::from_frame(RawFrame::new(b'E', b"\0\0\0"), false);
        assert!(matches!(msg, Err(ProtocolError::Malformed { tag: 'E', .. })));
    }
}
