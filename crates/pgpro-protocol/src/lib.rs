//! # pgpro-protocol
//!
//! PostgreSQL v3 frontend/backend protocol, as much of it as a proxy needs.
//!
//! - [`codec::ServerCodec`] frames client traffic into [`FrontendMessage`]s and
//!   encodes [`BackendMessage`]s back to the client.
//! - [`codec::ClientCodec`] frames upstream server traffic into [`RawFrame`]s;
//!   [`backend`] parses the ones the proxy needs to understand.
//! - [`auth`] holds the MD5 password scheme and a SCRAM-SHA-256 client.
//!
//! Every frame keeps its raw bytes so unrecognized messages can be relayed
//! without re-encoding.

pub mod auth;
pub mod backend;
mod buf;
pub mod codec;
pub mod error;
pub mod frame;
pub mod frontend;

pub use backend::{BackendMessage, TransactionStatus};
pub use codec::{ClientCodec, CodecState, ServerCodec};
pub use error::ProtocolError;
pub use frame::RawFrame;
pub use frontend::{FrontendMessage, StartupMessage};

/// Protocol version 3.0 as sent in a StartupMessage.
pub const PROTOCOL_VERSION: i32 = 196_608;
/// Special "protocol version" of an SSLRequest.
pub const SSL_REQUEST_CODE: i32 = 80_877_103;
/// Special "protocol version" of a GSSENCRequest.
pub const GSSENC_REQUEST_CODE: i32 = 80_877_104;
/// Special "protocol version" of a CancelRequest.
pub const CANCEL_REQUEST_CODE: i32 = 80_877_102;

/// Upper bound on a single message, startup included.
pub const MAX_MESSAGE_LEN: usize = 1 << 30;
