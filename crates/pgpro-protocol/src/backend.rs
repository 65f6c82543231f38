//! Messages sent by servers (backend to frontend).
//!
//! The proxy plays the server towards its clients, so [`BackendMessage`] is
//! encoded here. It also plays the client towards upstream servers, so the
//! `parse_*` functions decode the server messages it needs to materialize a
//! result.

use bytes::{BufMut, Bytes, BytesMut};
use pgpro_core::{DataRow, DbError, FieldDescriptor};

use crate::buf::{begin, finish, put_cstr, Reader};
use crate::error::ProtocolError;
use crate::frame::RawFrame;

/// Transaction status reported in ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// Not in a transaction block.
    #[default]
    Idle,
    /// In a transaction block.
    InTransaction,
    /// In a failed transaction block.
    Failed,
}

impl TransactionStatus {
    pub fn as_byte(&self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::InTransaction => b'T',
            TransactionStatus::Failed => b'E',
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::InTransaction),
            b'E' => Some(TransactionStatus::Failed),
            _ => None,
        }
    }
}

/// A message the proxy sends to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    /// Single `N` byte refusing an SSLRequest or GSSENCRequest.
    EncryptionRefused,
    AuthenticationOk,
    AuthenticationMd5Password { salt: [u8; 4] },
    ParameterStatus { name: String, value: String },
    ReadyForQuery(TransactionStatus),
    RowDescription(Vec<FieldDescriptor>),
    DataRow(DataRow),
    CommandComplete(String),
    EmptyQueryResponse,
    ErrorResponse(DbError),
    /// Pre-encoded frames relayed from an upstream server.
    Raw(Bytes),
}

impl BackendMessage {
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            BackendMessage::EncryptionRefused => dst.put_u8(b'N'),
            BackendMessage::AuthenticationOk => {
                dst.put_u8(b'R');
                dst.put_i32(8);
                dst.put_i32(0);
            }
            BackendMessage::AuthenticationMd5Password { salt } => {
                dst.put_u8(b'R');
                dst.put_i32(12);
                dst.put_i32(5);
                dst.put_slice(salt);
            }
            BackendMessage::ParameterStatus { name, value } => {
                let pos = begin(dst, b'S');
                put_cstr(dst, name);
                put_cstr(dst, value);
                finish(dst, pos);
            }
            BackendMessage::ReadyForQuery(status) => {
                dst.put_u8(b'Z');
                dst.put_i32(5);
                dst.put_u8(status.as_byte());
            }
            BackendMessage::RowDescription(fields) => encode_row_description(fields, dst),
            BackendMessage::DataRow(values) => encode_data_row(values, dst),
            BackendMessage::CommandComplete(tag) => {
                let pos = begin(dst, b'C');
                put_cstr(dst, tag);
                finish(dst, pos);
            }
            BackendMessage::EmptyQueryResponse => {
                dst.put_u8(b'I');
                dst.put_i32(4);
            }
            BackendMessage::ErrorResponse(err) => encode_error_response(err, dst),
            BackendMessage::Raw(bytes) => dst.put_slice(bytes),
        }
    }
}

fn encode_row_description(fields: &[FieldDescriptor], dst: &mut BytesMut) {
    let pos = begin(dst, b'T');
    dst.put_i16(fields.len() as i16);
    for field in fields {
        put_cstr(dst, &field.name);
        dst.put_u32(field.table_oid);
        dst.put_i16(field.column_id);
        dst.put_u32(field.type_oid);
        dst.put_i16(field.type_size);
        dst.put_i32(field.type_modifier);
        dst.put_i16(field.format);
    }
    finish(dst, pos);
}

fn encode_data_row(values: &DataRow, dst: &mut BytesMut) {
    let pos = begin(dst, b'D');
    dst.put_i16(values.len() as i16);
    for value in values {
        match value {
            None => dst.put_i32(-1),
            Some(data) => {
                dst.put_i32(data.len() as i32);
                dst.put_slice(data);
            }
        }
    }
    finish(dst, pos);
}

/// Field codes in the order PostgreSQL itself emits them.
fn error_fields(err: &DbError) -> [(u8, Option<&str>); 18] {
    [
        (b'S', Some(err.severity.as_str())),
        (b'V', err.severity_non_localized.as_deref()),
        (b'C', Some(err.code.as_str())),
        (b'M', Some(err.message.as_str())),
        (b'D', err.detail.as_deref()),
        (b'H', err.hint.as_deref()),
        (b'P', err.position.as_deref()),
        (b'p', err.internal_position.as_deref()),
        (b'q', err.internal_query.as_deref()),
        (b'W', err.where_.as_deref()),
        (b's', err.schema_name.as_deref()),
        (b't', err.table_name.as_deref()),
        (b'c', err.column_name.as_deref()),
        (b'd', err.datatype_name.as_deref()),
        (b'n', err.constraint_name.as_deref()),
        (b'F', err.file.as_deref()),
        (b'L', err.line.as_deref()),
        (b'R', err.routine.as_deref()),
    ]
}

fn encode_error_response(err: &DbError, dst: &mut BytesMut) {
    let pos = begin(dst, b'E');
    for (code, value) in error_fields(err) {
        if let Some(value) = value {
            dst.put_u8(code);
            put_cstr(dst, value);
        }
    }
    dst.put_u8(0);
    finish(dst, pos);
}

// ============================================================================
// Parsing of upstream server messages
// ============================================================================

/// An authentication request from an upstream server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRequest {
    Ok,
    CleartextPassword,
    Md5Password { salt: [u8; 4] },
    Sasl { mechanisms: Vec<String> },
    SaslContinue(Vec<u8>),
    SaslFinal(Vec<u8>),
    /// Kerberos, GSSAPI, SSPI and anything newer.
    Unsupported(i32),
}

fn expect_tag<'a>(
    frame: &'a RawFrame,
    tag: u8,
    expected: &'static str,
) -> Result<Reader<'a>, ProtocolError> {
    if frame.tag() != tag {
        return Err(ProtocolError::UnexpectedMessage {
            expected,
            got: frame.tag() as char,
        });
    }
    Ok(Reader::new(tag, frame.body()))
}

/// Parse an `R` message.
pub fn parse_authentication(frame: &RawFrame) -> Result<AuthRequest, ProtocolError> {
    let mut r = expect_tag(frame, b'R', "Authentication")?;
    let request = match r.i32()? {
        0 => AuthRequest::Ok,
        3 => AuthRequest::CleartextPassword,
        5 => {
            let salt = r.bytes(4)?;
            AuthRequest::Md5Password {
                salt: [salt[0], salt[1], salt[2], salt[3]],
            }
        }
        10 => {
            let mut mechanisms = Vec::new();
            while r.peek().is_some_and(|b| b != 0) {
                mechanisms.push(r.cstr()?);
            }
            AuthRequest::Sasl { mechanisms }
        }
        11 => AuthRequest::SaslContinue(r.rest().to_vec()),
        12 => AuthRequest::SaslFinal(r.rest().to_vec()),
        other => AuthRequest::Unsupported(other),
    };
    Ok(request)
}

/// Parse a `T` message.
pub fn parse_row_description(frame: &RawFrame) -> Result<Vec<FieldDescriptor>, ProtocolError> {
    let mut r = expect_tag(frame, b'T', "RowDescription")?;
    let count = r.i16()?.max(0) as usize;
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        fields.push(FieldDescriptor {
            name: r.cstr()?,
            table_oid: r.u32()?,
            column_id: r.i16()?,
            type_oid: r.u32()?,
            type_size: r.i16()?,
            type_modifier: r.i32()?,
            format: r.i16()?,
        });
    }
    Ok(fields)
}

/// Parse a `D` message.
pub fn parse_data_row(frame: &RawFrame) -> Result<DataRow, ProtocolError> {
    let mut r = expect_tag(frame, b'D', "DataRow")?;
    let count = r.i16()?.max(0) as usize;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let len = r.i32()?;
        if len < 0 {
            values.push(None);
        } else {
            values.push(Some(r.bytes(len as usize)?.to_vec()));
        }
    }
    Ok(values)
}

/// Parse a `C` message into its command tag.
pub fn parse_command_complete(frame: &RawFrame) -> Result<String, ProtocolError> {
    expect_tag(frame, b'C', "CommandComplete")?.cstr()
}

/// Parse a `Z` message.
pub fn parse_ready_for_query(frame: &RawFrame) -> Result<TransactionStatus, ProtocolError> {
    let status = expect_tag(frame, b'Z', "ReadyForQuery")?.u8()?;
    TransactionStatus::from_byte(status)
        .ok_or_else(|| ProtocolError::malformed(b'Z', format!("unknown status {status}")))
}

/// Parse an `S` message into name and value.
pub fn parse_parameter_status(frame: &RawFrame) -> Result<(String, String), ProtocolError> {
    let mut r = expect_tag(frame, b'S', "ParameterStatus")?;
    Ok((r.cstr()?, r.cstr()?))
}

/// Parse an `E` (or `N`) message, keeping every field.
pub fn parse_error_response(frame: &RawFrame) -> Result<DbError, ProtocolError> {
    if !matches!(frame.tag(), b'E' | b'N') {
        return Err(ProtocolError::UnexpectedMessage {
            expected: "ErrorResponse",
            got: frame.tag() as char,
        });
    }

    let mut r = Reader::new(frame.tag(), frame.body());
    let mut err = DbError::default();
    while r.remaining() > 0 {
        let code = r.u8()?;
        if code == 0 {
            break;
        }
        let value = r.cstr()?;
        match code {
            b'S' => err.severity = value,
            b'V' => err.severity_non_localized = Some(value),
            b'C' => err.code = value,
            b'M' => err.message = value,
            b'D' => err.detail = Some(value),
            b'H' => err.hint = Some(value),
            b'P' => err.position = Some(value),
            b'p' => err.internal_position = Some(value),
            b'q' => err.internal_query = Some(value),
            b'W' => err.where_ = Some(value),
            b's' => err.schema_name = Some(value),
            b't' => err.table_name = Some(value),
            b'c' => err.column_name = Some(value),
            b'd' => err.datatype_name = Some(value),
            b'n' => err.constraint_name = Some(value),
            b'F' => err.file = Some(value),
            b'L' => err.line = Some(value),
            b'R' => err.routine = Some(value),
            // Unknown field types must be ignored.
            _ => {}
        }
    }
    Ok(err)
}
