//! A single protocol-level connection to an upstream server.

use std::collections::HashMap;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use pgpro_core::QueryResult;
use pgpro_core::config::ConnectionTarget;
use pgpro_protocol::auth::{SCRAM_SHA_256, ScramClient, md5_password_response};
use pgpro_protocol::backend::{
    AuthRequest, parse_authentication, parse_command_complete, parse_data_row,
    parse_error_response, parse_parameter_status, parse_ready_for_query, parse_row_description,
};
use pgpro_protocol::frontend::{
    encode_copy_fail, encode_password, encode_query, encode_sasl_initial, encode_sasl_response,
    encode_startup, encode_terminate,
};
use pgpro_protocol::{ClientCodec, ProtocolError, RawFrame, TransactionStatus};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use crate::error::BackendError;
use crate::executor::Execution;

const COPY_REFUSED: &str = "COPY is not supported through pg_pro";

/// Outcome of relaying one raw message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Every complete frame the server sent, concatenated.
    pub response: Bytes,
    /// The response ended with ReadyForQuery and the connection is idle.
    pub ready: bool,
}

/// An authenticated upstream connection.
pub struct UpstreamConnection<S = TcpStream> {
    framed: Framed<S, ClientCodec>,
    addr: String,
    usable: bool,
    status: TransactionStatus,
    parameters: HashMap<String, String>,
}

impl UpstreamConnection<TcpStream> {
    /// Dial and authenticate, bounded by `timeout`.
    pub async fn connect(target: &ConnectionTarget, timeout: Duration) -> Result<Self, BackendError> {
        let addr = target.address();
        debug!(addr = %addr, user = %target.user, "Connecting to upstream");

        let connecting = async {
            let stream = TcpStream::connect(&addr)
                .await
                .map_err(|source| BackendError::Connect {
                    addr: addr.clone(),
                    source,
                })?;
            stream.set_nodelay(true)?;
            Self::handshake(stream, addr.clone(), target).await
        };

        tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|_| BackendError::ConnectTimeout {
                addr: addr.clone(),
                timeout,
            })?
    }
}

impl<S> UpstreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Run startup and authentication over an established stream.
    pub async fn handshake(
        stream: S,
        addr: impl Into<String>,
        target: &ConnectionTarget,
    ) -> Result<Self, BackendError> {
        let mut conn = Self {
            framed: Framed::new(stream, ClientCodec),
            addr: addr.into(),
            usable: true,
            status: TransactionStatus::Idle,
            parameters: HashMap::new(),
        };
        conn.startup(target).await?;
        debug!(addr = %conn.addr, "Upstream connection ready");
        Ok(conn)
    }

    async fn startup(&mut self, target: &ConnectionTarget) -> Result<(), BackendError> {
        let mut params = vec![
            ("user", target.user.as_str()),
            ("database", target.database.as_str()),
        ];
        if let Some(app) = &target.application_name {
            params.push(("application_name", app.as_str()));
        }
        let mut buf = BytesMut::new();
        encode_startup(&mut buf, &params);
        self.send(buf).await?;

        let mut scram: Option<ScramClient> = None;
        loop {
            let frame = self.recv().await?;
            match frame.tag() {
                b'R' => match parse_authentication(&frame)? {
                    AuthRequest::Ok => {}
                    AuthRequest::CleartextPassword => {
                        let mut buf = BytesMut::new();
                        encode_password(&mut buf, password(target)?);
                        self.send(buf).await?;
                    }
                    AuthRequest::Md5Password { salt } => {
                        let response = md5_password_response(&target.user, password(target)?, &salt);
                        let mut buf = BytesMut::new();
                        encode_password(&mut buf, &response);
                        self.send(buf).await?;
                    }
                    AuthRequest::Sasl { mechanisms } => {
                        if !mechanisms.iter().any(|m| m == SCRAM_SHA_256) {
                            return Err(BackendError::Auth(format!(
                                "no supported SASL mechanism in {mechanisms:?}"
                            )));
                        }
                        let client = ScramClient::new(&target.user, password(target)?);
                        let mut buf = BytesMut::new();
                        encode_sasl_initial(&mut buf, SCRAM_SHA_256, &client.client_first());
                        self.send(buf).await?;
                        scram = Some(client);
                    }
                    AuthRequest::SaslContinue(data) => {
                        let client = scram
                            .as_mut()
                            .ok_or_else(|| BackendError::Auth("SASL continue before start".into()))?;
                        let reply = client
                            .client_final(&data)
                            .map_err(|e| BackendError::Auth(e.to_string()))?;
                        let mut buf = BytesMut::new();
                        encode_sasl_response(&mut buf, &reply);
                        self.send(buf).await?;
                    }
                    AuthRequest::SaslFinal(data) => {
                        scram
                            .as_ref()
                            .ok_or_else(|| BackendError::Auth("SASL final before start".into()))?
                            .verify_server_final(&data)
                            .map_err(|e| BackendError::Auth(e.to_string()))?;
                    }
                    AuthRequest::Unsupported(code) => {
                        return Err(BackendError::Auth(format!(
                            "unsupported authentication method {code}"
                        )));
                    }
                },
                b'S' => {
                    let (name, value) = parse_parameter_status(&frame)?;
                    self.parameters.insert(name, value);
                }
                // BackendKeyData, NoticeResponse
                b'K' | b'N' => {}
                b'E' => {
                    let err = parse_error_response(&frame)?;
                    self.usable = false;
                    return Err(BackendError::Auth(err.to_string()));
                }
                b'Z' => {
                    self.status = parse_ready_for_query(&frame)?;
                    return Ok(());
                }
                other => {
                    self.usable = false;
                    return Err(ProtocolError::UnexpectedMessage {
                        expected: "Authentication or ReadyForQuery",
                        got: other as char,
                    }
                    .into());
                }
            }
        }
    }

    /// Run `sql` with the simple query protocol and materialize the result.
    ///
    /// A statement error fails only this batch; see [`Self::run`].
    pub async fn simple_query(&mut self, sql: &str) -> Result<QueryResult, BackendError> {
        self.run(sql).await?.into_result()
    }

    /// Run `sql` with the simple query protocol up to ReadyForQuery.
    ///
    /// For multi-statement text the rows of the last statement that
    /// returned a row description are kept, with the last command tag.
    /// Statement errors are part of the [`Execution`]; only transport and
    /// protocol failures are returned as `Err`.
    pub async fn run(&mut self, sql: &str) -> Result<Execution, BackendError> {
        let mut buf = BytesMut::new();
        encode_query(&mut buf, sql);
        self.send(buf).await?;

        let mut result = QueryResult::default();
        let mut error = None;
        loop {
            let frame = self.recv().await?;
            match frame.tag() {
                b'T' => {
                    result.fields = parse_row_description(&frame)?;
                    result.rows.clear();
                }
                b'D' => result.rows.push(parse_data_row(&frame)?),
                b'C' => result.command_tag = parse_command_complete(&frame)?,
                b'E' => {
                    let err = parse_error_response(&frame)?;
                    error.get_or_insert(err);
                }
                b'G' => {
                    let mut buf = BytesMut::new();
                    encode_copy_fail(&mut buf, COPY_REFUSED);
                    self.send(buf).await?;
                }
                b'S' => {
                    let (name, value) = parse_parameter_status(&frame)?;
                    self.parameters.insert(name, value);
                }
                // EmptyQueryResponse, NoticeResponse, NotificationResponse,
                // CopyOutResponse, CopyData, CopyDone
                b'I' | b'N' | b'A' | b'H' | b'd' | b'c' => {}
                b'Z' => {
                    self.status = parse_ready_for_query(&frame)?;
                    break;
                }
                other => {
                    self.usable = false;
                    return Err(ProtocolError::UnexpectedMessage {
                        expected: "query response",
                        got: other as char,
                    }
                    .into());
                }
            }
        }

        Ok(Execution {
            result,
            error,
            status: self.status,
        })
    }

    /// Write pre-encoded frontend bytes and collect the raw response.
    ///
    /// The response ends at ReadyForQuery, or once no new message arrives
    /// within `idle`.
    pub async fn relay_raw(&mut self, message: Bytes, idle: Duration) -> Result<RelayOutcome, BackendError> {
        self.send(message).await?;

        let mut response = BytesMut::new();
        loop {
            let frame = match tokio::time::timeout(idle, self.recv()).await {
                Ok(frame) => frame?,
                Err(_) => {
                    trace!(addr = %self.addr, bytes = response.len(), "Relay idle, ending response");
                    return Ok(RelayOutcome {
                        response: response.freeze(),
                        ready: false,
                    });
                }
            };
            response.extend_from_slice(frame.as_bytes());
            if frame.tag() == b'Z' {
                self.status = parse_ready_for_query(&frame)?;
                return Ok(RelayOutcome {
                    response: response.freeze(),
                    ready: self.status == TransactionStatus::Idle,
                });
            }
        }
    }

    /// Say goodbye. Errors are irrelevant at this point.
    pub async fn terminate(mut self) {
        let mut buf = BytesMut::new();
        encode_terminate(&mut buf);
        let _ = self.framed.send(buf.freeze()).await;
    }

    /// Whether the connection can be handed to another caller.
    pub fn is_reusable(&self) -> bool {
        self.usable && self.status == TransactionStatus::Idle
    }

    pub fn is_usable(&self) -> bool {
        self.usable
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.status
    }

    /// A ParameterStatus value reported by the server.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn send(&mut self, buf: impl Into<Bytes>) -> Result<(), BackendError> {
        if let Err(e) = self.framed.send(buf.into()).await {
            self.usable = false;
            return Err(e.into());
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<RawFrame, BackendError> {
        match self.framed.next().await {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => {
                self.usable = false;
                Err(e.into())
            }
            None => {
                self.usable = false;
                Err(BackendError::Closed)
            }
        }
    }
}

fn password(target: &ConnectionTarget) -> Result<&str, BackendError> {
    target
        .password
        .as_deref()
        .ok_or_else(|| BackendError::Auth("server requested a password but none is configured".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeServer, target};
    use pgpro_core::FieldDescriptor;
    use pgpro_protocol::BackendMessage;
    use pretty_assertions::assert_eq;

    async fn connected(server: FakeServer) -> UpstreamConnection<tokio::io::DuplexStream> {
        let (client, server_io) = tokio::io::duplex(64 * 1024);
        tokio::spawn(server.serve(server_io));
        UpstreamConnection::handshake(client, "fake:5432", &target(Some("pw")))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_md5_handshake_and_parameters() {
        let conn = connected(FakeServer::md5("app", "pw")).await;
        assert_eq!(conn.parameter("server_version"), Some("16.0"));
        assert!(conn.is_reusable());
    }

    #[tokio::test]
    async fn test_wrong_password_is_auth_error() {
        let (client, server_io) = tokio::io::duplex(64 * 1024);
        tokio::spawn(FakeServer::md5("app", "other").serve(server_io));
        let err = UpstreamConnection::handshake(client, "fake:5432", &target(Some("pw")))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::Auth(_)));
    }

    #[tokio::test]
    async fn test_missing_password() {
        let (client, server_io) = tokio::io::duplex(64 * 1024);
        tokio::spawn(FakeServer::md5("app", "pw").serve(server_io));
        let err = UpstreamConnection::handshake(client, "fake:5432", &target(None))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("none is configured"));
    }

    #[tokio::test]
    async fn test_simple_query_materializes_rows() {
        let mut conn = connected(FakeServer::trust()).await;
        let result = conn.simple_query("SELECT 1").await.unwrap();
        assert_eq!(
            result,
            QueryResult {
                fields: vec![FieldDescriptor {
                    name: "?column?".into(),
                    table_oid: 0,
                    column_id: 0,
                    type_oid: 23,
                    type_size: 4,
                    type_modifier: -1,
                    format: 0,
                }],
                rows: vec![vec![Some(b"1".to_vec())]],
                command_tag: "SELECT 1".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_database_error_keeps_connection() {
        let mut conn = connected(FakeServer::trust()).await;
        let err = conn.simple_query("SELECT * FROM missing").await.unwrap_err();
        let db = err.as_db_error().unwrap();
        assert_eq!(db.code, "42P01");
        assert!(conn.is_reusable());

        assert!(conn.simple_query("SELECT 1").await.is_ok());
    }

    #[tokio::test]
    async fn test_run_reports_transaction_status() {
        let mut conn = connected(FakeServer::trust()).await;

        let begun = conn.run("BEGIN").await.unwrap();
        assert_eq!(begun.status, TransactionStatus::InTransaction);
        assert!(!conn.is_reusable());

        let failed = conn.run("INSERT INTO missing VALUES (1)").await.unwrap();
        assert_eq!(failed.error.unwrap().code, "42P01");
        assert_eq!(failed.status, TransactionStatus::Failed);

        let rolled_back = conn.run("ROLLBACK").await.unwrap();
        assert_eq!(rolled_back.result.command_tag, "ROLLBACK");
        assert_eq!(rolled_back.status, TransactionStatus::Idle);
        assert!(conn.is_reusable());
    }

    #[tokio::test]
    async fn test_error_keeps_earlier_command_tag() {
        let mut conn = connected(FakeServer::trust()).await;
        let execution = conn.run("SELECT 1; SELECT * FROM missing").await.unwrap();
        assert_eq!(execution.result.command_tag, "SELECT 1");
        assert_eq!(execution.error.unwrap().code, "42P01");
    }

    #[tokio::test]
    async fn test_copy_in_is_refused() {
        let mut conn = connected(FakeServer::trust()).await;
        let err = conn.simple_query("COPY t FROM STDIN").await.unwrap_err();
        assert!(err.as_db_error().unwrap().message.contains("COPY"));
        assert!(conn.is_reusable());
    }

    #[tokio::test]
    async fn test_relay_raw_returns_exact_bytes() {
        let mut conn = connected(FakeServer::trust()).await;
        let mut query = BytesMut::new();
        encode_query(&mut query, "SELECT 1");

        let outcome = conn
            .relay_raw(query.freeze(), Duration::from_millis(200))
            .await
            .unwrap();
        assert!(outcome.ready);

        let mut expected = BytesMut::new();
        for msg in FakeServer::select_one() {
            msg.encode(&mut expected);
        }
        BackendMessage::ReadyForQuery(TransactionStatus::Idle).encode(&mut expected);
        assert_eq!(outcome.response, expected.freeze());
    }

    #[tokio::test]
    async fn test_relay_ends_when_server_goes_quiet() {
        let mut conn = connected(FakeServer::trust()).await;
        // Parse alone gets no answer until Sync.
        let parse = RawFrame::new(b'P', b"\0SELECT 1\0\0\0").into_bytes();
        let outcome = conn
            .relay_raw(parse, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(outcome.response.is_empty());
        assert!(!outcome.ready);
    }
}
