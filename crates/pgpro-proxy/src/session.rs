//! One client connection, from startup packet to termination.
//!
//! ```text
//! AwaitStartup --SSLRequest/GSSENCRequest--> AwaitStartup
//!      |
//!      | StartupMessage
//!      v
//! Authenticating --bad password--> Terminated (or Ready, if configured)
//!      |
//!      v
//!    Ready --Terminate / EOF / transport error--> Terminated
//! ```
//!
//! Messages are handled strictly one at a time: the next one is not read
//! until the full response to the previous one has been written.
//!
//! A session that failed authentication but was kept open is refused every
//! query and passthrough message. While a statement batch leaves a
//! transaction open upstream, the session keeps that connection and sends
//! every following batch to it, bypassing routing and the cache, until the
//! transaction ends.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use pgpro_backend::{Execution, SessionConnection};
use pgpro_core::db_error::{SQLSTATE_INVALID_AUTHORIZATION, SQLSTATE_PROTOCOL_VIOLATION};
use pgpro_core::{AccessMode, DbError, QueryResult, TableAccessInfo};
use pgpro_policy::AccessDenied;
use pgpro_protocol::{BackendMessage, FrontendMessage, RawFrame, ServerCodec, TransactionStatus};
use pgpro_sql::QueryClassifier;
use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::AppContext;
use crate::error::ProxyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitStartup,
    Authenticating,
    Ready,
    Terminated,
}

pub struct Session<S> {
    ctx: Arc<AppContext>,
    framed: Framed<S, ServerCodec>,
    id: Uuid,
    user: String,
    authenticated: bool,
    state: SessionState,
    status: TransactionStatus,
    /// Upstream connection holding this session's open transaction.
    pinned: Option<Box<dyn SessionConnection>>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(ctx: Arc<AppContext>, stream: S, id: Uuid) -> Self {
        Self {
            ctx,
            framed: Framed::new(stream, ServerCodec::new()),
            id,
            user: String::new(),
            authenticated: false,
            state: SessionState::AwaitStartup,
            status: TransactionStatus::Idle,
            pinned: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Status reported in the last ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.status
    }

    /// Drive the session to completion. A clean client disconnect is `Ok`.
    pub async fn run(mut self) -> Result<(), ProxyError> {
        let outcome = self.drive().await;
        self.state = SessionState::Terminated;
        if self.pinned.take().is_some() {
            debug!(conn_id = %self.id, status = ?self.status, "Abandoning open upstream transaction");
        }
        debug!(conn_id = %self.id, user = %self.user, ok = outcome.is_ok(), "Session terminated");
        outcome
    }

    async fn drive(&mut self) -> Result<(), ProxyError> {
        if !self.await_startup().await? {
            return Ok(());
        }
        if !self.authenticate().await? {
            return Ok(());
        }
        self.serve().await
    }

    /// Returns `false` when the client hung up before starting up.
    async fn await_startup(&mut self) -> Result<bool, ProxyError> {
        loop {
            let Some(msg) = self.read().await? else {
                return Ok(false);
            };
            match msg {
                FrontendMessage::SslRequest | FrontendMessage::GssEncRequest => {
                    debug!(conn_id = %self.id, "Refusing encryption request");
                    self.send(BackendMessage::EncryptionRefused).await?;
                }
                FrontendMessage::Startup(startup) => {
                    let Some(user) = startup.user() else {
                        let err = DbError::fatal(
                            SQLSTATE_INVALID_AUTHORIZATION,
                            "no PostgreSQL user name specified in startup packet",
                        );
                        self.send(BackendMessage::ErrorResponse(err)).await?;
                        return Err(ProxyError::MissingUser);
                    };
                    self.user = user.to_string();
                    debug!(
                        conn_id = %self.id,
                        user = %self.user,
                        database = startup.database().unwrap_or_default(),
                        "Startup"
                    );
                    self.state = SessionState::Authenticating;
                    return Ok(true);
                }
                other => {
                    return Err(ProxyError::UnexpectedMessage {
                        expected: "StartupMessage",
                        got: other.kind(),
                    });
                }
            }
        }
    }

    /// MD5 challenge. Returns `false` when the session should end quietly.
    async fn authenticate(&mut self) -> Result<bool, ProxyError> {
        let salt: [u8; 4] = rand::rng().random();
        self.send(BackendMessage::AuthenticationMd5Password { salt })
            .await?;

        let Some(msg) = self.read().await? else {
            return Ok(false);
        };
        let supplied = match msg {
            FrontendMessage::Password(supplied) => supplied,
            other => {
                return Err(ProxyError::UnexpectedMessage {
                    expected: "PasswordMessage",
                    got: other.kind(),
                });
            }
        };

        let provider = self.ctx.gate.provider().clone();
        let accepted = match provider.check_auth(&self.user, &supplied, &salt).await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(conn_id = %self.id, user = %self.user, error = %e, "Password check failed");
                false
            }
        };
        self.framed.codec_mut().set_ready();

        if !accepted {
            warn!(conn_id = %self.id, user = %self.user, "Password authentication failed");
            let message = format!("password authentication failed for user \"{}\"", self.user);
            if self.ctx.settings.close_on_failure {
                let err = DbError::fatal(SQLSTATE_INVALID_AUTHORIZATION, message);
                self.send(BackendMessage::ErrorResponse(err)).await?;
                return Ok(false);
            }
            let err = DbError::error(SQLSTATE_INVALID_AUTHORIZATION, message);
            self.send_all(vec![
                BackendMessage::ErrorResponse(err),
                BackendMessage::ReadyForQuery(TransactionStatus::Idle),
            ])
            .await?;
            self.state = SessionState::Ready;
            return Ok(true);
        }

        let superuser = match provider.is_superuser(&self.user).await {
            Ok(superuser) => superuser,
            Err(e) => {
                warn!(conn_id = %self.id, user = %self.user, error = %e, "Superuser lookup failed");
                false
            }
        };

        let settings = &self.ctx.settings;
        let mut greeting = vec![
            BackendMessage::AuthenticationOk,
            BackendMessage::ParameterStatus {
                name: "server_version".into(),
                value: settings.server_version.clone(),
            },
            BackendMessage::ParameterStatus {
                name: "is_superuser".into(),
                value: if superuser { "on" } else { "off" }.into(),
            },
        ];
        greeting.extend(settings.parameters.iter().map(|(name, value)| {
            BackendMessage::ParameterStatus {
                name: name.clone(),
                value: value.clone(),
            }
        }));
        greeting.push(BackendMessage::ReadyForQuery(TransactionStatus::Idle));
        self.send_all(greeting).await?;

        debug!(conn_id = %self.id, user = %self.user, superuser, "Authenticated");
        self.authenticated = true;
        self.state = SessionState::Ready;
        Ok(true)
    }

    async fn serve(&mut self) -> Result<(), ProxyError> {
        loop {
            let Some(msg) = self.read().await? else {
                debug!(conn_id = %self.id, "Client disconnected");
                return Ok(());
            };
            match msg {
                FrontendMessage::Query(sql) => {
                    let replies = self.answer(&sql).await?;
                    self.send_all(replies).await?;
                }
                FrontendMessage::Parse { query, .. } => {
                    let replies = self.answer(&query).await?;
                    self.send_all(replies).await?;
                }
                FrontendMessage::Sync | FrontendMessage::Describe { .. } => {
                    self.send(BackendMessage::ReadyForQuery(self.status)).await?;
                }
                FrontendMessage::Execute { .. } => {
                    self.send(BackendMessage::EmptyQueryResponse).await?;
                }
                FrontendMessage::Terminate => {
                    debug!(conn_id = %self.id, "Client terminated");
                    return Ok(());
                }
                FrontendMessage::Passthrough(frame) => self.relay(frame).await?,
                other @ (FrontendMessage::Startup(_)
                | FrontendMessage::SslRequest
                | FrontendMessage::GssEncRequest
                | FrontendMessage::CancelRequest { .. }
                | FrontendMessage::Password(_)) => {
                    let err = DbError::fatal(
                        SQLSTATE_PROTOCOL_VIOLATION,
                        format!("unexpected {} after startup", other.kind()),
                    );
                    self.send(BackendMessage::ErrorResponse(err)).await?;
                    return Err(ProxyError::UnexpectedMessage {
                        expected: "a query",
                        got: other.kind(),
                    });
                }
            }
        }
    }

    /// Classify, authorize and execute one query string.
    ///
    /// Statement level failures become ErrorResponse replies; only transport
    /// failures are returned as errors.
    async fn answer(&mut self, sql: &str) -> Result<Vec<BackendMessage>, ProxyError> {
        let ctx = self.ctx.clone();

        let accesses = match ctx.classifier.classify(sql) {
            Ok(accesses) => accesses,
            Err(e) => {
                debug!(conn_id = %self.id, error = %e, "Query does not parse");
                return Ok(error_reply(e.to_db_error(), String::new(), self.status));
            }
        };

        if !self.authenticated {
            warn!(
                conn_id = %self.id,
                user = %self.user,
                "Refusing query from unauthenticated session"
            );
            let access = accesses
                .first()
                .cloned()
                .unwrap_or_else(|| TableAccessInfo::tableless(AccessMode::Invalid));
            let denied = AccessDenied::new(self.user.as_str(), access);
            return Ok(error_reply(denied.to_db_error(), String::new(), self.status));
        }

        if let Err(denied) = ctx.gate.authorize_batch(&accesses, &self.user).await {
            return Ok(error_reply(denied.to_db_error(), String::new(), self.status));
        }

        let is_read = QueryClassifier::is_read_batch(&accesses);
        let cacheable = is_read && self.pinned.is_none();
        if cacheable {
            if let Some(cached) = ctx.cache.lookup(sql).await {
                return Ok(result_reply(cached, self.status));
            }
        }

        let mut conn = match self.pinned.take() {
            Some(conn) => conn,
            None => ctx.router.checkout(is_read).await?,
        };
        let execution = conn.run(sql).await?;
        self.status = execution.status;
        if execution.in_transaction() {
            debug!(
                conn_id = %self.id,
                status = ?self.status,
                "Holding upstream connection for transaction"
            );
            self.pinned = Some(conn);
        }

        let Execution { result, error, .. } = execution;
        match error {
            Some(err) => {
                debug!(conn_id = %self.id, code = %err.code, "Upstream statement error");
                Ok(error_reply(err, result.command_tag, self.status))
            }
            None => {
                if cacheable && self.pinned.is_none() {
                    ctx.cache.store_detached(sql.to_string(), result.clone());
                }
                Ok(result_reply(result, self.status))
            }
        }
    }

    async fn relay(&mut self, frame: RawFrame) -> Result<(), ProxyError> {
        if !self.authenticated {
            warn!(
                conn_id = %self.id,
                user = %self.user,
                "Refusing passthrough from unauthenticated session"
            );
            let denied = AccessDenied::new(
                self.user.as_str(),
                TableAccessInfo::tableless(AccessMode::Invalid),
            );
            return self.send(BackendMessage::ErrorResponse(denied.to_db_error())).await;
        }
        debug!(conn_id = %self.id, tag = %(frame.tag() as char), "Passing message through");
        let response = self.ctx.passthrough.relay(frame.into_bytes()).await?;
        if !response.is_empty() {
            self.send(BackendMessage::Raw(response)).await?;
        }
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<FrontendMessage>, ProxyError> {
        match self.framed.next().await {
            Some(Ok(msg)) => Ok(Some(msg)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    async fn send(&mut self, msg: BackendMessage) -> Result<(), ProxyError> {
        self.framed.send(msg).await?;
        Ok(())
    }

    async fn send_all(&mut self, msgs: Vec<BackendMessage>) -> Result<(), ProxyError> {
        for msg in msgs {
            self.framed.feed(msg).await?;
        }
        self.framed.flush().await?;
        Ok(())
    }
}

/// ErrorResponse, then the tag of whatever completed before the error.
fn error_reply(
    err: DbError,
    command_tag: String,
    status: TransactionStatus,
) -> Vec<BackendMessage> {
    vec![
        BackendMessage::ErrorResponse(err),
        BackendMessage::CommandComplete(command_tag),
        BackendMessage::ReadyForQuery(status),
    ]
}

fn result_reply(result: QueryResult, status: TransactionStatus) -> Vec<BackendMessage> {
    let mut replies = Vec::with_capacity(result.rows.len() + 3);
    if result.rows.is_empty() {
        replies.push(BackendMessage::EmptyQueryResponse);
    } else {
        replies.push(BackendMessage::RowDescription(result.fields));
        replies.extend(result.rows.into_iter().map(BackendMessage::DataRow));
    }
    replies.push(BackendMessage::CommandComplete(result.command_tag));
    replies.push(BackendMessage::ReadyForQuery(status));
    replies
}
