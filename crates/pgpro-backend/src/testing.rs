//! Scripted upstream server for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::{SinkExt, StreamExt};
use pgpro_core::config::ConnectionTarget;
use pgpro_core::{DbError, FieldDescriptor};
use pgpro_protocol::auth::md5_password_response;
use pgpro_protocol::{BackendMessage, FrontendMessage, RawFrame, ServerCodec, TransactionStatus};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

pub(crate) fn target(password: Option<&str>) -> ConnectionTarget {
    ConnectionTarget {
        host: "127.0.0.1".into(),
        port: 5432,
        user: "app".into(),
        password: password.map(String::from),
        database: "app".into(),
        application_name: None,
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeServer {
    md5: Option<(String, String)>,
}

impl FakeServer {
    pub(crate) fn trust() -> Self {
        Self::default()
    }

    pub(crate) fn md5(user: &str, password: &str) -> Self {
        Self {
            md5: Some((user.into(), password.into())),
        }
    }

    pub(crate) fn select_one() -> Vec<BackendMessage> {
        vec![
            BackendMessage::RowDescription(vec![FieldDescriptor {
                name: "?column?".into(),
                table_oid: 0,
                column_id: 0,
                type_oid: 23,
                type_size: 4,
                type_modifier: -1,
                format: 0,
            }]),
            BackendMessage::DataRow(vec![Some(b"1".to_vec())]),
            BackendMessage::CommandComplete("SELECT 1".into()),
        ]
    }

    /// Accept TCP connections on an ephemeral port, counting them.
    pub(crate) async fn spawn_tcp(self) -> (ConnectionTarget, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(self.clone().serve(stream));
            }
        });
        let mut target = target(Some("pw"));
        target.port = port;
        (target, accepted)
    }

    pub(crate) async fn serve<S>(self, io: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(io, ServerCodec::new());
        let Some(Ok(FrontendMessage::Startup(_))) = framed.next().await else {
            return;
        };

        if let Some((user, password)) = &self.md5 {
            let salt = [1, 2, 3, 4];
            let _ = framed
                .send(BackendMessage::AuthenticationMd5Password { salt })
                .await;
            let Some(Ok(FrontendMessage::Password(got))) = framed.next().await else {
                return;
            };
            if got != md5_password_response(user, password, &salt) {
                let _ = framed
                    .send(BackendMessage::ErrorResponse(DbError::fatal(
                        "28P01",
                        "password authentication failed",
                    )))
                    .await;
                return;
            }
        }

        let greeting = [
            BackendMessage::AuthenticationOk,
            BackendMessage::ParameterStatus {
                name: "server_version".into(),
                value: "16.0".into(),
            },
            BackendMessage::ReadyForQuery(TransactionStatus::Idle),
        ];
        for msg in greeting {
            if framed.send(msg).await.is_err() {
                return;
            }
        }
        framed.codec_mut().set_ready();

        let mut status = TransactionStatus::Idle;
        while let Some(Ok(msg)) = framed.next().await {
            let replies = match msg {
                FrontendMessage::Query(sql) if sql.starts_with("COPY") => {
                    let copy_in = RawFrame::new(b'G', &[0, 0, 0]).into_bytes();
                    let _ = framed.send(BackendMessage::Raw(copy_in)).await;
                    let reason = match framed.next().await {
                        Some(Ok(FrontendMessage::Passthrough(frame))) if frame.tag() == b'f' => {
                            String::from_utf8_lossy(frame.body())
                                .trim_end_matches('\0')
                                .to_string()
                        }
                        _ => return,
                    };
                    vec![BackendMessage::ErrorResponse(DbError::error(
                        "57014",
                        format!("COPY from stdin failed: {reason}"),
                    ))]
                }
                FrontendMessage::Query(sql) => Self::answer(&sql, &mut status),
                FrontendMessage::Terminate => return,
                _ => continue,
            };
            for msg in replies {
                let _ = framed.send(msg).await;
            }
            let _ = framed.send(BackendMessage::ReadyForQuery(status)).await;
        }
    }

    /// Statements run one by one; the first error ends the batch and fails
    /// an open transaction.
    fn answer(sql: &str, status: &mut TransactionStatus) -> Vec<BackendMessage> {
        let mut replies = Vec::new();
        for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            if *status == TransactionStatus::Failed && statement != "ROLLBACK" {
                replies.push(BackendMessage::ErrorResponse(DbError::error(
                    "25P02",
                    "current transaction is aborted, commands ignored until end of transaction block",
                )));
                break;
            }
            match statement {
                "SELECT 1" => replies.extend(Self::select_one()),
                "BEGIN" => {
                    *status = TransactionStatus::InTransaction;
                    replies.push(BackendMessage::CommandComplete("BEGIN".into()));
                }
                "COMMIT" | "ROLLBACK" => {
                    *status = TransactionStatus::Idle;
                    replies.push(BackendMessage::CommandComplete(statement.into()));
                }
                s if s.contains("missing") => {
                    replies.push(BackendMessage::ErrorResponse(DbError::error(
                        "42P01",
                        "relation \"missing\" does not exist",
                    )));
                    if *status == TransactionStatus::InTransaction {
                        *status = TransactionStatus::Failed;
                    }
                    break;
                }
                _ => replies.push(BackendMessage::CommandComplete("OK".into())),
            }
        }
        replies
    }
}
