//! Raw byte forwarding to the primary.
//!
//! Two shapes: relaying single messages the session does not handle
//! itself ([`PassthroughPool`]), and splicing a whole client connection
//! onto a fresh upstream connection ([`splice`]).

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use pgpro_core::config::{ConnectionTarget, PassthroughSettings};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::connection::UpstreamConnection;
use crate::error::BackendError;

/// Forwards one encoded frontend message and returns the raw response.
#[async_trait]
pub trait RawRelay: Send + Sync {
    async fn relay(&self, message: Bytes) -> Result<Bytes, BackendError>;
}

/// Pool of raw connections to the primary, separate from the execution
/// pools.
///
/// A connection is borrowed for exactly one message. It goes back to the
/// pool only when the response ended with ReadyForQuery in idle state.
pub struct PassthroughPool {
    target: ConnectionTarget,
    connect_timeout: Duration,
    response_idle: Duration,
    max_idle: usize,
    idle: Mutex<VecDeque<UpstreamConnection>>,
}

impl PassthroughPool {
    pub fn new(target: ConnectionTarget, settings: &PassthroughSettings, connect_timeout: Duration) -> Self {
        Self {
            target,
            connect_timeout,
            response_idle: settings.response_idle(),
            max_idle: settings.max_idle,
            idle: Mutex::new(VecDeque::new()),
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    async fn checkout(&self) -> Result<UpstreamConnection, BackendError> {
        let reused = self.idle.lock().pop_front();
        match reused {
            Some(conn) => Ok(conn),
            None => UpstreamConnection::connect(&self.target, self.connect_timeout).await,
        }
    }

    fn checkin(&self, conn: UpstreamConnection) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push_back(conn);
        }
    }
}

#[async_trait]
impl RawRelay for PassthroughPool {
    async fn relay(&self, message: Bytes) -> Result<Bytes, BackendError> {
        let mut conn = self.checkout().await?;
        let outcome = conn.relay_raw(message, self.response_idle).await?;
        trace!(bytes = outcome.response.len(), ready = outcome.ready, "Relayed raw message");
        if outcome.ready && conn.is_reusable() {
            self.checkin(conn);
        }
        Ok(outcome.response)
    }
}

/// Copy bytes both ways between two streams until both directions finish.
///
/// When one side reaches end of stream its peer's write half is shut down,
/// so closure propagates exactly once in each direction.
pub async fn splice_streams<A, B>(a: &mut A, b: &mut B) -> Result<(u64, u64), BackendError>
where
    A: AsyncRead + AsyncWrite + Unpin + ?Sized,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    Ok(tokio::io::copy_bidirectional(a, b).await?)
}

/// Dial the primary and splice `client` onto it.
pub async fn splice<C>(
    client: &mut C,
    target: &ConnectionTarget,
    connect_timeout: Duration,
) -> Result<(u64, u64), BackendError>
where
    C: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let addr = target.address();
    let mut upstream = tokio::time::timeout(connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| BackendError::ConnectTimeout {
            addr: addr.clone(),
            timeout: connect_timeout,
        })?
        .map_err(|source| BackendError::Connect {
            addr: addr.clone(),
            source,
        })?;
    upstream.set_nodelay(true)?;

    let (sent, received) = splice_streams(client, &mut upstream).await?;
    debug!(upstream = %addr, sent, received, "Splice finished");
    Ok((sent, received))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeServer;
    use bytes::BytesMut;
    use pgpro_protocol::frontend::encode_query;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn settings() -> PassthroughSettings {
        PassthroughSettings {
            max_idle: 2,
            response_idle_ms: 100,
        }
    }

    fn query(sql: &str) -> Bytes {
        let mut buf = BytesMut::new();
        encode_query(&mut buf, sql);
        buf.freeze()
    }

    #[tokio::test]
    async fn test_relay_reuses_idle_connection() {
        let (target, accepted) = FakeServer::trust().spawn_tcp().await;
        let pool = PassthroughPool::new(target, &settings(), Duration::from_secs(1));

        let first = pool.relay(query("SELECT 1")).await.unwrap();
        let second = pool.relay(query("SELECT 1")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.last(), Some(&b'I'));
        assert_eq!(accepted.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_unfinished_response_drops_connection() {
        let (target, accepted) = FakeServer::trust().spawn_tcp().await;
        let pool = PassthroughPool::new(target, &settings(), Duration::from_secs(1));

        let parse = pgpro_protocol::RawFrame::new(b'P', b"\0SELECT 1\0\0\0").into_bytes();
        assert!(pool.relay(parse).await.unwrap().is_empty());
        assert_eq!(pool.idle_count(), 0);

        pool.relay(query("SELECT 1")).await.unwrap();
        assert_eq!(accepted.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_splice_propagates_close() {
        let (mut client, mut client_peer) = tokio::io::duplex(1024);
        let (mut upstream, mut upstream_peer) = tokio::io::duplex(1024);

        let splicer =
            tokio::spawn(async move { splice_streams(&mut client_peer, &mut upstream_peer).await });

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        upstream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        upstream.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        // Client hangs up: upstream sees EOF, then closes its side too.
        client.shutdown().await.unwrap();
        let mut rest = Vec::new();
        upstream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        drop(upstream);

        let (sent, received) = splicer.await.unwrap().unwrap();
        assert_eq!((sent, received), (4, 5));
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
