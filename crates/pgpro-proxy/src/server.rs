//! Listeners: the protocol-aware proxy and the pure splice proxy.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pgpro_backend::splice;
use pgpro_core::PgProConfig;
use pgpro_core::config::ConnectionTarget;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::AppContext;
use crate::error::ProxyError;
use crate::session::Session;

/// Bind the configured listen address.
pub async fn bind(config: &PgProConfig) -> Result<TcpListener, ProxyError> {
    let address = config.listen_address();
    TcpListener::bind(&address)
        .await
        .map_err(|source| ProxyError::BindFailed { address, source })
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Accept connections until `shutdown` resolves, handling each in its own
/// task. Connections beyond `max_connections` are closed immediately.
async fn accept_loop<F, Fut>(
    listener: TcpListener,
    max_connections: usize,
    shutdown: impl Future<Output = ()>,
    handle: F,
) -> Result<(), ProxyError>
where
    F: Fn(TcpStream, SocketAddr, Uuid) -> Fut,
    Fut: Future<Output = Result<(), ProxyError>> + Send + 'static,
{
    let limit = Arc::new(Semaphore::new(max_connections));
    tokio::pin!(shutdown);

    loop {
        let (socket, peer) = tokio::select! {
            _ = &mut shutdown => {
                info!("No longer accepting connections");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    continue;
                }
            },
        };

        let Ok(permit) = limit.clone().try_acquire_owned() else {
            warn!(peer = %peer, max_connections, "Connection limit reached, closing");
            continue;
        };
        if let Err(e) = socket.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let conn_id = Uuid::new_v4();
        debug!(conn_id = %conn_id, peer = %peer, "New connection");
        let session = handle(socket, peer, conn_id);

        tokio::spawn(async move {
            let _permit = permit;
            match session.await {
                Ok(()) => debug!(conn_id = %conn_id, "Connection closed"),
                Err(e) if e.is_disconnect() => {
                    debug!(conn_id = %conn_id, error = %e, "Client disconnected")
                }
                Err(e) => error!(conn_id = %conn_id, peer = %peer, error = %e, "Connection error"),
            }
        });
    }
}

/// The protocol-aware proxy.
pub struct PgProProxy {
    config: PgProConfig,
    ctx: Arc<AppContext>,
}

impl PgProProxy {
    pub fn new(config: PgProConfig, ctx: Arc<AppContext>) -> Self {
        Self { config, ctx }
    }

    pub fn config(&self) -> &PgProConfig {
        &self.config
    }

    /// Run until Ctrl-C.
    pub async fn run(&self) -> Result<(), ProxyError> {
        let listener = bind(&self.config).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve an already bound listener until `shutdown` resolves. Sessions
    /// in flight keep running.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ProxyError> {
        info!(
            listen_addr = %listener.local_addr()?,
            server_version = %self.config.server_version,
            "pg_pro proxy listening"
        );
        let ctx = self.ctx.clone();
        accept_loop(listener, self.config.max_connections, shutdown, move |socket, _, id| {
            Session::new(ctx.clone(), socket, id).run()
        })
        .await
    }
}

/// Whole-connection byte splice onto the primary, without protocol
/// awareness.
pub struct SpliceProxy {
    config: PgProConfig,
    target: ConnectionTarget,
}

impl SpliceProxy {
    pub fn new(config: PgProConfig, target: ConnectionTarget) -> Self {
        Self { config, target }
    }

    pub async fn run(&self) -> Result<(), ProxyError> {
        let listener = bind(&self.config).await?;
        self.serve(listener, shutdown_signal()).await
    }

    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ProxyError> {
        info!(
            listen_addr = %listener.local_addr()?,
            upstream = %self.target.redacted(),
            "pg_pro splice proxy listening"
        );
        let target = Arc::new(self.target.clone());
        let connect_timeout: Duration = self.config.pool.connect_timeout();
        accept_loop(listener, self.config.max_connections, shutdown, move |mut socket, _, _| {
            let target = target.clone();
            async move {
                splice(&mut socket, &target, connect_timeout).await?;
                Ok(())
            }
        })
        .await
    }
}
