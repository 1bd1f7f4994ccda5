use crate::config::ServerConfig;
use crate::metrics::Metrics;
use crate::routes::{self, Request, Route};
use crate::state::SnapshotStore;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub const PREAMBLE: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: application/json; charset=utf-8\r\n\r\n";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to set up listener on {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("receive failed: {0}")]
    Read(io::Error),
    #[error("send failed: {0}")]
    Write(io::Error),
    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{0} timed out")]
    Timeout(&'static str),
}

impl ServerError {
    fn stage(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "bind",
            Self::Read(_) => "read",
            Self::Write(_) => "write",
            Self::Encode(_) => "encode",
            Self::Timeout(stage) => stage,
        }
    }
}

pub fn bind(addr: SocketAddr, backlog: u32) -> Result<TcpListener, ServerError> {
    let setup = || -> io::Result<TcpListener> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        socket.listen(backlog)
    };
    setup().map_err(|source| ServerError::Bind { addr, source })
}

#[derive(Debug, Clone)]
struct HandlerOptions {
    request_buffer_bytes: usize,
    io_timeout: Option<Duration>,
}

pub struct QueryServer {
    listener: TcpListener,
    store: SnapshotStore,
    metrics: Arc<Metrics>,
    cfg: ServerConfig,
}

impl QueryServer {
    pub fn new(
        listener: TcpListener,
        store: SnapshotStore,
        metrics: Arc<Metrics>,
        cfg: ServerConfig,
    ) -> Self {
        Self {
            listener,
            store,
            metrics,
            cfg,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts until shutdown, one task per connection. In-flight
    /// connections get `shutdown_grace_ms` to finish before being aborted.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let opts = Arc::new(HandlerOptions {
            request_buffer_bytes: self.cfg.request_buffer_bytes,
            io_timeout: self.cfg.io_timeout(),
        });
        let limiter = self
            .cfg
            .max_connections
            .map(|n| Arc::new(Semaphore::new(n)));
        let mut tasks = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Hold off accepting while every slot is taken.
            let permit = match &limiter {
                Some(sem) => tokio::select! {
                    _ = shutdown.changed() => break,
                    permit = sem.clone().acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                },
                None => None,
            };

            tokio::select! {
                _ = shutdown.changed() => break,
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let store = self.store.clone();
                        let active = ActiveConnection::open(self.metrics.clone());
                        let opts = opts.clone();
                        tasks.spawn(async move {
                            let _permit = permit;
                            serve_connection(stream, peer, store, active, opts).await;
                        });
                    }
                    Err(err) => {
                        self.metrics.inc_connection_error("accept");
                        warn!(error = %err, "accept failed");
                    }
                },
            }
        }

        info!(in_flight = tasks.len(), "listener stopped");
        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.cfg.shutdown_grace(), drain)
            .await
            .is_err()
        {
            warn!(aborted = tasks.len(), "grace period elapsed, aborting connections");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}

/// Keeps the active-connections gauge right even when the task is aborted.
struct ActiveConnection {
    metrics: Arc<Metrics>,
}

impl ActiveConnection {
    fn open(metrics: Arc<Metrics>) -> Self {
        metrics.connection_opened();
        Self { metrics }
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.metrics.connection_closed();
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    store: SnapshotStore,
    active: ActiveConnection,
    opts: Arc<HandlerOptions>,
) {
    match handle_connection(stream, peer, &store, &opts).await {
        Ok(Some(route)) => active.metrics.inc_request(route.as_str()),
        Ok(None) => debug!(%peer, "peer closed without a request"),
        Err(err) => {
            active.metrics.inc_connection_error(err.stage());
            warn!(%peer, error = %err, "connection aborted");
        }
    }
}

async fn bounded<T>(
    limit: Option<Duration>,
    stage: &'static str,
    fut: impl Future<Output = io::Result<T>>,
) -> Result<io::Result<T>, ServerError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ServerError::Timeout(stage)),
        None => Ok(fut.await),
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    store: &SnapshotStore,
    opts: &HandlerOptions,
) -> Result<Option<Route>, ServerError> {
    let mut buf = vec![0_u8; opts.request_buffer_bytes];
    let n = bounded(opts.io_timeout, "read", stream.read(&mut buf))
        .await?
        .map_err(ServerError::Read)?;
    if n == 0 {
        return Ok(None);
    }

    let request = Request::from_bytes(&buf[..n]);
    let route = request.route();
    debug!(%peer, request = %request.line(), route = route.as_str(), "query");

    bounded(opts.io_timeout, "write", stream.write_all(PREAMBLE))
        .await?
        .map_err(ServerError::Write)?;

    let snapshot = store.current();
    let mut body = routes::render(route, &snapshot)?;
    body.extend_from_slice(b"\r\n");
    bounded(opts.io_timeout, "write", stream.write_all(&body))
        .await?
        .map_err(ServerError::Write)?;

    // The peer may already be gone; the response has been written either way.
    let _ = stream.shutdown().await;
    Ok(Some(route))
}
