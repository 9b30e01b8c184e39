//! Listener loop and the server context that owns it.
//!
//! The context holds the listening socket, the location store, and the stop
//! signal; nothing lives in globals. Each accepted connection gets a fresh
//! identity and runs its session on its own task. A failed session is logged
//! and forgotten. A failed accept ends the loop.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};

use pool_core::config::PoolConfig;
use pool_core::IdentityIssuer;
use pool_services::{LocationStore, StoreError};

use crate::session::{self, SessionContext};

/// Longest stop waits for store calls already running on the blocking pool.
const STORE_RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("cannot open location store: {0}")]
    Store(#[from] StoreError),
    #[error("failed to bind {0}: {1}")]
    Bind(SocketAddr, std::io::Error),
    #[error("accept failed: {0}")]
    Accept(std::io::Error),
    #[error("listener task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Cooperative stop request for a running server. Cheap to clone.
#[derive(Clone)]
pub struct StopSignal(broadcast::Sender<()>);

impl StopSignal {
    pub fn stop(&self) {
        // No receiver means the loop already exited.
        let _ = self.0.send(());
    }
}

/// A running server. Dropping the handle without calling [`ServerHandle::stop`]
/// also stops the loop, since the stop channel closes.
pub struct ServerHandle {
    local_addr: SocketAddr,
    stop: StopSignal,
    task: JoinHandle<Result<(), ServerError>>,
}

impl ServerHandle {
    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Stop accepting, tear down sessions, release socket and store.
    pub async fn stop(self) -> Result<(), ServerError> {
        self.stop.stop();
        self.wait().await
    }

    /// Wait for the loop to end on its own (stop signal or accept failure).
    pub async fn wait(self) -> Result<(), ServerError> {
        let Self { stop, task, .. } = self;
        let result = task.await?;
        drop(stop);
        result
    }
}

/// Open the store and bind the listener described by `config`.
///
/// Storage and bind failures surface here; nothing is left running on error.
pub async fn start(config: &PoolConfig) -> Result<ServerHandle, ServerError> {
    let store = LocationStore::open(&config.storage.path)?;
    tracing::info!(path = %config.storage.path.display(), "location store ready");

    let addr = SocketAddr::new(config.network.bind_addr, config.network.port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(addr, e))?;
    let local_addr = listener.local_addr().map_err(|e| ServerError::Bind(addr, e))?;
    tracing::info!(addr = %local_addr, "listening for clients");

    let (stop_tx, stop_rx) = broadcast::channel(1);
    let server = ServerContext {
        listener,
        issuer: IdentityIssuer::new(),
        sessions: Arc::new(SessionContext::new(store, &config.session)),
        shutdown: stop_rx,
    };

    Ok(ServerHandle {
        local_addr,
        stop: StopSignal(stop_tx),
        task: tokio::spawn(server.run()),
    })
}

/// [`start`] with default settings for everything but port and database path.
pub async fn start_on(port: u16, storage_path: impl Into<PathBuf>) -> Result<ServerHandle, ServerError> {
    let mut config = PoolConfig::default();
    config.network.port = port;
    config.storage.path = storage_path.into();
    start(&config).await
}

struct ServerContext {
    listener: TcpListener,
    issuer: IdentityIssuer,
    sessions: Arc<SessionContext>,
    shutdown: broadcast::Receiver<()>,
}

impl ServerContext {
    async fn run(mut self) -> Result<(), ServerError> {
        let mut active = JoinSet::new();

        let result = loop {
            tokio::select! {
                biased;

                _ = self.shutdown.recv() => {
                    tracing::info!("listener shutting down");
                    break Ok(());
                }

                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::error!(error = %e, "accept failed, stopping listener");
                            break Err(ServerError::Accept(e));
                        }
                    };

                    let identity = self.issuer.issue(peer.ip());
                    tracing::info!(%peer, %identity, "client connected");

                    let ctx = Arc::clone(&self.sessions);
                    active.spawn(async move {
                        session::serve(stream, identity, &ctx).await;
                    });
                }

                Some(joined) = active.join_next(), if !active.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(error = %e, "session task panicked");
                        }
                    }
                }
            }
        };

        let in_flight = active.len();
        if in_flight > 0 {
            tracing::info!(in_flight, "aborting in-flight sessions");
        }
        active.shutdown().await;
        drop(self.listener);

        match Arc::try_unwrap(self.sessions) {
            Ok(ctx) => {
                if let Err(e) = release_store(ctx.store).await {
                    tracing::warn!(error = %e, "failed to close location store");
                }
            }
            Err(_) => tracing::warn!("session context still shared at shutdown"),
        }

        tracing::info!("listener stopped");
        result
    }
}

/// Close the store once every other handle is gone.
///
/// Aborting a session does not stop a store call it already handed to the
/// blocking pool, and that call keeps its own handle until it returns.
async fn release_store(store: LocationStore) -> Result<(), StoreError> {
    let deadline = tokio::time::Instant::now() + STORE_RELEASE_TIMEOUT;
    while store.handles() > 1 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    store.close()
}
