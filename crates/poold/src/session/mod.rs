//! Session protocol: one handshake, one update, one reply per connection.
//!
//! Failures never escape a session. Whatever goes wrong (mismatch budget
//! spent, malformed payload, silent client, store error), the client gets
//! the sentinel location if the socket is still usable, and the connection
//! is closed. The listener keeps accepting.

pub mod exchange;
pub mod handshake;
mod state;

pub use state::{IdentityGuard, IdentityLocks, SessionState};

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use pool_core::config::SessionConfig;
use pool_core::wire::{read_message, write_message, LocationMessage, WireError};
use pool_core::SessionIdentity;
use pool_services::{LocationRecord, LocationStore, StoreError};

/// Everything a session needs from the daemon. Shared by all sessions.
pub struct SessionContext {
    pub store: LocationStore,
    pub locks: IdentityLocks,
    pub read_timeout: Option<Duration>,
    pub handshake_attempts: u32,
}

impl SessionContext {
    pub fn new(store: LocationStore, config: &SessionConfig) -> Self {
        Self {
            store,
            locks: IdentityLocks::new(),
            read_timeout: config.read_timeout(),
            handshake_attempts: config.attempts(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("client read timed out")]
    Timeout,
    #[error("handshake failed after {attempts} attempts")]
    HandshakeExhausted { attempts: u32 },
    #[error("coordinates out of range: ({latitude}, {longitude})")]
    InvalidCoordinates { latitude: f64, longitude: f64 },
    #[error("location store: {0}")]
    Store(#[from] StoreError),
    #[error("store task failed: {0}")]
    Blocking(String),
}

impl SessionError {
    /// The socket is unusable; don't bother writing the sentinel.
    pub fn transport_broken(&self) -> bool {
        matches!(self, Self::Wire(e) if e.is_transport())
    }
}

/// Result of a session, before it is put on the wire.
#[derive(Debug)]
pub enum Reply {
    /// Another client inside the proximity box.
    Match(LocationRecord),
    /// Nobody nearby.
    Empty,
    /// The session was abandoned.
    Failed(SessionError),
}

impl Reply {
    /// Wire form, addressed to `caller`. Everything but a match collapses to
    /// the sentinel; a match carries the neighbour's coordinates, never its identity.
    pub fn to_wire(&self, caller: &SessionIdentity) -> LocationMessage {
        match self {
            Self::Match(record) => LocationMessage::new(
                Some(caller.as_str().to_owned()),
                record.latitude,
                record.longitude,
            ),
            Self::Empty | Self::Failed(_) => LocationMessage::sentinel(),
        }
    }
}

/// Read one client message, bounded by the configured timeout.
pub(crate) async fn read_client<S>(
    stream: &mut S,
    timeout: Option<Duration>,
) -> Result<LocationMessage, SessionError>
where
    S: AsyncRead + Unpin,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, read_message(stream))
            .await
            .map_err(|_| SessionError::Timeout)?
            .map_err(SessionError::from),
        None => Ok(read_message(stream).await?),
    }
}

/// Drive one accepted connection to completion.
pub async fn serve<S>(mut stream: S, identity: SessionIdentity, ctx: &SessionContext) -> Reply
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut state = SessionState::HandshakeOffered;
    let outcome = drive(&mut stream, &identity, ctx, &mut state).await;

    let reply = match outcome {
        Ok(reply) => reply,
        Err(e) => {
            match &e {
                SessionError::Store(_) | SessionError::Blocking(_) => {
                    tracing::error!(%identity, %state, error = %e, "store failure, abandoning session")
                }
                _ => tracing::warn!(%identity, %state, error = %e, "session failed"),
            }
            Reply::Failed(e)
        }
    };

    let send = !matches!(&reply, Reply::Failed(e) if e.transport_broken());
    if send {
        if let Err(e) = write_message(&mut stream, &reply.to_wire(&identity)).await {
            tracing::debug!(%identity, error = %e, "could not deliver reply");
        }
    }
    let _ = stream.shutdown().await;

    state = match reply {
        Reply::Failed(_) => SessionState::Failed,
        _ => SessionState::Closed,
    };
    tracing::debug!(%identity, %state, "session ended");
    reply
}

async fn drive<S>(
    stream: &mut S,
    identity: &SessionIdentity,
    ctx: &SessionContext,
    state: &mut SessionState,
) -> Result<Reply, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    handshake::handshake(stream, identity, ctx.handshake_attempts, ctx.read_timeout).await?;
    transition(identity, state, SessionState::HandshakeConfirmed);
    transition(identity, state, SessionState::AwaitingUpdate);

    let reply = exchange::exchange(stream, identity, ctx).await?;
    transition(identity, state, SessionState::Responded);
    match &reply {
        Reply::Match(record) => {
            tracing::info!(%identity, neighbour = %record.identity, "nearby client found")
        }
        _ => tracing::info!(%identity, "no nearby client"),
    }
    Ok(reply)
}

fn transition(identity: &SessionIdentity, state: &mut SessionState, next: SessionState) {
    tracing::debug!(%identity, from = %state, to = %next, "session transition");
    *state = next;
}
