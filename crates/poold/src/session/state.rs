//! Session state and the per-identity lock table shared by all sessions.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Where a session is in its single handshake → update → response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Identity issued and offered to the client.
    HandshakeOffered,
    /// Client echoed the offered identity.
    HandshakeConfirmed,
    /// Waiting for the client's real location.
    AwaitingUpdate,
    /// Match or sentinel written back.
    Responded,
    Closed,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HandshakeOffered => "handshake_offered",
            Self::HandshakeConfirmed => "handshake_confirmed",
            Self::AwaitingUpdate => "awaiting_update",
            Self::Responded => "responded",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Serialises the upsert + lookup pair per identity across concurrent sessions.
///
/// Entries exist only while someone holds or waits on them.
#[derive(Clone, Default)]
pub struct IdentityLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, identity: &str) -> IdentityGuard {
        // Clone out of the map before awaiting; never hold a shard lock across .await.
        let lock = {
            let entry = self.locks.entry(identity.to_owned()).or_default();
            Arc::clone(entry.value())
        };
        let guard = lock.lock_owned().await;
        IdentityGuard {
            locks: self.clone(),
            identity: identity.to_owned(),
            guard: Some(guard),
        }
    }

    /// Identities currently locked or contended.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct IdentityGuard {
    locks: IdentityLocks,
    identity: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .locks
            .remove_if(&self.identity, |_, lock| Arc::strong_count(lock) == 1);
    }
}
