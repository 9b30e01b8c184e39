//! Session identities: minted once per accepted connection.
//!
//! Shape: `"<unix-seconds> | <address> | <sequence>"`. The timestamp and
//! address alone collide for two connections from one peer inside the same
//! second; the per-process sequence number separates those. Identities are
//! still not unique across daemon restarts that land in the same second with
//! a reset counter, so the store treats a colliding identity as the same
//! client (last write wins).

use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque session identity, used as the location store's primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionIdentity(String);

impl SessionIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hands out session identities. Holds only the sequence counter.
#[derive(Debug, Default)]
pub struct IdentityIssuer {
    next: AtomicU64,
}

impl IdentityIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint an identity for a connection accepted now from `peer`.
    pub fn issue(&self, peer: IpAddr) -> SessionIdentity {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        format_identity(unix_secs(), peer, seq)
    }
}

/// Pure formatting core of [`IdentityIssuer::issue`].
pub fn format_identity(unix_secs: u64, peer: IpAddr, seq: u64) -> SessionIdentity {
    SessionIdentity(format!("{unix_secs} | {} | {seq}", address_text(peer)))
}

/// IPv4 (and IPv4-mapped IPv6) as dot-joined octets; other IPv6 in canonical form.
pub fn address_text(peer: IpAddr) -> String {
    let v4 = match peer {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    };
    match v4 {
        Some(v4) => v4
            .octets()
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join("."),
        None => peer.to_string(),
    }
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
