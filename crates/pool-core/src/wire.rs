//! Pool wire format: the one message type clients and the daemon exchange.
//!
//! Every message on the socket is a frame: a big-endian `u32` length followed
//! by that many bytes of JSON encoding a [`LocationMessage`]. The field set and
//! the nullability of `identity` are the protocol; the JSON layout follows
//! directly from the serde derive and must not be renamed.
//!
//! The coordinate pair (360, 360) is never a real location. It carries the
//! issued identity during the handshake, and with `identity = null` it is the
//! "no result / try again later" reply.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Latitude of the out-of-bounds sentinel location.
pub const SENTINEL_LATITUDE: f64 = 360.0;
/// Longitude of the out-of-bounds sentinel location.
pub const SENTINEL_LONGITUDE: f64 = 360.0;

/// Largest frame body accepted from a peer.
/// A location message is well under 200 bytes of JSON.
pub const MAX_FRAME_LEN: u32 = 4096;

// ── Message ───────────────────────────────────────────────────────────────────

/// A location, optionally tied to a session identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationMessage {
    /// Session identity. `None` asks the daemon to fill in the caller's own.
    pub identity: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

impl LocationMessage {
    pub fn new(identity: Option<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            identity,
            latitude,
            longitude,
        }
    }

    /// A location without an identity; the daemon assigns the session's.
    pub fn anonymous(latitude: f64, longitude: f64) -> Self {
        Self::new(None, latitude, longitude)
    }

    /// The "no result" reply: sentinel coordinates, no identity.
    pub fn sentinel() -> Self {
        Self::new(None, SENTINEL_LATITUDE, SENTINEL_LONGITUDE)
    }

    /// The handshake offer: sentinel coordinates carrying `identity`.
    pub fn offer(identity: impl Into<String>) -> Self {
        Self::new(Some(identity.into()), SENTINEL_LATITUDE, SENTINEL_LONGITUDE)
    }

    pub fn has_sentinel_coords(&self) -> bool {
        self.latitude == SENTINEL_LATITUDE && self.longitude == SENTINEL_LONGITUDE
    }

    /// True when the coordinates are a plausible point on the globe.
    pub fn has_valid_coords(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// How a client should read this message when it arrives from the daemon.
    pub fn kind(&self) -> ReplyKind {
        match (&self.identity, self.has_sentinel_coords()) {
            (Some(_), true) => ReplyKind::Offer,
            (None, true) => ReplyKind::NoResult,
            (_, false) => ReplyKind::Location,
        }
    }
}

/// Client-side classification of a daemon message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// Handshake offer carrying an identity.
    Offer,
    /// Sentinel: no nearby client, or the daemon gave up on this session.
    NoResult,
    /// A real location of some other client.
    Location,
}

// ── Framing ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("connection closed by peer")]
    Closed,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds limit of {limit}", limit = MAX_FRAME_LEN)]
    FrameTooLarge(u32),
    #[error("malformed location message: {0}")]
    Decode(#[from] serde_json::Error),
}

impl WireError {
    /// True when the transport itself is gone and nothing more can be sent.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Closed | Self::Io(_))
    }
}

/// Encode one message as a complete frame (length prefix included).
pub fn encode_frame(msg: &LocationMessage) -> Result<Vec<u8>, WireError> {
    let body = serde_json::to_vec(msg)?;
    let len = u32::try_from(body.len()).map_err(|_| WireError::FrameTooLarge(u32::MAX))?;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Write one message and flush.
pub async fn write_message<W>(writer: &mut W, msg: &LocationMessage) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one message. A clean EOF before the length prefix is [`WireError::Closed`].
pub async fn read_message<R>(reader: &mut R) -> Result<LocationMessage, WireError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(WireError::Closed),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}
