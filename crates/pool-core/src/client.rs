//! Client side of the location exchange.
//!
//! Drives one connection through the handshake and a single update, the way
//! a well-behaved client is expected to. Used by `pool-ctl` and by tests.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::wire::{read_message, write_message, LocationMessage, ReplyKind, WireError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("expected a handshake offer, got {0:?}")]
    NoOffer(LocationMessage),
    #[error("daemon rejected the handshake")]
    HandshakeRejected,
}

/// What the daemon answered to a location update.
#[derive(Debug, Clone, PartialEq)]
pub enum Nearby {
    /// Another client inside the proximity box.
    Found { latitude: f64, longitude: f64 },
    /// Sentinel: nobody nearby, or the daemon failed this session.
    Nothing,
}

/// A connection that has completed the handshake.
pub struct Client<S> {
    stream: S,
    identity: String,
}

impl Client<TcpStream> {
    /// Connect and perform the handshake.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await.map_err(WireError::from)?;
        Self::handshake(stream).await
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Read the offer and echo it back.
    pub async fn handshake(mut stream: S) -> Result<Self, ClientError> {
        let offer = read_message(&mut stream).await?;
        let identity = match (offer.kind(), &offer.identity) {
            (ReplyKind::Offer, Some(id)) => id.clone(),
            (ReplyKind::NoResult, _) => return Err(ClientError::HandshakeRejected),
            _ => return Err(ClientError::NoOffer(offer)),
        };
        write_message(&mut stream, &offer).await?;
        Ok(Self { stream, identity })
    }

    /// Identity the daemon issued for this connection.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Report a location and wait for the daemon's answer.
    pub async fn update(mut self, latitude: f64, longitude: f64) -> Result<Nearby, ClientError> {
        let msg = LocationMessage::new(Some(self.identity.clone()), latitude, longitude);
        write_message(&mut self.stream, &msg).await?;

        let reply = read_message(&mut self.stream).await?;
        Ok(match reply.kind() {
            ReplyKind::Location => Nearby::Found {
                latitude: reply.latitude,
                longitude: reply.longitude,
            },
            ReplyKind::NoResult | ReplyKind::Offer => Nearby::Nothing,
        })
    }
}
