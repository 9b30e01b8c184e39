//! Identity-echo handshake.
//!
//! The daemon offers `{identity, 360, 360}`; the client must send back a
//! message carrying the same identity. Only the identity field is compared.
//! Each mismatch is answered with the same offer until the attempt budget is
//! spent. This establishes a stable session, not an authenticated one.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use pool_core::wire::{write_message, LocationMessage};
use pool_core::SessionIdentity;

use super::{read_client, SessionError};

/// Offer `identity` and wait for it to be echoed, up to `attempts` times.
pub async fn handshake<S>(
    stream: &mut S,
    identity: &SessionIdentity,
    attempts: u32,
    read_timeout: Option<Duration>,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let offer = LocationMessage::offer(identity.as_str());

    for attempt in 1..=attempts {
        write_message(stream, &offer).await?;
        tracing::trace!(%identity, attempt, "sent handshake offer");

        let echo = read_client(stream, read_timeout).await?;
        if echo.identity.as_deref() == Some(identity.as_str()) {
            tracing::debug!(%identity, attempt, "handshake confirmed");
            return Ok(());
        }

        tracing::debug!(
            %identity,
            attempt,
            echoed = ?echo.identity,
            "handshake identity mismatch"
        );
    }

    Err(SessionError::HandshakeExhausted { attempts })
}
