//! Update phase: read the client's location, store it, look for a neighbour.

use tokio::io::{AsyncRead, AsyncWrite};

use pool_core::SessionIdentity;
use pool_services::{LocationStore, StoreError};

use super::{read_client, Reply, SessionContext, SessionError};

/// Read one location update and produce the reply for it.
///
/// The store is not touched unless the update decodes and carries real
/// coordinates. A missing identity defaults to the session's own.
pub async fn exchange<S>(
    stream: &mut S,
    identity: &SessionIdentity,
    ctx: &SessionContext,
) -> Result<Reply, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let update = read_client(stream, ctx.read_timeout).await?;
    if !update.has_valid_coords() {
        return Err(SessionError::InvalidCoordinates {
            latitude: update.latitude,
            longitude: update.longitude,
        });
    }

    let owner = update
        .identity
        .unwrap_or_else(|| identity.as_str().to_owned());
    let (latitude, longitude) = (update.latitude, update.longitude);

    let _guard = ctx.locks.acquire(&owner).await;

    {
        let owner = owner.clone();
        blocking(&ctx.store, move |store| store.upsert(&owner, latitude, longitude)).await?;
    }
    tracing::debug!(%identity, owner = %owner, latitude, longitude, "location stored");

    let found = blocking(&ctx.store, move |store| {
        store.find_nearby(&owner, latitude, longitude)
    })
    .await?;

    Ok(match found {
        Some(record) => Reply::Match(record),
        None => Reply::Empty,
    })
}

/// Run a store call on the blocking pool.
async fn blocking<T, F>(store: &LocationStore, f: F) -> Result<T, SessionError>
where
    F: FnOnce(&LocationStore) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(&store))
        .await
        .map_err(|e| SessionError::Blocking(e.to_string()))?
        .map_err(SessionError::Store)
}
