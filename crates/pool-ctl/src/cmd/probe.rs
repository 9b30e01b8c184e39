//! Probe commands: drive the client side of one session.

use anyhow::{Context, Result};

use pool_core::client::{Client, ClientError, Nearby};

async fn connect(addr: &str) -> Result<Client<tokio::net::TcpStream>> {
    match Client::connect(addr).await {
        Ok(client) => Ok(client),
        Err(ClientError::HandshakeRejected) => {
            anyhow::bail!("poold at {addr} rejected the handshake, try again later")
        }
        Err(e) => Err(e).with_context(|| format!("failed to reach poold at {addr}, is it running?")),
    }
}

pub async fn cmd_probe(addr: &str, latitude: f64, longitude: f64) -> Result<()> {
    let client = connect(addr).await?;
    let identity = client.identity().to_owned();
    let nearby = client
        .update(latitude, longitude)
        .await
        .context("location update failed")?;

    println!("═══════════════════════════════════════");
    println!("  Probe ({latitude}, {longitude})");
    println!("═══════════════════════════════════════");
    println!("  Identity : {identity}");
    match nearby {
        Nearby::Found {
            latitude,
            longitude,
        } => println!("  Nearby   : ({latitude}, {longitude})"),
        Nearby::Nothing => println!("  Nearby   : no nearby client"),
    }

    Ok(())
}

pub async fn cmd_offer(addr: &str) -> Result<()> {
    let client = connect(addr).await?;
    println!("{}", client.identity());
    Ok(())
}
