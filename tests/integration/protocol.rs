use crate::*;

use pool_core::client::{Client, Nearby};
use pool_core::wire::{read_message, write_message, LocationMessage, ReplyKind, WireError};
use tokio::io::AsyncWriteExt;

async fn probe(addr: SocketAddr, lat: f64, lng: f64) -> Result<Nearby> {
    let client = Client::handshake(connect(addr).await?).await?;
    Ok(tokio::time::timeout(STEP_TIMEOUT, client.update(lat, lng)).await??)
}

/// The offer carries an identity built from the client's address.
#[tokio::test]
async fn test_handshake_offer_contains_client_ip() {
    let server = spawn_server("offer-ip").await.unwrap();

    let mut sock = connect(server.addr).await.unwrap();
    let offer = read_message(&mut sock).await.unwrap();
    assert_eq!(offer.kind(), ReplyKind::Offer);
    let identity = offer.identity.clone().unwrap();
    assert!(identity.contains("127.0.0.1"), "identity: {identity}");

    write_message(&mut sock, &offer).await.unwrap();
    drop(sock);

    server.shutdown().await.unwrap();
}

/// Scenario A: nobody else registered, the reply is the sentinel.
#[tokio::test]
async fn test_lone_client_receives_sentinel() {
    let server = spawn_server("lone").await.unwrap();

    let nearby = probe(server.addr, 5.001, 5.001).await.unwrap();
    assert_eq!(nearby, Nearby::Nothing);

    assert_eq!(server.shutdown().await.unwrap(), 1);
}

/// Scenario B: the second client gets the first client's stored coordinates.
#[tokio::test]
async fn test_two_clients_within_bounds() {
    let server = spawn_server("two-clients").await.unwrap();

    assert_eq!(probe(server.addr, 5.001, 5.001).await.unwrap(), Nearby::Nothing);

    // Same peer address, same second: the issued identities must still differ.
    let nearby = probe(server.addr, 5.003, 5.003).await.unwrap();
    assert_eq!(
        nearby,
        Nearby::Found {
            latitude: 5.001,
            longitude: 5.001
        }
    );

    assert_eq!(server.shutdown().await.unwrap(), 2);
}

#[tokio::test]
async fn test_box_edges_over_the_wire() {
    let server = spawn_server("box-edges").await.unwrap();

    assert_eq!(probe(server.addr, 10.0, 20.0).await.unwrap(), Nearby::Nothing);
    assert_eq!(probe(server.addr, 10.0051, 20.0).await.unwrap(), Nearby::Nothing);
    assert_eq!(
        probe(server.addr, 9.9951, 19.9951).await.unwrap(),
        Nearby::Found {
            latitude: 10.0,
            longitude: 20.0
        }
    );

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_five_wrong_echoes_then_right_completes() {
    let server = spawn_server("five-wrong").await.unwrap();

    let mut sock = connect(server.addr).await.unwrap();
    let mut offer = read_message(&mut sock).await.unwrap();
    for _ in 0..5 {
        let wrong = LocationMessage::new(Some("not-my-identity".into()), 360.0, 360.0);
        write_message(&mut sock, &wrong).await.unwrap();
        offer = read_message(&mut sock).await.unwrap();
        assert_eq!(offer.kind(), ReplyKind::Offer, "daemon should re-offer");
    }
    write_message(&mut sock, &offer).await.unwrap();

    let update = LocationMessage::new(offer.identity.clone(), 1.0, 1.0);
    write_message(&mut sock, &update).await.unwrap();
    let reply = read_message(&mut sock).await.unwrap();
    assert_eq!(reply.kind(), ReplyKind::NoResult);

    assert_eq!(server.shutdown().await.unwrap(), 1);
}

#[tokio::test]
async fn test_exhausted_handshake_writes_nothing() {
    let server = spawn_server("exhausted").await.unwrap();

    let mut sock = connect(server.addr).await.unwrap();
    for _ in 0..6 {
        let offer = read_message(&mut sock).await.unwrap();
        assert_eq!(offer.kind(), ReplyKind::Offer);
        let wrong = LocationMessage::new(Some("nope".into()), 1.0, 1.0);
        write_message(&mut sock, &wrong).await.unwrap();
    }
    assert_eq!(read_message(&mut sock).await.unwrap(), LocationMessage::sentinel());
    assert!(matches!(read_message(&mut sock).await, Err(WireError::Closed)));

    assert_eq!(server.shutdown().await.unwrap(), 0);
}

#[tokio::test]
async fn test_malformed_update_gets_sentinel() {
    let server = spawn_server("malformed").await.unwrap();

    let mut sock = connect(server.addr).await.unwrap();
    let offer = read_message(&mut sock).await.unwrap();
    write_message(&mut sock, &offer).await.unwrap();

    let body = b"definitely not a location";
    sock.write_all(&(body.len() as u32).to_be_bytes()).await.unwrap();
    sock.write_all(body).await.unwrap();
    sock.flush().await.unwrap();

    assert_eq!(read_message(&mut sock).await.unwrap(), LocationMessage::sentinel());

    // The listener is still serving.
    assert_eq!(probe(server.addr, 3.0, 3.0).await.unwrap(), Nearby::Nothing);

    assert_eq!(server.shutdown().await.unwrap(), 1);
}

/// Two connections reporting under one identity leave a single row with the latest value.
#[tokio::test]
async fn test_reused_identity_upserts() {
    let server = spawn_server("reused-identity").await.unwrap();

    for (lat, lng) in [(1.0, 1.0), (2.0, 2.0)] {
        let mut sock = connect(server.addr).await.unwrap();
        let offer = read_message(&mut sock).await.unwrap();
        write_message(&mut sock, &offer).await.unwrap();
        let update = LocationMessage::new(Some("shared-identity".into()), lat, lng);
        write_message(&mut sock, &update).await.unwrap();
        read_message(&mut sock).await.unwrap();
    }

    let db = server.db_path();
    let dir = server.dir.clone();
    server.handle.stop().await.unwrap();

    let store = LocationStore::open(&db).unwrap();
    assert_eq!(store.count().unwrap(), 1);
    let row = store.get("shared-identity").unwrap().unwrap();
    assert_eq!((row.latitude, row.longitude), (2.0, 2.0));
    let _ = std::fs::remove_dir_all(&dir);
}

/// A store failure costs that client its answer, never the listener.
#[tokio::test]
async fn test_store_failure_gets_sentinel_and_listener_survives() {
    let server = spawn_server("store-failure").await.unwrap();
    assert_eq!(probe(server.addr, 5.0, 5.0).await.unwrap(), Nearby::Nothing);

    // Pull the table out from under the running daemon.
    let conn = rusqlite::Connection::open(server.db_path()).unwrap();
    conn.execute("DROP TABLE locations", []).unwrap();
    drop(conn);

    // Would match the row above if the upsert and lookup could run.
    assert_eq!(probe(server.addr, 5.001, 5.001).await.unwrap(), Nearby::Nothing);
    assert_eq!(probe(server.addr, 5.002, 5.002).await.unwrap(), Nearby::Nothing);

    assert_eq!(server.shutdown().await.unwrap(), 0);
}
