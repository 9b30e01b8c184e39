use crate::*;

use pool_core::client::{Client, Nearby};
use pool_core::wire::read_message;
use poold::ServerError;

#[tokio::test]
async fn test_stop_releases_port() {
    let server = spawn_server("stop-port").await.unwrap();
    let addr = server.addr;
    server.shutdown().await.unwrap();

    let rebound = tokio::net::TcpListener::bind(addr).await;
    assert!(rebound.is_ok(), "port still held after stop: {rebound:?}");
    assert!(tokio::net::TcpStream::connect(addr).await.is_ok());
}

#[tokio::test]
async fn test_port_in_use_is_startup_error() {
    let server = spawn_server("port-in-use").await.unwrap();

    let dir = scratch_dir("port-in-use-2");
    let mut config = test_config(&dir);
    config.network.port = server.addr.port();
    let err = poold::start(&config).await.err().expect("second bind should fail");
    assert!(matches!(err, ServerError::Bind(..)), "unexpected error: {err}");

    let _ = std::fs::remove_dir_all(&dir);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unopenable_storage_is_startup_error() {
    let dir = scratch_dir("bad-storage");
    let mut config = test_config(&dir);
    config.storage.path = dir.join("missing").join("nested").join("db.sqlite");

    let err = poold::start(&config).await.err().expect("store open should fail");
    assert!(matches!(err, ServerError::Store(_)), "unexpected error: {err}");

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_start_on_port_and_path() {
    let dir = scratch_dir("start-on");
    let server = poold::start_on(0, dir.join("locations.sqlite")).await.unwrap();
    let port = server.local_addr().port();

    let client = Client::connect(("127.0.0.1", port)).await.unwrap();
    assert_eq!(client.update(7.0, 7.0).await.unwrap(), Nearby::Nothing);

    server.stop().await.unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}

/// A client that never answers must not hold up other clients.
#[tokio::test]
async fn test_stalled_client_does_not_block_others() {
    let server = spawn_server("stalled").await.unwrap();

    let mut stalled = connect(server.addr).await.unwrap();
    let _offer = read_message(&mut stalled).await.unwrap();

    let client = Client::handshake(connect(server.addr).await.unwrap()).await.unwrap();
    let nearby = tokio::time::timeout(STEP_TIMEOUT, client.update(4.0, 4.0))
        .await
        .expect("second client blocked by stalled one")
        .unwrap();
    assert_eq!(nearby, Nearby::Nothing);

    drop(stalled);
    server.shutdown().await.unwrap();
}

/// Stop completes promptly even with a session parked mid-handshake.
#[tokio::test]
async fn test_stop_with_session_in_flight() {
    let server = spawn_server("in-flight").await.unwrap();

    let mut parked = connect(server.addr).await.unwrap();
    let _offer = read_message(&mut parked).await.unwrap();

    let rows = tokio::time::timeout(STEP_TIMEOUT, server.shutdown())
        .await
        .expect("stop hung on in-flight session")
        .unwrap();
    assert_eq!(rows, 0);

    // The aborted session closed its socket.
    let next = tokio::time::timeout(STEP_TIMEOUT, read_message(&mut parked))
        .await
        .expect("socket left open after stop");
    assert!(next.is_err());
}

#[tokio::test]
async fn test_silent_client_times_out_with_sentinel() {
    let dir = scratch_dir("read-timeout");
    let mut config = test_config(&dir);
    config.session.read_timeout_secs = 1;
    let server = poold::start(&config).await.unwrap();

    let mut sock = connect(server.local_addr()).await.unwrap();
    let _offer = read_message(&mut sock).await.unwrap();
    let reply = tokio::time::timeout(STEP_TIMEOUT, read_message(&mut sock))
        .await
        .expect("no reply after read timeout")
        .unwrap();
    assert_eq!(reply, pool_core::LocationMessage::sentinel());

    server.stop().await.unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}
