//! Pool integration test harness.
//!
//! Each test starts its own in-process daemon on 127.0.0.1 with an
//! OS-assigned port and a private SQLite file under the temp directory,
//! then talks to it over real TCP sockets.
//!
//!   cargo test --test integration
//!
//! Each test is responsible for shutting down the server it starts.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpStream;

use pool_core::config::PoolConfig;
use pool_services::LocationStore;
use poold::ServerHandle;

mod lifecycle;
mod protocol;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Upper bound for any single client interaction in tests.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// A daemon running inside the test process.
pub struct TestServer {
    pub handle: ServerHandle,
    pub addr: SocketAddr,
    pub dir: PathBuf,
}

impl TestServer {
    pub fn db_path(&self) -> PathBuf {
        self.dir.join("locations.sqlite")
    }

    /// Stop the daemon and return the number of rows it left behind.
    pub async fn shutdown(self) -> Result<usize> {
        let db = self.db_path();
        self.handle.stop().await.context("server did not stop cleanly")?;
        let rows = LocationStore::open(&db)?.count()?;
        let _ = std::fs::remove_dir_all(&self.dir);
        Ok(rows)
    }
}

/// Per-test scratch directory, keyed by test name and process id.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pool-it-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("scratch dir");
    dir
}

pub fn test_config(dir: &std::path::Path) -> PoolConfig {
    let mut config = PoolConfig::default();
    config.network.bind_addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.network.port = 0;
    config.storage.path = dir.join("locations.sqlite");
    config.session.read_timeout_secs = 5;
    config
}

pub async fn spawn_server(name: &str) -> Result<TestServer> {
    let dir = scratch_dir(name);
    let handle = poold::start(&test_config(&dir)).await?;
    let addr = handle.local_addr();
    Ok(TestServer { handle, addr, dir })
}

pub async fn connect(addr: SocketAddr) -> Result<TcpStream> {
    tokio::time::timeout(STEP_TIMEOUT, TcpStream::connect(addr))
        .await
        .context("connect timed out")?
        .context("connect failed")
}
