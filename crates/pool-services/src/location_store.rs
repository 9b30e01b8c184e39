//! Location store: last reported location per session identity.
//!
//! One SQLite table, keyed by identity. Rows are upserted on every accepted
//! update and never expire. Proximity is a bounding box of
//! [`PROXIMITY_DEGREES`] on both axes, not a geodesic distance, and is not
//! corrected for longitude compression away from the equator.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

/// Half-width of the proximity box in decimal degrees (~200 m at the equator).
pub const PROXIMITY_DEGREES: f64 = 0.005;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS locations (
    identity  TEXT PRIMARY KEY,
    latitude  REAL NOT NULL,
    longitude REAL NOT NULL
)";

/// A stored location.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRecord {
    pub identity: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// True when `(lat_b, lng_b)` lies strictly inside the proximity box around `(lat_a, lng_a)`.
pub fn within_box(lat_a: f64, lng_a: f64, lat_b: f64, lng_b: f64) -> bool {
    (lat_a - lat_b).abs() < PROXIMITY_DEGREES && (lng_a - lng_b).abs() < PROXIMITY_DEGREES
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open location store at {0}: {1}")]
    Open(PathBuf, rusqlite::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("location store lock poisoned")]
    Poisoned,
    #[error("location store still held by {0} other handle(s)")]
    StillShared(usize),
}

/// Handle to the location table. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct LocationStore {
    conn: Arc<Mutex<Connection>>,
}

impl LocationStore {
    /// Open (or create) the database file and make sure the table exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| StoreError::Open(path.to_path_buf(), e))?;
        conn.execute(CREATE_TABLE, [])
            .map_err(|e| StoreError::Open(path.to_path_buf(), e))?;
        tracing::debug!(path = %path.display(), "location store opened");
        Ok(Self::from_connection(conn))
    }

    /// Private in-memory store. Used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute(CREATE_TABLE, [])?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Insert the identity's location, or overwrite it if a row exists.
    pub fn upsert(&self, identity: &str, latitude: f64, longitude: f64) -> Result<(), StoreError> {
        self.lock()?.execute(
            "INSERT INTO locations (identity, latitude, longitude) VALUES (?1, ?2, ?3)
             ON CONFLICT(identity) DO UPDATE SET
                latitude = excluded.latitude,
                longitude = excluded.longitude",
            params![identity, latitude, longitude],
        )?;
        Ok(())
    }

    /// Some other identity's location inside the proximity box, if any.
    ///
    /// Scans every row not owned by `identity` and returns the first match in
    /// table order. Not necessarily the closest.
    pub fn find_nearby(
        &self,
        identity: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<Option<LocationRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT identity, latitude, longitude FROM locations WHERE identity <> ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![identity], |row| {
            Ok(LocationRecord {
                identity: row.get(0)?,
                latitude: row.get(1)?,
                longitude: row.get(2)?,
            })
        })?;

        for row in rows {
            let record = row?;
            if within_box(latitude, longitude, record.latitude, record.longitude) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Current row for one identity.
    pub fn get(&self, identity: &str) -> Result<Option<LocationRecord>, StoreError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT identity, latitude, longitude FROM locations WHERE identity = ?1",
                params![identity],
                |row| {
                    Ok(LocationRecord {
                        identity: row.get(0)?,
                        latitude: row.get(1)?,
                        longitude: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Number of stored rows.
    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM locations", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Live handles to the shared connection, this one included.
    pub fn handles(&self) -> usize {
        Arc::strong_count(&self.conn)
    }

    /// Close the connection. Must be the last handle; otherwise nothing is
    /// closed and [`StoreError::StillShared`] reports how many others remain.
    pub fn close(self) -> Result<(), StoreError> {
        let mutex = Arc::try_unwrap(self.conn)
            .map_err(|shared| StoreError::StillShared(Arc::strong_count(&shared) - 1))?;
        let conn = mutex.into_inner().map_err(|_| StoreError::Poisoned)?;
        conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        tracing::debug!("location store closed");
        Ok(())
    }
}
