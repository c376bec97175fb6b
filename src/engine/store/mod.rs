// Paw Engram: Tier Database Layer
// One writer connection plus a small pool of read connections per durable
// tier. Searches take a reader, so concurrent queries and the sweep's scans
// do not queue behind each other or behind writes. On disk the pool relies on
// WAL; in memory every connection attaches to one shared-cache database.
//
// Module layout:
//   items      : memory item CRUD, keyword/context candidates, tier sweeps
//   links      : synchronicity link persistence
//   audit      : append-only audit trail
//   embedding  : blob codecs for compressed embeddings, dense cosine

use crate::atoms::constants::{DEFAULT_SPARSITY_CEILING, READER_POOL_SIZE, SQLITE_BUSY_TIMEOUT_MS};
use crate::atoms::error::EngineResult;
use crate::engine::engram::schema::run_engram_migrations;
use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub mod audit;
pub mod embedding;
mod items;
mod links;

pub use audit::AuditEntry;

/// Thread-safe wrapper around one tier database.
pub struct EngramStore {
    /// The writer connection, protected by a Mutex.
    /// `pub` for tests that need to reach into the raw tables.
    pub conn: Mutex<Connection>,
    /// Read-only connections for searches and scans.
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    label: &'static str,
    sparsity_ceiling: f32,
}

fn open_flags() -> OpenFlags {
    OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX
}

/// A reader on `target`. `read_uncommitted` only matters in shared-cache
/// mode, where it keeps readers from taking table locks that stall the writer.
fn open_reader(target: &str) -> EngineResult<Connection> {
    let conn = Connection::open_with_flags(target, open_flags())?;
    conn.busy_timeout(Duration::from_millis(SQLITE_BUSY_TIMEOUT_MS))?;
    conn.execute_batch("PRAGMA read_uncommitted=1; PRAGMA query_only=1;")?;
    Ok(conn)
}

impl EngramStore {
    /// Open (or create) a tier database file and run migrations.
    pub fn open(path: &Path, label: &'static str) -> EngineResult<Self> {
        info!("[engram] Opening {} store at {:?}", label, path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(SQLITE_BUSY_TIMEOUT_MS))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch("PRAGMA synchronous=NORMAL;").ok();
        Self::with_readers(conn, &path.to_string_lossy(), label)
    }

    /// In-memory database private to this store (tests, ephemeral engines).
    pub fn open_in_memory(label: &'static str) -> EngineResult<Self> {
        let uri = format!("file:engram-{}-{}?mode=memory&cache=shared", label, uuid::Uuid::new_v4());
        let conn = Connection::open_with_flags(&uri, open_flags())?;
        conn.busy_timeout(Duration::from_millis(SQLITE_BUSY_TIMEOUT_MS))?;
        Self::with_readers(conn, &uri, label)
    }

    /// Migrate through the writer, then attach the read pool to `target`.
    fn with_readers(conn: Connection, target: &str, label: &'static str) -> EngineResult<Self> {
        run_engram_migrations(&conn)?;
        let readers = (0..READER_POOL_SIZE.max(1))
            .map(|_| open_reader(target).map(Mutex::new))
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(Self {
            conn: Mutex::new(conn),
            readers,
            next_reader: AtomicUsize::new(0),
            label,
            sparsity_ceiling: DEFAULT_SPARSITY_CEILING,
        })
    }

    /// Ceiling used when validating embeddings on load.
    pub fn with_sparsity_ceiling(mut self, ceiling: f32) -> Self {
        self.sparsity_ceiling = ceiling;
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// A free reader if there is one, otherwise wait on the next in turn.
    /// Never held while taking the writer.
    pub(crate) fn reader(&self) -> MutexGuard<'_, Connection> {
        for r in &self.readers {
            if let Some(guard) = r.try_lock() {
                return guard;
            }
        }
        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        self.readers[idx].lock()
    }
}

/// Timestamps are stored as fixed-width RFC 3339 so they compare as strings.
pub(crate) fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_sort_lexicographically() {
        let a = Utc::now();
        let b = a + chrono::Duration::milliseconds(1500);
        assert!(fmt_ts(&a) < fmt_ts(&b));
        let parsed = parse_ts(&fmt_ts(&a)).unwrap();
        assert_eq!(parsed.timestamp_millis(), a.timestamp_millis());
    }

    #[test]
    fn open_on_disk_creates_file() {
        let dir = std::env::temp_dir().join(format!("paw-engram-{}", uuid::Uuid::new_v4()));
        let path = dir.join("short_term.db");
        let store = EngramStore::open(&path, "short_term").unwrap();
        assert_eq!(store.label(), "short_term");
        assert!(path.exists());
        drop(store);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn reads_do_not_wait_on_the_writer() {
        let store = std::sync::Arc::new(EngramStore::open_in_memory("short_term").unwrap());
        store.retire_id("gone", "deleted", &Utc::now()).unwrap();

        let writer = store.conn.lock();
        let (tx, rx) = std::sync::mpsc::channel();
        let reading = store.clone();
        std::thread::spawn(move || {
            let _ = tx.send(reading.is_retired("gone").unwrap());
        });
        let seen = rx.recv_timeout(std::time::Duration::from_secs(2)).expect("read blocked behind the writer");
        assert!(seen);
        drop(writer);
    }

    #[test]
    fn busy_readers_fall_through_to_free_ones() {
        let store = EngramStore::open_in_memory("long_term").unwrap();
        let held: Vec<_> = (0..READER_POOL_SIZE - 1).map(|_| store.reader()).collect();
        assert_eq!(store.count_links().unwrap(), 0);
        drop(held);
    }
}
