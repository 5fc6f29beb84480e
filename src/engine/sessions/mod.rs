// Engram Salience: Session Store
// Holds the SQLite handle the salience engine reads and writes through.
// One explicit handle is opened at process start and passed by reference
// into every component; there is no module-level store state.
//
// Module layout:
//   schema: idempotent migrations (memory_index, working_memory, wm_sessions, causal_edges)
//   memory_index: read paths over the collaborator-owned memory table
//   working_memory: per-session attention rows, transactional upsert + decay
//   causal_edges: edge CRUD, upsert, stats queries

use crate::atoms::error::{EngineError, EngineResult};
use log::info;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use rusqlite::Connection;
use std::path::Path;

mod causal_edges;
mod memory_index;
mod schema;
mod working_memory;

pub(crate) use causal_edges::EdgeWrite;
pub use memory_index::NewMemory;
pub use working_memory::DecayOutcome;

/// Thread-safe database wrapper.
///
/// `None` inside the mutex means the store was never opened or has been
/// closed; every query then fails with `EngineError::StoreUnavailable`,
/// which the engram layer turns into empty/false/None results.
pub struct SessionStore {
    conn: Mutex<Option<Connection>>,
}

impl SessionStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path) -> EngineResult<Self> {
        info!("[engram] Opening salience store at {:?}", path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch("PRAGMA busy_timeout = 5000;").ok();
        Self::from_connection(conn)
    }

    /// In-memory database with the full schema. Used by tests and benches.
    pub fn open_in_memory() -> EngineResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an already-open connection, running migrations first.
    pub fn from_connection(conn: Connection) -> EngineResult<Self> {
        schema::run_migrations(&conn)?;
        Ok(SessionStore { conn: Mutex::new(Some(conn)) })
    }

    /// A store with no backing connection.
    pub fn unavailable() -> Self {
        SessionStore { conn: Mutex::new(None) }
    }

    /// Drop the connection. Later calls see `StoreUnavailable`.
    pub fn close(&self) {
        if self.conn.lock().take().is_some() {
            info!("[engram] Salience store closed");
        }
    }

    pub fn is_available(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Lock the connection, or fail if the store is unavailable.
    pub(crate) fn lock_conn(&self) -> EngineResult<MappedMutexGuard<'_, Connection>> {
        MutexGuard::try_map(self.conn.lock(), |c| c.as_mut()).map_err(|_| EngineError::StoreUnavailable)
    }
}
