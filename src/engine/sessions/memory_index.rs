// ── Engram: memory_index DB Layer ──────────────────────────────────────────
//
// Read paths over the storage collaborator's memory table, plus a minimal
// insert used to seed standalone stores. The engine only reads ids,
// timestamps, folders and stability from here.

use super::SessionStore;
use crate::atoms::engram_types::MemoryRecord;
use crate::atoms::error::EngineResult;
use rusqlite::{params, OptionalExtension};

/// Insert payload for `memory_insert`.
#[derive(Debug, Clone, Default)]
pub struct NewMemory {
    pub title: String,
    pub spec_folder: String,
    pub file_path: String,
    /// RFC 3339; callers normalise to UTC.
    pub created_at: String,
    pub stability: f64,
}

const MEMORY_COLUMNS: &str =
    "id, COALESCE(title, ''), spec_folder, file_path, created_at, stability, is_archived";

impl SessionStore {
    /// Insert a memory row and return its id.
    pub fn memory_insert(&self, mem: &NewMemory) -> EngineResult<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO memory_index (title, spec_folder, file_path, created_at, stability)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![mem.title, mem.spec_folder, mem.file_path, mem.created_at, mem.stability],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn memory_get(&self, id: i64) -> EngineResult<Option<MemoryRecord>> {
        let conn = self.lock_conn()?;
        let sql = format!("SELECT {MEMORY_COLUMNS} FROM memory_index WHERE id = ?1");
        let rec = conn.query_row(&sql, params![id], Self::memory_from_row).optional()?;
        Ok(rec)
    }

    /// Mark a memory archived. Returns whether a row changed.
    pub fn memory_set_archived(&self, id: i64, archived: bool) -> EngineResult<bool> {
        let conn = self.lock_conn()?;
        let n = conn.execute(
            "UPDATE memory_index SET is_archived = ?2 WHERE id = ?1",
            params![id, archived as i64],
        )?;
        Ok(n > 0)
    }

    /// Hard-delete a memory row. Edge cascade is the caller's concern.
    pub fn memory_delete(&self, id: i64) -> EngineResult<bool> {
        let conn = self.lock_conn()?;
        let n = conn.execute("DELETE FROM memory_index WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    /// Count of non-archived memories.
    pub fn memory_count_active(&self) -> EngineResult<usize> {
        let conn = self.lock_conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memory_index WHERE is_archived = 0",
            [],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    /// Every non-archived memory except `exclude_id`, unordered.
    /// Time filtering happens in the engine so timestamp formats may vary.
    pub fn memory_list_active_except(&self, exclude_id: i64) -> EngineResult<Vec<MemoryRecord>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memory_index WHERE id != ?1 AND is_archived = 0"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![exclude_id], Self::memory_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Non-archived memories, newest first, optionally scoped to one folder.
    pub fn memory_timeline(&self, spec_folder: Option<&str>, limit: usize) -> EngineResult<Vec<MemoryRecord>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memory_index
             WHERE is_archived = 0 AND (?1 IS NULL OR spec_folder = ?1)
             ORDER BY created_at DESC, id DESC
             LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![spec_folder, limit as i64], Self::memory_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    // ── Row mapper ──────────────────────────────────────────────────

    pub(crate) fn memory_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
        Ok(MemoryRecord {
            id: row.get(0)?,
            title: row.get(1)?,
            spec_folder: row.get(2)?,
            file_path: row.get(3)?,
            created_at: row.get(4)?,
            stability: row.get(5)?,
            is_archived: row.get::<_, i64>(6)? != 0,
        })
    }
}
