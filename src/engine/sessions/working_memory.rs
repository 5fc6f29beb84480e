// ── Engram: working_memory DB Layer ────────────────────────────────────────
//
// Per-session attention rows. Both write paths run inside a single
// transaction while the connection lock is held, so counter advancement,
// mention/focus bumps and eviction for one scoring event are applied
// atomically, and one decay tick is never partially visible.
//
// Decay math lives in engine/engram/working_memory.rs; this layer only
// applies the per-row outcome it is handed.

use super::SessionStore;
use crate::atoms::engram_types::{
    MemoryRecord, PromptContextEntry, SessionMemory, SessionStats, WorkingMemoryEntry,
};
use crate::atoms::error::EngineResult;
use crate::engine::engram::working_memory::next_event_counter;
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

/// What batch decay decided for one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecayOutcome {
    /// Persist this score.
    Keep(f64),
    /// Remove the row.
    Delete,
}

const WM_COLUMNS: &str = "id, session_id, memory_id, attention_score, added_at, last_focused,
     focus_count, event_counter, mention_count";

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ── Transaction-scoped helpers ─────────────────────────────────────────────

/// The session's last issued event counter, if it has issued one.
/// Read from `wm_sessions`, which row deletions never touch.
fn latest_counter(conn: &Connection, session_id: &str) -> rusqlite::Result<Option<u32>> {
    conn.query_row(
        "SELECT event_counter FROM wm_sessions WHERE session_id = ?1",
        params![session_id],
        |row| row.get::<_, i64>(0),
    )
    .optional()
    .map(|c| c.map(|v| v as u32))
}

fn store_counter(conn: &Connection, session_id: &str, counter: u32, now: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO wm_sessions (session_id, event_counter, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(session_id) DO UPDATE SET
             event_counter = excluded.event_counter,
             updated_at = excluded.updated_at",
        params![session_id, counter as i64, now],
    )
}

fn next_focus_seq(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(focus_seq), 0) + 1 FROM working_memory", [], |r| r.get(0))
}

/// Delete the weakest rows until at most `keep` remain.
/// Lowest attention first; ties go to the least recently focused.
fn evict_to(conn: &Connection, session_id: &str, keep: usize) -> rusqlite::Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM working_memory WHERE session_id = ?1",
        params![session_id],
        |r| r.get(0),
    )?;
    let excess = count - keep as i64;
    if excess <= 0 {
        return Ok(0);
    }
    conn.execute(
        "DELETE FROM working_memory WHERE id IN (
             SELECT id FROM working_memory
             WHERE session_id = ?1
             ORDER BY attention_score ASC, focus_seq ASC, id ASC
             LIMIT ?2
         )",
        params![session_id, excess],
    )
}

// ═════════════════════════════════════════════════════════════════════════════
// Writes
// ═════════════════════════════════════════════════════════════════════════════

impl SessionStore {
    /// Record one scoring event for `(session_id, memory_id)`.
    ///
    /// Advances the session counter, then either bumps the existing row
    /// (score, focus_count, mention_count, counter) or makes room under
    /// `capacity` and inserts a fresh row with `mention_count = 0`.
    /// `score` must already be validated to lie in `(0, 1]`.
    pub fn wm_record_focus(
        &self,
        session_id: &str,
        memory_id: i64,
        score: f64,
        capacity: usize,
    ) -> EngineResult<u32> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let counter = next_event_counter(latest_counter(&tx, session_id)?);
        let seq = next_focus_seq(&tx)?;
        let now = now_rfc3339();
        store_counter(&tx, session_id, counter, &now)?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM working_memory WHERE session_id = ?1 AND memory_id = ?2",
                params![session_id, memory_id],
                |r| r.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE working_memory
                     SET attention_score = ?1,
                         last_focused = ?2,
                         focus_count = focus_count + 1,
                         mention_count = mention_count + 1,
                         event_counter = ?3,
                         focus_seq = ?4
                     WHERE id = ?5",
                    params![score, now, counter as i64, seq, id],
                )?;
            }
            None => {
                evict_to(&tx, session_id, capacity.saturating_sub(1))?;
                tx.execute(
                    "INSERT INTO working_memory
                        (session_id, memory_id, attention_score, added_at, last_focused,
                         focus_count, event_counter, mention_count, focus_seq)
                     VALUES (?1, ?2, ?3, ?4, ?4, 1, ?5, 0, ?6)",
                    params![session_id, memory_id, score, now, counter as i64, seq],
                )?;
            }
        }

        tx.commit()?;
        Ok(counter)
    }

    /// Evict down to `capacity` rows. Returns the number removed.
    pub fn wm_enforce_limit(&self, session_id: &str, capacity: usize) -> EngineResult<usize> {
        let conn = self.lock_conn()?;
        Ok(evict_to(&conn, session_id, capacity)?)
    }

    /// Apply one decay tick to every row of the session in a single
    /// transaction. `plan` receives each row and the session's current
    /// counter. Returns rows updated plus rows deleted.
    pub fn wm_apply_decay<F>(&self, session_id: &str, mut plan: F) -> EngineResult<usize>
    where
        F: FnMut(&WorkingMemoryEntry, u32) -> DecayOutcome,
    {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        let current = match latest_counter(&tx, session_id)? {
            Some(c) => c,
            None => return Ok(0),
        };

        let entries: Vec<WorkingMemoryEntry> = {
            let sql = format!("SELECT {WM_COLUMNS} FROM working_memory WHERE session_id = ?1");
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map(params![session_id], Self::wm_entry_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut changed = 0usize;
        for entry in &entries {
            changed += match plan(entry, current) {
                DecayOutcome::Delete => {
                    tx.execute("DELETE FROM working_memory WHERE id = ?1", params![entry.id])?
                }
                DecayOutcome::Keep(score) => tx.execute(
                    "UPDATE working_memory SET attention_score = ?1 WHERE id = ?2",
                    params![score, entry.id],
                )?,
            };
        }

        tx.commit()?;
        Ok(changed)
    }

    /// Drop the session's rows and its counter. Returns rows removed.
    pub fn wm_clear_session(&self, session_id: &str) -> EngineResult<usize> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM working_memory WHERE session_id = ?1", params![session_id])?;
        tx.execute("DELETE FROM wm_sessions WHERE session_id = ?1", params![session_id])?;
        tx.commit()?;
        Ok(removed)
    }

    /// Remove every row whose `last_focused` is older than `cutoff` (RFC 3339),
    /// and the counters of sessions left idle and empty. Returns rows removed.
    pub fn wm_delete_focused_before(&self, cutoff: &str) -> EngineResult<usize> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM working_memory WHERE last_focused < ?1", params![cutoff])?;
        tx.execute(
            "DELETE FROM wm_sessions
             WHERE updated_at < ?1
               AND NOT EXISTS (
                   SELECT 1 FROM working_memory wm WHERE wm.session_id = wm_sessions.session_id
               )",
            params![cutoff],
        )?;
        tx.commit()?;
        Ok(removed)
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Reads
// ═════════════════════════════════════════════════════════════════════════════

impl SessionStore {
    pub fn wm_latest_counter(&self, session_id: &str) -> EngineResult<Option<u32>> {
        let conn = self.lock_conn()?;
        Ok(latest_counter(&conn, session_id)?)
    }

    /// All rows of a session, strongest first.
    pub fn wm_entries(&self, session_id: &str) -> EngineResult<Vec<WorkingMemoryEntry>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {WM_COLUMNS} FROM working_memory
             WHERE session_id = ?1
             ORDER BY attention_score DESC, focus_seq DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![session_id], Self::wm_entry_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn wm_entry(&self, session_id: &str, memory_id: i64) -> EngineResult<Option<WorkingMemoryEntry>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {WM_COLUMNS} FROM working_memory WHERE session_id = ?1 AND memory_id = ?2"
        );
        Ok(conn
            .query_row(&sql, params![session_id, memory_id], Self::wm_entry_from_row)
            .optional()?)
    }

    /// Rows joined with their memory records, strongest first.
    /// Rows whose memory no longer exists are skipped.
    pub fn wm_session_memories(&self, session_id: &str) -> EngineResult<Vec<SessionMemory>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT m.id, COALESCE(m.title, ''), m.spec_folder, m.file_path, m.created_at,
                    m.stability, m.is_archived,
                    wm.attention_score, wm.focus_count, wm.last_focused
             FROM working_memory wm
             JOIN memory_index m ON wm.memory_id = m.id
             WHERE wm.session_id = ?1
             ORDER BY wm.attention_score DESC",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok(SessionMemory {
                    memory: MemoryRecord {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        spec_folder: row.get(2)?,
                        file_path: row.get(3)?,
                        created_at: row.get(4)?,
                        stability: row.get(5)?,
                        is_archived: row.get::<_, i64>(6)? != 0,
                    },
                    attention_score: row.get(7)?,
                    focus_count: row.get::<_, i64>(8)? as u32,
                    last_focused: row.get(9)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Aggregates for one session; `None` when it has no rows.
    pub fn wm_stats(&self, session_id: &str) -> EngineResult<Option<SessionStats>> {
        let conn = self.lock_conn()?;
        let (count, avg, max, min, focus): (i64, Option<f64>, Option<f64>, Option<f64>, Option<i64>) =
            conn.query_row(
                "SELECT COUNT(*), AVG(attention_score), MAX(attention_score),
                        MIN(attention_score), SUM(focus_count)
                 FROM working_memory WHERE session_id = ?1",
                params![session_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )?;
        if count == 0 {
            return Ok(None);
        }
        Ok(Some(SessionStats {
            session_id: session_id.to_string(),
            total_entries: count as usize,
            avg_attention: (avg.unwrap_or(0.0) * 100.0).round() / 100.0,
            max_attention: max.unwrap_or(0.0),
            min_attention: min.unwrap_or(0.0),
            total_focus_events: focus.unwrap_or(0) as u64,
        }))
    }

    /// Rows strictly above `floor`, joined with titles, strongest and most
    /// recent first. Memories missing from the index get empty strings.
    pub fn wm_prompt_context(
        &self,
        session_id: &str,
        floor: f64,
        limit: usize,
    ) -> EngineResult<Vec<PromptContextEntry>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT wm.memory_id, COALESCE(m.title, ''), COALESCE(m.file_path, ''), wm.attention_score
             FROM working_memory wm
             LEFT JOIN memory_index m ON wm.memory_id = m.id
             WHERE wm.session_id = ?1 AND wm.attention_score > ?2
             ORDER BY wm.attention_score DESC, wm.focus_seq DESC
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![session_id, floor, limit as i64], |row| {
                Ok(PromptContextEntry {
                    memory_id: row.get(0)?,
                    title: row.get(1)?,
                    file_path: row.get(2)?,
                    attention_score: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    // ── Row mapper ──────────────────────────────────────────────────

    fn wm_entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkingMemoryEntry> {
        Ok(WorkingMemoryEntry {
            id: row.get(0)?,
            session_id: row.get(1)?,
            memory_id: row.get(2)?,
            attention_score: row.get(3)?,
            added_at: row.get(4)?,
            last_focused: row.get(5)?,
            focus_count: row.get::<_, i64>(6)? as u32,
            event_counter: row.get::<_, i64>(7)? as u32,
            mention_count: row.get::<_, i64>(8)? as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> SessionStore {
        SessionStore::open_in_memory().unwrap()
    }

    #[test]
    fn first_focus_starts_counter_at_zero() {
        let store = test_store();
        assert_eq!(store.wm_record_focus("s", 1, 0.8, 7).unwrap(), 0);
        assert_eq!(store.wm_record_focus("s", 2, 0.8, 7).unwrap(), 1);
        assert_eq!(store.wm_latest_counter("s").unwrap(), Some(1));
        assert_eq!(store.wm_latest_counter("other").unwrap(), None);
    }

    #[test]
    fn eviction_removes_weakest_first() {
        let store = test_store();
        store.wm_record_focus("s", 1, 0.9, 3).unwrap();
        store.wm_record_focus("s", 2, 0.1, 3).unwrap();
        store.wm_record_focus("s", 3, 0.5, 3).unwrap();
        store.wm_record_focus("s", 4, 0.7, 3).unwrap();

        let ids: Vec<i64> = store.wm_entries("s").unwrap().iter().map(|e| e.memory_id).collect();
        assert_eq!(ids, vec![1, 4, 3]);
    }

    #[test]
    fn eviction_ties_go_to_least_recently_focused() {
        let store = test_store();
        store.wm_record_focus("s", 1, 0.5, 2).unwrap();
        store.wm_record_focus("s", 2, 0.5, 2).unwrap();
        store.wm_record_focus("s", 3, 0.5, 2).unwrap();
        let mut ids: Vec<i64> = store.wm_entries("s").unwrap().iter().map(|e| e.memory_id).collect();
        ids.sort();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn apply_decay_is_noop_for_unknown_session() {
        let store = test_store();
        let n = store.wm_apply_decay("ghost", |_, _| DecayOutcome::Delete).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn apply_decay_updates_and_deletes() {
        let store = test_store();
        store.wm_record_focus("s", 1, 0.9, 7).unwrap();
        store.wm_record_focus("s", 2, 0.3, 7).unwrap();
        let n = store
            .wm_apply_decay("s", |e, _| {
                if e.memory_id == 2 { DecayOutcome::Delete } else { DecayOutcome::Keep(0.6) }
            })
            .unwrap();
        assert_eq!(n, 2);
        let entries = store.wm_entries("s").unwrap();
        assert_eq!(entries.len(), 1);
        assert!((entries[0].attention_score - 0.6).abs() < 1e-12);
    }

    #[test]
    fn stats_none_for_empty_session() {
        let store = test_store();
        assert!(store.wm_stats("s").unwrap().is_none());
        store.wm_record_focus("s", 1, 0.301, 7).unwrap();
        store.wm_record_focus("s", 2, 0.5, 7).unwrap();
        let stats = store.wm_stats("s").unwrap().unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.avg_attention, 0.4);
        assert_eq!(stats.total_focus_events, 2);
    }

    #[test]
    fn delete_before_cutoff() {
        let store = test_store();
        store.wm_record_focus("s", 1, 0.5, 7).unwrap();
        assert_eq!(store.wm_delete_focused_before("2000-01-01T00:00:00Z").unwrap(), 0);
        assert_eq!(store.wm_delete_focused_before("2999-01-01T00:00:00Z").unwrap(), 1);
    }
}
