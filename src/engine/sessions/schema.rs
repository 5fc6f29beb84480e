// Database schema and migrations for the salience store.
// Called once by SessionStore::from_connection().
// Adding a new table or column: append an idempotent CREATE TABLE IF NOT EXISTS
// or ALTER TABLE … ADD COLUMN (errors are silently swallowed) at the end of
// run_migrations(). Never modify existing SQL, to keep upgrade paths clean.

use crate::atoms::error::EngineResult;
use log::info;
use rusqlite::Connection;

pub(crate) fn run_migrations(conn: &Connection) -> EngineResult<()> {
    // ── memory_index (owned by the storage collaborator) ────────────
    // Created here so the engine can run standalone; collaborators that
    // already own the table keep their richer definition.
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS memory_index (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            spec_folder TEXT NOT NULL DEFAULT '',
            file_path TEXT NOT NULL DEFAULT '',
            title TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            stability REAL NOT NULL DEFAULT 1.0,
            is_archived INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_memory_index_created
            ON memory_index(created_at);
        CREATE INDEX IF NOT EXISTS idx_memory_index_folder
            ON memory_index(spec_folder, created_at);
    ",
    )?;

    // ── working_memory ──────────────────────────────────────────────
    // focus_seq is a table-wide monotonic sequence bumped on every
    // scoring event; it orders "most recently focused" without relying
    // on timestamp resolution.
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS working_memory (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            memory_id INTEGER NOT NULL,
            attention_score REAL NOT NULL DEFAULT 1.0
                CHECK(attention_score >= 0.0 AND attention_score <= 1.0),
            added_at TEXT NOT NULL,
            last_focused TEXT NOT NULL,
            focus_count INTEGER NOT NULL DEFAULT 1,
            event_counter INTEGER NOT NULL DEFAULT 0 CHECK(event_counter >= 0),
            mention_count INTEGER NOT NULL DEFAULT 0 CHECK(mention_count >= 0),
            focus_seq INTEGER NOT NULL DEFAULT 0,
            UNIQUE(session_id, memory_id)
        );

        CREATE INDEX IF NOT EXISTS idx_wm_session
            ON working_memory(session_id, focus_seq);
        CREATE INDEX IF NOT EXISTS idx_wm_attention
            ON working_memory(session_id, attention_score DESC);
        CREATE INDEX IF NOT EXISTS idx_wm_last_focused
            ON working_memory(last_focused);
    ",
    )?;

    // ── wm_sessions ─────────────────────────────────────────────────
    // The session event counter lives apart from the rows it stamps, so
    // decay deletions and evictions can never move it backwards. Stores
    // created before this table get their counters backfilled once.
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS wm_sessions (
            session_id TEXT PRIMARY KEY,
            event_counter INTEGER NOT NULL CHECK(event_counter >= 0),
            updated_at TEXT NOT NULL
        );

        INSERT OR IGNORE INTO wm_sessions (session_id, event_counter, updated_at)
            SELECT session_id, MAX(event_counter), MAX(last_focused)
            FROM working_memory
            GROUP BY session_id;

        CREATE INDEX IF NOT EXISTS idx_wm_sessions_updated
            ON wm_sessions(updated_at);
    ",
    )?;

    // ── causal_edges ────────────────────────────────────────────────
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS causal_edges (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            relation TEXT NOT NULL CHECK(relation IN (
                'caused', 'enabled', 'supersedes', 'contradicts', 'derived_from', 'supports'
            )),
            strength REAL NOT NULL DEFAULT 1.0 CHECK(strength >= 0.0 AND strength <= 1.0),
            evidence TEXT,
            created_by TEXT NOT NULL DEFAULT 'manual',
            extracted_at TEXT NOT NULL,
            UNIQUE(source_id, target_id, relation)
        );

        CREATE INDEX IF NOT EXISTS idx_causal_source
            ON causal_edges(source_id, strength DESC);
        CREATE INDEX IF NOT EXISTS idx_causal_target
            ON causal_edges(target_id, strength DESC);
    ",
    )?;

    info!("[engram] Salience schema ready");
    Ok(())
}
