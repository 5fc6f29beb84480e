// ── Engram: Working Memory & Attention Decay ────────────────────────────────
//
// Per-session attention scores that decay with session *events*, not wall
// clock. Every scoring call advances a session counter; batch decay then
// ages each row by how many events have passed since it was last touched:
//
//   distance = (current − entry.event_counter + M) mod M
//   raw      = score × decay_rate^distance + mention_count × mention_boost
//   raw < delete_threshold  → row deleted
//   otherwise               → clamp(raw, decay_floor, 1.0) persisted
//
// The delete check runs before the floor clamp. Because the floor sits
// strictly above the delete threshold, a row between the two is lifted to
// the floor and survives; only rows below the threshold disappear.
//
// Every public operation here fails soft: an unavailable or broken store
// yields false / 0 / empty / None plus a warning, never an error, so the
// surrounding agent loop keeps running.

use crate::atoms::constants::{
    EVENT_COUNTER_MODULUS, PROMPT_CONTEXT_MAX_LIMIT, TIER_ACTIVE, TIER_FOCUSED, TIER_PERIPHERAL,
};
use crate::atoms::engram_types::{
    AttentionTier, PromptContextEntry, SessionMemory, SessionStats, WorkingMemoryEntry,
};
use crate::atoms::error::EngineResult;
use crate::engine::config::SalienceConfig;
use crate::engine::engram::rollout::is_feature_enabled;
use crate::engine::sessions::{DecayOutcome, SessionStore};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use log::{debug, warn};
use std::collections::HashMap;

// ═════════════════════════════════════════════════════════════════════════════
// Pure helpers
// ═════════════════════════════════════════════════════════════════════════════

/// Counter value for the next scoring event: previous + 1 (mod M), or 0
/// when the session has no rows yet.
pub fn next_event_counter(previous: Option<u32>) -> u32 {
    match previous {
        Some(c) => ((c as u64 + 1) % EVENT_COUNTER_MODULUS as u64) as u32,
        None => 0,
    }
}

/// Events elapsed between `prior` and `current`, with wraparound.
pub fn event_distance(current: u32, prior: u32) -> u32 {
    let m = EVENT_COUNTER_MODULUS as u64;
    ((current as u64 % m + m - prior as u64 % m) % m) as u32
}

/// `≥0.8 focused, ≥0.5 active, ≥0.2 peripheral, else fading`.
pub fn calculate_tier(score: f64) -> AttentionTier {
    if score >= TIER_FOCUSED {
        AttentionTier::Focused
    } else if score >= TIER_ACTIVE {
        AttentionTier::Active
    } else if score >= TIER_PERIPHERAL {
        AttentionTier::Peripheral
    } else {
        AttentionTier::Fading
    }
}

/// Raw decayed score, before the delete check and floor clamp.
pub fn decayed_score(score: f64, mention_count: u32, distance: u32, config: &SalienceConfig) -> f64 {
    let exponent = distance.min(i32::MAX as u32) as i32;
    score * config.decay_rate.powi(exponent) + mention_count as f64 * config.mention_boost
}

/// Decide one row's fate for a decay tick at `current`.
pub fn decay_outcome(entry: &WorkingMemoryEntry, current: u32, config: &SalienceConfig) -> DecayOutcome {
    let distance = event_distance(current, entry.event_counter);
    let raw = decayed_score(entry.attention_score, entry.mention_count, distance, config);
    if raw < config.delete_threshold {
        DecayOutcome::Delete
    } else {
        DecayOutcome::Keep(raw.clamp(config.decay_floor, 1.0))
    }
}

/// Return `session_id` if given, otherwise a fresh `wm-<uuid>` id.
pub fn get_or_create_session(session_id: Option<&str>) -> String {
    match session_id {
        Some(id) if !id.trim().is_empty() => id.to_string(),
        _ => format!("wm-{}", uuid::Uuid::new_v4()),
    }
}

fn soft<T>(op: &str, result: EngineResult<T>, fallback: T) -> T {
    match result {
        Ok(v) => v,
        Err(e) => {
            warn!("[engram:wm] {} failed: {}", op, e);
            fallback
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Session-scoped operations
// ═════════════════════════════════════════════════════════════════════════════

/// Working-memory handle over an explicit store and config.
pub struct WorkingMemory<'a> {
    store: &'a SessionStore,
    config: &'a SalienceConfig,
}

impl<'a> WorkingMemory<'a> {
    pub fn new(store: &'a SessionStore, config: &'a SalienceConfig) -> Self {
        Self { store, config }
    }

    /// Upsert the attention score for `(session_id, memory_id)` and advance
    /// the session's event counter. Scores live in `(0, 1]`: values above 1
    /// are clamped, while zero, negative and non-finite scores are rejected.
    /// Returns `false` on rejection, or when the store is unavailable or the
    /// write fails.
    pub fn set_attention_score(&self, session_id: &str, memory_id: i64, score: f64) -> bool {
        if !score.is_finite() || score <= 0.0 {
            warn!("[engram:wm] rejected score {} for memory {} in {}", score, memory_id, session_id);
            return false;
        }
        let score = score.min(1.0);
        match self.store.wm_record_focus(session_id, memory_id, score, self.config.max_capacity) {
            Ok(counter) => {
                debug!(
                    "[engram:wm] {} ← memory {} score {:.3} (event {})",
                    session_id, memory_id, score, counter
                );
                true
            }
            Err(e) => {
                warn!("[engram:wm] set_attention_score failed: {}", e);
                false
            }
        }
    }

    /// Apply one event-driven decay tick to every row of the session,
    /// atomically. Returns rows updated plus rows deleted; 0 when the
    /// `event_decay` flag is off or the session is outside the rollout.
    pub fn batch_update_scores(&self, session_id: &str) -> usize {
        if !is_feature_enabled(self.config.flags.event_decay, session_id, self.config.rollout()) {
            return 0;
        }
        let config = self.config;
        let changed = soft(
            "batch_update_scores",
            self.store
                .wm_apply_decay(session_id, |entry, current| decay_outcome(entry, current, config)),
            0,
        );
        if changed > 0 {
            debug!("[engram:wm] Decay tick on {}: {} rows changed", session_id, changed);
        }
        changed
    }

    /// Evict the weakest rows beyond `max_capacity`. Returns the number removed.
    pub fn enforce_memory_limit(&self, session_id: &str) -> usize {
        soft(
            "enforce_memory_limit",
            self.store.wm_enforce_limit(session_id, self.config.max_capacity),
            0,
        )
    }

    /// All rows of a session, strongest first.
    pub fn get_working_memory(&self, session_id: &str) -> Vec<WorkingMemoryEntry> {
        soft("get_working_memory", self.store.wm_entries(session_id), Vec::new())
    }

    pub fn get_entry(&self, session_id: &str, memory_id: i64) -> Option<WorkingMemoryEntry> {
        soft("get_entry", self.store.wm_entry(session_id, memory_id), None)
    }

    /// Rows joined with their memory records, strongest first.
    pub fn get_session_memories(&self, session_id: &str) -> Vec<SessionMemory> {
        soft("get_session_memories", self.store.wm_session_memories(session_id), Vec::new())
    }

    pub fn get_session_stats(&self, session_id: &str) -> Option<SessionStats> {
        soft("get_session_stats", self.store.wm_stats(session_id), None)
    }

    /// Rows above `floor` for prompt injection. Floor is clamped to `[0, 1]`,
    /// limit to `[1, 20]`.
    pub fn get_session_prompt_context(
        &self,
        session_id: &str,
        floor: f64,
        limit: usize,
    ) -> Vec<PromptContextEntry> {
        let floor = if floor.is_finite() { floor.clamp(0.0, 1.0) } else { self.config.decay_floor };
        let limit = limit.clamp(1, PROMPT_CONTEXT_MAX_LIMIT);
        soft(
            "get_session_prompt_context",
            self.store.wm_prompt_context(session_id, floor, limit),
            Vec::new(),
        )
    }

    /// `memory_id → attention_score` for a session. Used by the pipeline.
    pub fn attention_map(&self, session_id: &str) -> HashMap<i64, f64> {
        self.get_working_memory(session_id)
            .into_iter()
            .map(|e| (e.memory_id, e.attention_score))
            .collect()
    }

    pub fn session_exists(&self, session_id: &str) -> bool {
        soft("session_exists", self.store.wm_latest_counter(session_id), None).is_some()
    }

    /// Current event counter of the session, 0 if it has none.
    pub fn get_session_event_counter(&self, session_id: &str) -> u32 {
        soft("get_session_event_counter", self.store.wm_latest_counter(session_id), None).unwrap_or(0)
    }

    pub fn clear_session(&self, session_id: &str) -> usize {
        soft("clear_session", self.store.wm_clear_session(session_id), 0)
    }

    /// Remove rows not focused within `session_timeout_secs` of `now`.
    pub fn cleanup_old_sessions(&self, now: DateTime<Utc>) -> usize {
        let cutoff = (now - Duration::seconds(self.config.session_timeout_secs))
            .to_rfc3339_opts(SecondsFormat::Micros, true);
        let removed = soft("cleanup_old_sessions", self.store.wm_delete_focused_before(&cutoff), 0);
        if removed > 0 {
            debug!("[engram:wm] Cleaned up {} stale working-memory rows", removed);
        }
        removed
    }
}
