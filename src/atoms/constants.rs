// ── Engram Atoms: Constants ────────────────────────────────────────────────
// All named constants for the crate live here. These are the built-in
// defaults; `SalienceConfig` can override the tunable ones at startup.

// ── Working memory: event-driven attention decay ──────────────────────────
// score' = score × DECAY_RATE^distance + mention_count × MENTION_BOOST
pub const EVENT_DECAY_RATE: f64 = 0.85;
pub const MENTION_BOOST: f64 = 0.05;
/// Scores are clamped up to this floor after decay.
pub const DECAY_FLOOR: f64 = 0.05;
/// Entries whose decayed score falls below this are deleted.
/// Must stay strictly below DECAY_FLOOR.
pub const DELETE_THRESHOLD: f64 = 0.01;
/// Per-session event counters wrap at 2^31.
pub const EVENT_COUNTER_MODULUS: u32 = 1 << 31;
/// Miller's law: 7 ± 2 active items.
pub const WORKING_MEMORY_CAPACITY: usize = 7;
/// Entries not focused for this long are removed by `cleanup_old_sessions`.
pub const SESSION_TIMEOUT_SECS: i64 = 1800;
pub const PROMPT_CONTEXT_MAX_LIMIT: usize = 20;

// ── Attention tiers (lower bounds, inclusive) ─────────────────────────────
pub const TIER_FOCUSED: f64 = 0.8;
pub const TIER_ACTIVE: f64 = 0.5;
pub const TIER_PERIPHERAL: f64 = 0.2;

// ── Temporal contiguity ───────────────────────────────────────────────────
pub const DEFAULT_TEMPORAL_WINDOW_SECS: i64 = 3600;
pub const MAX_TEMPORAL_WINDOW_SECS: i64 = 86_400;
pub const CONTIGUITY_BOOST: f64 = 0.15;

// ── Causal graph ──────────────────────────────────────────────────────────
pub const DEFAULT_TRAVERSAL_DEPTH: usize = 3;
/// Hard cap regardless of the requested depth.
pub const MAX_TRAVERSAL_DEPTH: usize = 10;
pub const MAX_EDGES_LIMIT: usize = 100;

// ── Context budget ────────────────────────────────────────────────────────
pub const DEFAULT_TOKEN_BUDGET: usize = 2000;
pub const CHARS_PER_TOKEN: usize = 4;
pub const REGION_DIVERSITY_THRESHOLD: f64 = 0.5;

// ── Fusion ────────────────────────────────────────────────────────────────
/// RRF constant (k=60 is standard in information retrieval).
pub const RRF_K: f64 = 60.0;
pub const CONVERGENCE_BONUS: f64 = 0.10;
pub const GRAPH_WEIGHT_BOOST: f64 = 1.5;

// ── Pipeline score adjustments ────────────────────────────────────────────
/// Attention multiplier: `score × (1 + attention × 0.25)`.
pub const ATTENTION_RANK_WEIGHT: f64 = 0.25;
/// Freshness multiplier: `score × (1 + freshness × 0.2)`.
pub const FRESHNESS_RANK_WEIGHT: f64 = 0.2;

// ── Adaptive fallback ─────────────────────────────────────────────────────
pub const PRIMARY_SIMILARITY_THRESHOLD: f64 = 0.3;
pub const FALLBACK_SIMILARITY_THRESHOLD: f64 = 0.17;

// ── Pressure policy ───────────────────────────────────────────────────────
pub const PRESSURE_FOCUSED_RATIO: f64 = 0.6;
pub const PRESSURE_QUICK_RATIO: f64 = 0.8;

// ── Rollout ───────────────────────────────────────────────────────────────
pub const DEFAULT_ROLLOUT_PERCENT: u8 = 100;
pub const ROLLOUT_BUCKETS: u32 = 100;

// ── Embedding provider boundary ───────────────────────────────────────────
pub const VALIDATION_TIMEOUT_MS: u64 = 5000;
pub const EMBEDDING_TIMEOUT_MS: u64 = 5000;

// ── Config file ───────────────────────────────────────────────────────────
pub(crate) const CONFIG_DIR_NAME: &str = "engram-salience";
pub(crate) const CONFIG_FILE_NAME: &str = "salience.toml";
