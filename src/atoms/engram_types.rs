// ── Engram Atoms: Salience Types ───────────────────────────────────────────
//
// Type definitions for the salience engine: working-memory rows, causal
// edges, graph projections, ranked candidates and pressure readings.
// These are pure data types (no DB access, no I/O).
//
// Follows the project pattern: structs in atoms/, impls in engine/.

use crate::atoms::constants::CHARS_PER_TOKEN;
use crate::atoms::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 1: Scoring traits
// ═══════════════════════════════════════════════════════════════════════════

/// Anything carrying a single mutable relevance score.
/// The reranker and the contiguity booster only touch this field.
pub trait Scored {
    fn score(&self) -> f64;
    fn set_score(&mut self, score: f64);
}

/// A scored item with a creation timestamp (for temporal contiguity).
pub trait Timestamped: Scored {
    fn created_at(&self) -> Option<DateTime<Utc>>;
}

/// A scored item with a token cost and an optional graph region.
pub trait BudgetItem: Scored {
    fn token_cost(&self) -> usize;
    fn graph_region(&self) -> Option<&str>;
}

/// Descending score order for `sort_by`. Total over every `f64`: NaN
/// sorts after every real score, including negative infinity.
pub fn score_desc(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (false, false) => b.total_cmp(&a),
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
    }
}

/// Approximate token count: 4 characters per token, rounded up. Empty → 0.
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    chars.div_ceil(CHARS_PER_TOKEN)
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 2: Memory Index (read-only collaborator table)
// ═══════════════════════════════════════════════════════════════════════════

/// A row of the storage collaborator's `memory_index` table.
/// This crate only reads identifiers, timestamps and stability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    pub id: i64,
    pub title: String,
    pub spec_folder: String,
    pub file_path: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
    pub stability: f64,
    pub is_archived: bool,
}

/// A memory near an anchor in time. `time_delta_seconds` is absolute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemporalNeighbor {
    pub memory: MemoryRecord,
    pub time_delta_seconds: i64,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 3: Working Memory
// ═══════════════════════════════════════════════════════════════════════════

/// One `(session_id, memory_id)` attention row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkingMemoryEntry {
    pub id: i64,
    pub session_id: String,
    pub memory_id: i64,
    /// In `(0, 1]`.
    pub attention_score: f64,
    pub added_at: String,
    pub last_focused: String,
    pub focus_count: u32,
    /// Session-scoped counter value at the last scoring event, modulo 2^31.
    pub event_counter: u32,
    /// Re-access count; zero on first insert.
    pub mention_count: u32,
}

/// Qualitative bucket derived from an attention score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AttentionTier {
    Focused,
    Active,
    Peripheral,
    Fading,
}

impl std::fmt::Display for AttentionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttentionTier::Focused => write!(f, "focused"),
            AttentionTier::Active => write!(f, "active"),
            AttentionTier::Peripheral => write!(f, "peripheral"),
            AttentionTier::Fading => write!(f, "fading"),
        }
    }
}

/// Aggregate view of one session's working memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionStats {
    pub session_id: String,
    pub total_entries: usize,
    /// Rounded to two decimals.
    pub avg_attention: f64,
    pub max_attention: f64,
    pub min_attention: f64,
    pub total_focus_events: u64,
}

/// A working-memory row joined with its `memory_index` record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMemory {
    pub memory: MemoryRecord,
    pub attention_score: f64,
    pub focus_count: u32,
    pub last_focused: String,
}

/// Compact row used to inject session context into a prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptContextEntry {
    pub memory_id: i64,
    pub title: String,
    pub file_path: String,
    pub attention_score: f64,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 4: Causal Graph
// ═══════════════════════════════════════════════════════════════════════════

/// Closed set of causal relation types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Caused,
    Enabled,
    Supersedes,
    Contradicts,
    DerivedFrom,
    Supports,
}

impl RelationType {
    pub const ALL: [RelationType; 6] = [
        RelationType::Caused,
        RelationType::Enabled,
        RelationType::Supersedes,
        RelationType::Contradicts,
        RelationType::DerivedFrom,
        RelationType::Supports,
    ];

    /// Traversal multiplier. Strong lineage relations amplify, conflicts dampen.
    pub fn weight(&self) -> f64 {
        match self {
            RelationType::Supersedes => 1.5,
            RelationType::Caused => 1.3,
            RelationType::Enabled => 1.1,
            RelationType::Supports => 1.0,
            RelationType::DerivedFrom => 1.0,
            RelationType::Contradicts => 0.8,
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelationType::Caused => write!(f, "caused"),
            RelationType::Enabled => write!(f, "enabled"),
            RelationType::Supersedes => write!(f, "supersedes"),
            RelationType::Contradicts => write!(f, "contradicts"),
            RelationType::DerivedFrom => write!(f, "derived_from"),
            RelationType::Supports => write!(f, "supports"),
        }
    }
}

impl std::str::FromStr for RelationType {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "caused" => Ok(RelationType::Caused),
            "enabled" => Ok(RelationType::Enabled),
            "supersedes" => Ok(RelationType::Supersedes),
            "contradicts" => Ok(RelationType::Contradicts),
            "derived_from" => Ok(RelationType::DerivedFrom),
            "supports" => Ok(RelationType::Supports),
            other => Err(ValidationError::InvalidRelation(other.to_string())),
        }
    }
}

/// A persisted, validated causal edge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CausalEdge {
    pub id: i64,
    pub source_id: String,
    pub target_id: String,
    pub relation: RelationType,
    /// In `[0, 1]`.
    pub strength: f64,
    pub evidence: Option<String>,
    /// `manual` or `auto`.
    pub created_by: String,
    pub extracted_at: String,
}

/// Walk direction for causal traversal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TraversalDirection {
    /// Consequences: follow source → target.
    #[default]
    Outgoing,
    /// Lineage: follow target → source.
    Incoming,
    Both,
}

impl std::fmt::Display for TraversalDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraversalDirection::Outgoing => write!(f, "outgoing"),
            TraversalDirection::Incoming => write!(f, "incoming"),
            TraversalDirection::Both => write!(f, "both"),
        }
    }
}

impl std::str::FromStr for TraversalDirection {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "outgoing" | "forward" => Ok(TraversalDirection::Outgoing),
            "incoming" | "backward" => Ok(TraversalDirection::Incoming),
            "both" => Ok(TraversalDirection::Both),
            other => Err(ValidationError::InvalidDirection(other.to_string())),
        }
    }
}

/// One edge reached during traversal, oriented as stored (`from` → `to`).
/// `strength` is the relation-weighted value, clamped to `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraversedEdge {
    pub id: i64,
    pub from: String,
    pub to: String,
    pub relation: RelationType,
    pub strength: f64,
    /// 1 for edges touching the root.
    pub depth: usize,
}

/// Flattened traversal result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CausalChain {
    pub root: String,
    pub direction: TraversalDirection,
    pub edges: Vec<TraversedEdge>,
    pub by_relation: BTreeMap<RelationType, Vec<TraversedEdge>>,
    pub total_edges: usize,
    pub max_depth_reached: usize,
}

/// Per-edge outcome of a batch insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchFailure {
    /// Position in the submitted batch.
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchInsertReport {
    pub inserted: usize,
    pub failed: Vec<BatchFailure>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GraphStats {
    pub total_edges: usize,
    pub by_relation: BTreeMap<RelationType, usize>,
    /// Rounded to two decimals.
    pub avg_strength: f64,
    pub unique_sources: usize,
    pub unique_targets: usize,
    /// Distinct memories appearing on either side of any edge.
    pub linked_memories: usize,
    /// Non-archived memories in `memory_index`.
    pub total_memories: usize,
    /// Share of non-archived memories touched by at least one edge:
    /// `covered / total_memories`, 0 when the index is empty. Edge
    /// endpoints outside the live index (archived, orphaned) never count,
    /// so this is not `linked_memories / total_memories`.
    pub link_coverage: f64,
    /// Edges whose source or target no longer exists in `memory_index`.
    pub orphaned_edges: usize,
}

/// Read-only adjacency projection used for centrality.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GraphView {
    pub nodes: BTreeSet<String>,
    pub inbound: HashMap<String, Vec<String>>,
    pub outbound: HashMap<String, Vec<String>>,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 5: Ranked candidates
// ═══════════════════════════════════════════════════════════════════════════

/// A memory flowing through the retrieval pipeline.
/// Channels fill what they know; later stages only rewrite `score`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RankedMemory {
    pub id: i64,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stability: Option<f64>,
    /// Per-channel fused contribution, keyed by channel name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_scores: BTreeMap<String, f64>,
}

impl RankedMemory {
    pub fn new(id: i64, score: f64) -> Self {
        Self { id, score, ..Default::default() }
    }
}

impl Scored for RankedMemory {
    fn score(&self) -> f64 {
        self.score
    }
    fn set_score(&mut self, score: f64) {
        self.score = score;
    }
}

impl Timestamped for RankedMemory {
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

impl BudgetItem for RankedMemory {
    fn token_cost(&self) -> usize {
        self.tokens
            .unwrap_or_else(|| self.content.as_deref().map(estimate_tokens).unwrap_or(0))
    }
    fn graph_region(&self) -> Option<&str> {
        self.graph_region.as_deref()
    }
}

/// Ephemeral input to the budget selector.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BudgetCandidate {
    pub id: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Scored for BudgetCandidate {
    fn score(&self) -> f64 {
        self.score
    }
    fn set_score(&mut self, score: f64) {
        self.score = score;
    }
}

impl BudgetItem for BudgetCandidate {
    fn token_cost(&self) -> usize {
        self.tokens
            .unwrap_or_else(|| self.content.as_deref().map(estimate_tokens).unwrap_or(0))
    }
    fn graph_region(&self) -> Option<&str> {
        self.graph_region.as_deref()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 6: Session Pressure
// ═══════════════════════════════════════════════════════════════════════════

/// Runtime counters the estimator can derive a ratio from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RuntimeContextStats {
    pub token_count: Option<u64>,
    pub token_budget: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    None,
    Focused,
    Quick,
}

impl std::fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PressureLevel::None => write!(f, "none"),
            PressureLevel::Focused => write!(f, "focused"),
            PressureLevel::Quick => write!(f, "quick"),
        }
    }
}

/// Where a pressure ratio came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PressureSource {
    Caller,
    Estimator,
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PressureReading {
    pub level: PressureLevel,
    pub ratio: Option<f64>,
    pub source: PressureSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_round_trips_through_display() {
        for rel in RelationType::ALL {
            let parsed: RelationType = rel.to_string().parse().unwrap();
            assert_eq!(parsed, rel);
        }
    }

    #[test]
    fn unknown_relation_is_validation_error() {
        let err = "causes".parse::<RelationType>().unwrap_err();
        assert_eq!(err, ValidationError::InvalidRelation("causes".into()));
    }

    #[test]
    fn estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn explicit_tokens_override_content_estimate() {
        let c = BudgetCandidate {
            id: "a".into(),
            score: 1.0,
            tokens: Some(7),
            content: Some("x".repeat(400)),
            ..Default::default()
        };
        assert_eq!(c.token_cost(), 7);
        let c2 = BudgetCandidate { tokens: None, ..c };
        assert_eq!(c2.token_cost(), 100);
    }

    #[test]
    fn direction_accepts_aliases() {
        assert_eq!("backward".parse::<TraversalDirection>().unwrap(), TraversalDirection::Incoming);
        assert!("sideways".parse::<TraversalDirection>().is_err());
    }
}
