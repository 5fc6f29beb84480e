// ── Engram: Salience Engine ─────────────────────────────────────────────────
//
// Decides which memories to surface for a query or session under a token
// budget, combining match rank, session attention, temporal adjacency,
// causal structure and graph centrality into one deterministic ranking.
//
// Sub-modules (leaf-first):
//   - causal_graph: typed relationship edges, validation, bounded traversal
//   - structural_freshness: stability × degree centrality
//   - temporal_contiguity: pairwise time-proximity boost, neighbors, timeline
//   - working_memory: per-session attention with event-driven decay
//   - rollout / pressure: feature gating and context-pressure classification
//   - fusion / fallback: weighted RRF across channels, two-pass threshold retry
//   - context_budget: token-bounded selection with region diversity
//   - reranking: final stable sort + truncate
//   - pipeline: the wiring of all of the above for one recall call

pub mod causal_graph;
pub mod context_budget;
pub mod fallback;
pub mod fusion;
pub mod pipeline;
pub mod pressure;
pub mod reranking;
pub mod rollout;
pub mod structural_freshness;
pub mod temporal_contiguity;
pub mod working_memory;

// Re-exports for convenience
pub use causal_graph::{CausalGraph, CausalLinkRequest, NodeRef, SpecDocumentIds, TraversalOptions};
pub use context_budget::{optimize_context_budget, optimize_context_budget_with};
pub use fallback::{channel_search_with_fallback, search_with_fallback, FallbackResponse};
pub use fusion::{
    adaptive_weights, fuse_results_multi, hybrid_adaptive_fuse, unified_search, FusionOptions, FusionWeights,
    QueryIntent, RankedList, SearchChannel,
};
pub use pipeline::{RetrievalPipeline, RetrievalRequest, RetrievalResponse};
pub use pressure::{get_pressure_level, pressure_adjusted_budget};
pub use reranking::rerank_results;
pub use rollout::{is_feature_enabled, rollout_bucket};
pub use structural_freshness::{compute_graph_centrality, compute_structural_freshness};
pub use temporal_contiguity::{build_timeline, get_temporal_neighbors, vector_search_with_contiguity};
pub use working_memory::{calculate_tier, get_or_create_session, WorkingMemory};
