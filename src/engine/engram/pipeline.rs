// ── Engram: Retrieval Pipeline ──────────────────────────────────────────────
//
// One recall call, end to end:
//
//   channels (concurrent, errors propagate)
//     → per channel: attention adjustment, temporal contiguity boost,
//       structural-freshness adjustment, re-sort
//     → weighted RRF fusion
//   wrapped in the adaptive two-pass fallback (0.3 → 0.17)
//     → pressure-aware budget sizing
//     → token-budget selection with region diversity
//     → rerank + truncate
//
// Working-memory and graph reads fail soft and surface as warnings; channel
// failures and timeouts fail the call.

use crate::atoms::constants::{ATTENTION_RANK_WEIGHT, FRESHNESS_RANK_WEIGHT};
use crate::atoms::engram_types::{
    BudgetItem, GraphView, PressureReading, PromptContextEntry, RankedMemory, RuntimeContextStats,
    score_desc,
};
use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::config::SalienceConfig;
use crate::engine::engram::causal_graph::CausalGraph;
use crate::engine::engram::context_budget::optimize_context_budget_with;
use crate::engine::engram::fallback::search_with_fallback;
use crate::engine::engram::fusion::{fuse_results_multi, FusionOptions, RankedList, SearchChannel};
use crate::engine::engram::pressure::{get_pressure_level, pressure_adjusted_budget};
use crate::engine::engram::reranking::rerank_results;
use crate::engine::engram::rollout::is_feature_enabled;
use crate::engine::engram::structural_freshness::{compute_graph_centrality, compute_structural_freshness};
use crate::engine::engram::temporal_contiguity::vector_search_with_contiguity;
use crate::engine::engram::working_memory::WorkingMemory;
use crate::engine::sessions::SessionStore;
use futures::future::try_join_all;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Rows of resumed session context returned alongside results.
const RESUME_CONTEXT_LIMIT: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct RetrievalRequest<'q> {
    pub query: &'q str,
    pub session_id: Option<&'q str>,
    /// Overrides `config.token_budget`.
    pub token_budget: Option<usize>,
    /// Caller-reported context usage ratio.
    pub token_usage: Option<f64>,
    pub runtime: Option<RuntimeContextStats>,
    /// Temporal window; non-positive or absent uses the configured default.
    pub window_secs: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResponse {
    pub results: Vec<RankedMemory>,
    pub fallback_retry: bool,
    pub threshold_used: f64,
    pub pressure: PressureReading,
    /// Budget actually applied after pressure.
    pub token_budget: usize,
    pub tokens_used: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resumed_context: Vec<PromptContextEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Per-call signals shared by every channel adjustment.
struct Signals {
    attention: HashMap<i64, f64>,
    graph: GraphView,
    window_secs: i64,
}

pub struct RetrievalPipeline<'a> {
    store: &'a SessionStore,
    config: &'a SalienceConfig,
    channels: Vec<&'a dyn SearchChannel>,
}

impl<'a> RetrievalPipeline<'a> {
    pub fn new(store: &'a SessionStore, config: &'a SalienceConfig) -> Self {
        Self { store, config, channels: Vec::new() }
    }

    pub fn with_channel(mut self, channel: &'a dyn SearchChannel) -> Self {
        self.channels.push(channel);
        self
    }

    pub async fn run(&self, req: &RetrievalRequest<'_>) -> EngineResult<RetrievalResponse> {
        let mut warnings = Vec::new();
        let identity = req.session_id.unwrap_or(req.query);
        let wm = WorkingMemory::new(self.store, self.config);

        let attention = req.session_id.map(|s| wm.attention_map(s)).unwrap_or_default();
        let graph = match CausalGraph::new(self.store).graph_view() {
            Ok(g) => g,
            Err(e) => {
                warn!("[engram:pipeline] Graph view unavailable: {}", e);
                warnings.push(format!("structural freshness skipped: {e}"));
                GraphView::default()
            }
        };
        let signals = Signals {
            attention,
            graph,
            window_secs: req.window_secs.unwrap_or(self.config.default_window_secs),
        };

        let fallback = search_with_fallback(
            |threshold| self.fused_pass(req.query, threshold, &signals),
            self.config.primary_threshold,
            self.config.fallback_threshold,
        )
        .await?;

        let pressure = get_pressure_level(req.token_usage, req.runtime.as_ref(), self.config);
        if let Some(w) = &pressure.warning {
            warnings.push(w.clone());
        }
        let requested_budget = req.token_budget.unwrap_or(self.config.token_budget);
        let token_budget = if is_feature_enabled(self.config.flags.pressure_policy, identity, self.config.rollout()) {
            pressure_adjusted_budget(requested_budget, pressure.level)
        } else {
            requested_budget
        };

        let selected =
            optimize_context_budget_with(&fallback.results, token_budget, self.config.region_diversity_threshold);
        let results = rerank_results(&selected, req.limit);
        let tokens_used: usize = results.iter().map(BudgetItem::token_cost).sum();

        let resumed_context = match req.session_id {
            Some(s) if is_feature_enabled(self.config.flags.auto_resume, identity, self.config.rollout()) => {
                wm.get_session_prompt_context(s, self.config.decay_floor, RESUME_CONTEXT_LIMIT)
            }
            _ => Vec::new(),
        };

        info!(
            "[engram:pipeline] {} results ({} tokens of {}), fallback_retry={}, pressure={}",
            results.len(),
            tokens_used,
            token_budget,
            fallback.fallback_retry,
            pressure.level
        );

        Ok(RetrievalResponse {
            results,
            fallback_retry: fallback.fallback_retry,
            threshold_used: fallback.threshold_used,
            pressure,
            token_budget,
            tokens_used,
            resumed_context,
            warnings,
        })
    }

    /// One threshold pass: query all channels, adjust each list, fuse.
    async fn fused_pass(&self, query: &str, threshold: f64, signals: &Signals) -> EngineResult<Vec<RankedMemory>> {
        let runs = self.channels.iter().map(|ch| async move {
            let results = ch.search(query, threshold).await?;
            Ok::<_, EngineError>(RankedList {
                source: ch.name().to_string(),
                results,
                weight: ch.weight(),
            })
        });
        let mut lists = try_join_all(runs).await?;
        for list in &mut lists {
            list.results = adjust(&list.results, signals);
        }
        Ok(fuse_results_multi(&lists, &FusionOptions::from(self.config)))
    }
}

/// Attention, temporal and freshness adjustments, then a stable re-sort so
/// rank-based fusion sees the adjusted order.
fn adjust(results: &[RankedMemory], signals: &Signals) -> Vec<RankedMemory> {
    let mut out: Vec<RankedMemory> = results
        .iter()
        .cloned()
        .map(|mut r| {
            if let Some(att) = signals.attention.get(&r.id) {
                r.score *= 1.0 + att * ATTENTION_RANK_WEIGHT;
            }
            r
        })
        .collect();

    out = vector_search_with_contiguity(Some(&out[..]), signals.window_secs).unwrap_or_default();

    for r in &mut out {
        if let Some(stability) = r.stability {
            let centrality = compute_graph_centrality(&r.id.to_string(), &signals.graph);
            r.score *= 1.0 + compute_structural_freshness(stability, centrality) * FRESHNESS_RANK_WEIGHT;
        }
    }

    out.sort_by(|a, b| score_desc(a.score, b.score));
    out
}
