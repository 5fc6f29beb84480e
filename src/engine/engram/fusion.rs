// ── Engram: Hybrid Rank Fusion ──────────────────────────────────────────────
//
// Merges ranked lists from independent retrieval channels (vector, keyword,
// graph) with weighted reciprocal-rank fusion:
//
//   score(id) = Σ_lists weight × 1 / (k + rank + 1)
//             + convergence_bonus × (lists_containing(id) − 1)
//
// k = 60; graph lists default to weight 1.5, others to 1.0. The fused list
// is stable-sorted by score, so first-seen order breaks ties.
//
// Adaptive weighting: intent profiles pick semantic/keyword/recency weights
// (shifted by document type) when the adaptive_fusion flag is on for the
// caller's rollout bucket.
//
// unified_search fans a query out to several channels concurrently. A
// failing channel contributes an empty list and a warning; it never fails
// the whole search.

use crate::atoms::engram_types::{score_desc, RankedMemory};
use crate::atoms::error::EngineResult;
use crate::engine::config::SalienceConfig;
use crate::engine::engram::rollout::is_feature_enabled;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const SOURCE_VECTOR: &str = "vector";
pub const SOURCE_KEYWORD: &str = "keyword";
pub const SOURCE_GRAPH: &str = "graph";

const RECENCY_MAX_AGE_DAYS: f64 = 365.0;
const RECENCY_SCALE: f64 = 0.1;

// ═════════════════════════════════════════════════════════════════════════════
// Channels
// ═════════════════════════════════════════════════════════════════════════════

/// One retrieval channel: a similarity, keyword or graph search that
/// returns candidates ranked best-first.
#[async_trait]
pub trait SearchChannel: Send + Sync {
    /// Source label used in `source_scores`.
    fn name(&self) -> &str;

    /// Fusion weight; `None` uses the source default.
    fn weight(&self) -> Option<f64> {
        None
    }

    async fn search(&self, query: &str, threshold: f64) -> EngineResult<Vec<RankedMemory>>;
}

/// One channel's ranked output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedList {
    pub source: String,
    pub results: Vec<RankedMemory>,
    pub weight: Option<f64>,
}

impl RankedList {
    pub fn new(source: impl Into<String>, results: Vec<RankedMemory>) -> Self {
        Self { source: source.into(), results, weight: None }
    }

    pub fn weighted(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionOptions {
    pub k: f64,
    pub convergence_bonus: f64,
    pub graph_weight_boost: f64,
}

impl Default for FusionOptions {
    fn default() -> Self {
        Self::from(&SalienceConfig::default())
    }
}

impl From<&SalienceConfig> for FusionOptions {
    fn from(cfg: &SalienceConfig) -> Self {
        Self { k: cfg.rrf_k, convergence_bonus: cfg.convergence_bonus, graph_weight_boost: cfg.graph_weight_boost }
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Reciprocal-rank fusion
// ═════════════════════════════════════════════════════════════════════════════

/// Fuse any number of ranked lists, deduplicated by memory id.
///
/// The first occurrence of an id supplies its non-score fields. Each
/// list's contribution is recorded under its source name.
pub fn fuse_results_multi(lists: &[RankedList], opts: &FusionOptions) -> Vec<RankedMemory> {
    let mut fused: Vec<RankedMemory> = Vec::new();
    let mut hits: Vec<usize> = Vec::new();
    let mut index: HashMap<i64, usize> = HashMap::new();

    for list in lists {
        let weight = list
            .weight
            .unwrap_or(if list.source == SOURCE_GRAPH { opts.graph_weight_boost } else { 1.0 });
        for (rank, item) in list.results.iter().enumerate() {
            let contribution = weight / (opts.k + rank as f64 + 1.0);
            let slot = *index.entry(item.id).or_insert_with(|| {
                let mut fresh = item.clone();
                fresh.score = 0.0;
                fresh.source_scores.clear();
                fused.push(fresh);
                hits.push(0);
                fused.len() - 1
            });
            let entry = &mut fused[slot];
            entry.score += contribution;
            *entry.source_scores.entry(list.source.clone()).or_insert(0.0) += contribution;
            hits[slot] += 1;
        }
    }

    for (entry, n) in fused.iter_mut().zip(&hits) {
        if *n >= 2 {
            entry.score += opts.convergence_bonus * (*n - 1) as f64;
        }
    }

    sort_desc(&mut fused);
    fused
}

/// Two-list convenience: semantic + keyword at the given weights.
pub fn weighted_fuse(
    semantic: &[RankedMemory],
    keyword: &[RankedMemory],
    semantic_weight: f64,
    keyword_weight: f64,
    opts: &FusionOptions,
) -> Vec<RankedMemory> {
    let mut lists = Vec::with_capacity(2);
    if !semantic.is_empty() {
        lists.push(RankedList::new(SOURCE_VECTOR, semantic.to_vec()).weighted(semantic_weight));
    }
    if !keyword.is_empty() {
        lists.push(RankedList::new(SOURCE_KEYWORD, keyword.to_vec()).weighted(keyword_weight));
    }
    fuse_results_multi(&lists, opts)
}

fn sort_desc(v: &mut [RankedMemory]) {
    v.sort_by(|a, b| score_desc(a.score, b.score));
}

// ═════════════════════════════════════════════════════════════════════════════
// Intent-adaptive weights
// ═════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Understand,
    FindSpec,
    FixBug,
    Debug,
    AddFeature,
    Refactor,
}

impl QueryIntent {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "understand" => Some(Self::Understand),
            "find_spec" => Some(Self::FindSpec),
            "fix_bug" => Some(Self::FixBug),
            "debug" => Some(Self::Debug),
            "add_feature" => Some(Self::AddFeature),
            "refactor" => Some(Self::Refactor),
            _ => None,
        }
    }
}

/// Per-channel weights for two-list adaptive fusion. Graph lists carry
/// their own weight through `RankedList::weighted`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub semantic: f64,
    pub keyword: f64,
    pub recency: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self { semantic: 0.5, keyword: 0.3, recency: 0.2 }
    }
}

impl FusionWeights {
    /// Equal-weight RRF, no recency.
    pub fn standard() -> Self {
        Self { semantic: 1.0, keyword: 1.0, recency: 0.0 }
    }

    pub fn for_intent(intent: QueryIntent) -> Self {
        let (semantic, keyword, recency) = match intent {
            QueryIntent::Understand => (0.7, 0.2, 0.1),
            QueryIntent::FindSpec => (0.7, 0.2, 0.1),
            QueryIntent::FixBug => (0.4, 0.4, 0.2),
            QueryIntent::Debug => (0.4, 0.4, 0.2),
            QueryIntent::AddFeature => (0.5, 0.3, 0.2),
            QueryIntent::Refactor => (0.6, 0.3, 0.1),
        };
        Self { semantic, keyword, recency }
    }
}

/// Intent profile (or defaults), shifted ±0.1 by document type:
/// decision → keyword, implementation → recency, research → semantic.
pub fn adaptive_weights(intent: Option<QueryIntent>, document_type: Option<&str>) -> FusionWeights {
    let mut w = intent.map(FusionWeights::for_intent).unwrap_or_default();
    match document_type {
        Some("decision") => {
            w.keyword = (w.keyword + 0.1).min(1.0);
            w.semantic = (w.semantic - 0.1).max(0.0);
        }
        Some("implementation") => {
            w.recency = (w.recency + 0.1).min(1.0);
            w.semantic = (w.semantic - 0.1).max(0.0);
        }
        Some("research") => {
            w.semantic = (w.semantic + 0.1).min(1.0);
            w.keyword = (w.keyword - 0.1).max(0.0);
        }
        _ => {}
    }
    w
}

/// Weighted fusion plus an exponential recency nudge:
/// `score += exp(−age_days / 365) × recency × 0.1`.
pub fn adaptive_fuse(
    semantic: &[RankedMemory],
    keyword: &[RankedMemory],
    weights: &FusionWeights,
    opts: &FusionOptions,
    now: DateTime<Utc>,
) -> Vec<RankedMemory> {
    let mut fused = weighted_fuse(semantic, keyword, weights.semantic, weights.keyword, opts);
    if weights.recency > 0.0 {
        for r in &mut fused {
            let Some(created) = r.created_at else { continue };
            let age_days = ((now - created).num_seconds() as f64 / 86_400.0).max(0.0);
            r.score += (-age_days / RECENCY_MAX_AGE_DAYS).exp() * weights.recency * RECENCY_SCALE;
        }
        sort_desc(&mut fused);
    }
    fused
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveFusionResult {
    pub results: Vec<RankedMemory>,
    pub weights: FusionWeights,
    /// Whether intent-adaptive weighting was applied.
    pub adaptive: bool,
}

/// Adaptive fusion when the flag is on for `identity`, otherwise
/// equal-weight RRF.
pub fn hybrid_adaptive_fuse(
    semantic: &[RankedMemory],
    keyword: &[RankedMemory],
    intent: Option<QueryIntent>,
    document_type: Option<&str>,
    identity: &str,
    config: &SalienceConfig,
    now: DateTime<Utc>,
) -> AdaptiveFusionResult {
    let opts = FusionOptions::from(config);
    if !is_feature_enabled(config.flags.adaptive_fusion, identity, config.rollout()) {
        let w = FusionWeights::standard();
        return AdaptiveFusionResult {
            results: weighted_fuse(semantic, keyword, w.semantic, w.keyword, &opts),
            weights: w,
            adaptive: false,
        };
    }
    let weights = adaptive_weights(intent, document_type);
    AdaptiveFusionResult {
        results: adaptive_fuse(semantic, keyword, &weights, &opts, now),
        weights,
        adaptive: true,
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Unified search
// ═════════════════════════════════════════════════════════════════════════════

/// Query every channel concurrently and fuse. Failing channels are isolated.
pub async fn unified_search(
    channels: &[&dyn SearchChannel],
    query: &str,
    threshold: f64,
    opts: &FusionOptions,
) -> Vec<RankedMemory> {
    let runs = channels.iter().map(|ch| async move {
        let results = match ch.search(query, threshold).await {
            Ok(r) => r,
            Err(e) => {
                warn!("[engram:fusion] {} search failed: {}", ch.name(), e);
                Vec::new()
            }
        };
        RankedList { source: ch.name().to_string(), results, weight: ch.weight() }
    });
    let lists = futures::future::join_all(runs).await;
    let fused = fuse_results_multi(&lists, opts);
    debug!("[engram:fusion] {} channels → {} fused results", lists.len(), fused.len());
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::error::EngineError;
    use chrono::{Duration, TimeZone};

    fn list(ids: &[i64]) -> Vec<RankedMemory> {
        ids.iter().map(|&id| RankedMemory::new(id, 0.0)).collect()
    }

    fn ids(v: &[RankedMemory]) -> Vec<i64> {
        v.iter().map(|m| m.id).collect()
    }

    struct Fixed(&'static str, Vec<i64>);
    struct Failing;

    #[async_trait]
    impl SearchChannel for Fixed {
        fn name(&self) -> &str {
            self.0
        }
        async fn search(&self, _q: &str, _t: f64) -> EngineResult<Vec<RankedMemory>> {
            Ok(list(&self.1))
        }
    }

    #[async_trait]
    impl SearchChannel for Failing {
        fn name(&self) -> &str {
            "broken"
        }
        async fn search(&self, _q: &str, _t: f64) -> EngineResult<Vec<RankedMemory>> {
            Err(EngineError::Other("index offline".into()))
        }
    }

    #[test]
    fn test_single_list_rrf_scores() {
        let out = fuse_results_multi(&[RankedList::new(SOURCE_VECTOR, list(&[10, 20]))], &FusionOptions::default());
        assert_eq!(ids(&out), vec![10, 20]);
        assert!((out[0].score - 1.0 / 61.0).abs() < 1e-12);
        assert!((out[1].score - 1.0 / 62.0).abs() < 1e-12);
        assert!((out[0].source_scores[SOURCE_VECTOR] - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_convergence_bonus_and_dedup() {
        let lists = [
            RankedList::new(SOURCE_VECTOR, list(&[1, 2])),
            RankedList::new(SOURCE_KEYWORD, list(&[2, 3])),
        ];
        let out = fuse_results_multi(&lists, &FusionOptions::default());
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].id, 2);
        let expected = 1.0 / 62.0 + 1.0 / 61.0 + 0.10;
        assert!((out[0].score - expected).abs() < 1e-12);
        assert_eq!(out[0].source_scores.len(), 2);
    }

    #[test]
    fn test_graph_default_weight() {
        let lists = [
            RankedList::new(SOURCE_VECTOR, list(&[1])),
            RankedList::new(SOURCE_GRAPH, list(&[2])),
        ];
        let out = fuse_results_multi(&lists, &FusionOptions::default());
        assert_eq!(out[0].id, 2);
        assert!((out[0].score - 1.5 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_ties_keep_first_seen_order() {
        let lists = [
            RankedList::new(SOURCE_VECTOR, list(&[5])),
            RankedList::new(SOURCE_KEYWORD, list(&[9])),
        ];
        assert_eq!(ids(&fuse_results_multi(&lists, &FusionOptions::default())), vec![5, 9]);
    }

    #[test]
    fn test_first_occurrence_fields_kept() {
        let mut a = RankedMemory::new(1, 0.9);
        a.content = Some("from vector".into());
        let mut b = RankedMemory::new(1, 0.2);
        b.content = Some("from keyword".into());
        let lists = [RankedList::new(SOURCE_VECTOR, vec![a]), RankedList::new(SOURCE_KEYWORD, vec![b])];
        let out = fuse_results_multi(&lists, &FusionOptions::default());
        assert_eq!(out[0].content.as_deref(), Some("from vector"));
    }

    #[test]
    fn test_intent_profiles_and_shifts() {
        let w = adaptive_weights(Some(QueryIntent::Debug), None);
        assert_eq!((w.semantic, w.keyword, w.recency), (0.4, 0.4, 0.2));
        let w = adaptive_weights(Some(QueryIntent::Understand), Some("decision"));
        assert!((w.keyword - 0.3).abs() < 1e-12);
        assert!((w.semantic - 0.6).abs() < 1e-12);
        assert_eq!(adaptive_weights(None, Some("unknown")), FusionWeights::default());
        assert_eq!(QueryIntent::from_label(" Fix_Bug "), Some(QueryIntent::FixBug));
        assert_eq!(QueryIntent::from_label("dance"), None);
    }

    #[test]
    fn test_every_weight_reaches_the_fused_score() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let mut dated = RankedMemory::new(1, 0.0);
        dated.created_at = Some(now);
        let base = FusionWeights { semantic: 1.0, keyword: 1.0, recency: 1.0 };
        let score = |w: FusionWeights| adaptive_fuse(&[dated.clone()], &[dated.clone()], &w, &FusionOptions::default(), now)[0].score;
        let reference = score(base);
        assert!(score(FusionWeights { semantic: 2.0, ..base }) > reference);
        assert!(score(FusionWeights { keyword: 2.0, ..base }) > reference);
        assert!(score(FusionWeights { recency: 0.0, ..base }) < reference);
        let json = serde_json::to_value(base).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_recency_prefers_newer() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let mut old = RankedMemory::new(1, 0.0);
        old.created_at = Some(now - Duration::days(700));
        let mut new = RankedMemory::new(2, 0.0);
        new.created_at = Some(now - Duration::days(1));
        // same rank in two separate lists → equal RRF before recency
        let w = FusionWeights { semantic: 1.0, keyword: 1.0, recency: 1.0 };
        let out = adaptive_fuse(&[old], &[new], &w, &FusionOptions::default(), now);
        assert_eq!(out[0].id, 2);
    }

    #[test]
    fn test_hybrid_respects_flag() {
        let now = Utc::now();
        let mut cfg = SalienceConfig::default();
        cfg.flags.adaptive_fusion = false;
        let r = hybrid_adaptive_fuse(&list(&[1]), &list(&[2]), Some(QueryIntent::FixBug), None, "s", &cfg, now);
        assert!(!r.adaptive);
        assert_eq!(r.weights, FusionWeights::standard());

        cfg.flags.adaptive_fusion = true;
        let r = hybrid_adaptive_fuse(&list(&[1]), &list(&[2]), Some(QueryIntent::FixBug), None, "s", &cfg, now);
        assert!(r.adaptive);
        assert_eq!(r.weights.keyword, 0.4);
    }

    #[tokio::test]
    async fn test_unified_search_isolates_failures() {
        let vector = Fixed(SOURCE_VECTOR, vec![1, 2]);
        let keyword = Fixed(SOURCE_KEYWORD, vec![2]);
        let broken = Failing;
        let channels: [&dyn SearchChannel; 3] = [&vector, &broken, &keyword];
        let out = unified_search(&channels, "q", 0.3, &FusionOptions::default()).await;
        assert_eq!(ids(&out), vec![2, 1]);
        assert!(!out[0].source_scores.contains_key("broken"));
    }
}
