// End-to-end checks through the public API: a file-backed store, working
// memory across sessions, the causal graph, and the retrieval pipeline.

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use engram_salience::engine::engram::causal_graph::{CausalGraph, CausalLinkRequest, TraversalOptions};
use engram_salience::engine::engram::context_budget::optimize_context_budget;
use engram_salience::engine::engram::fusion::SearchChannel;
use engram_salience::engine::engram::pipeline::{RetrievalPipeline, RetrievalRequest};
use engram_salience::engine::engram::pressure::get_pressure_level;
use engram_salience::engine::engram::temporal_contiguity::vector_search_with_contiguity;
use engram_salience::engine::engram::working_memory::{decayed_score, WorkingMemory};
use engram_salience::engine::sessions::NewMemory;
use engram_salience::engram_types::{
    PressureLevel, PressureSource, RankedMemory, RelationType, RuntimeContextStats, TraversalDirection,
};
use engram_salience::{EngineError, EngineResult, SalienceConfig, SessionStore, ValidationError};
use parking_lot::Mutex;

fn file_store(dir: &tempfile::TempDir) -> SessionStore {
    SessionStore::open(&dir.path().join("nested").join("engram.db")).unwrap()
}

/// Records every threshold it was asked for; answers only at or below `min`.
struct RecordingChannel {
    name: &'static str,
    min: f64,
    rows: Vec<RankedMemory>,
    seen: Mutex<Vec<f64>>,
}

impl RecordingChannel {
    fn new(name: &'static str, min: f64, rows: Vec<RankedMemory>) -> Self {
        Self { name, min, rows, seen: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl SearchChannel for RecordingChannel {
    fn name(&self) -> &str {
        self.name
    }

    async fn search(&self, _query: &str, threshold: f64) -> EngineResult<Vec<RankedMemory>> {
        self.seen.lock().push(threshold);
        Ok(if threshold <= self.min { self.rows.clone() } else { Vec::new() })
    }
}

fn row(id: i64, score: f64, tokens: usize) -> RankedMemory {
    RankedMemory { tokens: Some(tokens), ..RankedMemory::new(id, score) }
}

// ── Working memory ─────────────────────────────────────────────────────────

#[test]
fn working_memory_counters_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = SalienceConfig::default();
    {
        let store = file_store(&dir);
        let wm = WorkingMemory::new(&store, &cfg);
        assert!(wm.set_attention_score("s1", 1, 0.8));
        assert!(wm.set_attention_score("s1", 2, 0.7));
        assert!(wm.set_attention_score("s1", 1, 0.9));
        store.close();
    }

    let store = file_store(&dir);
    let wm = WorkingMemory::new(&store, &cfg);
    let one = wm.get_entry("s1", 1).unwrap();
    assert_eq!((one.event_counter, one.mention_count, one.focus_count), (2, 1, 2));
    let two = wm.get_entry("s1", 2).unwrap();
    assert_eq!((two.event_counter, two.mention_count, two.focus_count), (1, 0, 1));
    assert_eq!(wm.get_session_event_counter("s1"), 2);
}

#[test]
fn sessions_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir);
    let cfg = SalienceConfig::default();
    let wm = WorkingMemory::new(&store, &cfg);

    assert!(wm.set_attention_score("a", 1, 0.9));
    assert!(wm.set_attention_score("b", 1, 0.2));
    assert_eq!(wm.clear_session("a"), 1);
    assert!(wm.get_entry("a", 1).is_none());
    assert_eq!(wm.get_entry("b", 1).unwrap().attention_score, 0.2);
}

#[test]
fn closed_store_fails_soft() {
    let store = SessionStore::open_in_memory().unwrap();
    store.close();
    let cfg = SalienceConfig::default();
    let wm = WorkingMemory::new(&store, &cfg);
    assert!(!wm.set_attention_score("s1", 1, 0.5));
    assert!(wm.get_working_memory("s1").is_empty());
    assert!(wm.get_session_stats("s1").is_none());
    assert_eq!(wm.batch_update_scores("s1"), 0);
}

#[test]
fn decay_formula_matches_worked_example() {
    let cfg = SalienceConfig::default();
    let expected = 1.0 * 0.85f64.powi(10) + 2.0 * 0.05;
    assert!((decayed_score(1.0, 2, 10, &cfg) - expected).abs() < 1e-12);
}

// ── Causal graph ───────────────────────────────────────────────────────────

#[test]
fn self_reference_rejected_across_spellings() {
    let store = SessionStore::open_in_memory().unwrap();
    let graph = CausalGraph::new(&store);

    let err = graph.insert_edge(&CausalLinkRequest::new(5, 5, RelationType::Caused)).unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::SelfReference(_))));

    let err = graph.insert_edge(&CausalLinkRequest::new(5, " 5 ", RelationType::Caused)).unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::SelfReference(_))));
    assert_eq!(graph.stats().unwrap().total_edges, 0);
}

#[test]
fn lineage_and_impact_walk_opposite_ways() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir);
    let graph = CausalGraph::new(&store);

    graph.insert_edge(&CausalLinkRequest::new(1, 2, RelationType::Caused).strength(0.5)).unwrap();
    graph.insert_edge(&CausalLinkRequest::new(2, 3, RelationType::Enabled).strength(0.5)).unwrap();
    graph.insert_edge(&CausalLinkRequest::new(3, 1, RelationType::Supports)).unwrap();

    let impact = graph.impact(1, 5).unwrap();
    assert_eq!(impact.direction, TraversalDirection::Outgoing);
    let hops: Vec<(&str, usize)> = impact.edges.iter().map(|e| (e.to.as_str(), e.depth)).collect();
    assert_eq!(hops, vec![("2", 1), ("3", 2)]);
    assert!((impact.edges[0].strength - 0.65).abs() < 1e-12);

    let why = graph.why(3, 1).unwrap();
    assert_eq!(why.edges.len(), 1);
    assert_eq!(why.edges[0].from, "2");

    let only_caused = graph
        .traverse(
            1,
            &TraversalOptions {
                max_depth: 5,
                direction: TraversalDirection::Both,
                relations: Some(vec![RelationType::Caused]),
            },
        )
        .unwrap();
    assert!(only_caused.edges.iter().all(|e| e.relation == RelationType::Caused));
}

// ── Ranking primitives ─────────────────────────────────────────────────────

#[test]
fn budget_drops_candidate_past_the_limit() {
    let rows: Vec<RankedMemory> = (1..=5).map(|i| row(i, 1.0 - i as f64 * 0.1, 500)).collect();
    let picked = optimize_context_budget(&rows, 2000);
    let ids: Vec<i64> = picked.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[test]
fn contiguity_boosts_close_pairs() {
    let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let rows = vec![
        RankedMemory { created_at: Some(t0), ..RankedMemory::new(1, 0.8) },
        RankedMemory { created_at: Some(t0 + Duration::seconds(600)), ..RankedMemory::new(2, 0.4) },
    ];
    let out = vector_search_with_contiguity(Some(&rows[..]), 3600).unwrap();
    assert!((out[0].score - 0.8 * 1.125).abs() < 1e-12);
    assert!((out[1].score - 0.4 * 1.125).abs() < 1e-12);
    assert_eq!(rows[0].score, 0.8);
}

#[test]
fn pressure_sources() {
    let cfg = SalienceConfig::default();
    let caller = get_pressure_level(Some(0.65), None, &cfg);
    assert_eq!(caller.level, PressureLevel::Focused);
    assert_eq!(caller.ratio, Some(0.65));
    assert_eq!(caller.source, PressureSource::Caller);

    let stats = RuntimeContextStats { token_count: Some(2000), token_budget: None };
    let none = get_pressure_level(None, Some(&stats), &cfg);
    assert_eq!(none.level, PressureLevel::None);
    assert_eq!(none.source, PressureSource::Unavailable);
    assert!(none.ratio.is_none());
    assert!(none.warning.is_some());
}

// ── Pipeline ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn pipeline_retries_once_then_fuses_channels() {
    let store = SessionStore::open_in_memory().unwrap();
    let cfg = SalienceConfig::default();
    let vector = RecordingChannel::new("vector", 0.2, vec![row(1, 0.25, 100), row(2, 0.2, 100)]);
    let keyword = RecordingChannel::new("keyword", 0.2, vec![row(2, 3.0, 100)]);

    let resp = RetrievalPipeline::new(&store, &cfg)
        .with_channel(&vector)
        .with_channel(&keyword)
        .run(&RetrievalRequest { query: "why sqlite", token_usage: Some(0.1), ..Default::default() })
        .await
        .unwrap();

    assert!(resp.fallback_retry);
    assert_eq!(resp.threshold_used, cfg.fallback_threshold);
    assert_eq!(*vector.seen.lock(), vec![cfg.primary_threshold, cfg.fallback_threshold]);
    assert_eq!(*keyword.seen.lock(), vec![cfg.primary_threshold, cfg.fallback_threshold]);
    // memory 2 appears in both lists, so convergence puts it first
    assert_eq!(resp.results[0].id, 2);
    assert_eq!(resp.results[0].source_scores.len(), 2);
    assert_eq!(resp.tokens_used, 200);
    assert!(resp.warnings.is_empty());
}

#[tokio::test]
async fn pipeline_prefers_session_focus() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir);
    let cfg = SalienceConfig::default();
    let wm = WorkingMemory::new(&store, &cfg);
    assert!(wm.set_attention_score("s1", 7, 1.0));

    let vector = RecordingChannel::new("vector", 1.0, vec![row(3, 0.9, 50), row(7, 0.85, 50)]);
    let resp = RetrievalPipeline::new(&store, &cfg)
        .with_channel(&vector)
        .run(&RetrievalRequest {
            query: "q",
            session_id: Some("s1"),
            token_usage: Some(0.0),
            limit: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(!resp.fallback_retry);
    assert_eq!(resp.results.len(), 1);
    assert_eq!(resp.results[0].id, 7);
    assert_eq!(resp.resumed_context.len(), 1);
}

// ── Store & config ─────────────────────────────────────────────────────────

#[test]
fn timeline_reads_seeded_memories() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir);
    for (i, title) in ["spec", "plan"].iter().enumerate() {
        store
            .memory_insert(&NewMemory {
                title: title.to_string(),
                spec_folder: "specs/001".into(),
                file_path: format!("specs/001/{title}.md"),
                created_at: format!("2026-03-01T12:0{i}:00Z"),
                stability: 1.0,
            })
            .unwrap();
    }
    assert_eq!(store.memory_count_active().unwrap(), 2);
    let timeline = engram_salience::engine::engram::temporal_contiguity::build_timeline(&store, Some("specs/001"), 10);
    assert_eq!(timeline.len(), 2);
}

#[test]
fn config_file_overrides_and_rejects() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("salience.toml");

    std::fs::write(&path, "token_budget = 4000\nrollout_percent = 25\n\n[flags]\nauto_resume = false\n").unwrap();
    let cfg = SalienceConfig::load(&path);
    assert_eq!(cfg.token_budget, 4000);
    assert_eq!(cfg.rollout(), 25);
    assert!(!cfg.flags.auto_resume);
    assert!(cfg.flags.event_decay);

    std::fs::write(&path, "decay_rate = 1.5\n").unwrap();
    assert_eq!(SalienceConfig::load(&path), SalienceConfig::default());

    assert_eq!(SalienceConfig::load(&dir.path().join("missing.toml")), SalienceConfig::default());
}
