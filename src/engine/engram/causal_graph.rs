// ── Engram: Causal Graph ────────────────────────────────────────────────────
//
// Typed, directed, strength-weighted edges between memories, and the walks
// over them. Delegates DB I/O to SessionStore methods in
// sessions/causal_edges.rs.
//
// Responsibilities:
//   - Validation before any write (mandatory fields, closed relation set,
//     strength in [0, 1], no self-reference under string/number equivalence)
//   - Upsert, batch insert with per-edge failure reporting, update, delete,
//     cascade delete when a memory goes away
//   - Bounded traversal (depth ≤ 10, visited set) for "why" and "impact"
//   - Graph statistics, orphan detection, and the GraphView projection
//     consumed by structural freshness

use crate::atoms::constants::{DEFAULT_TRAVERSAL_DEPTH, MAX_EDGES_LIMIT, MAX_TRAVERSAL_DEPTH};
use crate::atoms::engram_types::{
    BatchFailure, BatchInsertReport, CausalChain, CausalEdge, GraphStats, GraphView, RelationType,
    TraversalDirection, TraversedEdge,
};
use crate::atoms::error::{EngineResult, ValidationError};
use crate::engine::sessions::{EdgeWrite, SessionStore};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Upper bound on edges loaded into a GraphView.
const GRAPH_VIEW_EDGE_LIMIT: usize = 10_000;

// ═════════════════════════════════════════════════════════════════════════════
// Node identifiers
// ═════════════════════════════════════════════════════════════════════════════

/// A memory reference as callers supply it: a number or a string.
/// `5`, `"5"` and `" 05 "` all name the same node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeRef {
    Int(i64),
    Text(String),
}

impl NodeRef {
    /// Canonical storage form: integer-parseable text collapses to its
    /// integer spelling; anything else is trimmed. `None` when blank.
    pub fn normalize(&self) -> Option<String> {
        match self {
            NodeRef::Int(n) => Some(n.to_string()),
            NodeRef::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    None
                } else if let Ok(n) = t.parse::<i64>() {
                    Some(n.to_string())
                } else {
                    Some(t.to_string())
                }
            }
        }
    }
}

impl From<i64> for NodeRef {
    fn from(n: i64) -> Self {
        NodeRef::Int(n)
    }
}

impl From<&str> for NodeRef {
    fn from(s: &str) -> Self {
        NodeRef::Text(s.to_string())
    }
}

impl From<String> for NodeRef {
    fn from(s: String) -> Self {
        NodeRef::Text(s)
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Requests
// ═════════════════════════════════════════════════════════════════════════════

/// Unvalidated edge input. Every field is optional so missing-field
/// rejections can be reported precisely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CausalLinkRequest {
    pub source_id: Option<NodeRef>,
    pub target_id: Option<NodeRef>,
    pub relation: Option<String>,
    /// Defaults to 1.0.
    pub strength: Option<f64>,
    pub evidence: Option<String>,
    /// Defaults to `manual`.
    pub created_by: Option<String>,
}

impl CausalLinkRequest {
    pub fn new(source: impl Into<NodeRef>, target: impl Into<NodeRef>, relation: RelationType) -> Self {
        Self {
            source_id: Some(source.into()),
            target_id: Some(target.into()),
            relation: Some(relation.to_string()),
            ..Default::default()
        }
    }

    pub fn strength(mut self, strength: f64) -> Self {
        self.strength = Some(strength);
        self
    }

    pub fn evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEdge {
    pub source_id: String,
    pub target_id: String,
    pub relation: RelationType,
    pub strength: f64,
    pub evidence: Option<String>,
    pub created_by: String,
}

fn validate_strength(strength: f64) -> Result<f64, ValidationError> {
    if strength.is_finite() && (0.0..=1.0).contains(&strength) {
        Ok(strength)
    } else {
        Err(ValidationError::StrengthOutOfRange(strength.to_string()))
    }
}

/// Check every edge invariant. Nothing is written on failure.
pub fn validate_link(req: &CausalLinkRequest) -> Result<ValidatedEdge, ValidationError> {
    let source_id = req
        .source_id
        .as_ref()
        .and_then(NodeRef::normalize)
        .ok_or(ValidationError::MissingField("source_id"))?;
    let target_id = req
        .target_id
        .as_ref()
        .and_then(NodeRef::normalize)
        .ok_or(ValidationError::MissingField("target_id"))?;
    let relation_str = req
        .relation
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or(ValidationError::MissingField("relation"))?;
    let relation: RelationType = relation_str.parse()?;
    let strength = validate_strength(req.strength.unwrap_or(1.0))?;

    if source_id == target_id {
        return Err(ValidationError::SelfReference(source_id));
    }

    Ok(ValidatedEdge {
        source_id,
        target_id,
        relation,
        strength,
        evidence: req.evidence.clone().filter(|e| !e.trim().is_empty()),
        created_by: req.created_by.clone().unwrap_or_else(|| "manual".to_string()),
    })
}

/// Traversal knobs. `max_depth` is capped at 10; `relations` filters the
/// flattened result after the walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalOptions {
    pub max_depth: usize,
    pub direction: TraversalDirection,
    pub relations: Option<Vec<RelationType>>,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self { max_depth: DEFAULT_TRAVERSAL_DEPTH, direction: TraversalDirection::Outgoing, relations: None }
    }
}

/// Memory ids of one spec folder's documents, by document role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpecDocumentIds {
    pub spec: Option<i64>,
    pub plan: Option<i64>,
    pub tasks: Option<i64>,
    pub implementation_summary: Option<i64>,
    pub checklist: Option<i64>,
    pub decision_record: Option<i64>,
    pub research: Option<i64>,
}

// ═════════════════════════════════════════════════════════════════════════════
// Graph handle
// ═════════════════════════════════════════════════════════════════════════════

pub struct CausalGraph<'a> {
    store: &'a SessionStore,
}

impl<'a> CausalGraph<'a> {
    pub fn new(store: &'a SessionStore) -> Self {
        Self { store }
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Validate and upsert one edge. Returns the edge id.
    pub fn insert_edge(&self, req: &CausalLinkRequest) -> EngineResult<i64> {
        let edge = validate_link(req)?;
        let id = self.store.causal_upsert(&EdgeWrite {
            source_id: &edge.source_id,
            target_id: &edge.target_id,
            relation: edge.relation,
            strength: edge.strength,
            evidence: edge.evidence.as_deref(),
            created_by: &edge.created_by,
        })?;
        info!(
            "[engram:causal] ✓ {} -[{} {:.2}]-> {} (edge {})",
            edge.source_id, edge.relation, edge.strength, edge.target_id, id
        );
        Ok(id)
    }

    /// Insert many edges; each failure is recorded and the rest proceed.
    pub fn insert_edges_batch(&self, reqs: &[CausalLinkRequest]) -> BatchInsertReport {
        let mut report = BatchInsertReport::default();
        for (index, req) in reqs.iter().enumerate() {
            match self.insert_edge(req) {
                Ok(_) => report.inserted += 1,
                Err(e) => {
                    warn!("[engram:causal] Batch edge {} rejected: {}", index, e);
                    report.failed.push(BatchFailure { index, reason: e.to_string() });
                }
            }
        }
        report
    }

    /// Change strength and/or evidence of an existing edge.
    pub fn update_edge(&self, id: i64, strength: Option<f64>, evidence: Option<&str>) -> EngineResult<bool> {
        let strength = strength.map(validate_strength).transpose()?;
        self.store.causal_update(id, strength, evidence)
    }

    pub fn delete_edge(&self, id: i64) -> EngineResult<bool> {
        self.store.causal_delete(id)
    }

    /// Cascade for a deleted memory: drop every edge that touches it.
    pub fn delete_edges_for_memory(&self, memory_id: impl Into<NodeRef>) -> EngineResult<usize> {
        match memory_id.into().normalize() {
            Some(id) => {
                let n = self.store.causal_delete_for_node(&id)?;
                if n > 0 {
                    info!("[engram:causal] Removed {} edges of deleted memory {}", n, id);
                }
                Ok(n)
            }
            None => Ok(0),
        }
    }

    /// Link a spec folder's documents:
    /// spec→plan→tasks→implementation_summary (`caused`), and
    /// checklist→spec, research→spec, decision_record→plan (`supports`).
    pub fn create_document_chain(&self, ids: &SpecDocumentIds) -> BatchInsertReport {
        let links: [(Option<i64>, Option<i64>, RelationType, f64, &str); 6] = [
            (ids.spec, ids.plan, RelationType::Caused, 0.9, "spec -> plan chain"),
            (ids.plan, ids.tasks, RelationType::Caused, 0.9, "plan -> tasks chain"),
            (ids.tasks, ids.implementation_summary, RelationType::Caused, 0.8, "tasks -> implementation summary chain"),
            (ids.checklist, ids.spec, RelationType::Supports, 0.7, "checklist supports spec"),
            (ids.decision_record, ids.plan, RelationType::Supports, 0.8, "decision record supports plan"),
            (ids.research, ids.spec, RelationType::Supports, 0.7, "research supports spec"),
        ];
        let reqs: Vec<CausalLinkRequest> = links
            .iter()
            .filter_map(|(src, tgt, rel, strength, why)| match (src, tgt) {
                (Some(s), Some(t)) => Some(
                    CausalLinkRequest {
                        created_by: Some("auto".into()),
                        ..CausalLinkRequest::new(*s, *t, *rel)
                    }
                    .strength(*strength)
                    .evidence(*why),
                ),
                _ => None,
            })
            .collect();
        self.insert_edges_batch(&reqs)
    }

    // ── Reads ───────────────────────────────────────────────────────

    pub fn get_edges_from(&self, node: impl Into<NodeRef>, relation: Option<RelationType>) -> EngineResult<Vec<CausalEdge>> {
        match node.into().normalize() {
            Some(id) => Ok(filter_relation(self.store.causal_edges_from(&id, MAX_EDGES_LIMIT)?, relation)),
            None => Ok(Vec::new()),
        }
    }

    pub fn get_edges_to(&self, node: impl Into<NodeRef>, relation: Option<RelationType>) -> EngineResult<Vec<CausalEdge>> {
        match node.into().normalize() {
            Some(id) => Ok(filter_relation(self.store.causal_edges_to(&id, MAX_EDGES_LIMIT)?, relation)),
            None => Ok(Vec::new()),
        }
    }

    /// Edges touching `node` in either direction.
    pub fn get_edges_for_node(&self, node: impl Into<NodeRef>, relation: Option<RelationType>) -> EngineResult<Vec<CausalEdge>> {
        match node.into().normalize() {
            Some(id) => Ok(filter_relation(self.store.causal_edges_for_node(&id, MAX_EDGES_LIMIT)?, relation)),
            None => Ok(Vec::new()),
        }
    }

    /// Every edge, strongest first. `limit` is capped at 100.
    pub fn get_all_edges(&self, limit: usize) -> EngineResult<Vec<CausalEdge>> {
        self.store.causal_all_edges(limit.min(MAX_EDGES_LIMIT))
    }

    // ── Traversal ───────────────────────────────────────────────────

    /// Breadth-first walk from `node`. Each node is expanded at most once,
    /// so cycles (self, diamond, long) terminate and no edge repeats.
    pub fn traverse(&self, node: impl Into<NodeRef>, opts: &TraversalOptions) -> EngineResult<CausalChain> {
        let root = node.into().normalize().ok_or(ValidationError::MissingField("node_id"))?;
        let max_depth = opts.max_depth.min(MAX_TRAVERSAL_DEPTH);

        let mut edges = match opts.direction {
            TraversalDirection::Outgoing | TraversalDirection::Incoming => {
                self.walk(&root, max_depth, opts.direction)?
            }
            TraversalDirection::Both => {
                let mut merged = self.walk(&root, max_depth, TraversalDirection::Outgoing)?;
                let mut seen: HashSet<(String, String, RelationType)> = merged
                    .iter()
                    .map(|e| (e.from.clone(), e.to.clone(), e.relation))
                    .collect();
                for e in self.walk(&root, max_depth, TraversalDirection::Incoming)? {
                    if seen.insert((e.from.clone(), e.to.clone(), e.relation)) {
                        merged.push(e);
                    }
                }
                merged
            }
        };

        if let Some(keep) = &opts.relations {
            edges.retain(|e| keep.contains(&e.relation));
        }

        Ok(build_chain(root, opts.direction, edges))
    }

    /// Lineage: what led to `node` (incoming edges).
    pub fn why(&self, node: impl Into<NodeRef>, max_depth: usize) -> EngineResult<CausalChain> {
        let opts = TraversalOptions { max_depth, direction: TraversalDirection::Incoming, relations: None };
        self.traverse(node, &opts)
    }

    /// Consequences: what `node` led to (outgoing edges).
    pub fn impact(&self, node: impl Into<NodeRef>, max_depth: usize) -> EngineResult<CausalChain> {
        let opts = TraversalOptions { max_depth, direction: TraversalDirection::Outgoing, relations: None };
        self.traverse(node, &opts)
    }

    fn walk(&self, root: &str, max_depth: usize, direction: TraversalDirection) -> EngineResult<Vec<TraversedEdge>> {
        let outgoing = direction == TraversalDirection::Outgoing;
        let mut visited: HashSet<String> = HashSet::from([root.to_string()]);
        let mut frontier = vec![root.to_string()];
        let mut out = Vec::new();

        for depth in 1..=max_depth {
            let mut next = Vec::new();
            for node in &frontier {
                let edges = if outgoing {
                    self.store.causal_edges_from(node, MAX_EDGES_LIMIT)?
                } else {
                    self.store.causal_edges_to(node, MAX_EDGES_LIMIT)?
                };
                for edge in edges {
                    let neighbor = if outgoing { &edge.target_id } else { &edge.source_id };
                    if !visited.insert(neighbor.clone()) {
                        continue;
                    }
                    next.push(neighbor.clone());
                    out.push(TraversedEdge {
                        id: edge.id,
                        strength: (edge.strength * edge.relation.weight()).min(1.0),
                        from: edge.source_id,
                        to: edge.target_id,
                        relation: edge.relation,
                        depth,
                    });
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        Ok(out)
    }

    // ── Statistics ──────────────────────────────────────────────────

    pub fn stats(&self) -> EngineResult<GraphStats> {
        self.store.causal_stats()
    }

    /// Edges pointing at memories that no longer exist.
    pub fn find_orphaned_edges(&self) -> EngineResult<Vec<CausalEdge>> {
        self.store.causal_orphaned()
    }

    /// Adjacency projection over the strongest edges.
    pub fn graph_view(&self) -> EngineResult<GraphView> {
        Ok(graph_view_from_edges(&self.store.causal_all_edges(GRAPH_VIEW_EDGE_LIMIT)?))
    }
}

fn filter_relation(edges: Vec<CausalEdge>, relation: Option<RelationType>) -> Vec<CausalEdge> {
    match relation {
        Some(rel) => edges.into_iter().filter(|e| e.relation == rel).collect(),
        None => edges,
    }
}

fn build_chain(root: String, direction: TraversalDirection, edges: Vec<TraversedEdge>) -> CausalChain {
    let mut by_relation: BTreeMap<RelationType, Vec<TraversedEdge>> = BTreeMap::new();
    for e in &edges {
        by_relation.entry(e.relation).or_default().push(e.clone());
    }
    CausalChain {
        root,
        direction,
        total_edges: edges.len(),
        max_depth_reached: edges.iter().map(|e| e.depth).max().unwrap_or(0),
        by_relation,
        edges,
    }
}

/// Project edges into node set + inbound/outbound adjacency.
pub fn graph_view_from_edges(edges: &[CausalEdge]) -> GraphView {
    let mut view = GraphView::default();
    for e in edges {
        view.nodes.insert(e.source_id.clone());
        view.nodes.insert(e.target_id.clone());
        view.outbound.entry(e.source_id.clone()).or_default().push(e.target_id.clone());
        view.inbound.entry(e.target_id.clone()).or_default().push(e.source_id.clone());
    }
    view
}
