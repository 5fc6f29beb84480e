// ── Engram: Structural Freshness ────────────────────────────────────────────
//
// Central knowledge decays slower: a memory's externally computed stability
// is scaled by its normalized degree centrality in the causal graph.

use crate::atoms::engram_types::GraphView;

/// Normalized degree centrality in `[0, 1]`:
/// `(in + out) / (2 × (|nodes| − 1))`.
///
/// Zero when the graph has fewer than two nodes or `node_id` is absent.
pub fn compute_graph_centrality(node_id: &str, graph: &GraphView) -> f64 {
    let n = graph.nodes.len();
    if n < 2 || !graph.nodes.contains(node_id) {
        return 0.0;
    }
    let in_degree = graph.inbound.get(node_id).map_or(0, Vec::len);
    let out_degree = graph.outbound.get(node_id).map_or(0, Vec::len);
    let max_degree = 2.0 * (n - 1) as f64;
    ((in_degree + out_degree) as f64 / max_degree).clamp(0.0, 1.0)
}

/// `clamp(stability) × clamp(centrality)`, both clamped to `[0, 1]`.
/// Non-finite inputs count as 0.
pub fn compute_structural_freshness(stability: f64, centrality: f64) -> f64 {
    unit(stability) * unit(centrality)
}

fn unit(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
