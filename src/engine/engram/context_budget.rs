// ── Engram: Context Budget Selector ─────────────────────────────────────────
//
// Picks a token-bounded, score-ordered subset of candidates. When any
// candidate carries a graph region, selection trades a bounded amount of
// score for region coverage.
//
// Policy:
//   - Candidates are stably sorted by score descending, so input order
//     breaks score ties.
//   - Selection stops at the first candidate whose cost exceeds the
//     remaining budget. Later, smaller candidates are not considered.
//   - Region mode: an unseen-region candidate (first one in sorted order)
//     displaces the top scorer when its score > threshold × top score.

use crate::atoms::constants::{DEFAULT_TOKEN_BUDGET, REGION_DIVERSITY_THRESHOLD};
use crate::atoms::engram_types::{score_desc, BudgetItem};
use log::debug;
use std::collections::HashSet;

/// Select with the default diversity threshold (0.5).
pub fn optimize_context_budget<T: BudgetItem + Clone>(candidates: &[T], budget_tokens: usize) -> Vec<T> {
    optimize_context_budget_with(candidates, budget_tokens, REGION_DIVERSITY_THRESHOLD)
}

/// Default budget (2000 tokens), default threshold.
pub fn optimize_default<T: BudgetItem + Clone>(candidates: &[T]) -> Vec<T> {
    optimize_context_budget(candidates, DEFAULT_TOKEN_BUDGET)
}

pub fn optimize_context_budget_with<T: BudgetItem + Clone>(
    candidates: &[T],
    budget_tokens: usize,
    diversity_threshold: f64,
) -> Vec<T> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<&T> = candidates.iter().collect();
    sorted.sort_by(|a, b| score_desc(a.score(), b.score()));

    let has_regions = sorted.iter().any(|c| c.graph_region().is_some());
    let selected = if has_regions {
        select_diverse(sorted, budget_tokens, diversity_threshold)
    } else {
        select_greedy(sorted, budget_tokens)
    };

    debug!(
        "[engram:budget] Selected {}/{} candidates within {} tokens (regions: {})",
        selected.len(),
        candidates.len(),
        budget_tokens,
        has_regions
    );
    selected
}

fn select_greedy<T: BudgetItem + Clone>(sorted: Vec<&T>, budget: usize) -> Vec<T> {
    let mut remaining = budget;
    let mut out = Vec::new();
    for c in sorted {
        let cost = c.token_cost();
        if cost > remaining {
            break;
        }
        remaining -= cost;
        out.push(c.clone());
    }
    out
}

fn select_diverse<T: BudgetItem + Clone>(mut pool: Vec<&T>, budget: usize, threshold: f64) -> Vec<T> {
    let mut remaining = budget;
    let mut seen_regions: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    while !pool.is_empty() {
        let top_score = pool[0].score();
        let unseen = pool
            .iter()
            .position(|c| c.graph_region().is_some_and(|r| !seen_regions.contains(r)));

        let pick = match unseen {
            Some(idx) if idx > 0 && pool[idx].score() > threshold * top_score => idx,
            _ => 0,
        };

        let cost = pool[pick].token_cost();
        if cost > remaining {
            break;
        }
        remaining -= cost;
        let chosen = pool.remove(pick);
        if let Some(region) = chosen.graph_region() {
            seen_regions.insert(region.to_string());
        }
        out.push(chosen.clone());
    }
    out
}
