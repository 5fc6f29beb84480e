// ── Engram: Adaptive Two-Pass Fallback ──────────────────────────────────────
//
// Run the primary similarity search at the strict threshold (0.3). Only an
// empty primary pass triggers exactly one retry at the relaxed threshold
// (0.17), and the response says so via `fallback_retry`. Errors from either
// pass propagate unchanged.

use crate::atoms::engram_types::RankedMemory;
use crate::atoms::error::EngineResult;
use crate::engine::config::SalienceConfig;
use crate::engine::engram::fusion::SearchChannel;
use log::info;
use serde::{Deserialize, Serialize};
use std::future::Future;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackResponse<T> {
    pub results: Vec<T>,
    /// True iff the relaxed pass ran, whether or not it found anything.
    pub fallback_retry: bool,
    pub threshold_used: f64,
}

/// Two-pass search over any threshold-parameterized search function.
pub async fn search_with_fallback<T, F, Fut>(
    mut search: F,
    primary_threshold: f64,
    fallback_threshold: f64,
) -> EngineResult<FallbackResponse<T>>
where
    F: FnMut(f64) -> Fut,
    Fut: Future<Output = EngineResult<Vec<T>>>,
{
    let results = search(primary_threshold).await?;
    if !results.is_empty() {
        return Ok(FallbackResponse { results, fallback_retry: false, threshold_used: primary_threshold });
    }

    let results = search(fallback_threshold).await?;
    info!(
        "[engram:fallback] Primary pass at {} empty; relaxed pass at {} returned {}",
        primary_threshold,
        fallback_threshold,
        results.len()
    );
    Ok(FallbackResponse { results, fallback_retry: true, threshold_used: fallback_threshold })
}

/// Fallback over a single channel using the configured thresholds.
pub async fn channel_search_with_fallback(
    channel: &dyn SearchChannel,
    query: &str,
    config: &SalienceConfig,
) -> EngineResult<FallbackResponse<RankedMemory>> {
    search_with_fallback(
        |threshold| channel.search(query, threshold),
        config.primary_threshold,
        config.fallback_threshold,
    )
    .await
}
