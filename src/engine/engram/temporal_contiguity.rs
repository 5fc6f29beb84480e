// ── Engram: Temporal Contiguity ─────────────────────────────────────────────
//
// Memories created close together in time tend to be recalled together.
//
//   vector_search_with_contiguity: pure boost. Each result's score is
//     multiplied by (1 + (1 − Δt/window) × 0.15) for every other result
//     within the window. The product is commutative, so input order never
//     changes the outcome. Returns a new Vec; the input is untouched.
//   get_temporal_neighbors / build_timeline: store reads that fail soft
//     (empty Vec) when the store is unavailable or the anchor is missing.

use crate::atoms::constants::{
    CONTIGUITY_BOOST, DEFAULT_TEMPORAL_WINDOW_SECS, MAX_TEMPORAL_WINDOW_SECS,
};
use crate::atoms::engram_types::{MemoryRecord, Scored, TemporalNeighbor, Timestamped};
use crate::engine::config::SalienceConfig;
use crate::engine::sessions::SessionStore;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::warn;

/// Parse RFC3339, falling back to SQLite's `YYYY-MM-DD HH:MM:SS` form.
pub(crate) fn parse_datetime_opt(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
                .ok()
        })
}

/// Non-positive windows fall back to `default`; large ones are capped at `max`.
pub fn effective_window(window_secs: i64, default: i64, max: i64) -> i64 {
    if window_secs <= 0 {
        default.min(max)
    } else {
        window_secs.min(max)
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Pure boost
// ═════════════════════════════════════════════════════════════════════════════

/// Boost results by temporal proximity to each other.
///
/// `None → None`, `[] → []`, one element → an unchanged copy. Results
/// without a timestamp neither give nor receive a boost.
pub fn vector_search_with_contiguity<T: Timestamped + Clone>(
    results: Option<&[T]>,
    window_secs: i64,
) -> Option<Vec<T>> {
    let results = results?;
    let mut out = results.to_vec();
    if out.len() < 2 {
        return Some(out);
    }

    let window = effective_window(window_secs, DEFAULT_TEMPORAL_WINDOW_SECS, MAX_TEMPORAL_WINDOW_SECS) as f64;
    let stamps: Vec<Option<DateTime<Utc>>> = results.iter().map(Timestamped::created_at).collect();

    for (i, item) in out.iter_mut().enumerate() {
        let Some(ti) = stamps[i] else { continue };
        let mut factor = 1.0;
        for (j, tj) in stamps.iter().enumerate() {
            if i == j {
                continue;
            }
            let Some(tj) = tj else { continue };
            let dt = (ti - *tj).num_milliseconds().abs() as f64 / 1000.0;
            if dt <= window {
                factor *= 1.0 + (1.0 - dt / window) * CONTIGUITY_BOOST;
            }
        }
        if factor != 1.0 {
            let boosted = item.score() * factor;
            item.set_score(boosted);
        }
    }
    Some(out)
}

// ═════════════════════════════════════════════════════════════════════════════
// Store-backed queries
// ═════════════════════════════════════════════════════════════════════════════

/// Other non-archived memories created within `window_secs` of `memory_id`,
/// nearest first (ties by id).
pub fn get_temporal_neighbors(
    store: &SessionStore,
    memory_id: i64,
    window_secs: i64,
    config: &SalienceConfig,
) -> Vec<TemporalNeighbor> {
    let window = effective_window(window_secs, config.default_window_secs, config.max_window_secs);

    let anchor = match store.memory_get(memory_id) {
        Ok(Some(m)) => m,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!("[engram:temporal] Anchor lookup for {} failed: {}", memory_id, e);
            return Vec::new();
        }
    };
    let Some(anchor_ts) = parse_datetime_opt(&anchor.created_at) else {
        warn!("[engram:temporal] Memory {} has unparseable created_at {:?}", memory_id, anchor.created_at);
        return Vec::new();
    };

    let others = match store.memory_list_active_except(memory_id) {
        Ok(v) => v,
        Err(e) => {
            warn!("[engram:temporal] Neighbor scan failed: {}", e);
            return Vec::new();
        }
    };

    let mut neighbors: Vec<TemporalNeighbor> = others
        .into_iter()
        .filter_map(|memory| {
            let ts = parse_datetime_opt(&memory.created_at)?;
            let delta = (ts - anchor_ts).num_seconds().abs();
            (delta <= window).then_some(TemporalNeighbor { memory, time_delta_seconds: delta })
        })
        .collect();
    neighbors.sort_by(|a, b| {
        a.time_delta_seconds
            .cmp(&b.time_delta_seconds)
            .then(a.memory.id.cmp(&b.memory.id))
    });
    neighbors
}

/// Newest-first timeline, optionally scoped to one spec folder.
pub fn build_timeline(store: &SessionStore, spec_folder: Option<&str>, limit: usize) -> Vec<MemoryRecord> {
    store
        .memory_timeline(spec_folder, limit.max(1))
        .unwrap_or_else(|e| {
            warn!("[engram:temporal] Timeline query failed: {}", e);
            Vec::new()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::engram_types::RankedMemory;
    use crate::engine::sessions::NewMemory;
    use chrono::{Duration, TimeZone};

    fn at(id: i64, score: f64, secs: i64) -> RankedMemory {
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        RankedMemory { created_at: Some(base + Duration::seconds(secs)), ..RankedMemory::new(id, score) }
    }

    fn test_store() -> SessionStore {
        SessionStore::open_in_memory().unwrap()
    }

    fn mem(title: &str, folder: &str, created_at: &str) -> NewMemory {
        NewMemory {
            title: title.into(),
            spec_folder: folder.into(),
            created_at: created_at.into(),
            stability: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_null_empty_and_single() {
        assert!(vector_search_with_contiguity::<RankedMemory>(None, 3600).is_none());
        assert!(vector_search_with_contiguity(Some(&[] as &[RankedMemory]), 3600).unwrap().is_empty());
        let one = [at(1, 0.7, 0)];
        assert_eq!(vector_search_with_contiguity(Some(&one[..]), 3600).unwrap(), one.to_vec());
    }

    #[test]
    fn test_pair_600s_apart() {
        let input = [at(1, 0.8, 0), at(2, 0.6, 600)];
        let out = vector_search_with_contiguity(Some(&input[..]), 3600).unwrap();
        assert!((out[0].score - 0.8 * 1.125).abs() < 1e-12);
        assert!((out[1].score - 0.6 * 1.125).abs() < 1e-12);
        // input untouched
        assert_eq!(input[0].score, 0.8);
    }

    #[test]
    fn test_outside_window_unboosted() {
        let input = [at(1, 0.8, 0), at(2, 0.6, 7200)];
        let out = vector_search_with_contiguity(Some(&input[..]), 3600).unwrap();
        assert_eq!(out[0].score, 0.8);
        assert_eq!(out[1].score, 0.6);
    }

    #[test]
    fn test_order_independent() {
        let a = [at(1, 0.9, 0), at(2, 0.5, 300), at(3, 0.4, 1800), at(4, 0.3, 9000)];
        let mut b = a.to_vec();
        b.reverse();
        let mut out_a = vector_search_with_contiguity(Some(&a[..]), 3600).unwrap();
        let mut out_b = vector_search_with_contiguity(Some(&b[..]), 3600).unwrap();
        out_a.sort_by_key(|m| m.id);
        out_b.sort_by_key(|m| m.id);
        for (x, y) in out_a.iter().zip(&out_b) {
            assert!((x.score - y.score).abs() < 1e-12);
        }
    }

    #[test]
    fn test_missing_timestamp_ignored() {
        let input = [at(1, 0.8, 0), RankedMemory::new(2, 0.6), at(3, 0.5, 600)];
        let out = vector_search_with_contiguity(Some(&input[..]), 3600).unwrap();
        assert_eq!(out[1].score, 0.6);
        assert!((out[0].score - 0.8 * 1.125).abs() < 1e-12);
    }

    #[test]
    fn test_window_resolution() {
        assert_eq!(effective_window(0, 3600, 86_400), 3600);
        assert_eq!(effective_window(-5, 3600, 86_400), 3600);
        assert_eq!(effective_window(1_000_000, 3600, 86_400), 86_400);
        assert_eq!(effective_window(60, 3600, 86_400), 60);
    }

    #[test]
    fn test_parse_formats() {
        assert!(parse_datetime_opt("2026-03-01T12:00:00Z").is_some());
        assert!(parse_datetime_opt("2026-03-01T12:00:00.123456+02:00").is_some());
        assert!(parse_datetime_opt("2026-03-01 12:00:00").is_some());
        assert!(parse_datetime_opt("yesterday").is_none());
    }

    #[test]
    fn test_neighbors_sorted_by_delta() {
        let store = test_store();
        let anchor = store.memory_insert(&mem("anchor", "f", "2026-03-01T12:00:00Z")).unwrap();
        let far = store.memory_insert(&mem("far", "f", "2026-03-01T12:50:00Z")).unwrap();
        let near = store.memory_insert(&mem("near", "f", "2026-03-01T11:55:00Z")).unwrap();
        store.memory_insert(&mem("out", "f", "2026-03-01T15:00:00Z")).unwrap();

        let cfg = SalienceConfig::default();
        let n = get_temporal_neighbors(&store, anchor, 3600, &cfg);
        let ids: Vec<i64> = n.iter().map(|x| x.memory.id).collect();
        assert_eq!(ids, vec![near, far]);
        assert_eq!(n[0].time_delta_seconds, 300);
        assert_eq!(n[1].time_delta_seconds, 3000);
    }

    #[test]
    fn test_neighbors_missing_anchor_or_store() {
        let cfg = SalienceConfig::default();
        assert!(get_temporal_neighbors(&test_store(), 42, 3600, &cfg).is_empty());
        assert!(get_temporal_neighbors(&SessionStore::unavailable(), 1, 3600, &cfg).is_empty());
    }

    #[test]
    fn test_timeline_desc_and_scoped() {
        let store = test_store();
        store.memory_insert(&mem("a", "x", "2026-03-01T10:00:00Z")).unwrap();
        store.memory_insert(&mem("b", "y", "2026-03-01T11:00:00Z")).unwrap();
        store.memory_insert(&mem("c", "x", "2026-03-01T12:00:00Z")).unwrap();

        let all = build_timeline(&store, None, 10);
        let titles: Vec<&str> = all.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["c", "b", "a"]);
        assert_eq!(build_timeline(&store, Some("x"), 10).len(), 2);
        assert!(build_timeline(&SessionStore::unavailable(), None, 10).is_empty());
    }
}
