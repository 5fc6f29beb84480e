// ── Engram: Reranking ───────────────────────────────────────────────────────
//
// Final step of the recall pipeline: deterministic sort by score
// descending, then optional truncation. Stable, so equal scores keep their
// incoming order and reranking twice yields the same list.

use crate::atoms::engram_types::{score_desc, Scored};

/// Rerank a copy of `results`. Non-score fields are carried verbatim.
pub fn rerank_results<T: Scored + Clone>(results: &[T], limit: Option<usize>) -> Vec<T> {
    let mut sorted = results.to_vec();
    sorted.sort_by(|a, b| score_desc(a.score(), b.score()));
    if let Some(n) = limit {
        sorted.truncate(n);
    }
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::engram_types::RankedMemory;
    use proptest::prelude::*;

    fn ids(v: &[RankedMemory]) -> Vec<i64> {
        v.iter().map(|m| m.id).collect()
    }

    #[test]
    fn test_sorts_descending_stable() {
        let input = vec![
            RankedMemory::new(1, 0.5),
            RankedMemory::new(2, 0.9),
            RankedMemory::new(3, 0.5),
            RankedMemory::new(4, 0.7),
        ];
        assert_eq!(ids(&rerank_results(&input, None)), vec![2, 4, 1, 3]);
        // input untouched
        assert_eq!(ids(&input), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_limit_truncates() {
        let input: Vec<_> = (0..10).map(|i| RankedMemory::new(i, i as f64 / 10.0)).collect();
        assert_eq!(ids(&rerank_results(&input, Some(3))), vec![9, 8, 7]);
        assert_eq!(rerank_results(&input, Some(0)).len(), 0);
        assert_eq!(rerank_results(&input, Some(50)).len(), 10);
    }

    #[test]
    fn test_preserves_fields() {
        let mut m = RankedMemory::new(7, 0.4);
        m.content = Some("body".into());
        m.graph_region = Some("auth".into());
        m.source_scores.insert("vector".into(), 0.01);
        let out = rerank_results(&[m.clone()], None);
        assert_eq!(out[0], m);
    }

    #[test]
    fn test_nan_scores_sink_to_the_end() {
        let input = vec![
            RankedMemory::new(1, f64::NAN),
            RankedMemory::new(2, 0.3),
            RankedMemory::new(3, f64::NEG_INFINITY),
            RankedMemory::new(4, f64::NAN),
            RankedMemory::new(5, 0.9),
        ];
        assert_eq!(ids(&rerank_results(&input, None)), vec![5, 2, 3, 1, 4]);
        assert_eq!(ids(&rerank_results(&input, Some(2))), vec![5, 2]);
    }

    proptest! {
        #[test]
        fn rerank_is_idempotent(scores in proptest::collection::vec(0.0f64..1.0, 0..40)) {
            let input: Vec<_> = scores.iter().enumerate().map(|(i, s)| RankedMemory::new(i as i64, *s)).collect();
            let once = rerank_results(&input, None);
            let twice = rerank_results(&once, None);
            prop_assert_eq!(ids(&once), ids(&twice));
        }

        #[test]
        fn rerank_orders_any_mix_of_scores(
            scores in proptest::collection::vec(prop_oneof![Just(f64::NAN), any::<f64>()], 0..40),
        ) {
            let input: Vec<_> = scores.iter().enumerate().map(|(i, s)| RankedMemory::new(i as i64, *s)).collect();
            let out = rerank_results(&input, None);
            prop_assert_eq!(out.len(), input.len());
            let real: Vec<f64> = out.iter().map(|m| m.score).take_while(|s| !s.is_nan()).collect();
            prop_assert!(real.windows(2).all(|w| w[0] >= w[1]));
            prop_assert!(out[real.len()..].iter().all(|m| m.score.is_nan()));
        }
    }
}
