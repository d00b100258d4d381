//! Optimizer output: which index to scan, over which key range.

use super::expr::IndexHandle;

/// One suggested index range scan. `index == None` means a full scan with
/// the whole predicate as a residual filter; such an advice always stands
/// alone in the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryAdvice {
    pub index: Option<IndexHandle>,
    pub min: i64,
    pub max: i64,
}

impl QueryAdvice {
    pub fn ranged(index: IndexHandle, min: i64, max: i64) -> Self {
        Self {
            index: Some(index),
            min,
            max,
        }
    }

    pub fn full_scan() -> Self {
        Self {
            index: None,
            min: i64::MIN,
            max: i64::MAX,
        }
    }

    pub fn is_full_scan(&self) -> bool {
        self.index.is_none()
    }

    fn touches(&self, other: &Self) -> bool {
        self.min <= other.max.saturating_add(1) && other.min <= self.max.saturating_add(1)
    }
}

/// Folds advices on the same index whose ranges overlap or touch into one,
/// keeping disjoint ranges separate and preserving first-appearance order.
pub(crate) fn merge_advices(advices: Vec<QueryAdvice>) -> Vec<QueryAdvice> {
    let mut merged: Vec<QueryAdvice> = Vec::with_capacity(advices.len());

    for advice in advices {
        let mut pending = advice;
        // A merge can widen a range until it touches another one already
        // kept, so re-scan until the advice stands alone.
        loop {
            let absorbed = merged.iter().position(|kept| {
                kept.index == pending.index && kept.index.is_some() && kept.touches(&pending)
            });
            match absorbed {
                Some(pos) => {
                    let kept = merged.remove(pos);
                    pending.min = pending.min.min(kept.min);
                    pending.max = pending.max.max(kept.max);
                }
                None => {
                    merged.push(pending);
                    break;
                }
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: IndexHandle = IndexHandle(0);
    const B: IndexHandle = IndexHandle(1);

    #[test]
    fn touching_ranges_merge() {
        let merged = merge_advices(vec![
            QueryAdvice::ranged(A, 2, 51),
            QueryAdvice::ranged(A, 51, 123),
        ]);

        assert_eq!(merged, vec![QueryAdvice::ranged(A, 2, 123)]);
    }

    #[test]
    fn adjacent_ranges_merge() {
        let merged = merge_advices(vec![
            QueryAdvice::ranged(A, 1, 10),
            QueryAdvice::ranged(A, 11, 20),
        ]);

        assert_eq!(merged, vec![QueryAdvice::ranged(A, 1, 20)]);
    }

    #[test]
    fn disjoint_ranges_stay_separate() {
        let merged = merge_advices(vec![
            QueryAdvice::ranged(A, 2, 11),
            QueryAdvice::ranged(A, 51, 123),
        ]);

        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn different_indexes_never_merge() {
        let merged = merge_advices(vec![
            QueryAdvice::ranged(A, 1, 10),
            QueryAdvice::ranged(B, 5, 15),
        ]);

        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn bridge_range_collapses_three_into_one() {
        let merged = merge_advices(vec![
            QueryAdvice::ranged(A, 1, 10),
            QueryAdvice::ranged(A, 20, 30),
            QueryAdvice::ranged(A, 8, 22),
        ]);

        assert_eq!(merged, vec![QueryAdvice::ranged(A, 1, 30)]);
    }
}
