//! Replacing an earlier contribution.

use super::Aggregate;

/// Returns the deltas that replace the `prior` contribution of a record
/// with its `current` one.
///
/// A contribution is the list of deltas a single version of a record adds
/// to the aggregates. If both are equal field by field the record's effect
/// did not change and there is nothing to do. Otherwise the result
/// retracts every prior delta by merging its negation and then adds the
/// current deltas. This holds even if both deltas land in the same bucket,
/// in which case they cancel out to the difference.
pub fn retraction<A: Aggregate>(prior: Vec<A>, current: Vec<A>) -> Vec<A> {
    if prior == current {
        return Vec::new()
    }
    prior.iter().map(A::negate).chain(current).collect()
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::engine::tests::DayAmount;

    #[test]
    fn equal_contributions_emit_nothing() {
        let prior = vec![DayAmount::new("2025-08-01", 100.0)];
        assert!(retraction(prior.clone(), prior).is_empty());
    }

    #[test]
    fn moved_contribution_is_retracted() {
        let deltas = retraction(
            vec![DayAmount::new("2025-08-01", 100.0)],
            vec![DayAmount::new("2025-08-02", 100.0)],
        );
        assert_eq!(deltas, [
            DayAmount::new("2025-08-01", -100.0),
            DayAmount::new("2025-08-02", 100.0),
        ]);
    }

    #[test]
    fn deleted_contribution_is_retracted() {
        let deltas = retraction(
            vec![DayAmount::new("2025-08-01", 100.0)], Vec::new()
        );
        assert_eq!(deltas, [DayAmount::new("2025-08-01", -100.0)]);
    }

    #[test]
    fn new_contribution_passes() {
        let deltas = retraction(
            Vec::new(), vec![DayAmount::new("2025-08-01", 100.0)]
        );
        assert_eq!(deltas, [DayAmount::new("2025-08-01", 100.0)]);
    }
}
