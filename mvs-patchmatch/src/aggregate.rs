use float_ord::FloatOrd;

/// Combines the costs of one hypothesis against every neighbor into a single cost.
///
/// The costs are sorted and the `count` smallest that are below `max_cost` are averaged.
/// Views that see the pixel occluded or outside their image then do not drag the result
/// up, as long as enough views agree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregator {
    pub count: usize,
    pub max_cost: f64,
}

impl Aggregator {
    pub fn new(count: usize, max_cost: f64) -> Self {
        Self {
            count: count.max(1),
            max_cost,
        }
    }

    /// Aggregates `costs` in place, leaving them sorted. Returns `max_cost` when no
    /// neighbor produced a valid cost.
    pub fn aggregate(&self, costs: &mut [f64]) -> f64 {
        costs.sort_unstable_by_key(|&cost| FloatOrd(cost));
        let (sum, used) = costs
            .iter()
            .filter(|&&cost| cost < self.max_cost)
            .take(self.count)
            .fold((0.0, 0usize), |(sum, used), &cost| (sum + cost, used + 1));
        if used == 0 {
            self.max_cost
        } else {
            sum / used as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;

    #[test]
    fn trims_to_best_valid() {
        let aggregator = Aggregator::new(2, 2.0);
        assert_eq!(aggregator.aggregate(&mut [0.5, 2.0, 0.1, 0.3]), 0.2);
        assert_eq!(aggregator.aggregate(&mut [2.0, 0.4, 2.0]), 0.4);
        assert_eq!(aggregator.aggregate(&mut [2.0, 2.0]), 2.0);
        assert_eq!(aggregator.aggregate(&mut []), 2.0);
    }

    #[test]
    fn nan_is_not_valid() {
        let aggregator = Aggregator::new(3, 2.0);
        assert_eq!(aggregator.aggregate(&mut [f64::NAN, 1.0]), 1.0);
    }

    /// Adding a cost at least as large as the current `count`-th smallest never lowers
    /// the aggregate.
    #[quickcheck]
    fn monotonic(costs: Vec<u16>, count: u8, extra: u16) -> TestResult {
        let count = usize::from(count % 6) + 1;
        if costs.len() < count {
            return TestResult::discard();
        }
        let aggregator = Aggregator::new(count, 2.0);
        let mut costs = costs
            .into_iter()
            .map(|c| f64::from(c) / (f64::from(u16::MAX) + 1.0) * 2.0)
            .collect::<Vec<f64>>();
        let before = aggregator.aggregate(&mut costs);
        let added = costs[count - 1] + f64::from(extra) / f64::from(u16::MAX) * 3.0;
        costs.push(added);
        TestResult::from_bool(aggregator.aggregate(&mut costs) >= before - 1e-12)
    }
}
