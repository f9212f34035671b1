//! Probabilistic random scheduling: biased toward staying on the current
//! operation.

use super::Strategy;
use crate::runtime::operation::OperationId;
use rand::{RngExt, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// With probability `p`, keep running the current operation (when it is
/// still enabled and not yielding); otherwise pick uniformly among the
/// others. Fair for `p < 1`.
#[derive(Debug)]
pub struct ProbabilisticStrategy {
    p: f64,
    seed: u64,
    rng: Pcg64Mcg,
    steps: u64,
    max_steps: u64,
}

impl ProbabilisticStrategy {
    pub fn new(p: f64, seed: u64, max_steps: u64) -> Self {
        assert!((0.0..=1.0).contains(&p), "probability must be in [0, 1]");
        Self {
            p,
            seed,
            rng: Pcg64Mcg::seed_from_u64(seed),
            steps: 0,
            max_steps,
        }
    }
}

impl Strategy for ProbabilisticStrategy {
    fn initialize_next_iteration(&mut self, iteration: u64) -> bool {
        self.rng = Pcg64Mcg::seed_from_u64(self.seed.wrapping_add(iteration));
        self.steps = 0;
        true
    }

    fn next_operation(
        &mut self,
        enabled: &[OperationId],
        current: Option<OperationId>,
        is_yielding: bool,
    ) -> Option<OperationId> {
        self.steps += 1;
        if let Some(cur) = current {
            if enabled.contains(&cur) && !is_yielding && self.rng.random_bool(self.p) {
                return Some(cur);
            }
            let others: Vec<OperationId> =
                enabled.iter().copied().filter(|id| *id != cur).collect();
            if !others.is_empty() {
                let index = self.rng.random_range(0..others.len());
                return Some(others[index]);
            }
            // Current is the only enabled operation.
            return Some(cur);
        }
        let index = self.rng.random_range(0..enabled.len());
        Some(enabled[index])
    }

    fn next_boolean(&mut self, _current: Option<OperationId>, max: u64) -> Option<bool> {
        self.steps += 1;
        Some(self.rng.random_range(0..max.max(1)) == 0)
    }

    fn next_integer(&mut self, _current: Option<OperationId>, max: u64) -> Option<u64> {
        self.steps += 1;
        Some(self.rng.random_range(0..max.max(1)))
    }

    fn step_count(&self) -> u64 {
        self.steps
    }

    fn is_max_steps_reached(&self) -> bool {
        self.steps >= self.max_steps
    }

    fn is_fair(&self) -> bool {
        self.p < 1.0
    }

    fn description(&self) -> String {
        format!("probabilistic[p={},seed={}]", self.p, self.seed)
    }

    fn reset(&mut self) {
        self.rng = Pcg64Mcg::seed_from_u64(self.seed);
        self.steps = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sticks_with_current_when_p_is_one() {
        let enabled: Vec<OperationId> = (0..4).map(OperationId::from).collect();
        let mut s = ProbabilisticStrategy::new(1.0, 9, 1000);
        s.initialize_next_iteration(0);
        for _ in 0..100 {
            let pick = s.next_operation(&enabled, Some(OperationId(2)), false);
            assert_eq!(pick, Some(OperationId(2)));
        }
        assert!(!s.is_fair());
    }

    #[test]
    fn leaves_current_when_p_is_zero() {
        let enabled: Vec<OperationId> = (0..2).map(OperationId::from).collect();
        let mut s = ProbabilisticStrategy::new(0.0, 9, 1000);
        s.initialize_next_iteration(0);
        for _ in 0..100 {
            let pick = s.next_operation(&enabled, Some(OperationId(0)), false);
            assert_eq!(pick, Some(OperationId(1)));
        }
        assert!(s.is_fair());
    }

    #[test]
    fn sole_enabled_current_is_kept_even_when_switching() {
        let enabled = vec![OperationId(5)];
        let mut s = ProbabilisticStrategy::new(0.0, 9, 1000);
        s.initialize_next_iteration(0);
        assert_eq!(
            s.next_operation(&enabled, Some(OperationId(5)), false),
            Some(OperationId(5))
        );
    }
}
