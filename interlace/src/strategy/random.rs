//! Uniform random scheduling.

use super::Strategy;
use crate::runtime::operation::OperationId;
use rand::{RngExt, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// Picks uniformly among the enabled operations. Fair: every enabled
/// operation has nonzero probability at every step.
#[derive(Debug)]
pub struct RandomStrategy {
    seed: u64,
    rng: Pcg64Mcg,
    steps: u64,
    max_steps: u64,
}

impl RandomStrategy {
    pub fn new(seed: u64, max_steps: u64) -> Self {
        Self {
            seed,
            rng: Pcg64Mcg::seed_from_u64(seed),
            steps: 0,
            max_steps,
        }
    }
}

impl Strategy for RandomStrategy {
    fn initialize_next_iteration(&mut self, iteration: u64) -> bool {
        // Reseeding per iteration keeps iteration i independent of how long
        // iteration i-1 ran, which is what lets iterations run in parallel.
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
        let choices: Vec<OperationId> = match current {
            Some(cur) if is_yielding && enabled.len() > 1 => {
                enabled.iter().copied().filter(|id| *id != cur).collect()
            }
            _ => enabled.to_vec(),
        };
        let index = self.rng.random_range(0..choices.len());
        Some(choices[index])
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
        true
    }

    fn description(&self) -> String {
        format!("random[seed={}]", self.seed)
    }

    fn reset(&mut self) {
        self.rng = Pcg64Mcg::seed_from_u64(self.seed);
        self.steps = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[usize]) -> Vec<OperationId> {
        v.iter().copied().map(OperationId::from).collect()
    }

    #[test]
    fn same_seed_same_decisions() {
        let enabled = ids(&[0, 1, 2, 3]);
        let mut a = RandomStrategy::new(7, 100);
        let mut b = RandomStrategy::new(7, 100);
        a.initialize_next_iteration(0);
        b.initialize_next_iteration(0);
        for _ in 0..50 {
            assert_eq!(
                a.next_operation(&enabled, None, false),
                b.next_operation(&enabled, None, false)
            );
        }
        assert_eq!(a.next_boolean(None, 2), b.next_boolean(None, 2));
        assert_eq!(a.next_integer(None, 10), b.next_integer(None, 10));
    }

    #[test]
    fn yielding_avoids_current_when_possible() {
        let enabled = ids(&[0, 1]);
        let mut s = RandomStrategy::new(1, 1000);
        s.initialize_next_iteration(0);
        for _ in 0..100 {
            let pick = s.next_operation(&enabled, Some(OperationId(0)), true);
            assert_eq!(pick, Some(OperationId(1)));
        }
    }

    #[test]
    fn every_operation_eventually_selected() {
        let enabled = ids(&[0, 1, 2]);
        let mut s = RandomStrategy::new(3, 10_000);
        s.initialize_next_iteration(0);
        let mut seen = [false; 3];
        for _ in 0..1000 {
            let pick = s.next_operation(&enabled, None, false).unwrap();
            seen[pick.to_usize()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn max_steps_bound_is_reported() {
        let mut s = RandomStrategy::new(0, 3);
        s.initialize_next_iteration(0);
        let enabled = ids(&[0]);
        for _ in 0..3 {
            assert!(!s.is_max_steps_reached());
            s.next_operation(&enabled, None, false);
        }
        assert!(s.is_max_steps_reached());
    }
}
