//! PCT: probabilistic concurrency testing via priority changes.
//!
//! Every operation gets a priority when first seen; each decision runs the
//! highest-priority enabled operation. A fixed number of priority-inversion
//! points are drawn upfront within the expected schedule length; when the
//! step counter hits one, the currently highest-priority enabled operation
//! drops to lowest. The expected length is learned as the running maximum
//! of observed schedule lengths across iterations.

use super::Strategy;
use crate::runtime::operation::OperationId;
use rand::{RngExt, SeedableRng};
use rand_pcg::Pcg64Mcg;

#[derive(Debug)]
pub struct PctStrategy {
    seed: u64,
    rng: Pcg64Mcg,
    steps: u64,
    max_steps: u64,
    priority_changes: usize,
    /// Priority order: front is highest. New operations append in
    /// first-sight order.
    priorities: Vec<OperationId>,
    change_points: Vec<u64>,
    /// Longest schedule observed so far, across iterations.
    schedule_length: u64,
}

impl PctStrategy {
    pub fn new(priority_changes: usize, seed: u64, max_steps: u64) -> Self {
        Self {
            seed,
            rng: Pcg64Mcg::seed_from_u64(seed),
            steps: 0,
            max_steps,
            priority_changes,
            priorities: Vec::new(),
            change_points: Vec::new(),
            schedule_length: 0,
        }
    }

    fn demote(&mut self, id: OperationId) {
        if let Some(pos) = self.priorities.iter().position(|p| *p == id) {
            let op = self.priorities.remove(pos);
            self.priorities.push(op);
        }
    }

    fn highest_enabled(&self, enabled: &[OperationId]) -> Option<OperationId> {
        self.priorities.iter().copied().find(|p| enabled.contains(p))
    }
}

impl Strategy for PctStrategy {
    fn initialize_next_iteration(&mut self, iteration: u64) -> bool {
        self.schedule_length = self.schedule_length.max(self.steps);
        self.steps = 0;
        self.priorities.clear();
        self.rng = Pcg64Mcg::seed_from_u64(self.seed.wrapping_add(iteration));

        // Draw the inversion points for this iteration within the learned
        // expected length. Iteration 0 has no history and runs on pure
        // first-sight priorities.
        let bound = self.schedule_length.max(1);
        self.change_points.clear();
        while self.change_points.len() < self.priority_changes.min(bound as usize) {
            let point = self.rng.random_range(0..bound);
            if !self.change_points.contains(&point) {
                self.change_points.push(point);
            }
        }
        true
    }

    fn next_operation(
        &mut self,
        enabled: &[OperationId],
        current: Option<OperationId>,
        is_yielding: bool,
    ) -> Option<OperationId> {
        for id in enabled {
            if !self.priorities.contains(id) {
                self.priorities.push(*id);
            }
        }

        if is_yielding {
            if let Some(cur) = current {
                self.demote(cur);
            }
        }

        if self.change_points.contains(&self.steps) {
            if let Some(top) = self.highest_enabled(enabled) {
                log::trace!("priority change point at step {}: demoting {top}", self.steps);
                self.demote(top);
            }
        }

        self.steps += 1;
        let pick = self.highest_enabled(enabled);
        debug_assert!(pick.is_some(), "enabled set is never empty here");
        pick
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
        false
    }

    fn description(&self) -> String {
        format!(
            "pct[changes={},seed={}]",
            self.priority_changes, self.seed
        )
    }

    fn reset(&mut self) {
        self.rng = Pcg64Mcg::seed_from_u64(self.seed);
        self.steps = 0;
        self.priorities.clear();
        self.change_points.clear();
        self.schedule_length = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[usize]) -> Vec<OperationId> {
        v.iter().copied().map(OperationId::from).collect()
    }

    #[test]
    fn runs_highest_priority_until_demoted() {
        let enabled = ids(&[0, 1, 2]);
        let mut s = PctStrategy::new(0, 11, 1000);
        s.initialize_next_iteration(0);
        // No change points on iteration 0 with zero changes: first-sight
        // order makes operation 0 the highest priority throughout.
        for _ in 0..10 {
            assert_eq!(s.next_operation(&enabled, None, false), Some(OperationId(0)));
        }
    }

    #[test]
    fn yield_demotes_current() {
        let enabled = ids(&[0, 1]);
        let mut s = PctStrategy::new(0, 11, 1000);
        s.initialize_next_iteration(0);
        assert_eq!(s.next_operation(&enabled, None, false), Some(OperationId(0)));
        assert_eq!(
            s.next_operation(&enabled, Some(OperationId(0)), true),
            Some(OperationId(1))
        );
    }

    #[test]
    fn blocked_top_priority_falls_through() {
        let mut s = PctStrategy::new(0, 11, 1000);
        s.initialize_next_iteration(0);
        // Register 0 and 1, then present an enabled set without 0.
        assert_eq!(
            s.next_operation(&ids(&[0, 1]), None, false),
            Some(OperationId(0))
        );
        assert_eq!(
            s.next_operation(&ids(&[1]), Some(OperationId(0)), false),
            Some(OperationId(1))
        );
    }

    #[test]
    fn learns_schedule_length_across_iterations() {
        let enabled = ids(&[0, 1]);
        let mut s = PctStrategy::new(1, 11, 1000);
        s.initialize_next_iteration(0);
        for _ in 0..20 {
            s.next_operation(&enabled, None, false);
        }
        s.initialize_next_iteration(1);
        // With one change requested and 20 observed steps, exactly one
        // inversion point lands in [0, 20).
        assert_eq!(s.change_points.len(), 1);
        assert!(s.change_points[0] < 20);
    }

    #[test]
    fn same_seed_same_change_points() {
        let enabled = ids(&[0, 1, 2]);
        let mut a = PctStrategy::new(3, 5, 1000);
        let mut b = PctStrategy::new(3, 5, 1000);
        for strategy in [&mut a, &mut b] {
            strategy.initialize_next_iteration(0);
            for _ in 0..30 {
                strategy.next_operation(&enabled, None, false);
            }
            strategy.initialize_next_iteration(1);
        }
        assert_eq!(a.change_points, b.change_points);
    }
}
