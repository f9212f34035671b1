//! Temperature-tracking wrapper for fair-cycle liveness detection.

use super::Strategy;
use crate::runtime::operation::OperationId;

/// Delegates every decision to its base strategy while tracking a
/// temperature over monitor hot states: +1 on a decision taken while any
/// monitor is hot, saturating -1 otherwise. Crossing the configured
/// threshold reports a potential fair-cycle liveness violation.
#[derive(Debug)]
pub struct LivenessStrategy {
    base: Box<dyn Strategy + Send>,
    temperature: u64,
    threshold: u64,
    tripped: bool,
}

impl LivenessStrategy {
    pub fn new(base: Box<dyn Strategy + Send>, threshold: u64) -> Self {
        Self {
            base,
            temperature: 0,
            threshold,
            tripped: false,
        }
    }

    pub fn temperature(&self) -> u64 {
        self.temperature
    }
}

impl Strategy for LivenessStrategy {
    fn initialize_next_iteration(&mut self, iteration: u64) -> bool {
        self.temperature = 0;
        self.tripped = false;
        self.base.initialize_next_iteration(iteration)
    }

    fn next_operation(
        &mut self,
        enabled: &[OperationId],
        current: Option<OperationId>,
        is_yielding: bool,
    ) -> Option<OperationId> {
        self.base.next_operation(enabled, current, is_yielding)
    }

    fn next_boolean(&mut self, current: Option<OperationId>, max: u64) -> Option<bool> {
        self.base.next_boolean(current, max)
    }

    fn next_integer(&mut self, current: Option<OperationId>, max: u64) -> Option<u64> {
        self.base.next_integer(current, max)
    }

    fn step_count(&self) -> u64 {
        self.base.step_count()
    }

    fn is_max_steps_reached(&self) -> bool {
        self.base.is_max_steps_reached()
    }

    fn is_fair(&self) -> bool {
        self.base.is_fair()
    }

    fn description(&self) -> String {
        format!("liveness({})", self.base.description())
    }

    fn reset(&mut self) {
        self.temperature = 0;
        self.tripped = false;
        self.base.reset();
    }

    fn error(&self) -> Option<String> {
        self.base.error()
    }

    fn notify_monitor_status(&mut self, any_hot: bool) {
        if any_hot {
            self.temperature += 1;
        } else {
            self.temperature = self.temperature.saturating_sub(1);
        }
    }

    fn check_liveness(&mut self) -> Option<String> {
        if !self.tripped && self.temperature >= self.threshold {
            self.tripped = true;
            Some(format!(
                "potential fair-cycle liveness violation: monitor temperature {} reached \
                 the threshold {}",
                self.temperature, self.threshold
            ))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::RandomStrategy;

    fn wrapper(threshold: u64) -> LivenessStrategy {
        LivenessStrategy::new(Box::new(RandomStrategy::new(0, 1000)), threshold)
    }

    #[test]
    fn temperature_rises_while_hot_and_cools_otherwise() {
        let mut s = wrapper(100);
        s.notify_monitor_status(true);
        s.notify_monitor_status(true);
        assert_eq!(s.temperature(), 2);
        s.notify_monitor_status(false);
        assert_eq!(s.temperature(), 1);
        s.notify_monitor_status(false);
        s.notify_monitor_status(false);
        assert_eq!(s.temperature(), 0);
    }

    #[test]
    fn threshold_crossing_reports_once() {
        let mut s = wrapper(3);
        for _ in 0..3 {
            assert!(s.check_liveness().is_none());
            s.notify_monitor_status(true);
        }
        let report = s.check_liveness().unwrap();
        assert!(report.contains("liveness violation"));
        assert!(s.check_liveness().is_none());
    }

    #[test]
    fn iteration_reset_clears_temperature() {
        let mut s = wrapper(2);
        s.notify_monitor_status(true);
        s.notify_monitor_status(true);
        s.initialize_next_iteration(1);
        assert_eq!(s.temperature(), 0);
        assert!(s.check_liveness().is_none());
    }
}
