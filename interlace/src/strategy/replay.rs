//! Deterministic replay of a recorded schedule trace.

use super::Strategy;
use crate::runtime::operation::OperationId;
use crate::schedule::{Schedule, ScheduleStep};

/// Replays a recorded trace decision by decision. Any divergence between
/// the trace and the program's behavior is reported as a descriptive
/// non-reproducibility error. When the trace is exhausted, an optional
/// suffix strategy takes over; without one, exploration stops quietly.
#[derive(Debug)]
pub struct ReplayStrategy {
    schedule: Schedule,
    cursor: usize,
    suffix: Option<Box<dyn Strategy + Send>>,
    in_suffix: bool,
    error: Option<String>,
    steps: u64,
    max_steps: u64,
}

impl ReplayStrategy {
    pub fn new(schedule: Schedule, max_steps: u64) -> Self {
        Self {
            schedule,
            cursor: 0,
            suffix: None,
            in_suffix: false,
            error: None,
            steps: 0,
            max_steps,
        }
    }

    pub fn with_suffix(mut self, suffix: Box<dyn Strategy + Send>) -> Self {
        self.suffix = Some(suffix);
        self
    }

    /// Advance to the next recorded step if its kind matches `requested`.
    fn advance(&mut self, requested: &'static str) -> Result<Option<ScheduleStep>, String> {
        match self.schedule.get(self.cursor) {
            None => {
                if self.suffix.is_some() {
                    if !self.in_suffix {
                        log::debug!("replay trace exhausted, switching to suffix strategy");
                        self.in_suffix = true;
                    }
                    Ok(None)
                } else {
                    log::warn!(
                        "replay trace exhausted after {} steps with no suffix strategy; stopping",
                        self.cursor
                    );
                    Err(String::new())
                }
            }
            Some(step) if step.kind_name() != requested => Err(format!(
                "Trace is not reproducible: expected a {requested} choice at step {} \
                 but the trace has a {} choice",
                self.cursor,
                step.kind_name(),
            )),
            Some(step) => {
                let step = *step;
                self.cursor += 1;
                self.steps += 1;
                Ok(Some(step))
            }
        }
    }

    /// Record an error unless the refusal is a quiet stop (empty message).
    fn fail(&mut self, message: String) {
        if !message.is_empty() {
            log::error!("{message}");
            self.error = Some(message);
        }
    }
}

impl Strategy for ReplayStrategy {
    fn initialize_next_iteration(&mut self, iteration: u64) -> bool {
        if iteration > 0 {
            // A trace encodes exactly one iteration.
            return false;
        }
        self.cursor = 0;
        self.steps = 0;
        self.error = None;
        self.in_suffix = false;
        if let Some(suffix) = &mut self.suffix {
            suffix.initialize_next_iteration(iteration);
        }
        true
    }

    fn next_operation(
        &mut self,
        enabled: &[OperationId],
        current: Option<OperationId>,
        is_yielding: bool,
    ) -> Option<OperationId> {
        if self.in_suffix {
            return self
                .suffix
                .as_mut()
                .and_then(|s| s.next_operation(enabled, current, is_yielding));
        }
        match self.advance("scheduling") {
            Ok(Some(ScheduleStep::Scheduling(id))) => {
                if enabled.contains(&id) {
                    Some(id)
                } else {
                    self.fail(format!(
                        "Trace is not reproducible: operation {id} is not enabled at step {} \
                         (enabled operations: {:?})",
                        self.cursor.saturating_sub(1),
                        enabled.iter().map(|id| id.to_usize()).collect::<Vec<_>>(),
                    ));
                    None
                }
            }
            Ok(Some(_)) => unreachable!("advance checked the step kind"),
            Ok(None) => self
                .suffix
                .as_mut()
                .and_then(|s| s.next_operation(enabled, current, is_yielding)),
            Err(e) => {
                self.fail(e);
                None
            }
        }
    }

    fn next_boolean(&mut self, current: Option<OperationId>, max: u64) -> Option<bool> {
        if self.in_suffix {
            return self.suffix.as_mut().and_then(|s| s.next_boolean(current, max));
        }
        match self.advance("boolean") {
            Ok(Some(ScheduleStep::Boolean(b))) => Some(b),
            Ok(Some(_)) => unreachable!("advance checked the step kind"),
            Ok(None) => self.suffix.as_mut().and_then(|s| s.next_boolean(current, max)),
            Err(e) => {
                self.fail(e);
                None
            }
        }
    }

    fn next_integer(&mut self, current: Option<OperationId>, max: u64) -> Option<u64> {
        if self.in_suffix {
            return self.suffix.as_mut().and_then(|s| s.next_integer(current, max));
        }
        match self.advance("integer") {
            Ok(Some(ScheduleStep::Integer(v))) => Some(v),
            Ok(Some(_)) => unreachable!("advance checked the step kind"),
            Ok(None) => self.suffix.as_mut().and_then(|s| s.next_integer(current, max)),
            Err(e) => {
                self.fail(e);
                None
            }
        }
    }

    fn step_count(&self) -> u64 {
        self.steps
            + self
                .suffix
                .as_ref()
                .map(|s| s.step_count())
                .unwrap_or(0)
    }

    fn is_max_steps_reached(&self) -> bool {
        self.step_count() >= self.max_steps
    }

    fn is_fair(&self) -> bool {
        // A replayed trace is only as fair as the strategy that recorded it.
        self.schedule.header.fair
    }

    fn description(&self) -> String {
        format!("replay[{} steps]", self.schedule.len())
    }

    fn reset(&mut self) {
        self.cursor = 0;
        self.steps = 0;
        self.error = None;
        self.in_suffix = false;
        if let Some(suffix) = &mut self.suffix {
            suffix.reset();
        }
    }

    fn error(&self) -> Option<String> {
        self.error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ScheduleHeader;

    fn trace() -> Schedule {
        let mut s = Schedule::new(ScheduleHeader {
            strategy: "random".to_string(),
            fair: true,
            seed: Some(1),
        });
        s.push_scheduling(OperationId(0));
        s.push_boolean(true);
        s.push_scheduling(OperationId(1));
        s
    }

    #[test]
    fn replays_recorded_decisions_in_order() {
        let mut s = ReplayStrategy::new(trace(), 100);
        assert!(s.initialize_next_iteration(0));
        let enabled = vec![OperationId(0), OperationId(1)];
        assert_eq!(s.next_operation(&enabled, None, false), Some(OperationId(0)));
        assert_eq!(s.next_boolean(None, 2), Some(true));
        assert_eq!(s.next_operation(&enabled, None, false), Some(OperationId(1)));
        assert!(s.error().is_none());
    }

    #[test]
    fn only_one_iteration() {
        let mut s = ReplayStrategy::new(trace(), 100);
        assert!(s.initialize_next_iteration(0));
        assert!(!s.initialize_next_iteration(1));
    }

    #[test]
    fn kind_mismatch_is_named() {
        let mut s = ReplayStrategy::new(trace(), 100);
        s.initialize_next_iteration(0);
        // The trace starts with a scheduling choice; asking for a boolean
        // must produce a descriptive diagnostic.
        assert_eq!(s.next_boolean(None, 2), None);
        let err = s.error().unwrap();
        assert!(err.contains("Trace is not reproducible"));
        assert!(err.contains("boolean"));
        assert!(err.contains("scheduling"));
    }

    #[test]
    fn disabled_operation_is_named() {
        let mut s = ReplayStrategy::new(trace(), 100);
        s.initialize_next_iteration(0);
        let enabled = vec![OperationId(2)];
        assert_eq!(s.next_operation(&enabled, None, false), None);
        let err = s.error().unwrap();
        assert!(err.contains("Trace is not reproducible"));
        assert!(err.contains("operation 0"));
    }

    #[test]
    fn exhaustion_without_suffix_stops_quietly() {
        let mut s = ReplayStrategy::new(Schedule::default(), 100);
        s.initialize_next_iteration(0);
        assert_eq!(s.next_operation(&[OperationId(0)], None, false), None);
        assert!(s.error().is_none());
    }

    #[test]
    fn exhaustion_with_suffix_keeps_going() {
        let suffix = Box::new(crate::strategy::RandomStrategy::new(0, 100));
        let mut s = ReplayStrategy::new(Schedule::default(), 100).with_suffix(suffix);
        s.initialize_next_iteration(0);
        assert!(s.next_operation(&[OperationId(0)], None, false).is_some());
    }
}
