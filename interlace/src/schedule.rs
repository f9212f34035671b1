//! The schedule trace: an append-only log of scheduling decisions sufficient
//! to re-execute an iteration deterministically.
//!
//! On-disk form is newline-delimited text. The first line is a header
//! comment, subsequent non-empty non-comment lines are step records:
//!
//! ```text
//! # strategy=random fair=true seed=42
//! S:0
//! B:1
//! I:7
//! ```

use crate::error::ScheduleError;
use crate::runtime::operation::OperationId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// One decision of the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleStep {
    /// The strategy selected this operation to run next.
    Scheduling(OperationId),
    /// A nondeterministic boolean choice.
    Boolean(bool),
    /// A nondeterministic bounded integer choice.
    Integer(u64),
}

impl ScheduleStep {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            ScheduleStep::Scheduling(_) => "scheduling",
            ScheduleStep::Boolean(_) => "boolean",
            ScheduleStep::Integer(_) => "integer",
        }
    }
}

impl fmt::Display for ScheduleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleStep::Scheduling(id) => write!(f, "S:{id}"),
            ScheduleStep::Boolean(b) => write!(f, "B:{}", u8::from(*b)),
            ScheduleStep::Integer(v) => write!(f, "I:{v}"),
        }
    }
}

/// Trace header: enough to reconstruct the producing strategy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleHeader {
    pub strategy: String,
    pub fair: bool,
    pub seed: Option<u64>,
}

impl Default for ScheduleHeader {
    fn default() -> Self {
        Self {
            strategy: "unknown".to_string(),
            fair: false,
            seed: None,
        }
    }
}

/// An ordered sequence of schedule steps plus its header. Steps are only
/// ever appended; a recorded step is never rewritten.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Schedule {
    pub header: ScheduleHeader,
    steps: Vec<ScheduleStep>,
}

impl Schedule {
    pub fn new(header: ScheduleHeader) -> Self {
        Self {
            header,
            steps: Vec::new(),
        }
    }

    pub fn push_scheduling(&mut self, id: OperationId) {
        self.steps.push(ScheduleStep::Scheduling(id));
    }

    pub fn push_boolean(&mut self, b: bool) {
        self.steps.push(ScheduleStep::Boolean(b));
    }

    pub fn push_integer(&mut self, v: u64) {
        self.steps.push(ScheduleStep::Integer(v));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[ScheduleStep] {
        &self.steps
    }

    pub fn get(&self, index: usize) -> Option<&ScheduleStep> {
        self.steps.get(index)
    }

    /// Serialize to the textual trace format.
    pub fn to_text(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        write!(out, "# strategy={} fair={}", self.header.strategy, self.header.fair).unwrap();
        if let Some(seed) = self.header.seed {
            write!(out, " seed={seed}").unwrap();
        }
        out.push('\n');
        for step in &self.steps {
            writeln!(out, "{step}").unwrap();
        }
        out
    }

    /// Parse the textual trace format, rejecting malformed or incomplete
    /// records with a line-numbered diagnostic.
    pub fn parse(text: &str) -> Result<Self, ScheduleError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty());

        let (_, header_line) = lines.next().ok_or(ScheduleError::MissingHeader)?;
        let header = Self::parse_header(header_line)?;

        let mut schedule = Schedule::new(header);
        for (line, text) in lines {
            if text.starts_with('#') {
                continue;
            }
            let step = Self::parse_step(line, text)?;
            schedule.steps.push(step);
        }
        Ok(schedule)
    }

    fn parse_header(line: &str) -> Result<ScheduleHeader, ScheduleError> {
        let rest = line.strip_prefix('#').ok_or(ScheduleError::MissingHeader)?;
        let mut strategy = None;
        let mut fair = None;
        let mut seed = None;
        for token in rest.split_whitespace() {
            match token.split_once('=') {
                Some(("strategy", v)) => strategy = Some(v.to_string()),
                Some(("fair", v)) => {
                    fair = Some(v.parse::<bool>().map_err(|_| ScheduleError::Malformed {
                        line: 1,
                        reason: format!("invalid fair flag `{v}`"),
                    })?)
                }
                Some(("seed", v)) => {
                    seed = Some(v.parse::<u64>().map_err(|_| ScheduleError::Malformed {
                        line: 1,
                        reason: format!("invalid seed `{v}`"),
                    })?)
                }
                _ => {
                    return Err(ScheduleError::Malformed {
                        line: 1,
                        reason: format!("unrecognized header token `{token}`"),
                    })
                }
            }
        }
        Ok(ScheduleHeader {
            strategy: strategy.ok_or(ScheduleError::MissingField("strategy"))?,
            fair: fair.ok_or(ScheduleError::MissingField("fair"))?,
            seed,
        })
    }

    fn parse_step(line: usize, text: &str) -> Result<ScheduleStep, ScheduleError> {
        let malformed = |reason: String| ScheduleError::Malformed { line, reason };
        let (kind, value) = text
            .split_once(':')
            .ok_or_else(|| malformed(format!("expected `<kind>:<value>`, found `{text}`")))?;
        match kind {
            "S" => value
                .parse::<usize>()
                .map(|id| ScheduleStep::Scheduling(OperationId(id)))
                .map_err(|_| malformed(format!("invalid operation id `{value}`"))),
            "B" => match value {
                "0" => Ok(ScheduleStep::Boolean(false)),
                "1" => Ok(ScheduleStep::Boolean(true)),
                other => Err(malformed(format!("invalid boolean choice `{other}`"))),
            },
            "I" => value
                .parse::<u64>()
                .map(ScheduleStep::Integer)
                .map_err(|_| malformed(format!("invalid integer choice `{value}`"))),
            other => Err(malformed(format!("unknown step kind `{other}`"))),
        }
    }

    pub fn write_to(&self, path: &Path) -> Result<(), ScheduleError> {
        std::fs::write(path, self.to_text())?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ScheduleError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }
}
