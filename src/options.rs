use std::time::{Duration, Instant};

use crate::error::BudgetKind;

/// Limits applied to every scanned line.
///
/// Nothing is limited by default. When a limit is hit, the scan functions return
/// [`ScanBudgetExceeded`](crate::ScanBudgetExceeded) holding what was scanned so far.
#[derive(Default, Copy, Clone, Eq, PartialEq, Debug)]
pub struct ScanOptions {
    pub(crate) step_budget: Option<usize>,
    pub(crate) time_budget: Option<Duration>,
    pub(crate) max_line_length: Option<usize>,
}

impl ScanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of regex match attempts for a single line.
    pub fn step_budget(mut self, steps: usize) -> Self {
        self.step_budget = Some(steps);
        self
    }

    /// Maximum time spent on a single line.
    /// Only checked between regex searches: a single pathological regex is not interrupted.
    pub fn time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    /// Lines longer than this, in bytes, are not scanned and become a single background token.
    pub fn max_line_length(mut self, bytes: usize) -> Self {
        self.max_line_length = Some(bytes);
        self
    }

    pub(crate) fn is_too_long(&self, line: &str) -> bool {
        self.max_line_length.is_some_and(|max| line.len() > max)
    }

    /// Starts counting for a new line
    pub(crate) fn start(&self) -> Budget {
        Budget {
            steps_left: self.step_budget,
            // A budget too large to be represented never runs out
            deadline: self
                .time_budget
                .and_then(|budget| Instant::now().checked_add(budget)),
        }
    }
}

/// What is left of the limits for the line being scanned
#[derive(Debug, Clone)]
pub(crate) struct Budget {
    steps_left: Option<usize>,
    deadline: Option<Instant>,
}

impl Budget {
    /// Called before every regex search
    pub(crate) fn tick(&mut self) -> Result<(), BudgetKind> {
        if let Some(steps) = self.steps_left.as_mut() {
            if *steps == 0 {
                return Err(BudgetKind::Steps);
            }
            *steps -= 1;
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(BudgetKind::Time);
        }
        Ok(())
    }
}
