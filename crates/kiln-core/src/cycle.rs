//! Repair cycle bookkeeping.

use serde::{Deserialize, Serialize};

use crate::probe::TestReport;

/// Attempt counter of the auto-repair loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairCycleState {
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_failure_report: Option<TestReport>,
    #[serde(default)]
    last_passed: bool,
}

impl RepairCycleState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            last_failure_report: None,
            last_passed: false,
        }
    }

    /// Back to zero, as at session start or after a manual action
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last_failure_report = None;
        self.last_passed = false;
    }

    /// Keep the report if it has failures
    pub fn record(&mut self, report: &TestReport) {
        self.last_passed = report.is_passing();
        if self.last_passed {
            self.last_failure_report = None;
        } else {
            self.last_failure_report = Some(report.clone());
        }
    }

    pub fn can_repair(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Consume one attempt and return its 1-based number
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    pub fn remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt)
    }

    pub fn is_terminal(&self) -> bool {
        self.last_passed || !self.can_repair()
    }
}
