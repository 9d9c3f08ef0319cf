//! Call budget enforcement.
//!
//! One budget unit is one permitted external analysis call, consumed only on
//! a cache miss. Both counters live behind a single lock so a check and its
//! increments are one linearizable operation: concurrent acquisitions can
//! never overshoot a cap.

use std::collections::HashMap;
use std::sync::Mutex;

/// Configured maximums for external calls in one run.
#[derive(Debug, Clone, Copy)]
pub struct CallBudget {
    pub max_per_run: u32,
    pub max_per_file: u32,
}

impl Default for CallBudget {
    fn default() -> Self {
        Self {
            max_per_run: 24,
            max_per_file: 2,
        }
    }
}

/// Outcome of a budget acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    RunExhausted,
    FileExhausted,
}

#[derive(Default)]
struct Counters {
    run_used: u32,
    per_file: HashMap<String, u32>,
}

/// Enforces per-file and per-run call caps for one run.
pub struct BudgetController {
    budget: CallBudget,
    counters: Mutex<Counters>,
}

impl BudgetController {
    pub fn new(budget: CallBudget) -> Self {
        Self {
            budget,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Acquire one call unit for `file`.
    ///
    /// Succeeds only while both the file count and the run count are below
    /// their caps; on success both are incremented under the same lock.
    pub fn try_acquire(&self, file: &str) -> Acquire {
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if counters.run_used >= self.budget.max_per_run {
            return Acquire::RunExhausted;
        }
        let file_used = counters.per_file.entry(file.to_string()).or_insert(0);
        if *file_used >= self.budget.max_per_file {
            return Acquire::FileExhausted;
        }

        *file_used += 1;
        counters.run_used += 1;
        Acquire::Granted
    }

    /// Units consumed so far this run.
    pub fn used(&self) -> u32 {
        match self.counters.lock() {
            Ok(guard) => guard.run_used,
            Err(poisoned) => poisoned.into_inner().run_used,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.budget.max_per_run.saturating_sub(self.used())
    }
}
