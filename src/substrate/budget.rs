use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use crate::error::BudgetError;
use crate::spec::Budgets;

/// Running accumulators for tokens, steps, and wall time, shared across
/// every invocation in a run. Updates are atomic so concurrent branches
/// and tasks observe a consistent running total (§5 "budget-ledger
/// updates are serialized").
pub struct BudgetLedger {
    tokens_input: AtomicU64,
    tokens_output: AtomicU64,
    steps: AtomicU64,
    warned: AtomicBool,
    started_at: Instant,
    budgets: Budgets,
}

/// Outcome of accounting one invocation: whether this call newly crossed
/// the warn threshold (emitted once per run, not once per call over
/// threshold).
pub struct BudgetCheck {
    pub newly_warned: bool,
}

impl BudgetLedger {
    pub fn new(budgets: Budgets) -> Self {
        Self {
            tokens_input: AtomicU64::new(0),
            tokens_output: AtomicU64::new(0),
            steps: AtomicU64::new(0),
            warned: AtomicBool::new(false),
            started_at: Instant::now(),
            budgets,
        }
    }

    /// Accounts one invocation's token usage and step. Must run *after*
    /// the compaction hook for that turn, per the mandated ordering
    /// (attempt → compaction → budget → context update, §4.3/§9).
    pub fn record_invocation(&self, tokens_input: u64, tokens_output: u64) -> Result<BudgetCheck, BudgetError> {
        let total_input = self.tokens_input.fetch_add(tokens_input, Ordering::SeqCst) + tokens_input;
        let total_output = self.tokens_output.fetch_add(tokens_output, Ordering::SeqCst) + tokens_output;
        let steps = self.steps.fetch_add(1, Ordering::SeqCst) + 1;
        let total_tokens = total_input + total_output;

        if let Some(max_steps) = self.budgets.max_steps {
            if steps > max_steps {
                return Err(BudgetError::Steps { used: steps, limit: max_steps });
            }
        }

        if let Some(max_duration_s) = self.budgets.max_duration_s {
            let elapsed = self.started_at.elapsed().as_secs();
            if elapsed > max_duration_s {
                return Err(BudgetError::Duration { used_s: elapsed, limit_s: max_duration_s });
            }
        }

        let mut newly_warned = false;
        if let Some(max_tokens) = self.budgets.max_tokens {
            if total_tokens > max_tokens {
                return Err(BudgetError::Tokens { used: total_tokens, limit: max_tokens });
            }
            let warn_at = (max_tokens as f64 * self.budgets.warn_threshold) as u64;
            if total_tokens >= warn_at && !self.warned.swap(true, Ordering::SeqCst) {
                newly_warned = true;
            }
        }

        Ok(BudgetCheck { newly_warned })
    }

    pub fn totals(&self) -> (u64, u64, u64) {
        (
            self.tokens_input.load(Ordering::SeqCst),
            self.tokens_output.load(Ordering::SeqCst),
            self.steps.load(Ordering::SeqCst),
        )
    }
}
