//! Budget state machine.

use std::fmt;

use super::clock::{Clock, SystemClock};
use super::error::{BudgetError, BudgetReason};
use super::limits::BudgetLimits;
use super::snapshot::BudgetSnapshot;

/// Whether the token counter still reflects reality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenAccounting {
    Reliable,
    /// One-way: set once a fail-open response omits usage.
    Degraded,
}

/// Sticky termination left behind by a post-hoc token breach.
#[derive(Debug, Clone)]
pub(crate) struct Latch {
    pub(crate) reason: BudgetReason,
    pub(crate) snapshot: BudgetSnapshot,
}

#[derive(Debug)]
pub(crate) struct BudgetState {
    pub(crate) steps_used: u64,
    pub(crate) tool_calls_used: u64,
    pub(crate) tokens_used: u64,
    pub(crate) start_ms: u64,
    pub(crate) latch: Option<Latch>,
    pub(crate) accounting: TokenAccounting,
}

impl BudgetState {
    fn new(start_ms: u64) -> Self {
        Self {
            steps_used: 0,
            tool_calls_used: 0,
            tokens_used: 0,
            start_ms,
            latch: None,
            accounting: TokenAccounting::Reliable,
        }
    }
}

/// Counter consumed by a pre-flight check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Gate {
    Step,
    ToolCall,
}

/// Resource budget for a single agent run.
///
/// Counters are private: the only ways to advance them are
/// [`record_tool_call`](Self::record_tool_call) and
/// [`guarded_response`](crate::guarded_response), both of which take
/// `&mut Budget`, so one run drives one budget at a time.
///
/// ```rust
/// use std::time::Duration;
/// use run_budget::{Budget, BudgetLimits, BudgetReason};
///
/// let mut budget = Budget::new(BudgetLimits::new(10, 2, Duration::from_secs(60), 512, 10_000));
/// budget.record_tool_call().unwrap();
/// budget.record_tool_call().unwrap();
/// let err = budget.record_tool_call().unwrap_err();
/// assert_eq!(err.reason(), BudgetReason::ToolLimit);
/// ```
pub struct Budget {
    pub(crate) limits: BudgetLimits,
    pub(crate) state: BudgetState,
    clock: Box<dyn Clock>,
}

impl Budget {
    pub fn new(limits: BudgetLimits) -> Self {
        Self::with_clock(limits, SystemClock::new())
    }

    /// Creates a budget whose elapsed time is measured with `clock`.
    pub fn with_clock(limits: BudgetLimits, clock: impl Clock + 'static) -> Self {
        let start_ms = clock.now_ms();
        Self {
            limits,
            state: BudgetState::new(start_ms),
            clock: Box::new(clock),
        }
    }

    /// Consumes one tool-call unit, or fails without side effects.
    ///
    /// Checked in order: timeout, tool-call ceiling, latched termination.
    pub fn record_tool_call(&mut self) -> Result<(), BudgetError> {
        self.preflight(Gate::ToolCall)?;
        self.state.tool_calls_used += 1;
        tracing::debug!(
            execution_id = self.execution_id(),
            tool_calls_used = self.state.tool_calls_used,
            max_tool_calls = self.limits.max_tool_calls,
            "Tool call admitted"
        );
        Ok(())
    }

    /// Read-only view of current consumption.
    pub fn snapshot(&self) -> BudgetSnapshot {
        self.snapshot_with(None)
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.limits.execution_id.as_deref()
    }

    /// Reason the run was halted by a token overshoot, if any.
    pub fn terminated_reason(&self) -> Option<BudgetReason> {
        self.state.latch.as_ref().map(|latch| latch.reason)
    }

    pub(crate) fn elapsed_ms(&self) -> u64 {
        self.clock.now_ms().saturating_sub(self.state.start_ms)
    }

    pub(crate) fn snapshot_with(&self, overshoot: Option<u64>) -> BudgetSnapshot {
        BudgetSnapshot::capture(&self.limits, &self.state, self.elapsed_ms(), overshoot)
    }

    pub(crate) fn exhausted(&self, reason: BudgetReason) -> BudgetError {
        let err = BudgetError::new(reason, self.snapshot(), self.limits.execution_id.clone());
        log_exhaustion(&err);
        err
    }

    /// Shared precedence chain: timeout, then the gate's ceiling, then the latch.
    pub(crate) fn preflight(&self, gate: Gate) -> Result<(), BudgetError> {
        if self.elapsed_ms() >= self.limits.timeout_ms() {
            return Err(self.exhausted(BudgetReason::Timeout));
        }

        let (used, max, reason) = match gate {
            Gate::Step => (
                self.state.steps_used,
                self.limits.max_steps,
                BudgetReason::StepLimit,
            ),
            Gate::ToolCall => (
                self.state.tool_calls_used,
                self.limits.max_tool_calls,
                BudgetReason::ToolLimit,
            ),
        };
        if used.saturating_add(1) > max {
            return Err(self.exhausted(reason));
        }

        if let Some(latch) = &self.state.latch {
            let err = BudgetError::new(
                latch.reason,
                latch.snapshot,
                self.limits.execution_id.clone(),
            );
            log_exhaustion(&err);
            return Err(err);
        }

        Ok(())
    }
}

fn log_exhaustion(err: &BudgetError) {
    let snapshot = err.snapshot();
    tracing::warn!(
        reason = %err.reason(),
        execution_id = err.execution_id(),
        steps_used = snapshot.steps_used,
        tool_calls_used = snapshot.tool_calls_used,
        tokens_used = snapshot.tokens_used,
        elapsed_ms = snapshot.elapsed_ms,
        "Budget exhausted"
    );
}

impl fmt::Debug for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Budget")
            .field("limits", &self.limits)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
