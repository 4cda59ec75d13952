//! Exhaustion signal raised by every enforcement point.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::snapshot::BudgetSnapshot;

/// Why a budget refused to continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetReason {
    Timeout,
    StepLimit,
    ToolLimit,
    TokenLimit,
    UsageUnavailable,
}

impl BudgetReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::StepLimit => "STEP_LIMIT",
            Self::ToolLimit => "TOOL_LIMIT",
            Self::TokenLimit => "TOKEN_LIMIT",
            Self::UsageUnavailable => "USAGE_UNAVAILABLE",
        }
    }
}

impl fmt::Display for BudgetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Budget exhaustion, carrying the state at the moment it was detected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Budget exceeded: {reason}")]
pub struct BudgetError {
    reason: BudgetReason,
    snapshot: BudgetSnapshot,
    execution_id: Option<String>,
}

impl BudgetError {
    pub(crate) fn new(
        reason: BudgetReason,
        snapshot: BudgetSnapshot,
        execution_id: Option<String>,
    ) -> Self {
        Self {
            reason,
            snapshot,
            execution_id,
        }
    }

    pub fn reason(&self) -> BudgetReason {
        self.reason
    }

    pub fn snapshot(&self) -> &BudgetSnapshot {
        &self.snapshot
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.execution_id.as_deref()
    }

    pub fn overshoot(&self) -> Option<u64> {
        self.snapshot.overshoot
    }
}

/// Walks an error's source chain looking for a [`BudgetError`].
///
/// Lets callers tell budget exhaustion apart from failures surfaced by the
/// delegated API call, whatever error type wraps it.
pub fn find_budget_error<'a>(
    err: &'a (dyn std::error::Error + 'static),
) -> Option<&'a BudgetError> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(budget) = e.downcast_ref::<BudgetError>() {
            return Some(budget);
        }
        current = e.source();
    }
    None
}

pub fn is_budget_error(err: &(dyn std::error::Error + 'static)) -> bool {
    find_budget_error(err).is_some()
}
