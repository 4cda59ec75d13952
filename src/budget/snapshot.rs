use std::fmt;

use serde::{Deserialize, Serialize};

use super::limits::BudgetLimits;
use super::state::{BudgetState, TokenAccounting};

/// Point-in-time view of a budget's consumption against its limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub steps_used: u64,
    pub max_steps: u64,
    pub tool_calls_used: u64,
    pub max_tool_calls: u64,
    pub tokens_used: u64,
    pub max_tokens: u64,
    /// How far a limit was exceeded, set only on the snapshot taken at the breach.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overshoot: Option<u64>,
    pub elapsed_ms: u64,
    pub timeout_ms: u64,
    pub token_accounting_reliable: bool,
}

impl BudgetSnapshot {
    pub(crate) fn capture(
        limits: &BudgetLimits,
        state: &BudgetState,
        elapsed_ms: u64,
        overshoot: Option<u64>,
    ) -> Self {
        Self {
            steps_used: state.steps_used,
            max_steps: limits.max_steps,
            tool_calls_used: state.tool_calls_used,
            max_tool_calls: limits.max_tool_calls,
            tokens_used: state.tokens_used,
            max_tokens: limits.max_tokens,
            overshoot,
            elapsed_ms,
            timeout_ms: limits.timeout_ms(),
            token_accounting_reliable: state.accounting == TokenAccounting::Reliable,
        }
    }

    pub fn steps_remaining(&self) -> u64 {
        self.max_steps.saturating_sub(self.steps_used)
    }

    pub fn tool_calls_remaining(&self) -> u64 {
        self.max_tool_calls.saturating_sub(self.tool_calls_used)
    }

    /// `None` once accounting is degraded, since the counter can no longer be trusted.
    pub fn tokens_remaining(&self) -> Option<u64> {
        self.token_accounting_reliable
            .then(|| self.max_tokens.saturating_sub(self.tokens_used))
    }
}

impl fmt::Display for BudgetSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "steps {}/{}, tool calls {}/{}, tokens {}/{}",
            self.steps_used,
            self.max_steps,
            self.tool_calls_used,
            self.max_tool_calls,
            self.tokens_used,
            self.max_tokens
        )?;
        if let Some(overshoot) = self.overshoot {
            write!(f, " (over by {})", overshoot)?;
        }
        if !self.token_accounting_reliable {
            f.write_str(" [token accounting degraded]")?;
        }
        write!(f, ", elapsed {}ms/{}ms", self.elapsed_ms, self.timeout_ms)
    }
}
