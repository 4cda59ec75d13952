//! Guarded invocation of an external generative-response API.
//!
//! Each call is admitted by the budget's pre-flight checks, has its
//! `max_output_tokens` clamped to the run's per-call ceiling, and is charged
//! for the tokens its response reports. Token overshoot cannot be known until
//! the response arrives, so it does not fail the call that caused it; it
//! halts every call after it.
//!
//! ```rust
//! use std::time::Duration;
//! use run_budget::{Budget, BudgetLimits, guarded_response};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), run_budget::Error> {
//! let mut budget = Budget::new(BudgetLimits::new(8, 16, Duration::from_secs(120), 1024, 50_000));
//!
//! let response = guarded_response(&mut budget, json!({ "input": "hi" }), |_params| async move {
//!     // call the real API with the clamped params here
//!     Ok::<_, run_budget::Error>(json!({ "output": "hello", "usage": { "total_tokens": 12 } }))
//! })
//! .await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

mod api;
mod usage;

pub use api::{ResponseApi, guarded_api_response};
pub use usage::{ResponseParams, ResponseUsage, UsageSource};

use std::future::Future;

use tracing::{Instrument, field};

use crate::budget::{
    Budget, BudgetError, BudgetReason, Gate, Latch, TokenAccounting, TokenAccountingMode,
};

/// Runs `call` under `budget`.
///
/// The step is consumed as soon as pre-flight checks pass, even if `call`
/// later fails. Errors from `call` are returned as-is; budget failures are
/// converted into `E` through `From<BudgetError>`.
pub async fn guarded_response<P, R, E, F, Fut>(
    budget: &mut Budget,
    params: P,
    call: F,
) -> Result<R, E>
where
    P: ResponseParams,
    R: UsageSource,
    E: From<BudgetError>,
    F: FnOnce(P) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    budget.preflight(Gate::Step)?;
    budget.state.steps_used += 1;

    let span = tracing::info_span!(
        "budget.guarded_call",
        execution_id = budget.execution_id(),
        step = budget.state.steps_used,
        max_output_tokens = field::Empty,
        delta_tokens = field::Empty,
        tokens_used = field::Empty,
    );

    let clamped = clamp(&params, budget.limits.max_output_tokens);
    if let Some(cap) = clamped.max_output_tokens() {
        span.record("max_output_tokens", cap);
    }

    let response = call(clamped).instrument(span.clone()).await?;

    let _entered = span.enter();
    charge(budget, response.usage())?;
    span.record("tokens_used", budget.state.tokens_used);
    Ok(response)
}

/// Copies `params` with the output-token request capped at `ceiling`.
pub(crate) fn clamp<P: ResponseParams>(params: &P, ceiling: u64) -> P {
    let requested = params.max_output_tokens().unwrap_or(u64::MAX);
    let mut clamped = params.clone();
    clamped.set_max_output_tokens(requested.min(ceiling));
    clamped
}

/// Post-call accounting: degraded-mode handling, counter update, latch arming.
fn charge(budget: &mut Budget, usage: Option<ResponseUsage>) -> Result<(), BudgetError> {
    let delta = usage.as_ref().and_then(ResponseUsage::delta_tokens);

    if delta.is_none() {
        match budget.limits.token_accounting_mode {
            TokenAccountingMode::FailClosed => {
                return Err(budget.exhausted(BudgetReason::UsageUnavailable));
            }
            TokenAccountingMode::FailOpen => {
                if budget.state.accounting == TokenAccounting::Reliable {
                    tracing::warn!(
                        execution_id = budget.execution_id(),
                        step = budget.state.steps_used,
                        "Response reported no usable usage, token limit enforcement disabled for this run"
                    );
                }
                budget.state.accounting = TokenAccounting::Degraded;
            }
        }
    }

    let delta = delta.unwrap_or(0);
    budget.state.tokens_used = budget.state.tokens_used.saturating_add(delta);
    tracing::Span::current().record("delta_tokens", delta);

    let max_tokens = budget.limits.max_tokens;
    if budget.state.accounting == TokenAccounting::Reliable
        && budget.state.tokens_used > max_tokens
        && budget.state.latch.is_none()
    {
        let overshoot = budget.state.tokens_used - max_tokens;
        let snapshot = budget.snapshot_with(Some(overshoot));
        tracing::warn!(
            execution_id = budget.execution_id(),
            tokens_used = budget.state.tokens_used,
            max_tokens,
            overshoot,
            "Token budget exceeded, halting further calls"
        );
        budget.state.latch = Some(Latch {
            reason: BudgetReason::TokenLimit,
            snapshot,
        });
    }

    Ok(())
}
