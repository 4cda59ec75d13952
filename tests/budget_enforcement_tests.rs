//! Budget enforcement tests.
//!
//! Exercises the public surface end to end: tool-call guard, guarded
//! response wrapper, token latch, degraded accounting, and configuration.
//!
//! Run: cargo nextest run --test budget_enforcement_tests

use std::time::Duration;

use run_budget::{
    Budget, BudgetLimits, BudgetReason, Error, ManualClock, guarded_response, is_budget_error,
};
use serde_json::{Value, json};

fn scenario_limits() -> BudgetLimits {
    BudgetLimits::new(3, 10, Duration::from_millis(60_000), 100, 1000)
}

fn budget(limits: BudgetLimits) -> (Budget, ManualClock) {
    let clock = ManualClock::new();
    (Budget::with_clock(limits, clock.clone()), clock)
}

async fn call_reporting(budget: &mut Budget, usage: Value) -> Result<Value, Error> {
    guarded_response(budget, json!({ "input": "step" }), |_params| async move {
        Ok(json!({ "output": "ok", "usage": usage }))
    })
    .await
}

async fn call_without_usage(budget: &mut Budget) -> Result<Value, Error> {
    guarded_response(budget, json!({}), |_params| async {
        Ok(json!({ "output": "no usage here" }))
    })
    .await
}

// =============================================================================
// Tool-call guard
// =============================================================================

mod tool_call_guard {
    use super::*;

    #[test]
    fn test_succeeds_exactly_max_tool_calls_times() {
        for max in [1u64, 3, 7] {
            let limits = BudgetLimits::new(1, max, Duration::from_secs(60), 10, 10);
            let (mut budget, _clock) = budget(limits);

            let successes = (0..20)
                .take_while(|_| budget.record_tool_call().is_ok())
                .count() as u64;
            assert_eq!(successes, max);

            let err = budget.record_tool_call().unwrap_err();
            assert_eq!(err.reason(), BudgetReason::ToolLimit);
            assert_eq!(err.snapshot().tool_calls_used, max);
        }
    }

    #[test]
    fn test_fewer_calls_than_limit_all_succeed() {
        let (mut budget, _clock) = budget(scenario_limits());
        for _ in 0..4 {
            budget.record_tool_call().unwrap();
        }
        assert_eq!(budget.snapshot().tool_calls_used, 4);
        assert_eq!(budget.snapshot().tool_calls_remaining(), 6);
    }

    #[test]
    fn test_timeout_reported_before_tool_limit() {
        let limits = BudgetLimits::new(1, 1, Duration::from_secs(1), 10, 10);
        let (mut budget, clock) = budget(limits);
        budget.record_tool_call().unwrap();

        clock.advance(Duration::from_secs(5));
        assert_eq!(
            budget.record_tool_call().unwrap_err().reason(),
            BudgetReason::Timeout
        );
    }

    #[test]
    fn test_tool_calls_do_not_consume_steps() {
        let (mut budget, _clock) = budget(scenario_limits());
        budget.record_tool_call().unwrap();
        assert_eq!(budget.snapshot().steps_used, 0);
    }
}

// =============================================================================
// Guarded response wrapper
// =============================================================================

mod guarded_calls {
    use super::*;

    #[tokio::test]
    async fn test_clamps_unset_request_to_ceiling() {
        let limits = BudgetLimits::new(5, 5, Duration::from_secs(60), 500, 10_000);
        let (mut budget, _clock) = budget(limits);

        let received = guarded_response(&mut budget, json!({ "model": "m" }), |params| async move {
            Ok::<_, Error>(json!({ "echo": params, "usage": { "total_tokens": 1 } }))
        })
        .await
        .unwrap();

        assert_eq!(received["echo"]["max_output_tokens"], 500);
        assert_eq!(received["echo"]["model"], "m");
    }

    #[tokio::test]
    async fn test_keeps_smaller_request() {
        let limits = BudgetLimits::new(5, 5, Duration::from_secs(60), 500, 10_000);
        let (mut budget, _clock) = budget(limits);

        let received = guarded_response(
            &mut budget,
            json!({ "max_output_tokens": 200 }),
            |params| async move {
                Ok::<_, Error>(json!({ "echo": params, "usage": { "total_tokens": 1 } }))
            },
        )
        .await
        .unwrap();

        assert_eq!(received["echo"]["max_output_tokens"], 200);
    }

    #[tokio::test]
    async fn test_keeps_smaller_float_request() {
        let limits = BudgetLimits::new(5, 5, Duration::from_secs(60), 500, 10_000);
        let (mut budget, _clock) = budget(limits);

        let received = guarded_response(
            &mut budget,
            json!({ "max_output_tokens": 200.0 }),
            |params| async move {
                Ok::<_, Error>(json!({ "echo": params, "usage": { "total_tokens": 1 } }))
            },
        )
        .await
        .unwrap();

        assert_eq!(received["echo"]["max_output_tokens"], 200);
    }

    #[tokio::test]
    async fn test_step_limit() {
        let (mut budget, _clock) = budget(scenario_limits());
        for _ in 0..3 {
            call_reporting(&mut budget, json!({ "total_tokens": 1 }))
                .await
                .unwrap();
        }

        let err = call_reporting(&mut budget, json!({ "total_tokens": 1 }))
            .await
            .unwrap_err();
        assert_eq!(err.budget_reason(), Some(BudgetReason::StepLimit));
        assert_eq!(budget.snapshot().steps_used, 3);
    }

    #[tokio::test]
    async fn test_failed_call_still_consumes_step() {
        let limits = BudgetLimits::new(1, 10, Duration::from_secs(60), 100, 1000);
        let (mut budget, _clock) = budget(limits);

        let err = guarded_response(&mut budget, json!({}), |_| async {
            Err::<Value, _>(Error::api("connection reset"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Api(ref msg) if msg == "connection reset"));
        assert!(!is_budget_error(&err));

        let err = call_reporting(&mut budget, json!({ "total_tokens": 1 }))
            .await
            .unwrap_err();
        assert_eq!(err.budget_reason(), Some(BudgetReason::StepLimit));
    }

    #[tokio::test]
    async fn test_timeout_is_checked_on_next_call_only() {
        let limits = BudgetLimits::new(5, 5, Duration::from_secs(1), 100, 1000);
        let (mut budget, clock) = budget(limits);

        let slow_clock = clock.clone();
        let response = guarded_response(&mut budget, json!({}), |_| async move {
            slow_clock.advance(Duration::from_secs(30));
            Ok::<_, Error>(json!({ "usage": { "total_tokens": 1 } }))
        })
        .await;
        assert!(response.is_ok());

        let err = call_reporting(&mut budget, json!({ "total_tokens": 1 }))
            .await
            .unwrap_err();
        assert_eq!(err.budget_reason(), Some(BudgetReason::Timeout));
        assert_eq!(err.as_budget_error().unwrap().snapshot().elapsed_ms, 30_000);
    }
}

// =============================================================================
// Token latch
// =============================================================================

mod token_latch {
    use super::*;

    #[tokio::test]
    async fn test_three_calls_of_400_latch_with_overshoot_200() {
        let (mut budget, _clock) = budget(scenario_limits().with_execution_id("exec-123"));

        for _ in 0..2 {
            call_reporting(&mut budget, json!({ "total_tokens": 400 }))
                .await
                .unwrap();
        }
        let third = call_reporting(&mut budget, json!({ "total_tokens": 400 }))
            .await
            .unwrap();
        assert_eq!(third["output"], "ok");
        assert_eq!(budget.terminated_reason(), Some(BudgetReason::TokenLimit));
        assert_eq!(budget.snapshot().tokens_used, 1200);

        let err = call_reporting(&mut budget, json!({ "total_tokens": 400 }))
            .await
            .unwrap_err();
        let err = err.as_budget_error().unwrap();
        // step ceiling is checked before the latch
        assert_eq!(err.reason(), BudgetReason::StepLimit);

        let tool_err = budget.record_tool_call().unwrap_err();
        assert_eq!(tool_err.reason(), BudgetReason::TokenLimit);
        assert_eq!(tool_err.overshoot(), Some(200));
        assert_eq!(tool_err.execution_id(), Some("exec-123"));
    }

    #[tokio::test]
    async fn test_fourth_call_fails_with_token_limit_when_steps_remain() {
        let limits = BudgetLimits::new(4, 10, Duration::from_secs(60), 100, 1000);
        let (mut budget, _clock) = budget(limits);

        for _ in 0..3 {
            call_reporting(&mut budget, json!({ "total_tokens": 400 }))
                .await
                .unwrap();
        }

        let err = call_reporting(&mut budget, json!({ "total_tokens": 400 }))
            .await
            .unwrap_err();
        let err = err.as_budget_error().unwrap();
        assert_eq!(err.reason(), BudgetReason::TokenLimit);
        assert_eq!(err.overshoot(), Some(200));
        assert_eq!(err.snapshot().tokens_used, 1200);
        assert_eq!(err.snapshot().steps_used, 3);
    }

    #[tokio::test]
    async fn test_latched_snapshot_is_frozen() {
        let limits = BudgetLimits::new(10, 10, Duration::from_secs(60), 100, 1000);
        let (mut budget, clock) = budget(limits);
        call_reporting(&mut budget, json!({ "total_tokens": 1500 }))
            .await
            .unwrap();

        let first = budget.record_tool_call().unwrap_err();
        clock.advance(Duration::from_secs(10));
        let second = call_reporting(&mut budget, json!({ "total_tokens": 1 }))
            .await
            .unwrap_err();
        let third = budget.record_tool_call().unwrap_err();

        let second = second.as_budget_error().unwrap();
        assert_eq!(second.reason(), BudgetReason::TokenLimit);
        assert_eq!(first.snapshot(), second.snapshot());
        assert_eq!(first.snapshot(), third.snapshot());
        assert_eq!(first.snapshot().overshoot, Some(500));
        assert_eq!(first.snapshot().elapsed_ms, 0);
        assert_eq!(budget.snapshot().steps_used, 1);
        assert_eq!(budget.snapshot().tool_calls_used, 0);
    }
}

// =============================================================================
// Degraded accounting
// =============================================================================

mod accounting_modes {
    use super::*;

    #[tokio::test]
    async fn test_fail_open_never_raises_usage_unavailable() {
        let limits = BudgetLimits::new(10, 10, Duration::from_secs(60), 100, 1000);
        let (mut budget, _clock) = budget(limits);

        call_without_usage(&mut budget).await.unwrap();
        assert!(!budget.snapshot().token_accounting_reliable);

        // usage reported again, far past the ceiling: no latch, flag stays off
        call_reporting(&mut budget, json!({ "total_tokens": 5000 }))
            .await
            .unwrap();
        call_reporting(&mut budget, json!({ "total_tokens": 5000 }))
            .await
            .unwrap();

        let snapshot = budget.snapshot();
        assert!(!snapshot.token_accounting_reliable);
        assert_eq!(snapshot.tokens_used, 10_000);
        assert_eq!(budget.terminated_reason(), None);
        assert!(budget.record_tool_call().is_ok());
    }

    #[tokio::test]
    async fn test_fail_closed_raises_and_keeps_tokens() {
        let (mut budget, _clock) = budget(scenario_limits().fail_closed());
        call_reporting(&mut budget, json!({ "total_tokens": 50 }))
            .await
            .unwrap();

        let err = call_without_usage(&mut budget).await.unwrap_err();
        let err = err.as_budget_error().unwrap();
        assert_eq!(err.reason(), BudgetReason::UsageUnavailable);
        assert_eq!(err.snapshot().tokens_used, 50);
        assert!(err.snapshot().token_accounting_reliable);
        assert_eq!(budget.snapshot().tokens_used, 50);
        assert_eq!(budget.snapshot().steps_used, 2);
    }

    #[tokio::test]
    async fn test_partial_usage_counts_as_missing() {
        let (mut budget, _clock) = budget(scenario_limits().fail_closed());
        let err = call_reporting(&mut budget, json!({ "prompt_tokens": 10 }))
            .await
            .unwrap_err();
        assert_eq!(err.budget_reason(), Some(BudgetReason::UsageUnavailable));
    }

    #[tokio::test]
    async fn test_float_usage_is_charged_under_fail_closed() {
        let (mut budget, _clock) = budget(scenario_limits().fail_closed());
        call_reporting(&mut budget, json!({ "total_tokens": 400.0 }))
            .await
            .unwrap();
        call_reporting(
            &mut budget,
            json!({ "prompt_tokens": 30.0, "completion_tokens": 20.0 }),
        )
        .await
        .unwrap();

        let snapshot = budget.snapshot();
        assert_eq!(snapshot.tokens_used, 450);
        assert!(snapshot.token_accounting_reliable);
    }

    #[tokio::test]
    async fn test_float_usage_latches_overshoot_under_fail_open() {
        let (mut budget, _clock) = budget(scenario_limits());
        let response = call_reporting(&mut budget, json!({ "total_tokens": 1500.0 }))
            .await
            .unwrap();
        assert_eq!(response["output"], "ok");

        let snapshot = budget.snapshot();
        assert_eq!(snapshot.tokens_used, 1500);
        assert!(snapshot.token_accounting_reliable);
        assert_eq!(budget.terminated_reason(), Some(BudgetReason::TokenLimit));

        let err = budget.record_tool_call().unwrap_err();
        assert_eq!(err.reason(), BudgetReason::TokenLimit);
        assert_eq!(err.overshoot(), Some(500));
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod configuration {
    use run_budget::config::{ConfigBuilder, FileConfigProvider, MemoryConfigProvider};
    use run_budget::{ConfigProvider, TokenAccountingMode};
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_load_limits_with_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("budget.json");
        tokio::fs::write(
            &path,
            json!({
                "budget": {
                    "max_steps": 25,
                    "max_tool_calls": 100,
                    "timeout_ms": 120000,
                    "max_output_tokens": 4096,
                    "max_tokens": 250000,
                    "token_accounting_mode": "fail-closed"
                }
            })
            .to_string(),
        )
        .await
        .unwrap();

        let config = ConfigBuilder::new()
            .memory(MemoryConfigProvider::new().value("budget.max_steps", "5"))
            .provider(Box::new(FileConfigProvider::new(path)))
            .build();
        assert_eq!(config.name(), "composite");

        let limits = BudgetLimits::load(&config).await.unwrap();
        assert_eq!(limits.max_steps, 5);
        assert_eq!(limits.max_tool_calls, 100);
        assert_eq!(limits.timeout, Duration::from_secs(120));
        assert_eq!(limits.token_accounting_mode, TokenAccountingMode::FailClosed);
        assert_eq!(limits.execution_id, None);
    }

    #[tokio::test]
    async fn test_invalid_mode_is_reported() {
        let config = MemoryConfigProvider::new()
            .value("budget.max_steps", "1")
            .value("budget.max_tool_calls", "1")
            .value("budget.timeout_ms", "1")
            .value("budget.max_output_tokens", "1")
            .value("budget.max_tokens", "1")
            .value("budget.token_accounting_mode", "best-effort");

        let err: Error = BudgetLimits::load(&config).await.unwrap_err().into();
        assert!(err.is_configuration_error());
        assert!(err.to_string().contains("budget.token_accounting_mode"));
    }
}
