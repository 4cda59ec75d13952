//! # run-budget
//!
//! Resource budgets for agent loops that call a generative-response API.
//!
//! A [`Budget`] caps one run along five dimensions: wall-clock time, step
//! count, tool-call count, cumulative tokens, and output tokens per call.
//! Every model call goes through [`guarded_response`] and every auxiliary tool
//! invocation through [`Budget::record_tool_call`]; both fail with a
//! [`BudgetError`] once the run is out of budget.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use run_budget::{Budget, BudgetLimits, guarded_response};
//! use serde_json::json;
//!
//! # async fn call_model(params: serde_json::Value) -> Result<serde_json::Value, run_budget::Error> {
//! #     Ok(json!({ "usage": { "total_tokens": 10 } }))
//! # }
//! # async fn example() -> Result<(), run_budget::Error> {
//! let limits = BudgetLimits::new(20, 50, Duration::from_secs(300), 2048, 200_000)
//!     .with_execution_id("run-1");
//! let mut budget = Budget::new(limits);
//!
//! loop {
//!     match guarded_response(&mut budget, json!({ "input": "next" }), call_model).await {
//!         Ok(_response) => { /* run tools, each one preceded by budget.record_tool_call()? */ }
//!         Err(err) if err.is_budget_error() => break,
//!         Err(err) => return Err(err),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod budget;
pub mod config;
pub mod guard;
pub mod prelude;

pub use budget::{
    Budget, BudgetError, BudgetLimits, BudgetReason, BudgetSnapshot, Clock, FnClock, ManualClock,
    SystemClock, TokenAccountingMode, find_budget_error, is_budget_error,
};
pub use config::{
    CompositeConfigProvider, ConfigBuilder, ConfigError, ConfigProvider, ConfigProviderExt,
    EnvConfigProvider, FileConfigProvider, MemoryConfigProvider,
};
pub use guard::{
    ResponseApi, ResponseParams, ResponseUsage, UsageSource, guarded_api_response,
    guarded_response,
};

/// Error type for run-budget operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Run is out of budget.
    #[error("{0}")]
    Budget(#[from] BudgetError),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// File system operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reported by the delegated API call.
    #[error("API error: {0}")]
    Api(String),
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Budget exhausted (time, steps, tools, tokens, usage)
    ResourceLimit,
    /// Configuration loading or validation errors
    Configuration,
    /// Internal errors (IO, JSON, upstream API)
    Internal,
}

impl Error {
    pub fn api(message: impl Into<String>) -> Self {
        Error::Api(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Budget(_) => ErrorCategory::ResourceLimit,
            Error::Config(_) => ErrorCategory::Configuration,
            Error::Json(_) | Error::Io(_) | Error::Api(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_resource_limit(&self) -> bool {
        self.category() == ErrorCategory::ResourceLimit
    }

    pub fn is_configuration_error(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    pub fn is_budget_error(&self) -> bool {
        self.as_budget_error().is_some()
    }

    pub fn as_budget_error(&self) -> Option<&BudgetError> {
        match self {
            Error::Budget(err) => Some(err),
            _ => None,
        }
    }

    pub fn budget_reason(&self) -> Option<BudgetReason> {
        self.as_budget_error().map(BudgetError::reason)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
