//! Prelude module for convenient imports.
//!
//! ```rust
//! use run_budget::prelude::*;
//! ```

pub use crate::Error;
pub use crate::Result;

// Budget
pub use crate::budget::{
    Budget, BudgetError, BudgetLimits, BudgetReason, BudgetSnapshot, TokenAccountingMode,
    is_budget_error,
};

// Guard
pub use crate::guard::{ResponseApi, ResponseParams, ResponseUsage, UsageSource, guarded_response};
