//! Per-run resource budgets: time, steps, tool calls and tokens.

mod clock;
mod error;
mod limits;
mod snapshot;
mod state;

pub use clock::{Clock, FnClock, ManualClock, SystemClock};
pub use error::{BudgetError, BudgetReason, find_budget_error, is_budget_error};
pub use limits::{BudgetLimits, TokenAccountingMode};
pub use snapshot::BudgetSnapshot;
pub use state::Budget;

pub(crate) use state::{Gate, Latch, TokenAccounting};
