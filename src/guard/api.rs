//! Trait seam for API bindings that are called through a budget.

use async_trait::async_trait;

use super::{ResponseParams, UsageSource, guarded_response};
use crate::budget::{Budget, BudgetError};

/// A generative-response API binding.
///
/// Implement this for a client type to call it with [`guarded_api_response`]
/// instead of passing a closure on every iteration.
#[async_trait]
pub trait ResponseApi<P>: Send + Sync
where
    P: ResponseParams + Send + 'static,
{
    type Response: UsageSource + Send;
    type Error: From<BudgetError> + Send;

    async fn create_response(&self, params: P) -> Result<Self::Response, Self::Error>;
}

pub async fn guarded_api_response<P, A>(
    budget: &mut Budget,
    params: P,
    api: &A,
) -> Result<A::Response, A::Error>
where
    P: ResponseParams + Send + 'static,
    A: ResponseApi<P> + ?Sized,
{
    guarded_response(budget, params, |clamped| api.create_response(clamped)).await
}
