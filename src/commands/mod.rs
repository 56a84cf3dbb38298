use async_trait::async_trait;

use crate::auth::CallerContext;
use crate::errors::ServiceError;
use crate::services::purchase_orders::PurchaseOrderService;

/// Command trait for implementing the Command Pattern
///
/// A command carries one validated request. Executing it checks its shape,
/// then hands it to the purchase-order service on behalf of `caller`.
#[async_trait]
pub trait Command: Send + Sync {
    /// The return type of the command when executed successfully
    type Result;

    async fn execute(
        &self,
        service: &PurchaseOrderService,
        caller: Option<&CallerContext>,
    ) -> Result<Self::Result, ServiceError>;
}

pub mod purchaseorders;
