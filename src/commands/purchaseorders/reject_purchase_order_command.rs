use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::validate_not_blank;
use crate::{
    auth::CallerContext, commands::Command, errors::ServiceError, models::PurchaseOrder,
    services::purchase_orders::PurchaseOrderService,
};

/// Sends an order awaiting approval back to draft.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RejectPurchaseOrderCommand {
    pub id: Uuid,
    #[validate(length(min = 1, max = 1000), custom = "validate_not_blank")]
    pub reason: String,
}

#[async_trait]
impl Command for RejectPurchaseOrderCommand {
    type Result = PurchaseOrder;

    #[instrument(skip(self, service, caller), fields(purchase_order_id = %self.id))]
    async fn execute(
        &self,
        service: &PurchaseOrderService,
        caller: Option<&CallerContext>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate().map_err(|e| {
            warn!(purchase_order_id = %self.id, "Rejection without a usable reason");
            ServiceError::from(e)
        })?;
        service.reject(caller, self.id, self.reason.clone()).await
    }
}
