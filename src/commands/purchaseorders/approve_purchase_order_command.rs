use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::CallerContext, commands::Command, errors::ServiceError, models::PurchaseOrder,
    services::purchase_orders::PurchaseOrderService,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ApprovePurchaseOrderCommand {
    pub id: Uuid,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[async_trait]
impl Command for ApprovePurchaseOrderCommand {
    type Result = PurchaseOrder;

    #[instrument(skip(self, service, caller), fields(purchase_order_id = %self.id))]
    async fn execute(
        &self,
        service: &PurchaseOrderService,
        caller: Option<&CallerContext>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()?;

        let order = service.approve(caller, self.id, self.notes.clone()).await?;
        info!(purchase_order_id = %self.id, approver = ?order.approved_by, "Purchase order approved");
        Ok(order)
    }
}
