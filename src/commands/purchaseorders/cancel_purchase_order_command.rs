use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::CallerContext, commands::Command, errors::ServiceError, models::PurchaseOrder,
    services::purchase_orders::PurchaseOrderService,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CancelPurchaseOrderCommand {
    pub id: Uuid,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[async_trait]
impl Command for CancelPurchaseOrderCommand {
    type Result = PurchaseOrder;

    #[instrument(skip(self, service, caller), fields(purchase_order_id = %self.id))]
    async fn execute(
        &self,
        service: &PurchaseOrderService,
        caller: Option<&CallerContext>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()?;
        service.cancel(caller, self.id, self.reason.clone()).await
    }
}
