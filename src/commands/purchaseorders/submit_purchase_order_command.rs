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
pub struct SubmitPurchaseOrderCommand {
    pub id: Uuid,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[async_trait]
impl Command for SubmitPurchaseOrderCommand {
    type Result = PurchaseOrder;

    #[instrument(skip(self, service, caller), fields(purchase_order_id = %self.id))]
    async fn execute(
        &self,
        service: &PurchaseOrderService,
        caller: Option<&CallerContext>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()?;
        service
            .submit_for_approval(caller, self.id, self.notes.clone())
            .await
    }
}
