use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::CallerContext,
    commands::Command,
    errors::ServiceError,
    models::{ItemCondition, QualityStatus},
    services::purchase_orders::{PurchaseOrderService, ReceiveOutcome},
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReceivePurchaseOrderCommand {
    pub id: Uuid,
    /// `None` receives everything still pending.
    pub items: Option<Vec<ReceiveLine>>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

/// One line of a goods receipt. Targets an item by id, or by product when
/// the id is unknown to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ReceiveLine {
    pub item_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub quantity: Decimal,
    #[serde(default)]
    pub condition: Option<ItemCondition>,
    #[serde(default)]
    pub quality_status: Option<QualityStatus>,
    #[validate(length(min = 1, max = 64))]
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub serial_numbers: Vec<String>,
}

impl ReceiveLine {
    pub fn for_item(item_id: Uuid, quantity: Decimal) -> Self {
        Self {
            item_id: Some(item_id),
            product_id: None,
            quantity,
            condition: None,
            quality_status: None,
            batch_number: None,
            expiry_date: None,
            serial_numbers: Vec::new(),
        }
    }

    pub fn for_product(product_id: Uuid, quantity: Decimal) -> Self {
        Self {
            item_id: None,
            product_id: Some(product_id),
            ..Self::for_item(Uuid::nil(), quantity)
        }
    }

    pub fn with_batch(mut self, batch_number: impl Into<String>, expiry_date: Option<NaiveDate>) -> Self {
        self.batch_number = Some(batch_number.into());
        self.expiry_date = expiry_date;
        self
    }

    pub fn with_quality(mut self, condition: ItemCondition, quality_status: QualityStatus) -> Self {
        self.condition = Some(condition);
        self.quality_status = Some(quality_status);
        self
    }
}

#[async_trait]
impl Command for ReceivePurchaseOrderCommand {
    type Result = ReceiveOutcome;

    #[instrument(skip(self, service, caller), fields(purchase_order_id = %self.id))]
    async fn execute(
        &self,
        service: &PurchaseOrderService,
        caller: Option<&CallerContext>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate()?;
        for line in self.items.iter().flatten() {
            line.validate()?;
        }

        let outcome = service
            .receive(caller, self.id, self.items.clone(), self.reason.clone(), self.notes.clone())
            .await?;
        info!(purchase_order_id = %self.id, status = %outcome.order.status, "Purchase order received");
        Ok(outcome)
    }
}
