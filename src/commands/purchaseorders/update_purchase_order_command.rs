use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use super::{validate_non_negative, ItemDraft};
use crate::{
    auth::CallerContext,
    commands::Command,
    errors::ServiceError,
    models::{PurchaseOrder, PurchaseOrderStatus},
    services::purchase_orders::PurchaseOrderService,
};

/// Partial update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdatePurchaseOrderCommand {
    pub supplier_id: Option<Uuid>,
    /// Replaces every line; received counts never carry over.
    pub items: Option<Vec<ItemDraft>>,
    #[validate(custom = "validate_non_negative")]
    pub tax: Option<Decimal>,
    pub expected_date: Option<NaiveDate>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    /// Requested status. Routed through the canonical transition entry point.
    pub status: Option<PurchaseOrderStatus>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    /// When set, the update is refused if the order changed since this version.
    pub expected_version: Option<u64>,
}

impl UpdatePurchaseOrderCommand {
    /// Whether any non-status field is being changed.
    pub fn changes_fields(&self) -> bool {
        self.supplier_id.is_some()
            || self.items.is_some()
            || self.tax.is_some()
            || self.expected_date.is_some()
            || self.notes.is_some()
    }
}

/// An update addressed to a specific order.
#[derive(Debug, Clone)]
pub struct UpdatePurchaseOrder {
    pub id: Uuid,
    pub changes: UpdatePurchaseOrderCommand,
}

#[async_trait]
impl Command for UpdatePurchaseOrder {
    type Result = PurchaseOrder;

    #[instrument(skip(self, service, caller), fields(purchase_order_id = %self.id))]
    async fn execute(
        &self,
        service: &PurchaseOrderService,
        caller: Option<&CallerContext>,
    ) -> Result<Self::Result, ServiceError> {
        self.changes.validate()?;
        for item in self.changes.items.iter().flatten() {
            item.validate()?;
        }
        service
            .update_purchase_order(caller, self.id, self.changes.clone())
            .await
    }
}
