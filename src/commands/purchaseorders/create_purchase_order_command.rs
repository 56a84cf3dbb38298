use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};
use uuid::Uuid;
use validator::Validate;

use super::validate_non_negative;
use crate::{
    auth::CallerContext, commands::Command, errors::ServiceError, models::PurchaseOrder,
    services::purchase_orders::PurchaseOrderService,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreatePurchaseOrderCommand {
    pub supplier_id: Uuid,
    /// Emptiness is reported by the validation engine alongside item rules.
    #[validate]
    pub items: Vec<ItemDraft>,
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub tax: Decimal,
    pub expected_date: Option<NaiveDate>,
    /// Generated from the configured prefix when absent.
    #[validate(length(min = 1, max = 64))]
    pub po_number: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

/// A proposed order line. Quantities arrive as decimals so that fractional
/// input can be rejected with a precise code rather than a parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ItemDraft {
    pub product_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub product_name: String,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

impl ItemDraft {
    pub fn new(
        product_id: Uuid,
        product_name: impl Into<String>,
        quantity: Decimal,
        unit_cost: Decimal,
    ) -> Self {
        Self {
            product_id,
            product_name: product_name.into(),
            quantity,
            unit_cost,
        }
    }
}

impl CreatePurchaseOrderCommand {
    pub fn new(supplier_id: Uuid, items: Vec<ItemDraft>) -> Self {
        Self {
            supplier_id,
            items,
            tax: Decimal::ZERO,
            expected_date: None,
            po_number: None,
            notes: None,
        }
    }

    pub fn with_tax(mut self, tax: Decimal) -> Self {
        self.tax = tax;
        self
    }
}

#[async_trait]
impl Command for CreatePurchaseOrderCommand {
    type Result = PurchaseOrder;

    #[instrument(skip(self, service, caller), fields(supplier_id = %self.supplier_id))]
    async fn execute(
        &self,
        service: &PurchaseOrderService,
        caller: Option<&CallerContext>,
    ) -> Result<Self::Result, ServiceError> {
        self.validate().map_err(|e| {
            error!("Invalid purchase order: {}", e);
            ServiceError::from(e)
        })?;
        service.create_purchase_order(caller, self.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn shape_checks_reject_negative_tax_and_blank_names() {
        let mut command = CreatePurchaseOrderCommand::new(
            Uuid::new_v4(),
            vec![ItemDraft::new(Uuid::new_v4(), "", dec!(1), dec!(1))],
        )
        .with_tax(dec!(-1));
        let errors = command.validate().unwrap_err();
        let fields = errors.errors();
        assert!(fields.contains_key("tax"));
        assert!(fields.contains_key("items"));

        command.tax = dec!(0);
        command.items[0].product_name = "Hinge".into();
        assert!(command.validate().is_ok());
    }
}
