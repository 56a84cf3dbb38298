//! Append-only records owned by a purchase order.
//!
//! None of these are ever mutated once written; corrections are made by
//! appending a new record.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::purchase_order::{PurchaseOrderStatus, QualityStatus};
use super::stock::StockAdjustment;
use crate::auth::Role;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub id: Uuid,
    pub purchase_order_id: Uuid,
    pub from_status: PurchaseOrderStatus,
    pub to_status: PurchaseOrderStatus,
    pub performed_by: Uuid,
    pub performed_at: DateTime<Utc>,
    pub reason: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl StatusTransition {
    pub fn new(
        purchase_order_id: Uuid,
        from_status: PurchaseOrderStatus,
        to_status: PurchaseOrderStatus,
        performed_by: Uuid,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            purchase_order_id,
            from_status,
            to_status,
            performed_by,
            performed_at: Utc::now(),
            reason,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Physical condition reported for a received line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ItemCondition {
    #[default]
    Good,
    Damaged,
    Defective,
}

/// Whether a receipt named its lines or closed out everything pending.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReceivingMode {
    Explicit,
    Auto,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReceivedLine {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub condition: ItemCondition,
    pub quality_status: Option<QualityStatus>,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub serial_numbers: Vec<String>,
}

/// One goods-receipt event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReceivingRecord {
    pub id: Uuid,
    pub purchase_order_id: Uuid,
    pub received_by: Uuid,
    pub received_at: DateTime<Utc>,
    pub mode: ReceivingMode,
    pub lines: Vec<ReceivedLine>,
    pub total_quantity: i64,
    pub total_value: Decimal,
    pub notes: Option<String>,
    /// Instructions emitted for this receipt.
    pub stock_adjustments: Vec<StockAdjustment>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
    Pending,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: Uuid,
    pub purchase_order_id: Uuid,
    pub approver_id: Uuid,
    pub approver_role: Role,
    pub decision: ApprovalDecision,
    pub decided_at: DateTime<Utc>,
    pub amount: Decimal,
    pub level: u8,
    pub notes: Option<String>,
}
