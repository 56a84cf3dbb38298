use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle status of a purchase order.
///
/// Legacy spellings found in older records (`pending`, `sent`, `ordered`,
/// `partial`, `received`, `canceled`) are accepted on input and never written.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    #[serde(alias = "pending")]
    #[strum(to_string = "pending_approval", serialize = "pending")]
    PendingApproval,
    Approved,
    #[serde(alias = "sent", alias = "ordered")]
    #[strum(to_string = "sent_to_supplier", serialize = "sent", serialize = "ordered")]
    SentToSupplier,
    #[serde(alias = "partial")]
    #[strum(to_string = "partially_received", serialize = "partial")]
    PartiallyReceived,
    #[serde(alias = "received")]
    #[strum(to_string = "fully_received", serialize = "received")]
    FullyReceived,
    #[serde(alias = "canceled")]
    #[strum(to_string = "cancelled", serialize = "canceled")]
    Cancelled,
    Closed,
}

impl PurchaseOrderStatus {
    /// Statuses with no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Closed)
    }

    /// Statuses in which item lines and totals may still be edited.
    pub fn is_editable(self) -> bool {
        matches!(self, Self::Draft | Self::PendingApproval)
    }

    /// Statuses in which goods may be received against the order.
    pub fn accepts_receipts(self) -> bool {
        matches!(
            self,
            Self::Approved | Self::SentToSupplier | Self::PartiallyReceived
        )
    }
}

/// Inspection outcome recorded against a received line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QualityStatus {
    Pending,
    Approved,
    Rejected,
}

/// A single line on a purchase order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrderItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_cost: Decimal,
    pub total: Decimal,
    /// Cumulative units received to date.
    #[serde(default, alias = "receivedQuantity")]
    pub received_quantity: i32,
    #[serde(default)]
    pub pending_quantity: i32,
    /// Older records stored the received count under this name.
    #[serde(
        default,
        rename = "quantity_received",
        skip_serializing_if = "Option::is_none"
    )]
    pub legacy_received_quantity: Option<i32>,
    #[serde(default)]
    pub quality_status: Option<QualityStatus>,
    #[serde(default)]
    pub batch_number: Option<String>,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub serial_numbers: Vec<String>,
}

impl PurchaseOrderItem {
    pub fn new(
        product_id: Uuid,
        product_name: impl Into<String>,
        quantity: i32,
        unit_cost: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            product_name: product_name.into(),
            quantity,
            unit_cost,
            total: unit_cost * Decimal::from(quantity),
            received_quantity: 0,
            pending_quantity: quantity,
            legacy_received_quantity: None,
            quality_status: None,
            batch_number: None,
            expiry_date: None,
            serial_numbers: Vec::new(),
        }
    }

    /// Units that may still be received: `quantity - received_quantity`, never negative.
    pub fn remaining(&self) -> i32 {
        (self.quantity - self.received_quantity).max(0)
    }

    pub fn is_fully_received(&self) -> bool {
        self.received_quantity >= self.quantity
    }

    pub fn recompute_pending(&mut self) {
        self.pending_quantity = self.remaining();
    }

    pub fn recompute_total(&mut self) {
        self.total = self.unit_cost * Decimal::from(self.quantity);
    }

    /// Folds the legacy received field onto `received_quantity` and clears it.
    ///
    /// The larger of the two counts wins so a partially migrated record never
    /// loses receipts.
    pub fn normalize_received_alias(&mut self) {
        if let Some(legacy) = self.legacy_received_quantity.take() {
            self.received_quantity = self.received_quantity.max(legacy);
        }
        self.recompute_pending();
    }
}

/// The purchase order aggregate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: Uuid,
    pub po_number: String,
    pub supplier_id: Uuid,
    pub items: Vec<PurchaseOrderItem>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub status: PurchaseOrderStatus,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub approved_by: Option<Uuid>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expected_date: Option<NaiveDate>,
    #[serde(default)]
    pub received_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Incremented on every committed change; used to reject stale writes.
    #[serde(default)]
    pub version: u64,
}

impl PurchaseOrder {
    /// Creates a draft order and derives its totals from the items.
    pub fn draft(
        po_number: impl Into<String>,
        supplier_id: Uuid,
        items: Vec<PurchaseOrderItem>,
        tax: Decimal,
        created_by: Uuid,
    ) -> Self {
        let now = Utc::now();
        let mut order = Self {
            id: Uuid::new_v4(),
            po_number: po_number.into(),
            supplier_id,
            items,
            subtotal: Decimal::ZERO,
            tax,
            total: Decimal::ZERO,
            status: PurchaseOrderStatus::Draft,
            created_by,
            created_at: now,
            updated_at: now,
            approved_by: None,
            approved_at: None,
            expected_date: None,
            received_date: None,
            notes: None,
            version: 0,
        };
        order.recalculate_totals();
        order
    }

    /// `subtotal = sum(item totals)`, `total = subtotal + tax`.
    pub fn recalculate_totals(&mut self) {
        for item in &mut self.items {
            item.recompute_total();
        }
        self.subtotal = self.items.iter().map(|item| item.total).sum();
        self.total = self.subtotal + self.tax;
    }

    pub fn totals_consistent(&self) -> bool {
        let subtotal: Decimal = self.items.iter().map(|item| item.total).sum();
        subtotal == self.subtotal && self.subtotal + self.tax == self.total
    }

    pub fn has_receipts(&self) -> bool {
        self.items.iter().any(|item| item.received_quantity > 0)
    }

    pub fn all_received(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(PurchaseOrderItem::is_fully_received)
    }

    /// Cumulative received quantity per product.
    pub fn received_by_product(&self) -> HashMap<Uuid, i32> {
        let mut received = HashMap::new();
        for item in &self.items {
            *received.entry(item.product_id).or_insert(0) += item.received_quantity;
        }
        received
    }

    /// Applies alias normalization to every line. Called once when a record
    /// crosses the persistence boundary.
    pub fn normalize_legacy_fields(&mut self) {
        for item in &mut self.items {
            item.normalize_received_alias();
        }
    }
}
