/*!
 * # Validation Engine
 *
 * Produces a structured report of every problem with a proposed mutation.
 * Rules never short-circuit: each violation becomes its own issue so the
 * caller can present all of them at once. Warnings are advisory and never
 * make a report invalid.
 */

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use super::transitions::TransitionGraph;
use crate::auth::{PolicyTable, PurchaseOrderAction, Role};
use crate::commands::purchaseorders::{ItemDraft, ReceiveLine};
use crate::models::{
    ItemCondition, PurchaseOrder, PurchaseOrderStatus, QualityStatus, ReceivingMode,
};

/// Closed set of machine-readable validation codes.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationErrorCode {
    NoItems,
    QuantityZero,
    QuantityNegative,
    QuantityNotInteger,
    QuantityExceedsOrdered,
    UnusuallyLargeQuantity,
    NoQuantitiesSpecified,
    DuplicateLine,
    ItemNotFound,
    UnitCostNegative,
    InvalidStatusTransition,
    StatusAlreadySet,
    TransitionGuardFailed,
    CannotReceiveCancelledOrder,
    AlreadyFullyReceived,
    CannotApproveInStatus,
    CannotCancelInStatus,
    CannotEditInStatus,
    InsufficientPermissions,
    ApprovalLimitExceeded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub severity: Severity,
    pub code: ValidationErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ValidationIssue {
    pub fn error(
        field: impl Into<String>,
        code: ValidationErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: Severity::Error,
            code,
            metadata: None,
        }
    }

    pub fn warning(
        field: impl Into<String>,
        code: ValidationErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(field, code, message)
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Result of validating one proposed change.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn push(&mut self, issue: ValidationIssue) {
        match issue.severity {
            Severity::Error => self.errors.push(issue),
            Severity::Warning | Severity::Info => self.warnings.push(issue),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_code(&self, code: ValidationErrorCode) -> bool {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .any(|issue| issue.code == code)
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self
            .errors
            .iter()
            .map(|issue| format!("{} ({})", issue.message, issue.code))
            .collect();
        write!(f, "{}", messages.join("; "))
    }
}

/// A mutation to be checked against an order.
#[derive(Debug, Clone, Copy)]
pub enum ProposedChange<'a> {
    ReplaceItems(&'a [ItemDraft]),
    /// `None` selects auto mode: everything still pending is received.
    Receive { lines: Option<&'a [ReceiveLine]> },
    ChangeStatus(PurchaseOrderStatus),
    Approve { role: Role, amount: Decimal },
    Cancel,
}

/// A receiving line resolved against the order's items.
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedLine {
    pub item_index: usize,
    pub quantity: i32,
    pub condition: ItemCondition,
    pub quality_status: Option<QualityStatus>,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub serial_numbers: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReceiptPlan {
    pub mode: ReceivingMode,
    pub lines: Vec<PlannedLine>,
}

#[derive(Clone, Debug)]
pub struct ValidationEngine {
    graph: TransitionGraph,
    policy: PolicyTable,
    large_quantity_threshold: i64,
}

impl ValidationEngine {
    pub fn new(policy: PolicyTable, large_quantity_threshold: i64) -> Self {
        Self {
            graph: TransitionGraph,
            policy,
            large_quantity_threshold,
        }
    }

    pub fn validate(&self, order: &PurchaseOrder, change: &ProposedChange<'_>) -> ValidationReport {
        match change {
            ProposedChange::ReplaceItems(drafts) => {
                let mut report = ValidationReport::default();
                if !order.status.is_editable() {
                    report.push(ValidationIssue::error(
                        "status",
                        ValidationErrorCode::CannotEditInStatus,
                        format!("Cannot edit items of a purchase order in status {}", order.status),
                    ));
                }
                report.merge(self.validate_item_set(drafts));
                report
            }
            ProposedChange::Receive { lines } => self.plan_receipt(order, *lines).0,
            ProposedChange::ChangeStatus(target) => self.validate_status_change(order, *target),
            ProposedChange::Approve { role, amount } => self.validate_approval(order, *role, *amount),
            ProposedChange::Cancel => self.validate_cancel(order),
        }
    }

    /// Rules for a fresh or replacement item set.
    pub fn validate_item_set(&self, drafts: &[ItemDraft]) -> ValidationReport {
        let mut report = ValidationReport::default();
        if drafts.is_empty() {
            report.push(ValidationIssue::error(
                "items",
                ValidationErrorCode::NoItems,
                "Purchase order must contain at least one item",
            ));
        }

        for (index, draft) in drafts.iter().enumerate() {
            let field = format!("items[{}].quantity", index);
            if let Some(issue) = quantity_issue(&field, draft.quantity) {
                report.push(issue);
            } else {
                self.warn_if_large(&mut report, &field, draft.quantity);
            }
            if draft.unit_cost.is_sign_negative() && !draft.unit_cost.is_zero() {
                report.push(ValidationIssue::error(
                    format!("items[{}].unit_cost", index),
                    ValidationErrorCode::UnitCostNegative,
                    format!("Unit cost for {} cannot be negative", draft.product_name),
                ));
            }
        }
        report
    }

    fn validate_status_change(
        &self,
        order: &PurchaseOrder,
        target: PurchaseOrderStatus,
    ) -> ValidationReport {
        let mut report = ValidationReport::default();
        if order.status == target {
            report.push(ValidationIssue::error(
                "status",
                ValidationErrorCode::StatusAlreadySet,
                format!("Purchase order is already {}", target),
            ));
            return report;
        }

        match self.graph.edge(order.status, target) {
            None => report.push(
                ValidationIssue::error(
                    "status",
                    ValidationErrorCode::InvalidStatusTransition,
                    format!("Cannot transition from {} to {}", order.status, target),
                )
                .with_metadata(json!({
                    "from": order.status,
                    "to": target,
                    "allowed": self.graph.valid_transitions(order.status),
                })),
            ),
            Some(edge) if !edge.guard.is_satisfied(order) => report.push(
                ValidationIssue::error(
                    "status",
                    ValidationErrorCode::TransitionGuardFailed,
                    format!(
                        "Cannot transition from {} to {}: {}",
                        order.status,
                        target,
                        edge.guard.describe()
                    ),
                )
                .with_metadata(json!({ "guard": edge.guard })),
            ),
            Some(_) => {}
        }
        report
    }

    fn validate_approval(&self, order: &PurchaseOrder, role: Role, amount: Decimal) -> ValidationReport {
        let mut report = ValidationReport::default();
        if !matches!(
            order.status,
            PurchaseOrderStatus::Draft | PurchaseOrderStatus::PendingApproval
        ) {
            report.push(ValidationIssue::error(
                "status",
                ValidationErrorCode::CannotApproveInStatus,
                format!("Cannot approve a purchase order in status {}", order.status),
            ));
        }
        if order.items.is_empty() {
            report.push(ValidationIssue::error(
                "items",
                ValidationErrorCode::NoItems,
                "Purchase order must contain at least one item",
            ));
        }
        if !self.policy.allows(role, PurchaseOrderAction::Approve) {
            report.push(ValidationIssue::error(
                "role",
                ValidationErrorCode::InsufficientPermissions,
                format!("Role {} may not approve purchase orders", role),
            ));
        } else if !self.policy.within_ceiling(role, amount) {
            report.push(
                ValidationIssue::error(
                    "total",
                    ValidationErrorCode::ApprovalLimitExceeded,
                    format!("Approval amount {} exceeds the {} ceiling", amount, role),
                )
                .with_metadata(json!({
                    "amount": amount,
                    "ceiling": self.policy.approval_ceiling(role),
                })),
            );
        }
        report
    }

    fn validate_cancel(&self, order: &PurchaseOrder) -> ValidationReport {
        let mut report = ValidationReport::default();
        match self.graph.edge(order.status, PurchaseOrderStatus::Cancelled) {
            None => report.push(ValidationIssue::error(
                "status",
                ValidationErrorCode::CannotCancelInStatus,
                format!("Cannot cancel a purchase order in status {}", order.status),
            )),
            Some(edge) if !edge.guard.is_satisfied(order) => report.push(ValidationIssue::error(
                "status",
                ValidationErrorCode::TransitionGuardFailed,
                format!("Cannot cancel: {}", edge.guard.describe()),
            )),
            Some(_) => {}
        }
        report
    }

    /// Validates a receipt and resolves its lines against the order.
    ///
    /// The plan is only meaningful when the report is valid. Lines naming the
    /// same item are checked against the remaining quantity in aggregate.
    pub fn plan_receipt(
        &self,
        order: &PurchaseOrder,
        lines: Option<&[ReceiveLine]>,
    ) -> (ValidationReport, ReceiptPlan) {
        let mut report = ValidationReport::default();
        self.check_receivable_status(order, &mut report);

        let plan = match lines {
            None => ReceiptPlan {
                mode: ReceivingMode::Auto,
                lines: self.auto_lines(order, &mut report),
            },
            Some(lines) => ReceiptPlan {
                mode: ReceivingMode::Explicit,
                lines: self.explicit_lines(order, lines, &mut report),
            },
        };
        (report, plan)
    }

    fn check_receivable_status(&self, order: &PurchaseOrder, report: &mut ValidationReport) {
        let status = order.status;
        if matches!(status, PurchaseOrderStatus::Cancelled | PurchaseOrderStatus::Closed) {
            report.push(ValidationIssue::error(
                "status",
                ValidationErrorCode::CannotReceiveCancelledOrder,
                format!("Cannot receive goods against a {} purchase order", status),
            ));
        } else if status == PurchaseOrderStatus::FullyReceived {
            report.push(ValidationIssue::error(
                "status",
                ValidationErrorCode::AlreadyFullyReceived,
                "Purchase order has already been fully received",
            ));
        } else if !status.accepts_receipts() {
            report.push(ValidationIssue::error(
                "status",
                ValidationErrorCode::InvalidStatusTransition,
                format!("Cannot receive goods for a purchase order in status {}", status),
            ));
        }
    }

    fn auto_lines(&self, order: &PurchaseOrder, report: &mut ValidationReport) -> Vec<PlannedLine> {
        let lines: Vec<PlannedLine> = order
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.remaining() > 0)
            .map(|(index, item)| PlannedLine {
                item_index: index,
                quantity: item.remaining(),
                condition: ItemCondition::Good,
                quality_status: None,
                batch_number: None,
                expiry_date: None,
                serial_numbers: Vec::new(),
            })
            .collect();

        if lines.is_empty() && report.is_valid() {
            report.push(ValidationIssue::error(
                "items",
                ValidationErrorCode::AlreadyFullyReceived,
                "Nothing is pending on this purchase order",
            ));
        }
        lines
    }

    fn explicit_lines(
        &self,
        order: &PurchaseOrder,
        lines: &[ReceiveLine],
        report: &mut ValidationReport,
    ) -> Vec<PlannedLine> {
        if lines.is_empty() {
            report.push(ValidationIssue::error(
                "items",
                ValidationErrorCode::NoQuantitiesSpecified,
                "No quantities specified for receiving",
            ));
            return Vec::new();
        }

        let mut planned = Vec::with_capacity(lines.len());
        let mut requested_by_item: HashMap<usize, i64> = HashMap::new();

        for (index, line) in lines.iter().enumerate() {
            let field = format!("items[{}].quantity", index);
            let item_index = resolve_item(order, line.item_id, line.product_id, &requested_by_item);
            if item_index.is_none() {
                report.push(
                    ValidationIssue::error(
                        format!("items[{}]", index),
                        ValidationErrorCode::ItemNotFound,
                        "Receiving line does not match any item on this purchase order",
                    )
                    .with_metadata(json!({
                        "item_id": line.item_id,
                        "product_id": line.product_id,
                    })),
                );
            }

            let quantity = match quantity_issue(&field, line.quantity) {
                Some(issue) => {
                    report.push(issue);
                    None
                }
                None => Some(line.quantity),
            };

            if let (Some(item_index), Some(quantity)) = (item_index, quantity) {
                self.warn_if_large(report, &field, quantity);
                let whole = quantity.to_i64().unwrap_or(i64::MAX);
                let total = requested_by_item.entry(item_index).or_insert(0);
                if *total > 0 {
                    report.push(ValidationIssue::warning(
                        format!("items[{}]", index),
                        ValidationErrorCode::DuplicateLine,
                        format!(
                            "Multiple lines target {}; quantities are combined",
                            order.items[item_index].product_name
                        ),
                    ));
                }
                *total = total.saturating_add(whole);
                planned.push(PlannedLine {
                    item_index,
                    quantity: i32::try_from(whole).unwrap_or(i32::MAX),
                    condition: line.condition.unwrap_or_default(),
                    quality_status: line.quality_status,
                    batch_number: line.batch_number.clone(),
                    expiry_date: line.expiry_date,
                    serial_numbers: line.serial_numbers.clone(),
                });
            }
        }

        let mut over: Vec<(usize, i64)> = requested_by_item
            .into_iter()
            .filter(|(item_index, requested)| *requested > i64::from(order.items[*item_index].remaining()))
            .collect();
        over.sort_unstable();
        for (item_index, requested) in over {
            let item = &order.items[item_index];
            report.push(
                ValidationIssue::error(
                    format!("items[{}]", item_index),
                    ValidationErrorCode::QuantityExceedsOrdered,
                    format!(
                        "Cannot receive {} of {}: only {} remaining",
                        requested,
                        item.product_name,
                        item.remaining()
                    ),
                )
                .with_metadata(json!({
                    "item_id": item.id,
                    "ordered": item.quantity,
                    "previously_received": item.received_quantity,
                    "requested": requested,
                    "max_receivable": item.remaining(),
                })),
            );
        }

        planned
    }

    fn warn_if_large(&self, report: &mut ValidationReport, field: &str, quantity: Decimal) {
        if quantity > Decimal::from(self.large_quantity_threshold) {
            report.push(
                ValidationIssue::warning(
                    field,
                    ValidationErrorCode::UnusuallyLargeQuantity,
                    format!("Quantity {} is unusually large", quantity),
                )
                .with_metadata(json!({ "threshold": self.large_quantity_threshold })),
            );
        }
    }
}

/// Zero, negative and fractional quantities are errors.
fn quantity_issue(field: &str, quantity: Decimal) -> Option<ValidationIssue> {
    if !quantity.fract().is_zero() {
        Some(ValidationIssue::error(
            field,
            ValidationErrorCode::QuantityNotInteger,
            format!("Quantity {} must be a whole number", quantity),
        ))
    } else if quantity.is_zero() {
        Some(ValidationIssue::error(
            field,
            ValidationErrorCode::QuantityZero,
            "Quantity must be greater than zero",
        ))
    } else if quantity.is_sign_negative() {
        Some(ValidationIssue::error(
            field,
            ValidationErrorCode::QuantityNegative,
            format!("Quantity {} cannot be negative", quantity),
        ))
    } else if quantity > Decimal::from(i32::MAX) {
        Some(ValidationIssue::error(
            field,
            ValidationErrorCode::QuantityExceedsOrdered,
            format!("Quantity {} is out of range", quantity),
        ))
    } else {
        None
    }
}

/// An explicit item id wins. A product-only line goes to the first item of
/// that product with units still pending after the lines before it; when
/// every such item is already covered it falls back to the first one, so
/// the over-receipt is reported against it.
fn resolve_item(
    order: &PurchaseOrder,
    item_id: Option<Uuid>,
    product_id: Option<Uuid>,
    requested_by_item: &HashMap<usize, i64>,
) -> Option<usize> {
    if let Some(item_id) = item_id {
        return order.items.iter().position(|item| item.id == item_id);
    }
    let product_id = product_id?;
    let already = |index: usize| requested_by_item.get(&index).copied().unwrap_or(0);
    order
        .items
        .iter()
        .enumerate()
        .position(|(index, item)| {
            item.product_id == product_id && i64::from(item.remaining()) > already(index)
        })
        .or_else(|| order.items.iter().position(|item| item.product_id == product_id))
}
