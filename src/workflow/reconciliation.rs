/*!
 * # Receiving Reconciliation
 *
 * Turns a goods receipt into updated item quantities, the derived order
 * status, the status transitions that lead there, a receiving record and one
 * stock-adjustment instruction per item touched. The engine works on a copy
 * of the order and never touches storage or stock; the whole result is
 * committed atomically by the caller, or not at all.
 */

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::transitions::TransitionGraph;
use super::validation::{ValidationEngine, ValidationErrorCode, ValidationIssue, ValidationReport};
use crate::commands::purchaseorders::ReceiveLine;
use crate::models::{
    AdjustmentContext, MovementType, PurchaseOrder, PurchaseOrderItem, PurchaseOrderStatus,
    ReceivedLine, ReceivingRecord, StatusTransition, StockAdjustment,
};

/// Who is receiving, and why.
#[derive(Clone, Debug, Default)]
pub struct ReceivingContext {
    pub user_id: Uuid,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

/// Outcome of a successful reconciliation. Nothing in here is committed yet.
#[derive(Clone, Debug)]
pub struct Reconciliation {
    pub order: PurchaseOrder,
    pub updated_items: Vec<PurchaseOrderItem>,
    pub previous_status: PurchaseOrderStatus,
    pub new_status: PurchaseOrderStatus,
    pub transitions: Vec<StatusTransition>,
    pub record: ReceivingRecord,
    pub stock_adjustments: Vec<StockAdjustment>,
    pub warnings: Vec<ValidationIssue>,
}

#[derive(Clone, Debug)]
pub struct ReconciliationEngine {
    validation: ValidationEngine,
    graph: TransitionGraph,
}

impl ReconciliationEngine {
    pub fn new(validation: ValidationEngine) -> Self {
        Self {
            validation,
            graph: TransitionGraph,
        }
    }

    /// Reconciles one receipt. With `lines == None` every pending unit is received.
    ///
    /// Any invalid line rejects the whole call; no partial application.
    pub fn reconcile(
        &self,
        order: &PurchaseOrder,
        lines: Option<&[ReceiveLine]>,
        context: &ReceivingContext,
    ) -> Result<Reconciliation, ValidationReport> {
        let mut working = order.clone();
        working.normalize_legacy_fields();

        let (report, plan) = self.validation.plan_receipt(&working, lines);
        if !report.is_valid() {
            return Err(report);
        }

        let now = Utc::now();
        let record_id = Uuid::new_v4();
        let previous_status = working.status;

        // Per-item totals for this receipt, in item order.
        let mut received_now: BTreeMap<usize, i32> = BTreeMap::new();
        let mut record_lines = Vec::with_capacity(plan.lines.len());

        for line in &plan.lines {
            let item = &mut working.items[line.item_index];
            item.received_quantity += line.quantity;
            item.recompute_pending();
            if line.quality_status.is_some() {
                item.quality_status = line.quality_status;
            }
            if line.batch_number.is_some() {
                item.batch_number = line.batch_number.clone();
            }
            if line.expiry_date.is_some() {
                item.expiry_date = line.expiry_date;
            }
            item.serial_numbers.extend(line.serial_numbers.iter().cloned());

            *received_now.entry(line.item_index).or_insert(0) += line.quantity;
            record_lines.push(ReceivedLine {
                item_id: item.id,
                product_id: item.product_id,
                quantity: line.quantity,
                condition: line.condition,
                quality_status: line.quality_status,
                batch_number: line.batch_number.clone(),
                expiry_date: line.expiry_date,
                serial_numbers: line.serial_numbers.clone(),
            });
        }

        let stock_adjustments: Vec<StockAdjustment> = received_now
            .iter()
            .map(|(index, quantity)| {
                StockAdjustment::new(
                    working.items[*index].product_id,
                    *quantity,
                    MovementType::PurchaseReceipt,
                    AdjustmentContext {
                        purchase_order_id: Some(working.id),
                        user_id: context.user_id,
                        reason: context.reason.clone(),
                    },
                )
            })
            .collect();

        let new_status = self
            .graph
            .next_logical_status(&working, None)
            .unwrap_or(previous_status);
        let route = self
            .graph
            .receiving_route(previous_status, new_status)
            .ok_or_else(|| unroutable(previous_status, new_status))?;

        let mut transitions = Vec::with_capacity(route.len());
        let mut from = previous_status;
        for to in route {
            transitions.push(
                StatusTransition::new(
                    working.id,
                    from,
                    to,
                    context.user_id,
                    context.reason.clone().or_else(|| Some("Goods received".to_string())),
                )
                .with_metadata(json!({ "receiving_record_id": record_id })),
            );
            from = to;
        }

        working.status = new_status;
        working.updated_at = now;
        if new_status == PurchaseOrderStatus::FullyReceived {
            working.received_date = Some(now);
        }

        let total_value = received_now
            .iter()
            .map(|(index, quantity)| working.items[*index].unit_cost * Decimal::from(*quantity))
            .sum();
        let record = ReceivingRecord {
            id: record_id,
            purchase_order_id: working.id,
            received_by: context.user_id,
            received_at: now,
            mode: plan.mode,
            lines: record_lines,
            total_quantity: received_now.values().map(|qty| i64::from(*qty)).sum(),
            total_value,
            notes: context.notes.clone(),
            stock_adjustments: stock_adjustments.clone(),
        };

        let updated_items = received_now
            .keys()
            .map(|index| working.items[*index].clone())
            .collect();

        Ok(Reconciliation {
            order: working,
            updated_items,
            previous_status,
            new_status,
            transitions,
            record,
            stock_adjustments,
            warnings: report.warnings,
        })
    }
}

fn unroutable(from: PurchaseOrderStatus, to: PurchaseOrderStatus) -> ValidationReport {
    let mut report = ValidationReport::default();
    report.push(ValidationIssue::error(
        "status",
        ValidationErrorCode::InvalidStatusTransition,
        format!("No receiving path from {} to {}", from, to),
    ));
    report
}
