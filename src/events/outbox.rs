//! Stock-adjustment outbox.
//!
//! Instructions are written as `Pending` in the same commit as the receiving
//! record that produced them, then dispatched to the inventory collaborator.
//! Anything not acknowledged stays pending and is retried on the next
//! dispatch, which the receiver deduplicates by instruction id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::events::{Event, EventSender};
use crate::inventory::InventoryGateway;
use crate::models::StockAdjustment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Delivered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub adjustment: StockAdjustment,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    pub fn pending(adjustment: StockAdjustment) -> Self {
        Self {
            adjustment,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            enqueued_at: Utc::now(),
            delivered_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }

    pub fn mark_delivered(&mut self, at: DateTime<Utc>) {
        self.attempts += 1;
        self.status = OutboxStatus::Delivered;
        self.delivered_at = Some(at);
        self.last_error = None;
    }

    pub fn mark_failed(&mut self, error: &str) {
        self.attempts += 1;
        self.last_error = Some(error.to_string());
    }
}

/// Outcome of one dispatch pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub delivered: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
}

impl DispatchReport {
    pub fn undelivered(&self) -> Vec<Uuid> {
        self.failed.iter().map(|(id, _)| *id).collect()
    }
}

/// Hands each instruction to the inventory collaborator. Never fails as a
/// whole; per-instruction failures are collected in the report.
pub async fn dispatch(
    inventory: &dyn InventoryGateway,
    adjustments: &[StockAdjustment],
    sender: Option<&EventSender>,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    for adjustment in adjustments {
        match inventory.adjust_stock(adjustment).await {
            Ok(applied) => {
                report.delivered.push(adjustment.id);
                if applied {
                    if let Some(sender) = sender {
                        sender
                            .send_or_log(Event::StockAdjusted {
                                adjustment_id: adjustment.id,
                                product_id: adjustment.product_id,
                                quantity: adjustment.quantity,
                                direction: adjustment.direction,
                                purchase_order_id: adjustment.context.purchase_order_id,
                            });
                    }
                }
            }
            Err(e) => {
                error!(
                    adjustment_id = %adjustment.id,
                    product_id = %adjustment.product_id,
                    error = %e,
                    "Stock adjustment dispatch failed; left pending"
                );
                report.failed.push((adjustment.id, e.to_string()));
            }
        }
    }

    if !adjustments.is_empty() {
        info!(
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Stock outbox dispatched"
        );
    }
    report
}
