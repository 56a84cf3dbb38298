/*!
 * # Audit / Event Recorder
 *
 * Append-only sink for permission decisions, status transitions, receipts
 * and approvals. Used for display and dispute review; entries are never
 * mutated or removed.
 */

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{DenialCode, PurchaseOrderAction, Role};
use crate::models::{ApprovalRecord, PurchaseOrderStatus, ReceivingRecord, StatusTransition};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    PermissionCheck {
        actor: Option<Uuid>,
        role: Option<Role>,
        action: PurchaseOrderAction,
        purchase_order_id: Option<Uuid>,
        allowed: bool,
        code: Option<DenialCode>,
        reason: String,
    },
    EmergencyOverride {
        actor: Uuid,
        action: PurchaseOrderAction,
        purchase_order_id: Option<Uuid>,
        grant_id: Uuid,
        granted_by: Uuid,
        overridden: DenialCode,
        reason: String,
    },
    EmergencyGrantIssued {
        grant_id: Uuid,
        user_id: Uuid,
        granted_by: Uuid,
        reason: String,
        expires_at: DateTime<Utc>,
    },
    EmergencyGrantRevoked {
        grant_id: Uuid,
        user_id: Uuid,
        revoked_by: Uuid,
    },
    StatusTransition(StatusTransition),
    Receiving {
        purchase_order_id: Uuid,
        receiving_record_id: Uuid,
        received_by: Uuid,
        total_quantity: i64,
        resulting_status: PurchaseOrderStatus,
    },
    Approval(ApprovalRecord),
}

impl AuditEvent {
    pub fn purchase_order_id(&self) -> Option<Uuid> {
        match self {
            AuditEvent::PermissionCheck {
                purchase_order_id, ..
            }
            | AuditEvent::EmergencyOverride {
                purchase_order_id, ..
            } => *purchase_order_id,
            AuditEvent::StatusTransition(transition) => Some(transition.purchase_order_id),
            AuditEvent::Receiving {
                purchase_order_id, ..
            } => Some(*purchase_order_id),
            AuditEvent::Approval(record) => Some(record.purchase_order_id),
            AuditEvent::EmergencyGrantIssued { .. } | AuditEvent::EmergencyGrantRevoked { .. } => {
                None
            }
        }
    }

    pub fn receiving(record: &ReceivingRecord, resulting_status: PurchaseOrderStatus) -> Self {
        AuditEvent::Receiving {
            purchase_order_id: record.purchase_order_id,
            receiving_record_id: record.id,
            received_by: record.received_by,
            total_quantity: record.total_quantity,
            resulting_status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    pub event: AuditEvent,
}

/// A pure sink. Recording never fails the operation being audited.
#[async_trait]
pub trait AuditRecorder: Send + Sync {
    async fn record(&self, event: AuditEvent);

    /// Entries that reference the given purchase order, oldest first.
    async fn entries_for(&self, purchase_order_id: Uuid) -> Vec<AuditEntry>;
}

/// In-process audit log that also mirrors every entry to `tracing`.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl AuditRecorder for InMemoryAuditLog {
    async fn record(&self, event: AuditEvent) {
        match &event {
            AuditEvent::PermissionCheck {
                actor,
                action,
                allowed: false,
                code,
                reason,
                ..
            } => warn!(actor = ?actor, action = %action, code = ?code, reason = %reason, "Permission denied"),
            AuditEvent::EmergencyOverride {
                actor,
                action,
                grant_id,
                ..
            } => warn!(actor = %actor, action = %action, grant_id = %grant_id, "Emergency override used"),
            AuditEvent::EmergencyGrantIssued {
                grant_id,
                user_id,
                granted_by,
                ..
            } => warn!(grant_id = %grant_id, user_id = %user_id, granted_by = %granted_by, "Emergency grant issued"),
            AuditEvent::EmergencyGrantRevoked {
                grant_id,
                user_id,
                revoked_by,
            } => warn!(grant_id = %grant_id, user_id = %user_id, revoked_by = %revoked_by, "Emergency grant revoked"),
            _ => info!(purchase_order_id = ?event.purchase_order_id(), "Audit entry recorded"),
        }

        let mut entries = self.entries.write().await;
        let sequence = entries.len() as u64 + 1;
        entries.push(AuditEntry {
            id: Uuid::new_v4(),
            sequence,
            recorded_at: Utc::now(),
            event,
        });
    }

    async fn entries_for(&self, purchase_order_id: Uuid) -> Vec<AuditEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|entry| entry.event.purchase_order_id() == Some(purchase_order_id))
            .cloned()
            .collect()
    }
}
