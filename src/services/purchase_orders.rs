/*!
 * # Purchase Order Service
 *
 * The single entry point for every purchase-order operation. Each mutating
 * call follows the same sequence:
 *
 * 1. acquire the per-order lock (bounded wait)
 * 2. load the committed order
 * 3. pass the permission gate
 * 4. validate the change and compute the new state
 * 5. commit order, transitions and records as one unit
 * 6. audit, dispatch stock instructions and emit events
 *
 * Status changes requested through `transition_to` or a partial update are
 * routed to the matching lifecycle operation, so there is exactly one path
 * into each status.
 */

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditEvent, AuditRecorder, InMemoryAuditLog};
use crate::auth::{
    CallerContext, DenialCode, EmergencyAccessRegistry, EmergencyGrant, PermissionDenial,
    PermissionGate, PurchaseOrderAction,
};
use crate::commands::purchaseorders::{
    CreatePurchaseOrderCommand, ItemDraft, ReceiveLine, UpdatePurchaseOrderCommand,
};
use crate::commands::Command;
use crate::concurrency::{LockKey, LockManager, LockSet};
use crate::config::EngineConfig;
use crate::errors::ServiceError;
use crate::events::outbox::{self, DispatchReport};
use crate::events::{Event, EventSender};
use crate::inventory::{InMemoryInventory, InventoryGateway};
use crate::models::{
    ApprovalDecision, ApprovalRecord, PurchaseOrder, PurchaseOrderItem, PurchaseOrderStatus,
    ReceivingRecord, StatusTransition,
};
use crate::repositories::{InMemoryPurchaseOrderRepository, OrderCommit, PurchaseOrderRepository};
use crate::workflow::{
    ProposedChange, Reconciliation, ReconciliationEngine, ReceivingContext, TransitionGraph,
    ValidationEngine, ValidationErrorCode, ValidationIssue, ValidationReport,
};

/// Result of a committed goods receipt.
#[derive(Debug, Clone)]
pub struct ReceiveOutcome {
    pub order: PurchaseOrder,
    pub record: ReceivingRecord,
    pub transitions: Vec<StatusTransition>,
    pub warnings: Vec<ValidationIssue>,
    /// Stock instructions the inventory collaborator did not acknowledge.
    /// They remain pending and are retried by `redeliver_stock_adjustments`.
    pub undelivered_stock_adjustments: Vec<Uuid>,
}

/// Collaborators created by [`PurchaseOrderService::in_memory`].
pub struct InMemoryHandles {
    pub repository: Arc<InMemoryPurchaseOrderRepository>,
    pub inventory: Arc<InMemoryInventory>,
    pub audit: Arc<InMemoryAuditLog>,
    pub emergency: EmergencyAccessRegistry,
    pub events: mpsc::Receiver<Event>,
}

/// Service for the purchase order lifecycle and receiving
#[derive(Clone)]
pub struct PurchaseOrderService {
    repository: Arc<dyn PurchaseOrderRepository>,
    inventory: Arc<dyn InventoryGateway>,
    audit: Arc<dyn AuditRecorder>,
    gate: Arc<PermissionGate>,
    emergency: EmergencyAccessRegistry,
    validation: ValidationEngine,
    reconciliation: ReconciliationEngine,
    graph: TransitionGraph,
    locks: Arc<LockManager>,
    event_sender: EventSender,
    config: EngineConfig,
}

impl PurchaseOrderService {
    /// Creates a new purchase order service instance
    pub fn new(
        config: EngineConfig,
        repository: Arc<dyn PurchaseOrderRepository>,
        inventory: Arc<dyn InventoryGateway>,
        audit: Arc<dyn AuditRecorder>,
        emergency: EmergencyAccessRegistry,
        event_sender: EventSender,
    ) -> Self {
        let policy = config.policy_table();
        let validation =
            ValidationEngine::new(policy.clone(), config.large_quantity_warning_threshold);
        Self {
            repository,
            inventory,
            gate: Arc::new(PermissionGate::new(policy, audit.clone(), emergency.clone())),
            emergency,
            audit,
            reconciliation: ReconciliationEngine::new(validation.clone()),
            validation,
            graph: TransitionGraph,
            locks: Arc::new(LockManager::new()),
            event_sender,
            config,
        }
    }

    /// Wires the service to process-local collaborators.
    pub fn in_memory(config: EngineConfig) -> (Self, InMemoryHandles) {
        let repository = Arc::new(InMemoryPurchaseOrderRepository::new());
        let inventory = Arc::new(InMemoryInventory::new(config.lock_timeout()));
        let audit = Arc::new(InMemoryAuditLog::new());
        let emergency = EmergencyAccessRegistry::new();
        let (event_sender, events) = EventSender::channel(config.event_channel_capacity);

        let service = Self::new(
            config,
            repository.clone(),
            inventory.clone(),
            audit.clone(),
            emergency.clone(),
            event_sender,
        );
        let handles = InMemoryHandles {
            repository,
            inventory,
            audit,
            emergency,
            events,
        };
        (service, handles)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs a command against this service.
    pub async fn execute<C: Command>(
        &self,
        command: &C,
        caller: Option<&CallerContext>,
    ) -> Result<C::Result, ServiceError> {
        command.execute(self, caller).await
    }

    /// Creates a new draft purchase order
    #[instrument(skip(self, caller, command), fields(supplier_id = %command.supplier_id))]
    pub async fn create_purchase_order(
        &self,
        caller: Option<&CallerContext>,
        command: CreatePurchaseOrderCommand,
    ) -> Result<PurchaseOrder, ServiceError> {
        self.gate
            .check(caller, PurchaseOrderAction::Create, None, None)
            .await?;
        let actor = require_actor(caller)?;

        if command.tax.is_sign_negative() && !command.tax.is_zero() {
            return Err(ServiceError::InvalidInput("Tax cannot be negative".into()));
        }
        let report = self.validation.validate_item_set(&command.items);
        let items = self.build_items(&command.items, report)?;

        let po_number = match command.po_number {
            Some(number) => number,
            None => {
                let sequence = self
                    .persist(caller, "allocate po number", self.repository.next_po_sequence())
                    .await?;
                format!("{}-{:06}", self.config.po_number_prefix, sequence)
            }
        };

        let mut order = PurchaseOrder::draft(
            po_number,
            command.supplier_id,
            items,
            command.tax,
            actor.user_id,
        );
        order.expected_date = command.expected_date;
        order.notes = command.notes;

        let order = self
            .persist(caller, "insert purchase order", self.repository.insert_order(order))
            .await?;

        info!(
            purchase_order_id = %order.id,
            po_number = %order.po_number,
            total = %order.total,
            "Purchase order created"
        );
        self.event_sender
            .send_or_log(Event::PurchaseOrderCreated {
                purchase_order_id: order.id,
                po_number: order.po_number.clone(),
                total: order.total,
            });
        Ok(order)
    }

    /// Applies a partial update. Field changes and a requested status commit
    /// together: the status is routed through the matching lifecycle
    /// operation with the edited order, so either everything is written or
    /// nothing is.
    #[instrument(skip(self, caller, changes), fields(purchase_order_id = %id))]
    pub async fn update_purchase_order(
        &self,
        caller: Option<&CallerContext>,
        id: Uuid,
        changes: UpdatePurchaseOrderCommand,
    ) -> Result<PurchaseOrder, ServiceError> {
        let edits_fields = changes.changes_fields();
        let action = if edits_fields {
            PurchaseOrderAction::Edit
        } else {
            PurchaseOrderAction::View
        };
        self.gate.authenticate(caller, action, id).await?;
        let _lock = self.lock_order(caller, id).await?;
        let order = self.load(caller, id).await?;
        self.gate.check(caller, action, Some(&order), None).await?;

        if let Some(expected) = changes.expected_version {
            if expected != order.version {
                warn!(
                    purchase_order_id = %id,
                    expected,
                    actual = order.version,
                    "Update against a stale version"
                );
                return Err(ServiceError::ConcurrentModification(id));
            }
        }

        let edited = if edits_fields {
            self.apply_field_changes(&order, &changes)?
        } else {
            order.clone()
        };

        let stored = match changes.status {
            Some(target) => {
                self.transition_locked(caller, edited, target, changes.reason)
                    .await?
            }
            None if edits_fields => {
                self.persist(
                    caller,
                    "commit purchase order update",
                    self.repository.commit(OrderCommit::new(edited, order.version)),
                )
                .await?
            }
            None => return Ok(order),
        };

        if edits_fields {
            info!(purchase_order_id = %stored.id, total = %stored.total, "Purchase order updated");
            self.event_sender
                .send_or_log(Event::PurchaseOrderUpdated(stored.id));
        }
        Ok(stored)
    }

    /// The order with `changes` applied. Nothing is written.
    fn apply_field_changes(
        &self,
        order: &PurchaseOrder,
        changes: &UpdatePurchaseOrderCommand,
    ) -> Result<PurchaseOrder, ServiceError> {
        let mut updated = order.clone();
        if let Some(drafts) = &changes.items {
            let report = self
                .validation
                .validate(order, &ProposedChange::ReplaceItems(drafts));
            updated.items = self.build_items(drafts, report)?;
        }
        if let Some(tax) = changes.tax {
            if tax.is_sign_negative() && !tax.is_zero() {
                return Err(ServiceError::InvalidInput("Tax cannot be negative".into()));
            }
            updated.tax = tax;
        }
        if let Some(supplier_id) = changes.supplier_id {
            updated.supplier_id = supplier_id;
        }
        if changes.expected_date.is_some() {
            updated.expected_date = changes.expected_date;
        }
        if changes.notes.is_some() {
            updated.notes = changes.notes.clone();
        }
        updated.recalculate_totals();
        updated.updated_at = Utc::now();
        Ok(updated)
    }

    /// Canonical status entry point. Every requested status change is
    /// dispatched to the one operation that owns it.
    #[instrument(skip(self, caller, reason), fields(purchase_order_id = %id, target_status = %target))]
    pub async fn transition_to(
        &self,
        caller: Option<&CallerContext>,
        id: Uuid,
        target: PurchaseOrderStatus,
        reason: Option<String>,
    ) -> Result<PurchaseOrder, ServiceError> {
        self.gate
            .authenticate(caller, action_for_status(target), id)
            .await?;
        let _lock = self.lock_order(caller, id).await?;
        let order = self.load(caller, id).await?;
        self.transition_locked(caller, order, target, reason).await
    }

    async fn transition_locked(
        &self,
        caller: Option<&CallerContext>,
        order: PurchaseOrder,
        target: PurchaseOrderStatus,
        reason: Option<String>,
    ) -> Result<PurchaseOrder, ServiceError> {
        use PurchaseOrderStatus::*;

        if order.status == target {
            let mut report = ValidationReport::default();
            report.push(ValidationIssue::error(
                "status",
                ValidationErrorCode::StatusAlreadySet,
                format!("Purchase order is already {}", target),
            ));
            return Err(report.into());
        }

        match target {
            PendingApproval => self.submit_locked(caller, order, reason).await,
            Approved => self.approve_locked(caller, order, reason).await,
            SentToSupplier => self.send_locked(caller, order, reason).await,
            Cancelled => self.cancel_locked(caller, order, reason).await,
            Closed => self.close_locked(caller, order, reason).await,
            Draft => {
                let reason = reason.unwrap_or_else(|| "Returned to draft".to_string());
                self.reject_locked(caller, order, reason).await
            }
            PartiallyReceived | FullyReceived => {
                let mut report = ValidationReport::default();
                report.push(ValidationIssue::error(
                    "status",
                    ValidationErrorCode::InvalidStatusTransition,
                    format!("{} is set only by recording a goods receipt", target),
                ));
                Err(report.into())
            }
        }
    }

    /// draft -> pending_approval
    #[instrument(skip(self, caller, notes), fields(purchase_order_id = %id))]
    pub async fn submit_for_approval(
        &self,
        caller: Option<&CallerContext>,
        id: Uuid,
        notes: Option<String>,
    ) -> Result<PurchaseOrder, ServiceError> {
        self.gate.authenticate(caller, PurchaseOrderAction::Submit, id).await?;
        let _lock = self.lock_order(caller, id).await?;
        let order = self.load(caller, id).await?;
        self.submit_locked(caller, order, notes).await
    }

    async fn submit_locked(
        &self,
        caller: Option<&CallerContext>,
        order: PurchaseOrder,
        notes: Option<String>,
    ) -> Result<PurchaseOrder, ServiceError> {
        self.gate
            .check(caller, PurchaseOrderAction::Submit, Some(&order), None)
            .await?;
        let actor = require_actor(caller)?;
        ensure_valid(self.validation.validate(
            &order,
            &ProposedChange::ChangeStatus(PurchaseOrderStatus::PendingApproval),
        ))?;

        let version = order.version;
        let (order, _) = self
            .commit_route(
                caller,
                actor,
                order,
                version,
                &[PurchaseOrderStatus::PendingApproval],
                notes,
                None,
            )
            .await?;
        info!(purchase_order_id = %order.id, "Purchase order submitted for approval");
        self.event_sender
            .send_or_log(Event::PurchaseOrderSubmitted(order.id));
        Ok(order)
    }

    /// Approves an order from `draft` or `pending_approval`. From `draft`
    /// both hops are recorded.
    #[instrument(skip(self, caller, notes), fields(purchase_order_id = %id))]
    pub async fn approve(
        &self,
        caller: Option<&CallerContext>,
        id: Uuid,
        notes: Option<String>,
    ) -> Result<PurchaseOrder, ServiceError> {
        self.gate.authenticate(caller, PurchaseOrderAction::Approve, id).await?;
        let _lock = self.lock_order(caller, id).await?;
        let order = self.load(caller, id).await?;
        self.approve_locked(caller, order, notes).await
    }

    async fn approve_locked(
        &self,
        caller: Option<&CallerContext>,
        order: PurchaseOrder,
        notes: Option<String>,
    ) -> Result<PurchaseOrder, ServiceError> {
        let authorization = self
            .gate
            .check(caller, PurchaseOrderAction::Approve, Some(&order), None)
            .await?;
        let actor = require_actor(caller)?;

        let mut report = self.validation.validate(
            &order,
            &ProposedChange::Approve {
                role: actor.role,
                amount: order.total,
            },
        );
        if authorization.is_emergency() {
            report.errors.retain(|issue| {
                !matches!(
                    issue.code,
                    ValidationErrorCode::ApprovalLimitExceeded
                        | ValidationErrorCode::InsufficientPermissions
                )
            });
        }
        let route = self.guarded_route(&order, PurchaseOrderStatus::Approved, &mut report);
        ensure_valid(report)?;

        let now = Utc::now();
        let approval = ApprovalRecord {
            id: Uuid::new_v4(),
            purchase_order_id: order.id,
            approver_id: actor.user_id,
            approver_role: actor.role,
            decision: ApprovalDecision::Approved,
            decided_at: now,
            amount: order.total,
            level: self.gate.policy().approval_level(actor.role),
            notes: notes.clone(),
        };

        let version = order.version;
        let mut updated = order;
        updated.approved_by = Some(actor.user_id);
        updated.approved_at = Some(now);

        let (order, _) = self
            .commit_route(caller, actor, updated, version, &route, notes, Some(approval))
            .await?;

        info!(
            purchase_order_id = %order.id,
            approver_id = %actor.user_id,
            amount = %order.total,
            emergency = authorization.is_emergency(),
            "Purchase order approved"
        );
        self.event_sender
            .send_or_log(Event::PurchaseOrderApproved {
                purchase_order_id: order.id,
                approver_id: actor.user_id,
                amount: order.total,
            });
        Ok(order)
    }

    /// pending_approval -> draft, recording a rejected approval decision.
    #[instrument(skip(self, caller, reason), fields(purchase_order_id = %id))]
    pub async fn reject(
        &self,
        caller: Option<&CallerContext>,
        id: Uuid,
        reason: String,
    ) -> Result<PurchaseOrder, ServiceError> {
        self.gate.authenticate(caller, PurchaseOrderAction::Approve, id).await?;
        let _lock = self.lock_order(caller, id).await?;
        let order = self.load(caller, id).await?;
        self.reject_locked(caller, order, reason).await
    }

    async fn reject_locked(
        &self,
        caller: Option<&CallerContext>,
        order: PurchaseOrder,
        reason: String,
    ) -> Result<PurchaseOrder, ServiceError> {
        if reason.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "A reason is required to reject a purchase order".into(),
            ));
        }
        // Any approver may send an order back, whatever its total.
        self.gate
            .check(
                caller,
                PurchaseOrderAction::Approve,
                Some(&order),
                Some(Decimal::ZERO),
            )
            .await?;
        let actor = require_actor(caller)?;
        ensure_valid(
            self.validation
                .validate(&order, &ProposedChange::ChangeStatus(PurchaseOrderStatus::Draft)),
        )?;

        let approval = ApprovalRecord {
            id: Uuid::new_v4(),
            purchase_order_id: order.id,
            approver_id: actor.user_id,
            approver_role: actor.role,
            decision: ApprovalDecision::Rejected,
            decided_at: Utc::now(),
            amount: order.total,
            level: self.gate.policy().approval_level(actor.role),
            notes: Some(reason.clone()),
        };

        let version = order.version;
        let (order, _) = self
            .commit_route(
                caller,
                actor,
                order,
                version,
                &[PurchaseOrderStatus::Draft],
                Some(reason.clone()),
                Some(approval),
            )
            .await?;

        info!(purchase_order_id = %order.id, reason = %reason, "Purchase order rejected");
        self.event_sender
            .send_or_log(Event::PurchaseOrderRejected {
                purchase_order_id: order.id,
                reason,
            });
        Ok(order)
    }

    /// approved -> sent_to_supplier
    #[instrument(skip(self, caller, notes), fields(purchase_order_id = %id))]
    pub async fn send_to_supplier(
        &self,
        caller: Option<&CallerContext>,
        id: Uuid,
        notes: Option<String>,
    ) -> Result<PurchaseOrder, ServiceError> {
        self.gate.authenticate(caller, PurchaseOrderAction::SendToSupplier, id).await?;
        let _lock = self.lock_order(caller, id).await?;
        let order = self.load(caller, id).await?;
        self.send_locked(caller, order, notes).await
    }

    async fn send_locked(
        &self,
        caller: Option<&CallerContext>,
        order: PurchaseOrder,
        notes: Option<String>,
    ) -> Result<PurchaseOrder, ServiceError> {
        self.gate
            .check(caller, PurchaseOrderAction::SendToSupplier, Some(&order), None)
            .await?;
        let actor = require_actor(caller)?;
        ensure_valid(self.validation.validate(
            &order,
            &ProposedChange::ChangeStatus(PurchaseOrderStatus::SentToSupplier),
        ))?;

        let version = order.version;
        let (order, _) = self
            .commit_route(
                caller,
                actor,
                order,
                version,
                &[PurchaseOrderStatus::SentToSupplier],
                notes,
                None,
            )
            .await?;
        info!(purchase_order_id = %order.id, supplier_id = %order.supplier_id, "Purchase order sent to supplier");
        self.event_sender
            .send_or_log(Event::PurchaseOrderSentToSupplier(order.id));
        Ok(order)
    }

    /// Records a goods receipt. With `items == None` every pending unit is
    /// received.
    ///
    /// Item deltas, status transitions and the receiving record commit as one
    /// unit. Stock instructions are dispatched only after that commit; any
    /// the inventory collaborator rejects stay pending in the outbox.
    #[instrument(skip(self, caller, items, reason, notes), fields(purchase_order_id = %id))]
    pub async fn receive(
        &self,
        caller: Option<&CallerContext>,
        id: Uuid,
        items: Option<Vec<ReceiveLine>>,
        reason: Option<String>,
        notes: Option<String>,
    ) -> Result<ReceiveOutcome, ServiceError> {
        self.gate.authenticate(caller, PurchaseOrderAction::Receive, id).await?;
        let _lock = self.lock_order(caller, id).await?;
        let order = self.load(caller, id).await?;
        self.gate
            .check(caller, PurchaseOrderAction::Receive, Some(&order), None)
            .await?;
        let actor = require_actor(caller)?;

        let context = ReceivingContext {
            user_id: actor.user_id,
            reason,
            notes,
        };
        let Reconciliation {
            order: reconciled,
            previous_status,
            new_status,
            transitions,
            record,
            stock_adjustments,
            warnings,
            ..
        } = self
            .reconciliation
            .reconcile(&order, items.as_deref(), &context)
            .map_err(|report| {
                warn!(purchase_order_id = %id, errors = %report, "Receipt rejected");
                ServiceError::ValidationFailed(report)
            })?;

        let commit = OrderCommit::new(reconciled, order.version)
            .with_transitions(transitions.clone())
            .with_receiving_record(record.clone());
        let stored = self
            .persist(caller, "commit goods receipt", self.repository.commit(commit))
            .await?;

        for transition in &transitions {
            self.audit
                .record(AuditEvent::StatusTransition(transition.clone()))
                .await;
        }
        self.audit
            .record(AuditEvent::receiving(&record, stored.status))
            .await;

        let report = self.dispatch_stock(id, &stock_adjustments).await;

        info!(
            purchase_order_id = %id,
            receiving_record_id = %record.id,
            quantity = record.total_quantity,
            from_status = %previous_status,
            status = %new_status,
            undelivered = report.failed.len(),
            "Goods receipt committed"
        );
        self.event_sender
            .send_or_log(Event::PurchaseOrderReceived {
                purchase_order_id: id,
                receiving_record_id: record.id,
                quantity: record.total_quantity,
                status: stored.status,
            });

        Ok(ReceiveOutcome {
            order: stored,
            record,
            transitions,
            warnings,
            undelivered_stock_adjustments: report.undelivered(),
        })
    }

    /// Re-sends every stock instruction still pending for the order.
    /// Instructions already applied downstream are acknowledged without
    /// changing stock again.
    #[instrument(skip(self, caller), fields(purchase_order_id = %id))]
    pub async fn redeliver_stock_adjustments(
        &self,
        caller: Option<&CallerContext>,
        id: Uuid,
    ) -> Result<DispatchReport, ServiceError> {
        self.gate.authenticate(caller, PurchaseOrderAction::Receive, id).await?;
        let _lock = self.lock_order(caller, id).await?;
        let order = self.load(caller, id).await?;
        self.gate
            .check(caller, PurchaseOrderAction::Receive, Some(&order), None)
            .await?;

        let pending = self
            .persist(
                caller,
                "load pending stock adjustments",
                self.repository.pending_stock_adjustments(id),
            )
            .await?;
        if pending.is_empty() {
            return Ok(DispatchReport::default());
        }
        Ok(self.dispatch_stock(id, &pending).await)
    }

    /// Cancels an order on which nothing has been received.
    #[instrument(skip(self, caller, reason), fields(purchase_order_id = %id))]
    pub async fn cancel(
        &self,
        caller: Option<&CallerContext>,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<PurchaseOrder, ServiceError> {
        self.gate.authenticate(caller, PurchaseOrderAction::Cancel, id).await?;
        let _lock = self.lock_order(caller, id).await?;
        let order = self.load(caller, id).await?;
        self.cancel_locked(caller, order, reason).await
    }

    async fn cancel_locked(
        &self,
        caller: Option<&CallerContext>,
        order: PurchaseOrder,
        reason: Option<String>,
    ) -> Result<PurchaseOrder, ServiceError> {
        self.gate
            .check(caller, PurchaseOrderAction::Cancel, Some(&order), None)
            .await?;
        let actor = require_actor(caller)?;
        ensure_valid(self.validation.validate(&order, &ProposedChange::Cancel))?;

        let version = order.version;
        let (order, _) = self
            .commit_route(
                caller,
                actor,
                order,
                version,
                &[PurchaseOrderStatus::Cancelled],
                reason.clone(),
                None,
            )
            .await?;
        info!(purchase_order_id = %order.id, reason = ?reason, "Purchase order cancelled");
        self.event_sender
            .send_or_log(Event::PurchaseOrderCancelled {
                purchase_order_id: order.id,
                reason,
            });
        Ok(order)
    }

    /// fully_received -> closed
    #[instrument(skip(self, caller, notes), fields(purchase_order_id = %id))]
    pub async fn close(
        &self,
        caller: Option<&CallerContext>,
        id: Uuid,
        notes: Option<String>,
    ) -> Result<PurchaseOrder, ServiceError> {
        self.gate.authenticate(caller, PurchaseOrderAction::Close, id).await?;
        let _lock = self.lock_order(caller, id).await?;
        let order = self.load(caller, id).await?;
        self.close_locked(caller, order, notes).await
    }

    async fn close_locked(
        &self,
        caller: Option<&CallerContext>,
        order: PurchaseOrder,
        notes: Option<String>,
    ) -> Result<PurchaseOrder, ServiceError> {
        self.gate
            .check(caller, PurchaseOrderAction::Close, Some(&order), None)
            .await?;
        let actor = require_actor(caller)?;
        ensure_valid(self.validation.validate(
            &order,
            &ProposedChange::ChangeStatus(PurchaseOrderStatus::Closed),
        ))?;

        let version = order.version;
        let (order, _) = self
            .commit_route(
                caller,
                actor,
                order,
                version,
                &[PurchaseOrderStatus::Closed],
                notes,
                None,
            )
            .await?;
        info!(purchase_order_id = %order.id, "Purchase order closed");
        self.event_sender
            .send_or_log(Event::PurchaseOrderClosed(order.id));
        Ok(order)
    }

    /// Gets a purchase order by ID
    #[instrument(skip(self, caller), fields(purchase_order_id = %id))]
    pub async fn get_purchase_order(
        &self,
        caller: Option<&CallerContext>,
        id: Uuid,
    ) -> Result<PurchaseOrder, ServiceError> {
        self.gate.authenticate(caller, PurchaseOrderAction::View, id).await?;
        let order = self.load(caller, id).await?;
        self.gate
            .check(caller, PurchaseOrderAction::View, Some(&order), None)
            .await?;
        Ok(order)
    }

    #[instrument(skip(self, caller), fields(purchase_order_id = %id))]
    pub async fn status_history(
        &self,
        caller: Option<&CallerContext>,
        id: Uuid,
    ) -> Result<Vec<StatusTransition>, ServiceError> {
        self.gate.authenticate(caller, PurchaseOrderAction::ViewHistory, id).await?;
        let order = self.load(caller, id).await?;
        self.gate
            .with_permission(
                caller,
                PurchaseOrderAction::ViewHistory,
                Some(&order),
                None,
                |_| self.repository.status_history(id),
            )
            .await
    }

    #[instrument(skip(self, caller), fields(purchase_order_id = %id))]
    pub async fn receiving_history(
        &self,
        caller: Option<&CallerContext>,
        id: Uuid,
    ) -> Result<Vec<ReceivingRecord>, ServiceError> {
        self.gate.authenticate(caller, PurchaseOrderAction::ViewHistory, id).await?;
        let order = self.load(caller, id).await?;
        self.gate
            .with_permission(
                caller,
                PurchaseOrderAction::ViewHistory,
                Some(&order),
                None,
                |_| self.repository.receiving_history(id),
            )
            .await
    }

    #[instrument(skip(self, caller), fields(purchase_order_id = %id))]
    pub async fn approval_history(
        &self,
        caller: Option<&CallerContext>,
        id: Uuid,
    ) -> Result<Vec<ApprovalRecord>, ServiceError> {
        self.gate.authenticate(caller, PurchaseOrderAction::ViewHistory, id).await?;
        let order = self.load(caller, id).await?;
        self.gate
            .with_permission(
                caller,
                PurchaseOrderAction::ViewHistory,
                Some(&order),
                None,
                |_| self.repository.approval_history(id),
            )
            .await
    }

    /// Every audit entry recorded against the order, oldest first.
    #[instrument(skip(self, caller), fields(purchase_order_id = %id))]
    pub async fn audit_trail(
        &self,
        caller: Option<&CallerContext>,
        id: Uuid,
    ) -> Result<Vec<AuditEntry>, ServiceError> {
        self.gate.authenticate(caller, PurchaseOrderAction::ViewAuditTrail, id).await?;
        let order = self.load(caller, id).await?;
        self.gate
            .check(caller, PurchaseOrderAction::ViewAuditTrail, Some(&order), None)
            .await?;
        Ok(self.audit.entries_for(id).await)
    }

    /// Issues time-boxed emergency access to `user_id` and records it in the audit log.
    #[instrument(skip(self, caller, reason), fields(user_id = %user_id))]
    pub async fn grant_emergency_access(
        &self,
        caller: Option<&CallerContext>,
        user_id: Uuid,
        reason: &str,
        ttl: ChronoDuration,
    ) -> Result<EmergencyGrant, ServiceError> {
        let issuer = caller.ok_or_else(|| {
            PermissionDenial::new(
                DenialCode::AuthenticationRequired,
                "Emergency access can only be issued by an authenticated administrator",
            )
        })?;
        let grant = self.emergency.grant(issuer, user_id, reason, ttl)?;
        self.audit
            .record(AuditEvent::EmergencyGrantIssued {
                grant_id: grant.id,
                user_id,
                granted_by: issuer.user_id,
                reason: grant.reason.clone(),
                expires_at: grant.expires_at,
            })
            .await;
        Ok(grant)
    }

    /// Revokes the user's emergency grant, if any. Only a revocation that
    /// removed something is written to the audit log.
    #[instrument(skip(self, caller), fields(user_id = %user_id))]
    pub async fn revoke_emergency_access(
        &self,
        caller: Option<&CallerContext>,
        user_id: Uuid,
    ) -> Result<Option<EmergencyGrant>, ServiceError> {
        let issuer = caller.ok_or_else(|| {
            PermissionDenial::new(
                DenialCode::AuthenticationRequired,
                "Emergency access can only be revoked by an authenticated administrator",
            )
        })?;
        let revoked = self.emergency.revoke(issuer, user_id)?;
        if let Some(grant) = &revoked {
            self.audit
                .record(AuditEvent::EmergencyGrantRevoked {
                    grant_id: grant.id,
                    user_id,
                    revoked_by: issuer.user_id,
                })
                .await;
        }
        Ok(revoked)
    }

    pub fn get_valid_transitions(&self, status: PurchaseOrderStatus) -> BTreeSet<PurchaseOrderStatus> {
        self.graph.valid_transitions(status)
    }

    /// Which user-facing actions the caller may perform on `order`.
    pub fn get_user_actions(
        &self,
        caller: Option<&CallerContext>,
        order: &PurchaseOrder,
    ) -> Vec<PurchaseOrderAction> {
        self.gate.allowed_actions(caller, order)
    }

    /// Suggested status for the order as it stands.
    pub fn next_logical_status(&self, order: &PurchaseOrder) -> Option<PurchaseOrderStatus> {
        self.graph.next_logical_status(order, None)
    }

    fn build_items(
        &self,
        drafts: &[ItemDraft],
        report: ValidationReport,
    ) -> Result<Vec<PurchaseOrderItem>, ServiceError> {
        for warning in &report.warnings {
            warn!(field = %warning.field, code = %warning.code, "{}", warning.message);
        }
        ensure_valid(report)?;

        drafts
            .iter()
            .map(|draft| {
                let quantity = draft.quantity.to_i32().ok_or_else(|| {
                    ServiceError::InvalidInput(format!(
                        "Quantity {} for {} is out of range",
                        draft.quantity, draft.product_name
                    ))
                })?;
                Ok(PurchaseOrderItem::new(
                    draft.product_id,
                    draft.product_name.clone(),
                    quantity,
                    draft.unit_cost,
                ))
            })
            .collect()
    }

    /// Path from the order's status to `target`, with a guard check on every
    /// hop. Problems are pushed onto `report`.
    fn guarded_route(
        &self,
        order: &PurchaseOrder,
        target: PurchaseOrderStatus,
        report: &mut ValidationReport,
    ) -> Vec<PurchaseOrderStatus> {
        let route = match self.graph.route(order.status, target) {
            Some(route) if !route.is_empty() => route,
            _ => {
                if !report.has_code(ValidationErrorCode::CannotApproveInStatus) {
                    report.push(ValidationIssue::error(
                        "status",
                        ValidationErrorCode::InvalidStatusTransition,
                        format!("Cannot transition from {} to {}", order.status, target),
                    ));
                }
                return Vec::new();
            }
        };

        let mut from = order.status;
        for &to in &route {
            if let Some(edge) = self.graph.edge(from, to) {
                if !edge.guard.is_satisfied(order) {
                    report.push(ValidationIssue::error(
                        "status",
                        ValidationErrorCode::TransitionGuardFailed,
                        format!("Cannot transition from {} to {}: {}", from, to, edge.guard.describe()),
                    ));
                }
            }
            from = to;
        }
        route
    }

    /// Commits `order` moved along `route`, one transition per hop, then
    /// audits what was written.
    #[allow(clippy::too_many_arguments)]
    async fn commit_route(
        &self,
        caller: Option<&CallerContext>,
        actor: &CallerContext,
        mut order: PurchaseOrder,
        expected_version: u64,
        route: &[PurchaseOrderStatus],
        reason: Option<String>,
        approval: Option<ApprovalRecord>,
    ) -> Result<(PurchaseOrder, Vec<StatusTransition>), ServiceError> {
        let mut transitions = Vec::with_capacity(route.len());
        let mut from = order.status;
        for &to in route {
            transitions.push(StatusTransition::new(
                order.id,
                from,
                to,
                actor.user_id,
                reason.clone(),
            ));
            from = to;
        }
        order.status = from;
        order.updated_at = Utc::now();

        let mut commit =
            OrderCommit::new(order, expected_version).with_transitions(transitions.clone());
        if let Some(approval) = approval.clone() {
            commit = commit.with_approval(approval);
        }
        let stored = self
            .persist(caller, "commit status change", self.repository.commit(commit))
            .await?;

        for transition in &transitions {
            self.audit
                .record(AuditEvent::StatusTransition(transition.clone()))
                .await;
        }
        if let Some(approval) = approval {
            self.audit.record(AuditEvent::Approval(approval)).await;
        }
        Ok((stored, transitions))
    }

    async fn dispatch_stock(
        &self,
        order_id: Uuid,
        adjustments: &[crate::models::StockAdjustment],
    ) -> DispatchReport {
        let report =
            outbox::dispatch(self.inventory.as_ref(), adjustments, Some(&self.event_sender)).await;
        if let Err(e) = self.repository.record_stock_dispatch(order_id, &report).await {
            error!(
                purchase_order_id = %order_id,
                error = %e,
                "Failed to record stock dispatch; instructions stay pending"
            );
        }
        report
    }

    async fn lock_order(
        &self,
        caller: Option<&CallerContext>,
        id: Uuid,
    ) -> Result<LockSet, ServiceError> {
        self.locks
            .acquire(LockKey::PurchaseOrder(id), self.lock_timeout(caller))
            .await
    }

    async fn load(
        &self,
        caller: Option<&CallerContext>,
        id: Uuid,
    ) -> Result<PurchaseOrder, ServiceError> {
        self.persist(caller, "load purchase order", self.repository.load_order(id))
            .await
    }

    /// Runs a repository call under the persistence timeout.
    async fn persist<T, F>(
        &self,
        caller: Option<&CallerContext>,
        operation: &str,
        future: F,
    ) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        let limit = self.persistence_timeout(caller);
        match tokio::time::timeout(limit, future).await {
            Ok(result) => result,
            Err(_) => {
                error!(operation, timeout_ms = limit.as_millis() as u64, "Persistence call timed out");
                Err(ServiceError::Timeout(format!(
                    "{} exceeded {:?}",
                    operation, limit
                )))
            }
        }
    }

    fn lock_timeout(&self, caller: Option<&CallerContext>) -> Duration {
        caller
            .and_then(|caller| caller.timeout)
            .unwrap_or_else(|| self.config.lock_timeout())
    }

    fn persistence_timeout(&self, caller: Option<&CallerContext>) -> Duration {
        caller
            .and_then(|caller| caller.timeout)
            .unwrap_or_else(|| self.config.persistence_timeout())
    }
}

fn require_actor(caller: Option<&CallerContext>) -> Result<&CallerContext, ServiceError> {
    caller.ok_or_else(|| {
        ServiceError::PermissionDenied(PermissionDenial::new(
            DenialCode::AuthenticationRequired,
            "Authentication is required",
        ))
    })
}

/// The gate action that owns a move into `status`.
fn action_for_status(status: PurchaseOrderStatus) -> PurchaseOrderAction {
    use PurchaseOrderStatus::*;
    match status {
        Draft | Approved => PurchaseOrderAction::Approve,
        PendingApproval => PurchaseOrderAction::Submit,
        SentToSupplier => PurchaseOrderAction::SendToSupplier,
        PartiallyReceived | FullyReceived => PurchaseOrderAction::Receive,
        Cancelled => PurchaseOrderAction::Cancel,
        Closed => PurchaseOrderAction::Close,
    }
}

fn ensure_valid(report: ValidationReport) -> Result<(), ServiceError> {
    if report.is_valid() {
        Ok(())
    } else {
        warn!(errors = %report, "Validation failed");
        Err(ServiceError::ValidationFailed(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn caller(role: Role) -> CallerContext {
        CallerContext::new(Uuid::new_v4(), role, format!("{}@example.com", role))
    }

    async fn draft(service: &PurchaseOrderService, admin: &CallerContext) -> PurchaseOrder {
        service
            .create_purchase_order(
                Some(admin),
                CreatePurchaseOrderCommand::new(
                    Uuid::new_v4(),
                    vec![ItemDraft::new(Uuid::new_v4(), "Bolt", dec!(10), dec!(2))],
                ),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn generated_po_numbers_use_the_configured_prefix() {
        let mut config = EngineConfig::default();
        config.po_number_prefix = "ACME".into();
        let (service, _handles) = PurchaseOrderService::in_memory(config);
        let admin = caller(Role::Admin);

        let first = draft(&service, &admin).await;
        let second = draft(&service, &admin).await;
        assert_eq!(first.po_number, "ACME-000001");
        assert_eq!(second.po_number, "ACME-000002");
        assert_eq!(first.total, dec!(20));
    }

    #[tokio::test]
    async fn receiving_statuses_cannot_be_requested_directly() {
        let (service, _handles) = PurchaseOrderService::in_memory(EngineConfig::default());
        let admin = caller(Role::Admin);
        let order = draft(&service, &admin).await;
        service.approve(Some(&admin), order.id, None).await.unwrap();

        let err = service
            .transition_to(Some(&admin), order.id, PurchaseOrderStatus::FullyReceived, None)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationFailed(report) => {
            assert!(report.has_code(ValidationErrorCode::InvalidStatusTransition));
        });
    }

    #[tokio::test]
    async fn same_status_is_reported_as_already_set() {
        let (service, _handles) = PurchaseOrderService::in_memory(EngineConfig::default());
        let admin = caller(Role::Admin);
        let order = draft(&service, &admin).await;

        let err = service
            .transition_to(Some(&admin), order.id, PurchaseOrderStatus::Draft, None)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationFailed(report) => {
            assert!(report.has_code(ValidationErrorCode::StatusAlreadySet));
        });
    }

    #[tokio::test]
    async fn missing_caller_is_denied_before_anything_is_written() {
        let (service, handles) = PurchaseOrderService::in_memory(EngineConfig::default());
        let err = service
            .create_purchase_order(
                None,
                CreatePurchaseOrderCommand::new(
                    Uuid::new_v4(),
                    vec![ItemDraft::new(Uuid::new_v4(), "Bolt", dec!(1), dec!(1))],
                ),
            )
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::PermissionDenied(denial) => {
            assert_eq!(denial.code, DenialCode::AuthenticationRequired);
        });
        assert_eq!(handles.audit.len().await, 1);
    }

    #[tokio::test]
    async fn caller_timeout_bounds_persistence() {
        let repository = Arc::new(
            InMemoryPurchaseOrderRepository::new().with_latency(Duration::from_millis(200)),
        );
        let inventory = Arc::new(InMemoryInventory::new(Duration::from_millis(50)));
        let (sender, _rx) = EventSender::channel(8);
        let service = PurchaseOrderService::new(
            EngineConfig::default(),
            repository,
            inventory,
            Arc::new(InMemoryAuditLog::new()),
            EmergencyAccessRegistry::new(),
            sender,
        );
        let admin = caller(Role::Admin).with_timeout(Duration::from_millis(20));

        let err = service
            .create_purchase_order(
                Some(&admin),
                CreatePurchaseOrderCommand::new(
                    Uuid::new_v4(),
                    vec![ItemDraft::new(Uuid::new_v4(), "Bolt", dec!(1), dec!(1))],
                ),
            )
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::Timeout(_));
        assert!(err.is_retryable());
    }
}
