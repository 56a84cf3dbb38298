/*!
 * # Permission Gate
 *
 * Decides whether a caller may perform an action on a purchase order and, if
 * so, runs the wrapped operation. The decision itself (`evaluate`) is a pure
 * function of `(caller, action, order, amount)`; `check` adds the emergency
 * override lookup and records every decision, allowed or denied, in the audit
 * log. The gate never mutates an order.
 */

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::emergency::EmergencyAccessRegistry;
use super::policy::{PolicyTable, PurchaseOrderAction};
use super::CallerContext;
use crate::audit::{AuditEvent, AuditRecorder};
use crate::errors::ServiceError;
use crate::models::{PurchaseOrder, PurchaseOrderStatus};
use crate::workflow::transitions::TransitionGraph;

/// Machine-readable reason for a denial.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialCode {
    AuthenticationRequired,
    InsufficientPermissions,
    ApprovalNotAllowed,
    ApprovalLimitExceeded,
    ReceivingNotAllowed,
    CancellationNotAllowed,
    EditNotAllowed,
    TransitionNotAllowed,
}

/// Structured denial returned when the gate refuses an action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct PermissionDenial {
    pub code: DenialCode,
    pub message: String,
    /// Set for role and ceiling denials, the only ones an emergency grant may lift.
    #[serde(skip)]
    overridable: bool,
}

impl PermissionDenial {
    pub fn new(code: DenialCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            overridable: false,
        }
    }

    fn overridable(mut self) -> Self {
        self.overridable = true;
        self
    }

    pub fn is_overridable(&self) -> bool {
        self.overridable
    }
}

/// A successful check. `emergency_grant` is set when an override was used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Authorization {
    pub emergency_grant: Option<Uuid>,
}

impl Authorization {
    pub fn is_emergency(&self) -> bool {
        self.emergency_grant.is_some()
    }
}

#[derive(Clone)]
pub struct PermissionGate {
    policy: PolicyTable,
    graph: TransitionGraph,
    audit: Arc<dyn AuditRecorder>,
    emergency: EmergencyAccessRegistry,
}

impl PermissionGate {
    pub fn new(
        policy: PolicyTable,
        audit: Arc<dyn AuditRecorder>,
        emergency: EmergencyAccessRegistry,
    ) -> Self {
        Self {
            policy,
            graph: TransitionGraph,
            audit,
            emergency,
        }
    }

    pub fn policy(&self) -> &PolicyTable {
        &self.policy
    }

    /// Pure decision. `amount` defaults to the order total for approvals.
    pub fn evaluate(
        &self,
        caller: Option<&CallerContext>,
        action: PurchaseOrderAction,
        order: Option<&PurchaseOrder>,
        amount: Option<Decimal>,
    ) -> Result<(), PermissionDenial> {
        let caller = caller.ok_or_else(|| {
            PermissionDenial::new(
                DenialCode::AuthenticationRequired,
                "Authentication is required",
            )
        })?;

        if let Some(order) = order {
            self.check_status(action, order.status)?;
        }

        if !self.policy.allows(caller.role, action) {
            return Err(PermissionDenial::new(
                role_denial_code(action),
                format!("Role {} may not perform {} on purchase orders", caller.role, action),
            )
            .overridable());
        }

        if action == PurchaseOrderAction::Approve {
            let amount = amount.or_else(|| order.map(|order| order.total));
            if let Some(amount) = amount {
                if !self.policy.within_ceiling(caller.role, amount) {
                    let ceiling = self
                        .policy
                        .approval_ceiling(caller.role)
                        .unwrap_or_default();
                    return Err(PermissionDenial::new(
                        DenialCode::ApprovalLimitExceeded,
                        format!(
                            "Approval amount {} exceeds the {} ceiling of {}",
                            amount, caller.role, ceiling
                        ),
                    )
                    .overridable());
                }
            }
        }

        Ok(())
    }

    fn check_status(
        &self,
        action: PurchaseOrderAction,
        status: PurchaseOrderStatus,
    ) -> Result<(), PermissionDenial> {
        use PurchaseOrderAction::*;
        use PurchaseOrderStatus as S;

        let (allowed, code) = match action {
            Approve => (
                matches!(status, S::Draft | S::PendingApproval),
                DenialCode::ApprovalNotAllowed,
            ),
            // Receipts against closed-out orders are reported by validation.
            Receive => (
                !matches!(status, S::Draft | S::PendingApproval),
                DenialCode::ReceivingNotAllowed,
            ),
            Cancel => (
                self.graph.is_valid_transition(status, S::Cancelled),
                DenialCode::CancellationNotAllowed,
            ),
            Edit => (status.is_editable(), DenialCode::EditNotAllowed),
            Submit => (status == S::Draft, DenialCode::TransitionNotAllowed),
            SendToSupplier => (status == S::Approved, DenialCode::TransitionNotAllowed),
            Close => (status == S::FullyReceived, DenialCode::TransitionNotAllowed),
            Create | View | ViewHistory | ViewAuditTrail => (true, DenialCode::TransitionNotAllowed),
        };

        if allowed {
            Ok(())
        } else {
            Err(PermissionDenial::new(
                code,
                format!("Cannot {} a purchase order in status {}", action, status),
            ))
        }
    }

    /// Evaluates, applies any emergency grant, and records the decision.
    #[instrument(skip(self, caller, order, amount))]
    pub async fn check(
        &self,
        caller: Option<&CallerContext>,
        action: PurchaseOrderAction,
        order: Option<&PurchaseOrder>,
        amount: Option<Decimal>,
    ) -> Result<Authorization, PermissionDenial> {
        let purchase_order_id = order.map(|order| order.id);
        let decision = self.evaluate(caller, action, order, amount);

        let denial = match decision {
            Ok(()) => {
                self.record_check(caller, action, purchase_order_id, None, "allowed".into())
                    .await;
                return Ok(Authorization::default());
            }
            Err(denial) => denial,
        };

        if denial.is_overridable() {
            if let Some(caller) = caller {
                if let Some(grant) = self.emergency.active_grant(caller.user_id) {
                    self.audit
                        .record(AuditEvent::EmergencyOverride {
                            actor: caller.user_id,
                            action,
                            purchase_order_id,
                            grant_id: grant.id,
                            granted_by: grant.granted_by,
                            overridden: denial.code,
                            reason: grant.reason.clone(),
                        })
                        .await;
                    self.record_check(
                        Some(caller),
                        action,
                        purchase_order_id,
                        None,
                        format!("allowed by emergency grant {}", grant.id),
                    )
                    .await;
                    return Ok(Authorization {
                        emergency_grant: Some(grant.id),
                    });
                }
            }
        }

        self.record_check(
            caller,
            action,
            purchase_order_id,
            Some(denial.code),
            denial.message.clone(),
        )
        .await;
        Err(denial)
    }

    /// Identity check for operations addressed to an order by id. Runs before
    /// the order is loaded, so an anonymous caller learns nothing about
    /// whether `purchase_order_id` exists. Denials are recorded.
    pub async fn authenticate<'a>(
        &self,
        caller: Option<&'a CallerContext>,
        action: PurchaseOrderAction,
        purchase_order_id: Uuid,
    ) -> Result<&'a CallerContext, PermissionDenial> {
        match caller {
            Some(caller) => Ok(caller),
            None => {
                let denial = PermissionDenial::new(
                    DenialCode::AuthenticationRequired,
                    "Authentication is required",
                );
                self.record_check(
                    None,
                    action,
                    Some(purchase_order_id),
                    Some(denial.code),
                    denial.message.clone(),
                )
                .await;
                Err(denial)
            }
        }
    }

    /// Runs `operation` only if the caller passes the gate.
    pub async fn with_permission<T, F, Fut>(
        &self,
        caller: Option<&CallerContext>,
        action: PurchaseOrderAction,
        order: Option<&PurchaseOrder>,
        amount: Option<Decimal>,
        operation: F,
    ) -> Result<T, ServiceError>
    where
        F: FnOnce(Authorization) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let authorization = self.check(caller, action, order, amount).await?;
        operation(authorization).await
    }

    /// The user-facing actions this caller may perform on the given order.
    /// Does not write audit entries.
    pub fn allowed_actions(
        &self,
        caller: Option<&CallerContext>,
        order: &PurchaseOrder,
    ) -> Vec<PurchaseOrderAction> {
        let has_grant = caller
            .map(|caller| self.emergency.active_grant(caller.user_id).is_some())
            .unwrap_or(false);

        PurchaseOrderAction::USER_FACING
            .iter()
            .copied()
            .filter(|action| {
                *action != PurchaseOrderAction::Receive || order.status.accepts_receipts()
            })
            .filter(|action| match self.evaluate(caller, *action, Some(order), None) {
                Ok(()) => true,
                Err(denial) => has_grant && denial.is_overridable(),
            })
            .collect()
    }

    async fn record_check(
        &self,
        caller: Option<&CallerContext>,
        action: PurchaseOrderAction,
        purchase_order_id: Option<Uuid>,
        code: Option<DenialCode>,
        reason: String,
    ) {
        debug!(action = %action, allowed = code.is_none(), "Permission check");
        self.audit
            .record(AuditEvent::PermissionCheck {
                actor: caller.map(|caller| caller.user_id),
                role: caller.map(|caller| caller.role),
                action,
                purchase_order_id,
                allowed: code.is_none(),
                code,
                reason,
            })
            .await;
    }
}

fn role_denial_code(action: PurchaseOrderAction) -> DenialCode {
    match action {
        PurchaseOrderAction::Approve => DenialCode::ApprovalNotAllowed,
        PurchaseOrderAction::Receive => DenialCode::ReceivingNotAllowed,
        PurchaseOrderAction::Cancel => DenialCode::CancellationNotAllowed,
        _ => DenialCode::InsufficientPermissions,
    }
}
