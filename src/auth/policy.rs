/*!
 * # Purchase Order Policy Table
 *
 * Static mapping of role to the purchase-order actions it may perform and the
 * largest order total it may approve. Ceilings may be overridden from
 * configuration; a ceiling of zero or `None` means "no cap".
 */

use lazy_static::lazy_static;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;

use super::Role;

/// Actions a caller may attempt on a purchase order.
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
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PurchaseOrderAction {
    Create,
    View,
    Edit,
    Submit,
    Approve,
    SendToSupplier,
    Receive,
    Cancel,
    Close,
    ViewHistory,
    ViewAuditTrail,
}

impl PurchaseOrderAction {
    /// The subset reported back to UI callers by `get_user_actions`.
    pub const USER_FACING: [PurchaseOrderAction; 6] = [
        PurchaseOrderAction::View,
        PurchaseOrderAction::Edit,
        PurchaseOrderAction::Approve,
        PurchaseOrderAction::Receive,
        PurchaseOrderAction::Cancel,
        PurchaseOrderAction::ViewHistory,
    ];
}

/// Policy attached to a single role.
#[derive(Debug, Clone)]
pub struct RolePolicy {
    pub role: Role,
    pub description: String,
    pub actions: HashSet<PurchaseOrderAction>,
    pub approval_ceiling: Option<Decimal>,
    /// Escalation level recorded on approval records.
    pub approval_level: u8,
}

impl RolePolicy {
    fn new(
        role: Role,
        description: &str,
        actions: &[PurchaseOrderAction],
        approval_ceiling: Option<Decimal>,
        approval_level: u8,
    ) -> Self {
        Self {
            role,
            description: description.to_string(),
            actions: actions.iter().copied().collect(),
            approval_ceiling,
            approval_level,
        }
    }
}

// Define standard roles and their purchase-order permissions
lazy_static! {
    pub static ref STANDARD_POLICIES: HashMap<Role, RolePolicy> = {
        use PurchaseOrderAction::*;

        let mut roles = HashMap::new();

        // Admin role - every action, no approval cap
        roles.insert(
            Role::Admin,
            RolePolicy::new(
                Role::Admin,
                "Administrator with full access",
                &[
                    Create, View, Edit, Submit, Approve, SendToSupplier, Receive, Cancel, Close,
                    ViewHistory, ViewAuditTrail,
                ],
                None,
                3,
            ),
        );

        // Manager role
        roles.insert(
            Role::Manager,
            RolePolicy::new(
                Role::Manager,
                "Manager with elevated access to procurement",
                &[
                    Create, View, Edit, Submit, Approve, SendToSupplier, Receive, Cancel, Close,
                    ViewHistory, ViewAuditTrail,
                ],
                Some(Decimal::from(100_000)),
                2,
            ),
        );

        // Employee role (standard purchaser)
        roles.insert(
            Role::Employee,
            RolePolicy::new(
                Role::Employee,
                "Standard purchaser with limited approval authority",
                &[Create, View, Edit, Submit, Approve, SendToSupplier, Receive, ViewHistory],
                Some(Decimal::from(25_000)),
                1,
            ),
        );

        // Warehouse role
        roles.insert(
            Role::Warehouse,
            RolePolicy::new(
                Role::Warehouse,
                "Warehouse operator recording goods receipts",
                &[View, Receive, ViewHistory],
                None,
                0,
            ),
        );

        // Read-only role
        roles.insert(
            Role::Viewer,
            RolePolicy::new(Role::Viewer, "Read-only access", &[View], None, 0),
        );

        roles
    };
}

/// Lookup service over the role policies.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: HashMap<Role, RolePolicy>,
}

impl PolicyTable {
    /// The built-in policy set.
    pub fn standard() -> Self {
        Self {
            policies: STANDARD_POLICIES.clone(),
        }
    }

    /// Replaces approval ceilings for the given roles. Zero means no cap.
    pub fn with_ceilings(mut self, ceilings: &HashMap<Role, Decimal>) -> Self {
        for (role, ceiling) in ceilings {
            match self.policies.get_mut(role) {
                Some(policy) => {
                    policy.approval_ceiling = if ceiling.is_zero() {
                        None
                    } else {
                        Some(*ceiling)
                    };
                }
                None => warn!(role = %role, "Ignoring ceiling override for unknown role"),
            }
        }
        self
    }

    pub fn policy(&self, role: Role) -> Option<&RolePolicy> {
        self.policies.get(&role)
    }

    /// Whether the role may attempt the action at all, ignoring order state.
    pub fn allows(&self, role: Role, action: PurchaseOrderAction) -> bool {
        self.policies
            .get(&role)
            .map(|policy| policy.actions.contains(&action))
            .unwrap_or(false)
    }

    /// The role's approval ceiling. `None` means uncapped.
    pub fn approval_ceiling(&self, role: Role) -> Option<Decimal> {
        self.policies
            .get(&role)
            .and_then(|policy| policy.approval_ceiling)
            .filter(|ceiling| !ceiling.is_zero())
    }

    pub fn within_ceiling(&self, role: Role, amount: Decimal) -> bool {
        match self.approval_ceiling(role) {
            Some(ceiling) => amount <= ceiling,
            None => true,
        }
    }

    pub fn approval_level(&self, role: Role) -> u8 {
        self.policies
            .get(&role)
            .map(|policy| policy.approval_level)
            .unwrap_or(0)
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::standard()
    }
}
