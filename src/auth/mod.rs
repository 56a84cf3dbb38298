/*!
 * # Caller Identity and Authorization
 *
 * The caller context is passed explicitly into every permission-checked
 * operation. Nothing in this module reads ambient or global auth state, so
 * the permission gate is a pure function of
 * `(context, action, order, amount)`.
 */

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub mod emergency;
pub mod gate;
pub mod policy;

pub use emergency::{EmergencyAccessRegistry, EmergencyGrant};
pub use gate::{Authorization, DenialCode, PermissionDenial, PermissionGate};
pub use policy::{PolicyTable, PurchaseOrderAction, RolePolicy};

/// Roles known to the policy table.
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
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Role {
    Admin,
    Manager,
    #[serde(alias = "user", alias = "staff")]
    #[strum(to_string = "employee", serialize = "user", serialize = "staff")]
    Employee,
    Warehouse,
    #[serde(alias = "readonly")]
    #[strum(to_string = "viewer", serialize = "readonly")]
    Viewer,
}

/// Identity of the caller for the current request.
#[derive(Debug, Clone, PartialEq)]
pub struct CallerContext {
    pub user_id: Uuid,
    pub role: Role,
    pub email: String,
    /// Upper bound on lock waits and persistence writes for this request.
    pub timeout: Option<Duration>,
}

impl CallerContext {
    pub fn new(user_id: Uuid, role: Role, email: impl Into<String>) -> Self {
        Self {
            user_id,
            role,
            email: email.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
