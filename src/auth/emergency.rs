//! Administered emergency access.
//!
//! Grants are issued server-side by an administrator, expire on their own,
//! and can be revoked. The permission gate consults the registry only after a
//! role or ceiling denial, and every use is written to the audit log.
//!
//! Issuing and revoking is crate-internal; the service wraps both so each
//! change to the registry lands in the audit log as well.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::gate::{DenialCode, PermissionDenial};
use super::{CallerContext, Role};
use crate::errors::ServiceError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyGrant {
    pub id: Uuid,
    pub user_id: Uuid,
    pub granted_by: Uuid,
    pub reason: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl EmergencyGrant {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Registry of active emergency grants, keyed by the user they were issued to.
#[derive(Debug, Clone, Default)]
pub struct EmergencyAccessRegistry {
    grants: Arc<DashMap<Uuid, EmergencyGrant>>,
}

impl EmergencyAccessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a grant. Only administrators may do so, a reason is mandatory
    /// and the lifetime must be positive.
    pub(crate) fn grant(
        &self,
        issuer: &CallerContext,
        user_id: Uuid,
        reason: impl Into<String>,
        ttl: ChronoDuration,
    ) -> Result<EmergencyGrant, ServiceError> {
        require_admin(issuer, "issue")?;
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "Emergency access requires a reason".to_string(),
            ));
        }
        if ttl <= ChronoDuration::zero() {
            return Err(ServiceError::InvalidInput(format!(
                "Emergency access lifetime must be positive, got {} seconds",
                ttl.num_seconds()
            )));
        }

        let now = Utc::now();
        let grant = EmergencyGrant {
            id: Uuid::new_v4(),
            user_id,
            granted_by: issuer.user_id,
            reason,
            granted_at: now,
            expires_at: now + ttl,
        };
        info!(
            grant_id = %grant.id,
            user_id = %user_id,
            granted_by = %issuer.user_id,
            expires_at = %grant.expires_at,
            "Emergency access granted"
        );
        self.grants.insert(user_id, grant.clone());
        Ok(grant)
    }

    pub(crate) fn revoke(
        &self,
        issuer: &CallerContext,
        user_id: Uuid,
    ) -> Result<Option<EmergencyGrant>, ServiceError> {
        require_admin(issuer, "revoke")?;
        let revoked = self.grants.remove(&user_id).map(|(_, grant)| grant);
        if let Some(grant) = &revoked {
            info!(grant_id = %grant.id, user_id = %user_id, revoked_by = %issuer.user_id, "Emergency access revoked");
        }
        Ok(revoked)
    }

    /// The caller's grant, if one exists and has not expired. Expired grants are dropped.
    pub fn active_grant(&self, user_id: Uuid) -> Option<EmergencyGrant> {
        let now = Utc::now();
        let grant = self.grants.get(&user_id).map(|entry| entry.value().clone())?;
        if grant.is_active_at(now) {
            Some(grant)
        } else {
            self.grants.remove(&user_id);
            None
        }
    }
}

fn require_admin(issuer: &CallerContext, verb: &str) -> Result<(), PermissionDenial> {
    if issuer.role == Role::Admin {
        return Ok(());
    }
    warn!(issuer = %issuer.user_id, "Non-admin attempted to {} emergency access", verb);
    Err(PermissionDenial::new(
        DenialCode::InsufficientPermissions,
        format!("Only administrators may {} emergency access", verb),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> CallerContext {
        CallerContext::new(Uuid::new_v4(), Role::Admin, "admin@example.com")
    }

    #[test]
    fn only_admins_issue_grants() {
        let registry = EmergencyAccessRegistry::new();
        let manager = CallerContext::new(Uuid::new_v4(), Role::Manager, "m@example.com");

        let denied = registry.grant(&manager, Uuid::new_v4(), "outage", ChronoDuration::hours(1));
        assert!(denied.is_err());

        let user = Uuid::new_v4();
        let grant = registry
            .grant(&admin(), user, "supplier outage", ChronoDuration::hours(1))
            .unwrap();
        assert_eq!(registry.active_grant(user).map(|g| g.id), Some(grant.id));
    }

    #[test]
    fn expired_grants_are_ignored() {
        let registry = EmergencyAccessRegistry::new();
        let user = Uuid::new_v4();
        let mut grant = registry
            .grant(&admin(), user, "test", ChronoDuration::hours(1))
            .unwrap();
        grant.expires_at = grant.granted_at - ChronoDuration::seconds(1);
        registry.grants.insert(user, grant);

        assert!(registry.active_grant(user).is_none());
        assert!(registry.grants.is_empty());
    }

    #[test]
    fn lifetime_must_be_positive() {
        let registry = EmergencyAccessRegistry::new();
        for ttl in [ChronoDuration::zero(), ChronoDuration::seconds(-1)] {
            let err = registry
                .grant(&admin(), Uuid::new_v4(), "test", ttl)
                .unwrap_err();
            assert!(matches!(err, ServiceError::InvalidInput(_)));
        }
        assert!(registry.grants.is_empty());
    }

    #[test]
    fn revoked_grants_are_gone() {
        let registry = EmergencyAccessRegistry::new();
        let user = Uuid::new_v4();
        registry
            .grant(&admin(), user, "test", ChronoDuration::hours(1))
            .unwrap();

        let manager = CallerContext::new(Uuid::new_v4(), Role::Manager, "m@example.com");
        assert!(registry.revoke(&manager, user).is_err());
        assert!(registry.active_grant(user).is_some());

        assert!(registry.revoke(&admin(), user).unwrap().is_some());
        assert!(registry.active_grant(user).is_none());
    }
}
