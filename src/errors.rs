use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use crate::auth::gate::PermissionDenial;
use crate::workflow::validation::ValidationReport;

/// Crate-wide error type.
///
/// Validation and permission failures carry their structured payloads so a
/// caller can render every problem at once. Concurrency and system failures
/// are retryable and never leave partial state behind.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(ValidationReport),

    #[error("Permission denied: {0}")]
    PermissionDenied(PermissionDenial),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Concurrent modification of purchase order {0}: record was modified")]
    ConcurrentModification(Uuid),

    #[error("Timed out after {timeout:?} waiting for lock on {resource}")]
    LockTimeout {
        resource: String,
        #[serde(skip)]
        timeout: Duration,
    },

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Inventory error: {0}")]
    InventoryError(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::InvalidInput(err.to_string())
    }
}

impl From<ValidationReport> for ServiceError {
    fn from(report: ValidationReport) -> Self {
        ServiceError::ValidationFailed(report)
    }
}

impl From<PermissionDenial> for ServiceError {
    fn from(denial: PermissionDenial) -> Self {
        ServiceError::PermissionDenied(denial)
    }
}

impl ServiceError {
    /// Convenience constructor for a missing purchase order.
    pub fn order_not_found(id: Uuid) -> Self {
        ServiceError::NotFound(format!("Purchase order {} not found", id))
    }

    /// Whether the caller may retry the same request unchanged.
    ///
    /// This is the single source of truth for retry classification.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentModification(_)
                | Self::LockTimeout { .. }
                | Self::Timeout(_)
                | Self::PersistenceError(_)
                | Self::InventoryError(_)
        )
    }

    /// Machine-readable code for the error category.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::ValidationFailed(_) => "VALIDATION_FAILED",
            Self::PermissionDenied(denial) => denial.code.into(),
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::Timeout(_) => "TIMEOUT",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::InventoryError(_) => "INVENTORY_ERROR",
            Self::InsufficientStock(_) => "INSUFFICIENT_STOCK",
            Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the error message suitable for showing to an end user.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::PersistenceError(_) => "Storage error".to_string(),
            Self::Other(_) => "Internal error".to_string(),
            Self::ValidationFailed(report) => report
                .errors
                .iter()
                .map(|issue| issue.message.clone())
                .collect::<Vec<_>>()
                .join("; "),
            Self::PermissionDenied(denial) => denial.message.clone(),
            _ => self.to_string(),
        }
    }
}
