//! Purchase-order workflow: the status graph, the validation rules and the
//! receiving reconciliation algorithm. Everything here is synchronous and
//! side-effect free; persistence and locking live in the service layer.

pub mod reconciliation;
pub mod transitions;
pub mod validation;

pub use reconciliation::{Reconciliation, ReconciliationEngine, ReceivingContext};
pub use transitions::{TransitionEdge, TransitionGraph, TransitionGuard};
pub use validation::{
    PlannedLine, ProposedChange, Severity, ValidationEngine, ValidationErrorCode,
    ValidationIssue, ValidationReport,
};
