//! Validated request payloads for purchase-order operations.
//!
//! Commands check their own shape with `validator`; business rules are left
//! to the validation engine so every violation can be reported together.

use rust_decimal::Decimal;
use validator::ValidationError;

pub mod approve_purchase_order_command;
pub mod cancel_purchase_order_command;
pub mod create_purchase_order_command;
pub mod receive_purchase_order_command;
pub mod reject_purchase_order_command;
pub mod submit_purchase_order_command;
pub mod update_purchase_order_command;

pub use approve_purchase_order_command::ApprovePurchaseOrderCommand;
pub use cancel_purchase_order_command::CancelPurchaseOrderCommand;
pub use create_purchase_order_command::{CreatePurchaseOrderCommand, ItemDraft};
pub use receive_purchase_order_command::{ReceiveLine, ReceivePurchaseOrderCommand};
pub use reject_purchase_order_command::RejectPurchaseOrderCommand;
pub use submit_purchase_order_command::SubmitPurchaseOrderCommand;
pub use update_purchase_order_command::{UpdatePurchaseOrder, UpdatePurchaseOrderCommand};

pub(crate) fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        let mut err = ValidationError::new("negative_amount");
        err.message = Some("Amount cannot be negative".into());
        return Err(err);
    }
    Ok(())
}

pub(crate) fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}
