pub mod purchase_order;
pub mod records;
pub mod stock;

pub use purchase_order::{PurchaseOrder, PurchaseOrderItem, PurchaseOrderStatus, QualityStatus};
pub use records::{
    ApprovalDecision, ApprovalRecord, ItemCondition, ReceivedLine, ReceivingMode,
    ReceivingRecord, StatusTransition,
};
pub use stock::{AdjustmentContext, MovementType, StockAdjustment, StockDirection};
