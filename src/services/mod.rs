// Purchase order lifecycle and receiving
pub mod purchase_orders;

pub use purchase_orders::{InMemoryHandles, PurchaseOrderService, ReceiveOutcome};
