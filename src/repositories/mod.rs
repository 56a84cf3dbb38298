use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::events::outbox::DispatchReport;
use crate::models::{
    ApprovalRecord, PurchaseOrder, ReceivingRecord, StatusTransition, StockAdjustment,
};

pub mod in_memory;

pub use in_memory::InMemoryPurchaseOrderRepository;

/// Everything written by one state-changing operation.
///
/// Applied as one unit: the order, its new transitions, the optional
/// receiving record (whose stock adjustments enter the outbox as pending) and
/// the optional approval record all commit together or not at all.
#[derive(Debug, Clone)]
pub struct OrderCommit {
    pub order: PurchaseOrder,
    /// Version the order had when it was loaded. Commits against a newer
    /// stored version are rejected.
    pub expected_version: u64,
    pub transitions: Vec<StatusTransition>,
    pub receiving_record: Option<ReceivingRecord>,
    pub approval: Option<ApprovalRecord>,
}

impl OrderCommit {
    pub fn new(order: PurchaseOrder, expected_version: u64) -> Self {
        Self {
            order,
            expected_version,
            transitions: Vec::new(),
            receiving_record: None,
            approval: None,
        }
    }

    pub fn with_transitions(mut self, transitions: Vec<StatusTransition>) -> Self {
        self.transitions = transitions;
        self
    }

    pub fn with_receiving_record(mut self, record: ReceivingRecord) -> Self {
        self.receiving_record = Some(record);
        self
    }

    pub fn with_approval(mut self, approval: ApprovalRecord) -> Self {
        self.approval = Some(approval);
        self
    }
}

/// Persistence boundary for purchase orders and the records they own.
///
/// Implementations normalize legacy field names on the way in; business code
/// only ever sees canonical fields.
#[async_trait]
pub trait PurchaseOrderRepository: Send + Sync {
    async fn load_order(&self, id: Uuid) -> Result<PurchaseOrder, ServiceError>;

    async fn insert_order(&self, order: PurchaseOrder) -> Result<PurchaseOrder, ServiceError>;

    /// Atomically applies a whole [`OrderCommit`]. Returns the stored order
    /// with its new version.
    async fn commit(&self, commit: OrderCommit) -> Result<PurchaseOrder, ServiceError>;

    async fn status_history(&self, order_id: Uuid) -> Result<Vec<StatusTransition>, ServiceError>;

    async fn receiving_history(&self, order_id: Uuid) -> Result<Vec<ReceivingRecord>, ServiceError>;

    async fn approval_history(&self, order_id: Uuid) -> Result<Vec<ApprovalRecord>, ServiceError>;

    /// Committed stock instructions not yet acknowledged by inventory.
    async fn pending_stock_adjustments(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<StockAdjustment>, ServiceError>;

    async fn record_stock_dispatch(
        &self,
        order_id: Uuid,
        report: &DispatchReport,
    ) -> Result<(), ServiceError>;

    /// Next value for human-readable order numbers.
    async fn next_po_sequence(&self) -> Result<u64, ServiceError>;
}
