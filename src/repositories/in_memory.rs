use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{OrderCommit, PurchaseOrderRepository};
use crate::errors::ServiceError;
use crate::events::outbox::{DispatchReport, OutboxEntry};
use crate::models::{
    ApprovalRecord, PurchaseOrder, ReceivingRecord, StatusTransition, StockAdjustment,
};

#[derive(Debug, Clone)]
struct StoredOrder {
    order: PurchaseOrder,
    transitions: Vec<StatusTransition>,
    receipts: Vec<ReceivingRecord>,
    approvals: Vec<ApprovalRecord>,
    outbox: Vec<OutboxEntry>,
}

impl StoredOrder {
    fn new(order: PurchaseOrder) -> Self {
        Self {
            order,
            transitions: Vec::new(),
            receipts: Vec::new(),
            approvals: Vec::new(),
            outbox: Vec::new(),
        }
    }
}

/// Process-local repository.
///
/// Each order and the records it owns live under one map entry, so a commit
/// holds that entry exclusively while it checks the version and writes.
/// Failure injection and artificial latency exist for exercising the
/// atomicity and timeout paths.
#[derive(Debug, Default)]
pub struct InMemoryPurchaseOrderRepository {
    orders: DashMap<Uuid, StoredOrder>,
    sequence: AtomicU64,
    fail_next_commit: AtomicBool,
    latency: Option<Duration>,
}

impl InMemoryPurchaseOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write sleeps for `latency` first.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// The next `commit` fails with a persistence error and writes nothing.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Imports a stored order that may use legacy field names or status
    /// spellings, normalizing it onto canonical fields.
    pub fn import_json(&self, raw: &str) -> Result<PurchaseOrder, ServiceError> {
        let mut order: PurchaseOrder = serde_json::from_str(raw)
            .map_err(|e| ServiceError::InvalidInput(format!("Malformed purchase order: {}", e)))?;
        order.normalize_legacy_fields();

        if let Some(item) = order
            .items
            .iter()
            .find(|item| item.received_quantity > item.quantity || item.quantity <= 0)
        {
            return Err(ServiceError::InvalidInput(format!(
                "Item {} has received {} of {} ordered",
                item.id, item.received_quantity, item.quantity
            )));
        }

        info!(purchase_order_id = %order.id, status = %order.status, "Imported purchase order");
        self.orders.insert(order.id, StoredOrder::new(order.clone()));
        Ok(order)
    }

    pub fn outbox(&self, order_id: Uuid) -> Vec<OutboxEntry> {
        self.orders
            .get(&order_id)
            .map(|stored| stored.outbox.clone())
            .unwrap_or_default()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_version(stored: &StoredOrder, expected: u64) -> Result<(), ServiceError> {
        if stored.order.version != expected {
            warn!(
                purchase_order_id = %stored.order.id,
                expected,
                actual = stored.order.version,
                "Stale write rejected"
            );
            return Err(ServiceError::ConcurrentModification(stored.order.id));
        }
        Ok(())
    }

    fn read<T>(&self, id: Uuid, f: impl FnOnce(&StoredOrder) -> T) -> Result<T, ServiceError> {
        self.orders
            .get(&id)
            .map(|stored| f(stored.value()))
            .ok_or_else(|| ServiceError::order_not_found(id))
    }

    fn write<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut StoredOrder) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let mut stored = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| ServiceError::order_not_found(id))?;
        f(stored.value_mut())
    }
}

#[async_trait]
impl PurchaseOrderRepository for InMemoryPurchaseOrderRepository {
    async fn load_order(&self, id: Uuid) -> Result<PurchaseOrder, ServiceError> {
        self.read(id, |stored| stored.order.clone())
    }

    async fn insert_order(&self, order: PurchaseOrder) -> Result<PurchaseOrder, ServiceError> {
        self.simulate_latency().await;
        if self.orders.contains_key(&order.id) {
            return Err(ServiceError::InvalidInput(format!(
                "Purchase order {} already exists",
                order.id
            )));
        }
        self.orders.insert(order.id, StoredOrder::new(order.clone()));
        Ok(order)
    }

    #[instrument(skip(self, commit), fields(purchase_order_id = %commit.order.id))]
    async fn commit(&self, commit: OrderCommit) -> Result<PurchaseOrder, ServiceError> {
        self.simulate_latency().await;

        let OrderCommit {
            mut order,
            expected_version,
            transitions,
            receiving_record,
            approval,
        } = commit;

        self.write(order.id, |stored| {
            Self::check_version(stored, expected_version)?;
            if self.fail_next_commit.swap(false, Ordering::SeqCst) {
                return Err(ServiceError::PersistenceError(
                    "injected commit failure".to_string(),
                ));
            }

            order.version = expected_version + 1;
            stored.order = order.clone();
            stored.transitions.extend(transitions);
            if let Some(record) = receiving_record {
                stored.outbox.extend(
                    record
                        .stock_adjustments
                        .iter()
                        .cloned()
                        .map(OutboxEntry::pending),
                );
                stored.receipts.push(record);
            }
            if let Some(approval) = approval {
                stored.approvals.push(approval);
            }
            debug!(version = order.version, "Purchase order committed");
            Ok(order)
        })
    }

    async fn status_history(&self, order_id: Uuid) -> Result<Vec<StatusTransition>, ServiceError> {
        self.read(order_id, |stored| stored.transitions.clone())
    }

    async fn receiving_history(&self, order_id: Uuid) -> Result<Vec<ReceivingRecord>, ServiceError> {
        self.read(order_id, |stored| stored.receipts.clone())
    }

    async fn approval_history(&self, order_id: Uuid) -> Result<Vec<ApprovalRecord>, ServiceError> {
        self.read(order_id, |stored| stored.approvals.clone())
    }

    async fn pending_stock_adjustments(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<StockAdjustment>, ServiceError> {
        self.read(order_id, |stored| {
            stored
                .outbox
                .iter()
                .filter(|entry| entry.is_pending())
                .map(|entry| entry.adjustment.clone())
                .collect()
        })
    }

    async fn record_stock_dispatch(
        &self,
        order_id: Uuid,
        report: &DispatchReport,
    ) -> Result<(), ServiceError> {
        let now = Utc::now();
        self.write(order_id, |stored| {
            for entry in stored.outbox.iter_mut().filter(|entry| entry.is_pending()) {
                if report.delivered.contains(&entry.adjustment.id) {
                    entry.mark_delivered(now);
                } else if let Some((_, error)) = report
                    .failed
                    .iter()
                    .find(|(id, _)| *id == entry.adjustment.id)
                {
                    entry.mark_failed(error);
                }
            }
            Ok(())
        })
    }

    async fn next_po_sequence(&self) -> Result<u64, ServiceError> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PurchaseOrderItem, PurchaseOrderStatus};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn order() -> PurchaseOrder {
        let items = vec![PurchaseOrderItem::new(Uuid::new_v4(), "Valve", 4, dec!(12.5))];
        PurchaseOrder::draft("PO-M", Uuid::new_v4(), items, dec!(0), Uuid::new_v4())
    }

    #[tokio::test]
    async fn stale_commit_is_rejected() {
        let repo = InMemoryPurchaseOrderRepository::new();
        let stored = repo.insert_order(order()).await.unwrap();

        let first = repo
            .commit(OrderCommit::new(stored.clone(), stored.version))
            .await
            .unwrap();
        assert_eq!(first.version, 1);

        let err = repo
            .commit(OrderCommit::new(stored.clone(), stored.version))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ConcurrentModification(id) if id == stored.id);
    }

    #[tokio::test]
    async fn injected_failure_writes_nothing() {
        let repo = InMemoryPurchaseOrderRepository::new();
        let stored = repo.insert_order(order()).await.unwrap();
        let mut changed = stored.clone();
        changed.status = PurchaseOrderStatus::PendingApproval;
        let transition = StatusTransition::new(
            stored.id,
            PurchaseOrderStatus::Draft,
            PurchaseOrderStatus::PendingApproval,
            Uuid::new_v4(),
            None,
        );

        repo.fail_next_commit();
        let result = repo
            .commit(OrderCommit::new(changed, stored.version).with_transitions(vec![transition]))
            .await;

        assert_matches!(result, Err(ServiceError::PersistenceError(_)));
        assert_eq!(repo.load_order(stored.id).await.unwrap(), stored);
        assert!(repo.status_history(stored.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn import_normalizes_legacy_fields() {
        let repo = InMemoryPurchaseOrderRepository::new();
        let mut legacy = serde_json::to_value(order()).unwrap();
        legacy["status"] = "partial".into();
        legacy["items"][0]["quantity_received"] = 3.into();
        legacy["items"][0]
            .as_object_mut()
            .unwrap()
            .remove("received_quantity");

        let imported = repo.import_json(&legacy.to_string()).unwrap();

        assert_eq!(imported.status, PurchaseOrderStatus::PartiallyReceived);
        assert_eq!(imported.items[0].received_quantity, 3);
        assert_eq!(imported.items[0].pending_quantity, 1);
        assert!(imported.items[0].legacy_received_quantity.is_none());
    }

    #[tokio::test]
    async fn import_rejects_over_received_records() {
        let repo = InMemoryPurchaseOrderRepository::new();
        let mut raw = serde_json::to_value(order()).unwrap();
        raw["items"][0]["received_quantity"] = 9.into();

        assert_matches!(
            repo.import_json(&raw.to_string()),
            Err(ServiceError::InvalidInput(_))
        );
    }

    #[tokio::test]
    async fn missing_order_is_not_found() {
        let repo = InMemoryPurchaseOrderRepository::new();
        assert_matches!(
            repo.load_order(Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        );
    }
}
