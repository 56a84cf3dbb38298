/*!
 * # Inventory Collaborator
 *
 * The purchase-order core only ever hands stock-adjustment instructions to an
 * [`InventoryGateway`]; it never reads or writes stock levels itself.
 * [`InMemoryInventory`] is the in-process implementation used by tests and
 * embedded deployments. It applies each instruction id at most once, so
 * re-delivery from the outbox is harmless.
 */

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::concurrency::{LockKey, LockManager};
use crate::errors::ServiceError;
use crate::models::StockAdjustment;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InventoryGateway: Send + Sync {
    /// Applies one instruction. Returns `Ok(false)` when the instruction id
    /// was already applied and nothing changed.
    async fn adjust_stock(&self, adjustment: &StockAdjustment) -> Result<bool, ServiceError>;
}

pub struct InMemoryInventory {
    on_hand: DashMap<Uuid, i64>,
    applied: DashSet<Uuid>,
    locks: LockManager,
    lock_timeout: Duration,
}

impl InMemoryInventory {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            on_hand: DashMap::new(),
            applied: DashSet::new(),
            locks: LockManager::new(),
            lock_timeout,
        }
    }

    pub fn on_hand(&self, product_id: Uuid) -> i64 {
        self.on_hand.get(&product_id).map(|qty| *qty).unwrap_or(0)
    }

    pub fn set_on_hand(&self, product_id: Uuid, quantity: i64) {
        self.on_hand.insert(product_id, quantity);
    }

    pub fn is_applied(&self, adjustment_id: Uuid) -> bool {
        self.applied.contains(&adjustment_id)
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// Applies several instructions as one unit.
    ///
    /// Locks every product involved in sorted order, checks that no product
    /// would go negative, then applies all of them. If any line fails, no
    /// product changes. Already-applied ids are skipped.
    #[instrument(skip(self, adjustments), fields(lines = adjustments.len()))]
    pub async fn apply_batch(&self, adjustments: &[StockAdjustment]) -> Result<usize, ServiceError> {
        let keys = adjustments
            .iter()
            .map(|adjustment| LockKey::Product(adjustment.product_id));
        let _locks = self.locks.acquire_all(keys, self.lock_timeout).await?;

        let fresh: Vec<&StockAdjustment> = adjustments
            .iter()
            .filter(|adjustment| !self.applied.contains(&adjustment.id))
            .collect();

        let mut projected: HashMap<Uuid, i64> = HashMap::new();
        for adjustment in &fresh {
            if adjustment.quantity <= 0 {
                return Err(ServiceError::InvalidInput(format!(
                    "Stock adjustment {} has non-positive quantity {}",
                    adjustment.id, adjustment.quantity
                )));
            }
            let level = projected
                .entry(adjustment.product_id)
                .or_insert_with(|| self.on_hand(adjustment.product_id));
            *level += adjustment.signed_quantity();
            if *level < 0 {
                warn!(product_id = %adjustment.product_id, "Batch rejected: insufficient stock");
                return Err(ServiceError::InsufficientStock(format!(
                    "Product {} would drop to {}",
                    adjustment.product_id, level
                )));
            }
        }

        for (product_id, level) in projected {
            self.on_hand.insert(product_id, level);
        }
        for adjustment in &fresh {
            self.applied.insert(adjustment.id);
        }
        info!(applied = fresh.len(), "Stock batch applied");
        Ok(fresh.len())
    }
}

#[async_trait]
impl InventoryGateway for InMemoryInventory {
    #[instrument(skip(self, adjustment), fields(adjustment_id = %adjustment.id, product_id = %adjustment.product_id))]
    async fn adjust_stock(&self, adjustment: &StockAdjustment) -> Result<bool, ServiceError> {
        if adjustment.quantity <= 0 {
            return Err(ServiceError::InvalidInput(format!(
                "Stock adjustment {} has non-positive quantity {}",
                adjustment.id, adjustment.quantity
            )));
        }

        let _lock = self
            .locks
            .acquire(LockKey::Product(adjustment.product_id), self.lock_timeout)
            .await?;

        if self.applied.contains(&adjustment.id) {
            debug!("Stock adjustment already applied");
            return Ok(false);
        }

        let current = self.on_hand(adjustment.product_id);
        let next = current + adjustment.signed_quantity();
        if next < 0 {
            return Err(ServiceError::InsufficientStock(format!(
                "Product {} has {} on hand, cannot remove {}",
                adjustment.product_id, current, adjustment.quantity
            )));
        }

        self.on_hand.insert(adjustment.product_id, next);
        self.applied.insert(adjustment.id);
        info!(
            movement = %adjustment.movement,
            direction = %adjustment.direction,
            quantity = adjustment.quantity,
            on_hand = next,
            "Stock adjusted"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AdjustmentContext, MovementType};
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn adjustment(product_id: Uuid, quantity: i32, movement: MovementType) -> StockAdjustment {
        StockAdjustment::new(
            product_id,
            quantity,
            movement,
            AdjustmentContext {
                purchase_order_id: None,
                user_id: Uuid::new_v4(),
                reason: None,
            },
        )
    }

    fn inventory() -> InMemoryInventory {
        InMemoryInventory::new(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn redelivery_is_applied_once() {
        let inventory = inventory();
        let product = Uuid::new_v4();
        let receipt = adjustment(product, 12, MovementType::PurchaseReceipt);

        assert!(inventory.adjust_stock(&receipt).await.unwrap());
        assert!(!inventory.adjust_stock(&receipt).await.unwrap());
        assert_eq!(inventory.on_hand(product), 12);
    }

    #[tokio::test]
    async fn removal_cannot_go_negative() {
        let inventory = inventory();
        let product = Uuid::new_v4();
        inventory.set_on_hand(product, 3);

        let err = inventory
            .adjust_stock(&adjustment(product, 5, MovementType::Sale))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::InsufficientStock(_));
        assert_eq!(inventory.on_hand(product), 3);
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let inventory = inventory();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        inventory.set_on_hand(a, 10);
        inventory.set_on_hand(b, 1);

        let batch = vec![
            adjustment(a, 4, MovementType::Sale),
            adjustment(b, 2, MovementType::Sale),
        ];
        assert!(inventory.apply_batch(&batch).await.is_err());
        assert_eq!(inventory.on_hand(a), 10);
        assert_eq!(inventory.on_hand(b), 1);

        let batch = vec![
            adjustment(a, 4, MovementType::Sale),
            adjustment(b, 1, MovementType::Sale),
            adjustment(b, 6, MovementType::PurchaseReceipt),
        ];
        assert_eq!(inventory.apply_batch(&batch).await.unwrap(), 3);
        assert_eq!(inventory.on_hand(a), 6);
        assert_eq!(inventory.on_hand(b), 6);
        assert!(inventory.locks.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_receipts_are_not_lost() {
        let inventory = Arc::new(inventory());
        let product = Uuid::new_v4();

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let inventory = inventory.clone();
                tokio::spawn(async move {
                    inventory
                        .adjust_stock(&adjustment(product, 1, MovementType::PurchaseReceipt))
                        .await
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().unwrap());
        }
        assert_eq!(inventory.on_hand(product), 50);
        assert!(inventory.locks.is_empty());
    }
}
