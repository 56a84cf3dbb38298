#![allow(dead_code)]

use std::time::Duration;

use procurement_engine::{
    auth::{CallerContext, Role},
    commands::purchaseorders::{CreatePurchaseOrderCommand, ItemDraft},
    config::EngineConfig,
    events::Event,
    models::PurchaseOrder,
    services::{InMemoryHandles, PurchaseOrderService},
};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Helper harness wiring the service to process-local collaborators.
pub struct TestEngine {
    pub service: PurchaseOrderService,
    pub handles: InMemoryHandles,
    pub admin: CallerContext,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        procurement_engine::config::init_tracing("debug", false);
        let (service, handles) = PurchaseOrderService::in_memory(config);
        Self {
            service,
            handles,
            admin: caller(Role::Admin),
        }
    }

    /// Creates a draft order with one line per `(name, quantity, unit_cost)`.
    pub async fn draft(&self, lines: &[(&str, i64, Decimal)]) -> PurchaseOrder {
        let items = lines
            .iter()
            .map(|(name, quantity, unit_cost)| {
                ItemDraft::new(Uuid::new_v4(), *name, Decimal::from(*quantity), *unit_cost)
            })
            .collect();
        self.service
            .create_purchase_order(
                Some(&self.admin),
                CreatePurchaseOrderCommand::new(Uuid::new_v4(), items),
            )
            .await
            .expect("create purchase order")
    }

    /// A draft taken through approval, ready to receive against.
    pub async fn approved(&self, lines: &[(&str, i64, Decimal)]) -> PurchaseOrder {
        let order = self.draft(lines).await;
        self.service
            .approve(Some(&self.admin), order.id, None)
            .await
            .expect("approve purchase order")
    }

    /// Everything emitted on the event channel so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.handles.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        environment: "test".into(),
        lock_timeout_ms: 2_000,
        persistence_timeout_ms: 2_000,
        event_channel_capacity: 4_096,
        ..EngineConfig::default()
    }
}

pub fn caller(role: Role) -> CallerContext {
    CallerContext::new(Uuid::new_v4(), role, format!("{}@example.com", role))
}

pub fn short_timeout(role: Role, millis: u64) -> CallerContext {
    caller(role).with_timeout(Duration::from_millis(millis))
}
