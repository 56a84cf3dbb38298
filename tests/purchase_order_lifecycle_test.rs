mod common;

use assert_matches::assert_matches;
use chrono::Duration as ChronoDuration;
use procurement_engine::{
    audit::AuditEvent,
    auth::{DenialCode, PurchaseOrderAction, Role},
    commands::{
        purchaseorders::{
            ItemDraft, ReceiveLine, ReceivePurchaseOrderCommand, RejectPurchaseOrderCommand,
            UpdatePurchaseOrder, UpdatePurchaseOrderCommand,
        },
        Command,
    },
    config::EngineConfig,
    errors::ServiceError,
    events::Event,
    models::{ApprovalDecision, ItemCondition, PurchaseOrderStatus, QualityStatus},
    workflow::ValidationErrorCode,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;
use uuid::Uuid;

use common::{caller, test_config, TestEngine};

#[tokio::test]
async fn partial_then_full_receipt() {
    let engine = TestEngine::new();
    let order = engine.approved(&[("Copper pipe", 100, dec!(3.5))]).await;
    let item_id = order.items[0].id;
    let warehouse = caller(Role::Warehouse);

    engine
        .service
        .receive(
            Some(&warehouse),
            order.id,
            Some(vec![ReceiveLine::for_item(item_id, dec!(30))]),
            None,
            None,
        )
        .await
        .unwrap();
    let outcome = engine
        .service
        .receive(
            Some(&warehouse),
            order.id,
            Some(vec![ReceiveLine::for_item(item_id, dec!(40))]),
            None,
            None,
        )
        .await
        .unwrap();

    let item = &outcome.order.items[0];
    assert_eq!(outcome.order.status, PurchaseOrderStatus::PartiallyReceived);
    assert_eq!(item.received_quantity, 70);
    assert_eq!(item.pending_quantity, 30);
    assert!(outcome.order.received_date.is_none());
    assert!(outcome.transitions.is_empty());

    let outcome = engine
        .service
        .receive(
            Some(&warehouse),
            order.id,
            Some(vec![ReceiveLine::for_item(item_id, dec!(30))]),
            None,
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.order.status, PurchaseOrderStatus::FullyReceived);
    assert_eq!(outcome.order.items[0].pending_quantity, 0);
    assert!(outcome.order.received_date.is_some());
    assert_eq!(engine.handles.inventory.on_hand(order.items[0].product_id), 100);

    let history = engine
        .service
        .receiving_history(Some(&warehouse), order.id)
        .await
        .unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history.iter().map(|r| r.total_quantity).sum::<i64>(), 100);
}

#[tokio::test]
async fn over_receipt_is_rejected_without_side_effects() {
    let engine = TestEngine::new();
    let order = engine.approved(&[("Copper pipe", 100, dec!(3.5))]).await;

    let err = engine
        .service
        .receive(
            Some(&engine.admin),
            order.id,
            Some(vec![ReceiveLine::for_item(order.items[0].id, dec!(150))]),
            None,
            None,
        )
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ValidationFailed(report) => {
        assert!(report.has_code(ValidationErrorCode::QuantityExceedsOrdered));
    });
    let stored = engine
        .service
        .get_purchase_order(Some(&engine.admin), order.id)
        .await
        .unwrap();
    assert_eq!(stored, order);
    assert!(engine.handles.repository.outbox(order.id).is_empty());
    assert_eq!(engine.handles.inventory.applied_count(), 0);
}

#[tokio::test]
async fn approval_ceiling_is_enforced_per_role() {
    let engine = TestEngine::new();
    let order = engine.draft(&[("Forklift", 2, dec!(25000))]).await;
    assert_eq!(order.total, dec!(50000));

    let employee = caller(Role::Employee);
    let err = engine
        .service
        .approve(Some(&employee), order.id, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PermissionDenied(denial) => {
        assert_eq!(denial.code, DenialCode::ApprovalLimitExceeded);
    });

    let approved = engine
        .service
        .approve(Some(&engine.admin), order.id, Some("budgeted".into()))
        .await
        .unwrap();
    assert_eq!(approved.status, PurchaseOrderStatus::Approved);
    assert_eq!(approved.approved_by, Some(engine.admin.user_id));

    let history = engine
        .service
        .status_history(Some(&engine.admin), order.id)
        .await
        .unwrap();
    let hops: Vec<_> = history.iter().map(|t| (t.from_status, t.to_status)).collect();
    assert_eq!(
        hops,
        vec![
            (PurchaseOrderStatus::Draft, PurchaseOrderStatus::PendingApproval),
            (PurchaseOrderStatus::PendingApproval, PurchaseOrderStatus::Approved),
        ]
    );

    let approvals = engine
        .service
        .approval_history(Some(&engine.admin), order.id)
        .await
        .unwrap();
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].decision, ApprovalDecision::Approved);
    assert_eq!(approvals[0].amount, dec!(50000));
}

#[tokio::test]
async fn fully_received_order_cannot_be_cancelled() {
    let engine = TestEngine::new();
    let order = engine.approved(&[("Pallet", 5, dec!(10))]).await;
    engine
        .service
        .receive(Some(&engine.admin), order.id, None, None, None)
        .await
        .unwrap();

    let err = engine
        .service
        .cancel(Some(&engine.admin), order.id, Some("changed mind".into()))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PermissionDenied(denial) => {
        assert_eq!(denial.code, DenialCode::CancellationNotAllowed);
    });

    let err = engine
        .service
        .receive(Some(&engine.admin), order.id, None, None, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationFailed(report) => {
        assert!(report.has_code(ValidationErrorCode::AlreadyFullyReceived));
    });
}

#[tokio::test]
async fn cancellation_is_blocked_once_goods_arrive() {
    let engine = TestEngine::new();
    let order = engine.approved(&[("Pallet", 5, dec!(10))]).await;
    let sent = engine
        .service
        .send_to_supplier(Some(&engine.admin), order.id, None)
        .await
        .unwrap();
    assert_eq!(sent.status, PurchaseOrderStatus::SentToSupplier);

    engine
        .service
        .receive(
            Some(&engine.admin),
            order.id,
            Some(vec![ReceiveLine::for_item(order.items[0].id, dec!(1))]),
            None,
            None,
        )
        .await
        .unwrap();

    let err = engine
        .service
        .cancel(Some(&engine.admin), order.id, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PermissionDenied(denial) => {
        assert_eq!(denial.code, DenialCode::CancellationNotAllowed);
    });
}

#[tokio::test]
async fn auto_mode_from_approved_records_both_receiving_hops() {
    let engine = TestEngine::new();
    let order = engine
        .approved(&[("Widget", 3, dec!(1)), ("Gadget", 7, dec!(2))])
        .await;

    let outcome = engine
        .service
        .receive(Some(&engine.admin), order.id, None, Some("Dock 4".into()), None)
        .await
        .unwrap();

    let hops: Vec<_> = outcome
        .transitions
        .iter()
        .map(|t| (t.from_status, t.to_status))
        .collect();
    assert_eq!(
        hops,
        vec![
            (PurchaseOrderStatus::Approved, PurchaseOrderStatus::PartiallyReceived),
            (PurchaseOrderStatus::PartiallyReceived, PurchaseOrderStatus::FullyReceived),
        ]
    );
    assert_eq!(outcome.record.lines.len(), 2);
    assert_eq!(outcome.record.stock_adjustments.len(), 2);
    assert!(outcome.undelivered_stock_adjustments.is_empty());
    assert!(engine
        .handles
        .repository
        .outbox(order.id)
        .iter()
        .all(|entry| !entry.is_pending()));
}

#[tokio::test]
async fn receipt_by_product_copies_quality_metadata() {
    let engine = TestEngine::new();
    let order = engine.approved(&[("Vaccine", 10, dec!(8))]).await;
    let product_id = order.items[0].product_id;
    let expiry = chrono::NaiveDate::from_ymd_opt(2027, 3, 31);

    let command = ReceivePurchaseOrderCommand {
        id: order.id,
        items: Some(vec![ReceiveLine::for_product(product_id, dec!(4))
            .with_batch("LOT-77", expiry)
            .with_quality(ItemCondition::Good, QualityStatus::Approved)]),
        reason: None,
        notes: Some("cold chain ok".into()),
    };
    let outcome = command
        .execute(&engine.service, Some(&engine.admin))
        .await
        .unwrap();

    let item = &outcome.order.items[0];
    assert_eq!(item.received_quantity, 4);
    assert_eq!(item.batch_number.as_deref(), Some("LOT-77"));
    assert_eq!(item.expiry_date, expiry);
    assert_eq!(item.quality_status, Some(QualityStatus::Approved));
    assert_eq!(outcome.record.notes.as_deref(), Some("cold chain ok"));
}

#[tokio::test]
async fn fractional_and_zero_quantities_are_rejected() {
    let engine = TestEngine::new();
    let order = engine.approved(&[("Cable", 10, dec!(1))]).await;
    let item_id = order.items[0].id;

    let err = engine
        .service
        .receive(
            Some(&engine.admin),
            order.id,
            Some(vec![
                ReceiveLine::for_item(item_id, dec!(1.5)),
                ReceiveLine::for_item(Uuid::new_v4(), dec!(0)),
            ]),
            None,
            None,
        )
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ValidationFailed(report) => {
        assert!(report.has_code(ValidationErrorCode::QuantityNotInteger));
        assert!(report.has_code(ValidationErrorCode::QuantityZero));
    });
}

#[tokio::test]
async fn receiving_before_approval_is_denied() {
    let engine = TestEngine::new();
    let order = engine.draft(&[("Cable", 10, dec!(1))]).await;

    let err = engine
        .service
        .receive(Some(&engine.admin), order.id, None, None, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PermissionDenied(denial) => {
        assert_eq!(denial.code, DenialCode::ReceivingNotAllowed);
    });
}

#[tokio::test]
async fn rejection_returns_order_to_draft() {
    let engine = TestEngine::new();
    let order = engine.draft(&[("Desk", 4, dec!(150))]).await;
    let manager = caller(Role::Manager);

    engine
        .service
        .submit_for_approval(Some(&engine.admin), order.id, None)
        .await
        .unwrap();
    let rejected = RejectPurchaseOrderCommand {
        id: order.id,
        reason: "Wrong supplier".into(),
    }
    .execute(&engine.service, Some(&manager))
    .await
    .unwrap();
    assert_eq!(rejected.status, PurchaseOrderStatus::Draft);

    let approvals = engine
        .service
        .approval_history(Some(&manager), order.id)
        .await
        .unwrap();
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].decision, ApprovalDecision::Rejected);
    assert_eq!(approvals[0].approver_role, Role::Manager);
    assert_eq!(approvals[0].level, 2);
}

#[tokio::test]
async fn full_lifecycle_ends_closed() {
    let engine = TestEngine::new();
    let order = engine.approved(&[("Chair", 2, dec!(80))]).await;
    engine
        .service
        .receive(Some(&engine.admin), order.id, None, None, None)
        .await
        .unwrap();

    let closed = engine
        .service
        .transition_to(Some(&engine.admin), order.id, PurchaseOrderStatus::Closed, None)
        .await
        .unwrap();
    assert_eq!(closed.status, PurchaseOrderStatus::Closed);
    assert!(engine
        .service
        .get_valid_transitions(PurchaseOrderStatus::Closed)
        .is_empty());
    assert!(engine
        .service
        .get_user_actions(Some(&engine.admin), &closed)
        .iter()
        .all(|action| matches!(action, PurchaseOrderAction::View | PurchaseOrderAction::ViewHistory)));
}

#[tokio::test]
async fn update_replaces_items_and_honours_expected_version() {
    let engine = TestEngine::new();
    let order = engine.draft(&[("Lamp", 1, dec!(20))]).await;

    let updated = UpdatePurchaseOrder {
        id: order.id,
        changes: UpdatePurchaseOrderCommand {
            items: Some(vec![ItemDraft::new(Uuid::new_v4(), "Lamp XL", dec!(3), dec!(30))]),
            tax: Some(dec!(9)),
            expected_version: Some(order.version),
            ..Default::default()
        },
    }
    .execute(&engine.service, Some(&engine.admin))
    .await
    .unwrap();
    assert_eq!(updated.subtotal, dec!(90));
    assert_eq!(updated.total, dec!(99));
    assert_eq!(updated.version, order.version + 1);

    let stale = UpdatePurchaseOrderCommand {
        notes: Some("late edit".into()),
        expected_version: Some(order.version),
        ..Default::default()
    };
    let err = engine
        .service
        .update_purchase_order(Some(&engine.admin), order.id, stale)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ConcurrentModification(id) if id == order.id);
}

#[tokio::test]
async fn status_update_goes_through_the_lifecycle_operation() {
    let engine = TestEngine::new();
    let order = engine.approved(&[("Lamp", 1, dec!(20))]).await;

    let sent = engine
        .service
        .update_purchase_order(
            Some(&engine.admin),
            order.id,
            UpdatePurchaseOrderCommand {
                status: Some(PurchaseOrderStatus::SentToSupplier),
                reason: Some("emailed".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(sent.status, PurchaseOrderStatus::SentToSupplier);

    let err = engine
        .service
        .update_purchase_order(
            Some(&engine.admin),
            order.id,
            UpdatePurchaseOrderCommand {
                notes: Some("too late".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PermissionDenied(denial) => {
        assert_eq!(denial.code, DenialCode::EditNotAllowed);
    });
}

#[tokio::test]
async fn rejected_status_change_discards_field_edits() {
    let engine = TestEngine::new();
    let order = engine.draft(&[("Lamp", 1, dec!(20))]).await;

    let err = engine
        .service
        .update_purchase_order(
            Some(&engine.admin),
            order.id,
            UpdatePurchaseOrderCommand {
                notes: Some("changed".into()),
                status: Some(PurchaseOrderStatus::Closed),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::ValidationFailed(_) | ServiceError::PermissionDenied(_)
    ));

    let stored = engine
        .service
        .get_purchase_order(Some(&engine.admin), order.id)
        .await
        .unwrap();
    assert_eq!(stored.notes, order.notes);
    assert_eq!(stored.version, order.version);
    assert_eq!(stored.status, PurchaseOrderStatus::Draft);
}

#[tokio::test]
async fn field_edits_and_status_change_share_one_commit() {
    let engine = TestEngine::new();
    let order = engine.draft(&[("Lamp", 1, dec!(20))]).await;

    let submitted = engine
        .service
        .update_purchase_order(
            Some(&engine.admin),
            order.id,
            UpdatePurchaseOrderCommand {
                notes: Some("rush".into()),
                status: Some(PurchaseOrderStatus::PendingApproval),
                expected_version: Some(order.version),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(submitted.status, PurchaseOrderStatus::PendingApproval);
    assert_eq!(submitted.notes.as_deref(), Some("rush"));
    assert_eq!(submitted.version, order.version + 1);
}

#[tokio::test]
async fn anonymous_callers_are_refused_before_lookup() {
    let engine = TestEngine::new();
    let order = engine.draft(&[("Lamp", 1, dec!(20))]).await;

    let err = engine
        .service
        .update_purchase_order(None, order.id, UpdatePurchaseOrderCommand::default())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PermissionDenied(denial) => {
        assert_eq!(denial.code, DenialCode::AuthenticationRequired);
    });

    // An unknown id must not reveal itself as missing to an anonymous caller.
    let err = engine
        .service
        .get_purchase_order(None, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PermissionDenied(denial) => {
        assert_eq!(denial.code, DenialCode::AuthenticationRequired);
    });

    let err = engine
        .service
        .status_history(None, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PermissionDenied(_));
}

#[tokio::test]
async fn empty_update_still_requires_view_permission() {
    let engine = TestEngine::new();
    let order = engine.draft(&[("Lamp", 1, dec!(20))]).await;

    let unchanged = engine
        .service
        .update_purchase_order(
            Some(&caller(Role::Viewer)),
            order.id,
            UpdatePurchaseOrderCommand::default(),
        )
        .await
        .unwrap();
    assert_eq!(unchanged.version, order.version);

    let checks = engine
        .service
        .audit_trail(Some(&engine.admin), order.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|entry| matches!(
            entry.event,
            AuditEvent::PermissionCheck { action: PurchaseOrderAction::View, allowed: true, .. }
        ))
        .count();
    assert_eq!(checks, 1);
}

#[tokio::test]
async fn lifecycle_never_waits_on_a_full_event_channel() {
    let engine = TestEngine::with_config(EngineConfig {
        event_channel_capacity: 1,
        ..test_config()
    });

    // Nobody drains `handles.events`, so every send after the first is dropped.
    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        let first = engine.draft(&[("Lamp", 1, dec!(20))]).await;
        let second = engine.draft(&[("Desk", 1, dec!(50))]).await;
        engine
            .service
            .submit_for_approval(Some(&engine.admin), first.id, None)
            .await
            .unwrap();
        engine
            .service
            .approve(Some(&engine.admin), first.id, None)
            .await
            .unwrap();
        engine
            .service
            .cancel(Some(&engine.admin), second.id, Some("duplicate".into()))
            .await
            .unwrap();
        // The order lock was released despite the dropped events.
        engine
            .service
            .get_purchase_order(Some(&engine.admin), first.id)
            .await
            .unwrap()
    })
    .await
    .expect("lifecycle blocked on the event channel");
    assert_eq!(finished.status, PurchaseOrderStatus::Approved);
}

#[tokio::test]
async fn emergency_grant_lifts_ceiling_and_is_audited() {
    let engine = TestEngine::new();
    let order = engine.draft(&[("Generator", 1, dec!(40000))]).await;
    let employee = caller(Role::Employee);

    engine
        .service
        .grant_emergency_access(
            Some(&engine.admin),
            employee.user_id,
            "Storm response",
            ChronoDuration::hours(1),
        )
        .await
        .unwrap();

    let approved = engine
        .service
        .approve(Some(&employee), order.id, None)
        .await
        .unwrap();
    assert_eq!(approved.status, PurchaseOrderStatus::Approved);

    let trail = engine
        .service
        .audit_trail(Some(&engine.admin), order.id)
        .await
        .unwrap();
    assert!(trail.iter().any(|entry| matches!(
        &entry.event,
        AuditEvent::EmergencyOverride { actor, overridden: DenialCode::ApprovalLimitExceeded, .. }
            if *actor == employee.user_id
    )));
    assert!(trail
        .windows(2)
        .all(|pair| pair[0].sequence < pair[1].sequence));
}

#[tokio::test]
async fn emergency_grants_and_revocations_are_audited() {
    let engine = TestEngine::new();
    let employee = caller(Role::Employee);

    let err = engine
        .service
        .grant_emergency_access(Some(&engine.admin), employee.user_id, "Outage", ChronoDuration::zero())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidInput(_));

    let manager = caller(Role::Manager);
    let err = engine
        .service
        .grant_emergency_access(Some(&manager), employee.user_id, "Outage", ChronoDuration::hours(1))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PermissionDenied(denial) => {
        assert_eq!(denial.code, DenialCode::InsufficientPermissions);
    });
    assert!(engine.handles.audit.is_empty().await);

    let grant = engine
        .service
        .grant_emergency_access(Some(&engine.admin), employee.user_id, "Outage", ChronoDuration::hours(1))
        .await
        .unwrap();
    assert!(engine.handles.emergency.active_grant(employee.user_id).is_some());

    let revoked = engine
        .service
        .revoke_emergency_access(Some(&engine.admin), employee.user_id)
        .await
        .unwrap();
    assert_eq!(revoked.map(|g| g.id), Some(grant.id));
    assert!(engine.handles.emergency.active_grant(employee.user_id).is_none());

    let events: Vec<AuditEvent> = engine
        .handles
        .audit
        .all()
        .await
        .into_iter()
        .map(|entry| entry.event)
        .collect();
    assert_eq!(events.len(), 2);
    assert_matches!(&events[0], AuditEvent::EmergencyGrantIssued { grant_id, granted_by, .. } => {
        assert_eq!(*grant_id, grant.id);
        assert_eq!(*granted_by, engine.admin.user_id);
    });
    assert_matches!(&events[1], AuditEvent::EmergencyGrantRevoked { grant_id, revoked_by, .. } => {
        assert_eq!(*grant_id, grant.id);
        assert_eq!(*revoked_by, engine.admin.user_id);
    });
}

#[tokio::test]
async fn emergency_grant_never_bypasses_status_rules() {
    let engine = TestEngine::new();
    let order = engine.approved(&[("Generator", 1, dec!(10))]).await;
    let viewer = caller(Role::Viewer);
    engine
        .service
        .grant_emergency_access(Some(&engine.admin), viewer.user_id, "Audit", ChronoDuration::minutes(5))
        .await
        .unwrap();

    let err = engine
        .service
        .approve(Some(&viewer), order.id, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PermissionDenied(denial) => {
        assert_eq!(denial.code, DenialCode::ApprovalNotAllowed);
    });
}

#[tokio::test]
async fn viewer_sees_only_read_actions() {
    let engine = TestEngine::new();
    let order = engine.approved(&[("Desk", 1, dec!(10))]).await;

    let viewer_actions = engine
        .service
        .get_user_actions(Some(&caller(Role::Viewer)), &order);
    assert_eq!(viewer_actions, vec![PurchaseOrderAction::View]);

    let warehouse_actions = engine
        .service
        .get_user_actions(Some(&caller(Role::Warehouse)), &order);
    assert!(warehouse_actions.contains(&PurchaseOrderAction::Receive));
    assert!(!warehouse_actions.contains(&PurchaseOrderAction::Approve));

    assert!(engine.service.get_user_actions(None, &order).is_empty());
}

#[tokio::test]
async fn every_gate_decision_is_audited() {
    let engine = TestEngine::new();
    let order = engine.approved(&[("Desk", 1, dec!(10))]).await;
    let viewer = caller(Role::Viewer);

    let _ = engine.service.cancel(Some(&viewer), order.id, None).await;

    let trail = engine
        .service
        .audit_trail(Some(&engine.admin), order.id)
        .await
        .unwrap();
    assert!(trail.iter().any(|entry| matches!(
        &entry.event,
        AuditEvent::PermissionCheck { allowed: false, action: PurchaseOrderAction::Cancel, actor: Some(actor), .. }
            if *actor == viewer.user_id
    )));
    assert!(trail.iter().any(|entry| matches!(
        &entry.event,
        AuditEvent::PermissionCheck { allowed: true, action: PurchaseOrderAction::Approve, .. }
    )));
}

#[tokio::test]
async fn events_follow_the_lifecycle() {
    let mut engine = TestEngine::new();
    let order = engine.approved(&[("Desk", 2, dec!(10))]).await;
    engine
        .service
        .receive(Some(&engine.admin), order.id, None, None, None)
        .await
        .unwrap();

    let events = engine.drain_events();
    assert_matches!(events[0], Event::PurchaseOrderCreated { purchase_order_id, .. } if purchase_order_id == order.id);
    assert_matches!(events[1], Event::PurchaseOrderApproved { amount, .. } if amount == dec!(20));
    assert_matches!(events[2], Event::StockAdjusted { quantity: 2, .. });
    assert_matches!(
        events[3],
        Event::PurchaseOrderReceived { quantity: 2, status: PurchaseOrderStatus::FullyReceived, .. }
    );
    assert!(events.iter().all(|event| event.purchase_order_id() == Some(order.id)));
}

#[tokio::test]
async fn legacy_records_are_normalized_on_import() {
    let engine = TestEngine::new();
    let order_id = Uuid::new_v4();
    let item_id = Uuid::new_v4();
    let raw = format!(
        r#"{{
            "id": "{order_id}",
            "po_number": "PO-LEGACY",
            "supplier_id": "{supplier}",
            "items": [{{
                "id": "{item_id}",
                "product_id": "{product}",
                "product_name": "Drill",
                "quantity": 10,
                "unit_cost": "12.00",
                "total": "120.00",
                "quantity_received": 4
            }}],
            "subtotal": "120.00",
            "tax": "0",
            "total": "120.00",
            "status": "partial",
            "created_by": "{creator}",
            "created_at": "2024-01-05T10:00:00Z",
            "updated_at": "2024-01-05T10:00:00Z"
        }}"#,
        supplier = Uuid::new_v4(),
        product = Uuid::new_v4(),
        creator = Uuid::new_v4(),
    );

    let imported = engine.handles.repository.import_json(&raw).unwrap();
    assert_eq!(imported.status, PurchaseOrderStatus::PartiallyReceived);
    assert_eq!(imported.items[0].received_quantity, 4);
    assert_eq!(imported.items[0].pending_quantity, 6);
    assert!(imported.items[0].legacy_received_quantity.is_none());

    let outcome = engine
        .service
        .receive(
            Some(&engine.admin),
            order_id,
            Some(vec![ReceiveLine::for_item(item_id, Decimal::from(6))]),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(outcome.order.status, PurchaseOrderStatus::FullyReceived);
}
