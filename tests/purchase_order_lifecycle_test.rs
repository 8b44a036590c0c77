mod common;

use std::sync::Arc;

use anyhow::anyhow;
use assert_matches::assert_matches;
use async_trait::async_trait;
use common::{assert_dec, keep_lines, TestDb};
use procura::{
    entities::{
        payment::PaymentType,
        purchase_order::{self, PaymentMethod, PurchaseOrderStatus},
        purchase_order_line,
    },
    errors::ServiceError,
    services::{
        purchase_orders::{DocumentEmitter, EditHeader, EditLine, EditPurchaseOrder, ReceiptLine},
    },
};
use rust_decimal_macros::dec;
use uuid::Uuid;

struct BrokenEmitter;

#[async_trait]
impl DocumentEmitter for BrokenEmitter {
    async fn emit(
        &self,
        _order: &purchase_order::Model,
        _lines: &[purchase_order_line::Model],
    ) -> anyhow::Result<String> {
        Err(anyhow!("storage unavailable"))
    }
}

/// Records what each emission was handed.
#[derive(Default)]
struct RecordingEmitter {
    seen: std::sync::Mutex<Vec<(PurchaseOrderStatus, Vec<Uuid>)>>,
}

#[async_trait]
impl DocumentEmitter for RecordingEmitter {
    async fn emit(
        &self,
        order: &purchase_order::Model,
        lines: &[purchase_order_line::Model],
    ) -> anyhow::Result<String> {
        let ids = lines.iter().map(|l| l.id).collect();
        self.seen
            .lock()
            .map_err(|_| anyhow!("poisoned"))?
            .push((order.status, ids));
        Ok(format!("doc/{}", order.code))
    }
}

fn header(order: &purchase_order::Model) -> EditHeader {
    EditHeader {
        notes: order.notes.clone(),
        expected_delivery_date: order.expected_delivery_date,
        delivery_location_id: order.delivery_location_id,
        payment_method: order.payment_method,
        clear_forced_total: false,
        changed_by: Some("buyer".to_string()),
    }
}

#[tokio::test]
async fn authorization_fires_once() {
    let db = TestDb::new().await;
    let draft = db.draft_order(dec!(2), dec!(100)).await;
    let orders = &db.services.purchase_orders;

    orders.submit_for_authorization(draft.order.id).await.unwrap();
    let outcome = orders
        .authorize(draft.order.id, "director".to_string())
        .await
        .unwrap();

    assert_eq!(outcome.order.status, PurchaseOrderStatus::Approved);
    assert_eq!(outcome.order.authorized_by.as_deref(), Some("director"));
    assert_eq!(outcome.document_handle.as_deref(), Some(draft.order.code.as_str()));
    assert!(outcome.warnings.is_empty());

    let err = orders
        .authorize(draft.order.id, "director".to_string())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition { .. });

    assert!(db.events.wait_for("purchase_order_authorized", 1).await);
    let names = db.events.names().await;
    assert_eq!(
        names.iter().filter(|n| **n == "purchase_order_authorized").count(),
        1
    );
}

#[tokio::test]
async fn failed_document_emission_keeps_the_approval() {
    let db = TestDb::with_emitter(Arc::new(BrokenEmitter)).await;
    let draft = db.draft_order(dec!(1), dec!(10)).await;
    let orders = &db.services.purchase_orders;

    orders.submit_for_authorization(draft.order.id).await.unwrap();
    let outcome = orders
        .authorize(draft.order.id, "director".to_string())
        .await
        .unwrap();

    assert!(outcome.document_handle.is_none());
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("storage unavailable"));

    let stored = orders.get_order(draft.order.id).await.unwrap();
    assert_eq!(stored.status, PurchaseOrderStatus::Approved);
    assert!(stored.document_handle.is_none());
}

#[tokio::test]
async fn emitter_receives_the_approved_order_and_its_lines() {
    let emitter = Arc::new(RecordingEmitter::default());
    let db = TestDb::with_emitter(emitter.clone()).await;
    let draft = db.draft_order(dec!(3), dec!(20)).await;
    let orders = &db.services.purchase_orders;

    orders.submit_for_authorization(draft.order.id).await.unwrap();
    let outcome = orders
        .authorize(draft.order.id, "director".to_string())
        .await
        .unwrap();

    let expected = format!("doc/{}", draft.order.code);
    assert_eq!(outcome.document_handle.as_deref(), Some(expected.as_str()));
    assert!(outcome.warnings.is_empty());

    let seen = emitter.seen.lock().unwrap().clone();
    let line_ids: Vec<Uuid> = draft.lines.iter().map(|l| l.id).collect();
    assert_eq!(seen, vec![(PurchaseOrderStatus::Approved, line_ids)]);

    let stored = orders.get_order(draft.order.id).await.unwrap();
    assert_eq!(stored.document_handle.as_deref(), Some(expected.as_str()));
}

#[tokio::test]
async fn skipping_authorization_is_an_invalid_transition() {
    let db = TestDb::new().await;
    let draft = db.draft_order(dec!(1), dec!(10)).await;

    let err = db
        .services
        .purchase_orders
        .start_processing(draft.order.id)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::InvalidTransition { from, .. } if from == "Draft"
    );
}

#[tokio::test]
async fn rejected_orders_can_be_resubmitted() {
    let db = TestDb::new().await;
    let draft = db.draft_order(dec!(1), dec!(10)).await;
    let orders = &db.services.purchase_orders;

    orders.submit_for_authorization(draft.order.id).await.unwrap();
    let rejected = orders
        .reject(draft.order.id, Some("price too high".to_string()))
        .await
        .unwrap();
    assert_eq!(rejected.status, PurchaseOrderStatus::Rejected);

    let resubmitted = orders.submit_for_authorization(draft.order.id).await.unwrap();
    assert_eq!(resubmitted.status, PurchaseOrderStatus::PendingAuthorization);
}

#[tokio::test]
async fn edit_replaces_lines_and_tracks_requisition_quantities() {
    let db = TestDb::new().await;
    let draft = db.draft_order(dec!(5), dec!(100)).await;
    let requisition_line_id = draft.lines[0].requisition_line_id.unwrap();

    let mut lines = keep_lines(&draft.lines);
    lines[0].quantity = dec!(3);
    lines.push(EditLine {
        id: None,
        material_id: None,
        description: "Installation service".to_string(),
        quantity: dec!(1),
        unit_price: dec!(50),
        is_import: false,
    });

    let outcome = db
        .services
        .purchase_orders
        .edit(
            draft.order.id,
            EditPurchaseOrder {
                header: header(&draft.order),
                lines,
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.modified, vec![draft.lines[0].id]);
    assert_eq!(outcome.added.len(), 1);
    assert!(outcome.removed.is_empty());
    assert_eq!(outcome.lines.len(), 2);
    assert_eq!(outcome.lines[1].line_number, 2);
    assert_dec(outcome.order.subtotal, dec!(350));
    assert_dec(outcome.order.tax, dec!(56));
    assert_dec(outcome.order.total, dec!(406));

    let line = db
        .services
        .requisitions
        .get_requisition_line(requisition_line_id)
        .await
        .unwrap();
    assert_dec(line.quantity_processed, dec!(3));

    let changes = db
        .services
        .purchase_orders
        .list_changes(draft.order.id)
        .await
        .unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].id, outcome.change.id);
    assert_ne!(changes[0].before, changes[0].after);
}

#[tokio::test]
async fn removing_every_line_is_refused() {
    let db = TestDb::new().await;
    let draft = db.draft_order(dec!(1), dec!(10)).await;

    let err = db
        .services
        .purchase_orders
        .edit(
            draft.order.id,
            EditPurchaseOrder {
                header: header(&draft.order),
                lines: Vec::new(),
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::EmptyOrder(id) if id == draft.order.id);
}

#[tokio::test]
async fn removed_lines_give_back_requisition_quantity() {
    let db = TestDb::new().await;
    let draft = db.draft_order(dec!(4), dec!(10)).await;
    let requisition_line_id = draft.lines[0].requisition_line_id.unwrap();

    let replacement = EditLine {
        id: None,
        material_id: Some(Uuid::new_v4()),
        description: "Substitute part".to_string(),
        quantity: dec!(2),
        unit_price: dec!(12),
        is_import: true,
    };
    let outcome = db
        .services
        .purchase_orders
        .edit(
            draft.order.id,
            EditPurchaseOrder {
                header: header(&draft.order),
                lines: vec![replacement],
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.removed, vec![draft.lines[0].id]);
    assert_dec(outcome.order.tax, dec!(0));
    assert_dec(outcome.order.total, dec!(24));

    let line = db
        .services
        .requisitions
        .get_requisition_line(requisition_line_id)
        .await
        .unwrap();
    assert_dec(line.quantity_processed, dec!(0));
}

#[tokio::test]
async fn unknown_line_ids_are_not_found() {
    let db = TestDb::new().await;
    let draft = db.draft_order(dec!(1), dec!(10)).await;

    let mut lines = keep_lines(&draft.lines);
    lines[0].id = Some(Uuid::new_v4());

    let err = db
        .services
        .purchase_orders
        .edit(
            draft.order.id,
            EditPurchaseOrder {
                header: header(&draft.order),
                lines,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn raising_a_line_past_the_requisition_is_over_allocation() {
    let db = TestDb::new().await;
    let draft = db.draft_order(dec!(2), dec!(10)).await;

    let mut lines = keep_lines(&draft.lines);
    lines[0].quantity = dec!(3);

    let err = db
        .services
        .purchase_orders
        .edit(
            draft.order.id,
            EditPurchaseOrder {
                header: header(&draft.order),
                lines,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::OverAllocation { .. });

    let stored = db
        .services
        .purchase_orders
        .get_lines(draft.order.id)
        .await
        .unwrap();
    assert_dec(stored[0].quantity, dec!(2));
}

#[tokio::test]
async fn approved_orders_are_not_editable() {
    let db = TestDb::new().await;
    let draft = db.draft_order(dec!(1), dec!(10)).await;
    let orders = &db.services.purchase_orders;
    orders.submit_for_authorization(draft.order.id).await.unwrap();
    orders
        .authorize(draft.order.id, "director".to_string())
        .await
        .unwrap();

    let err = orders
        .edit(
            draft.order.id,
            EditPurchaseOrder {
                header: header(&draft.order),
                lines: keep_lines(&draft.lines),
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotEditable { .. });
}

#[tokio::test]
async fn forced_total_is_kept_until_cleared() {
    let db = TestDb::new().await;
    let req = db.requisition("ENG").await;
    let line = db.line(req.id, dec!(2)).await;
    let mut input = common::quote(Uuid::new_v4(), dec!(100), dec!(2), false);
    input.forced_total = Some(dec!(230));
    let option = db
        .services
        .requisitions
        .add_quote_option(line.id, input)
        .await
        .unwrap();
    db.services
        .requisitions
        .select_quote_option(option.id)
        .await
        .unwrap();
    let draft = db
        .services
        .consolidation
        .consolidate_quotes(req.id)
        .await
        .unwrap()
        .remove(0);

    let mut lines = keep_lines(&draft.lines);
    lines[0].quantity = dec!(1);
    let kept = db
        .services
        .purchase_orders
        .edit(
            draft.order.id,
            EditPurchaseOrder {
                header: header(&draft.order),
                lines,
            },
        )
        .await
        .unwrap();
    assert!(kept.order.is_total_forced);
    assert_dec(kept.order.subtotal, dec!(100));
    assert_dec(kept.order.total, dec!(230));

    let mut cleared_header = header(&kept.order);
    cleared_header.clear_forced_total = true;
    let cleared = db
        .services
        .purchase_orders
        .edit(
            draft.order.id,
            EditPurchaseOrder {
                header: cleared_header,
                lines: keep_lines(&kept.lines),
            },
        )
        .await
        .unwrap();
    assert!(!cleared.order.is_total_forced);
    assert_dec(cleared.order.total, dec!(116));
}

#[tokio::test]
async fn hold_returns_to_the_prior_status() {
    let db = TestDb::new().await;
    let (order, _) = db
        .order_in_process(Uuid::new_v4(), dec!(1), dec!(10), Uuid::new_v4())
        .await;
    let orders = &db.services.purchase_orders;

    let held = orders.place_on_hold(order.id).await.unwrap();
    assert_eq!(held.status, PurchaseOrderStatus::OnHold);
    assert_eq!(held.held_from_status, Some(PurchaseOrderStatus::InProcess));
    assert_matches!(
        orders.place_on_hold(order.id).await,
        Err(ServiceError::InvalidTransition { .. })
    );

    let resumed = orders.resume(order.id).await.unwrap();
    assert_eq!(resumed.status, PurchaseOrderStatus::InProcess);
    assert!(resumed.held_from_status.is_none());

    assert_matches!(
        orders.resume(order.id).await,
        Err(ServiceError::InvalidTransition { .. })
    );
}

#[tokio::test]
async fn cancel_releases_requisition_quantity_and_options() {
    let db = TestDb::new().await;
    let draft = db.draft_order(dec!(3), dec!(10)).await;
    let requisition_id = draft.order.requisition_id;
    let requisition_line_id = draft.lines[0].requisition_line_id.unwrap();

    let cancelled = db
        .services
        .purchase_orders
        .cancel(draft.order.id)
        .await
        .unwrap();
    assert_eq!(cancelled.status, PurchaseOrderStatus::Cancelled);

    let line = db
        .services
        .requisitions
        .get_requisition_line(requisition_line_id)
        .await
        .unwrap();
    assert_dec(line.quantity_processed, dec!(0));

    let options = db
        .services
        .requisitions
        .list_quote_options(requisition_line_id)
        .await
        .unwrap();
    assert!(options.iter().all(|o| o.purchase_order_id.is_none()));

    assert_matches!(
        db.services.purchase_orders.cancel(draft.order.id).await,
        Err(ServiceError::InvalidTransition { .. })
    );

    // Re-selecting lets the requisition be consolidated again.
    db.services
        .requisitions
        .select_quote_option(options[0].id)
        .await
        .unwrap();
    let again = db
        .services
        .consolidation
        .consolidate_quotes(requisition_id)
        .await
        .unwrap();
    assert_eq!(again.len(), 1);
    assert_ne!(again[0].order.id, draft.order.id);
}

#[tokio::test]
async fn stock_project_receipts_land_in_the_available_pool() {
    let db = TestDb::new().await;
    let location = Uuid::new_v4();
    let (order, lines) = db
        .order_in_process(db.config.stock_project_id, dec!(10), dec!(5), location)
        .await;
    let material = lines[0].material_id.unwrap();
    let orders = &db.services.purchase_orders;

    let partial = orders
        .receive_purchase_order(
            order.id,
            vec![ReceiptLine {
                line_id: lines[0].id,
                quantity: dec!(4),
            }],
        )
        .await
        .unwrap();
    assert_eq!(partial.order.status, PurchaseOrderStatus::PartiallyDelivered);
    assert_eq!(partial.movements.len(), 1);
    assert_eq!(partial.movements[0].reference_id, Some(order.id));

    let full = orders
        .receive_purchase_order(
            order.id,
            vec![ReceiptLine {
                line_id: lines[0].id,
                quantity: dec!(6),
            }],
        )
        .await
        .unwrap();
    assert_eq!(full.order.status, PurchaseOrderStatus::Delivered);

    let record = db
        .services
        .inventory
        .find_record(material, location)
        .await
        .unwrap()
        .unwrap();
    assert_dec(record.available, dec!(10));
    assert_dec(record.assigned, dec!(0));

    assert_matches!(
        orders
            .receive_purchase_order(
                order.id,
                vec![ReceiptLine {
                    line_id: lines[0].id,
                    quantity: dec!(1),
                }],
            )
            .await,
        Err(ServiceError::InvalidTransition { .. })
    );
}

#[tokio::test]
async fn project_receipts_are_committed_to_the_project() {
    let db = TestDb::new().await;
    let location = Uuid::new_v4();
    let project = Uuid::new_v4();
    let (order, lines) = db
        .order_in_process(project, dec!(8), dec!(5), location)
        .await;
    let material = lines[0].material_id.unwrap();

    db.services
        .purchase_orders
        .receive_purchase_order(
            order.id,
            vec![ReceiptLine {
                line_id: lines[0].id,
                quantity: dec!(8),
            }],
        )
        .await
        .unwrap();

    let inventory = &db.services.inventory;
    let record = inventory
        .find_record(material, location)
        .await
        .unwrap()
        .unwrap();
    assert_dec(record.available, dec!(0));
    assert_dec(record.assigned, dec!(8));

    let assignments = inventory.list_assignments(material, location).await.unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].project_id, project);
    assert_eq!(assignments[0].site_id, order.site_id);
    assert_dec(assignments[0].quantity, dec!(8));
}

#[tokio::test]
async fn receiving_more_than_pending_is_refused() {
    let db = TestDb::new().await;
    let (order, lines) = db
        .order_in_process(Uuid::new_v4(), dec!(2), dec!(5), Uuid::new_v4())
        .await;

    let err = db
        .services
        .purchase_orders
        .receive_purchase_order(
            order.id,
            vec![ReceiptLine {
                line_id: lines[0].id,
                quantity: dec!(3),
            }],
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let stored = db.services.purchase_orders.get_lines(order.id).await.unwrap();
    assert_dec(stored[0].quantity_received, dec!(0));
}

#[tokio::test]
async fn receipt_without_delivery_location_is_refused() {
    let db = TestDb::new().await;
    let draft = db.draft_order(dec!(1), dec!(10)).await;
    let orders = &db.services.purchase_orders;
    orders.submit_for_authorization(draft.order.id).await.unwrap();
    orders
        .authorize(draft.order.id, "director".to_string())
        .await
        .unwrap();
    orders.start_processing(draft.order.id).await.unwrap();

    let err = orders
        .receive_purchase_order(
            draft.order.id,
            vec![ReceiptLine {
                line_id: draft.lines[0].id,
                quantity: dec!(1),
            }],
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn close_waits_for_settlement() {
    let db = TestDb::new().await;
    let (order, lines) = db
        .order_in_process(Uuid::new_v4(), dec!(1), dec!(100), Uuid::new_v4())
        .await;
    assert_eq!(order.payment_method, PaymentMethod::CreditTerm);

    db.services
        .purchase_orders
        .receive_purchase_order(
            order.id,
            vec![ReceiptLine {
                line_id: lines[0].id,
                quantity: dec!(1),
            }],
        )
        .await
        .unwrap();

    assert_matches!(
        db.services.purchase_orders.close(order.id).await,
        Err(ServiceError::ValidationError(_))
    );

    db.services
        .payments
        .post_payment(order.id, dec!(116), PaymentType::Full, None)
        .await
        .unwrap();

    let closed = db.services.purchase_orders.close(order.id).await.unwrap();
    assert_eq!(closed.status, PurchaseOrderStatus::Closed);
    assert_matches!(
        db.services.purchase_orders.cancel(order.id).await,
        Err(ServiceError::InvalidTransition { .. })
    );
}
