mod common;

use std::collections::BTreeMap;

use assert_matches::assert_matches;
use common::{assert_dec, quote, TestDb};
use procura::{
    entities::{
        incremental_cost_order::{CostType, IncrementalCostStatus},
        inventory_movement::MovementKind,
        purchase_order,
    },
    errors::ServiceError,
    services::incremental_costs::NewIncrementalCost,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

/// Three located orders with base costs 100, 200 and 300.
async fn base_orders(db: &TestDb) -> Vec<purchase_order::Model> {
    let mut orders = Vec::new();
    for price in [dec!(100), dec!(200), dec!(300)] {
        let draft = db.draft_order(dec!(1), price).await;
        let order = db
            .set_delivery_location(&draft.order, &draft.lines, Uuid::new_v4())
            .await;
        orders.push(order);
    }
    orders
}

fn freight(amount: Decimal, orders: &[purchase_order::Model]) -> NewIncrementalCost {
    NewIncrementalCost {
        cost_type: CostType::Freight,
        provider: "Fletes del Norte".to_string(),
        amount,
        currency: "MXN".to_string(),
        exchange_rates: BTreeMap::new(),
        purchase_order_ids: orders.iter().map(|o| o.id).collect(),
        notes: None,
    }
}

#[tokio::test]
async fn preview_spreads_freight_proportionally() {
    let db = TestDb::new().await;
    let orders = base_orders(&db).await;
    let costs = &db.services.incremental_costs;

    let cost = costs
        .create_incremental_cost(freight(dec!(900), &orders))
        .await
        .unwrap();
    assert_eq!(cost.code, "INC-000001");
    assert_eq!(cost.status, IncrementalCostStatus::Draft);

    let preview = costs.preview(cost.id).await.unwrap();
    let increments: Vec<_> = preview.iter().map(|l| l.increment).collect();
    assert_eq!(increments.len(), 3);
    assert_dec(increments[0], dec!(150));
    assert_dec(increments[1], dec!(300));
    assert_dec(increments[2], dec!(450));

    // Previews write nothing and repeat exactly.
    assert_eq!(costs.preview(cost.id).await.unwrap(), preview);
    assert!(costs.list_distribution(cost.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn close_posts_one_valuation_per_material_and_location() {
    let db = TestDb::new().await;
    let orders = base_orders(&db).await;
    let costs = &db.services.incremental_costs;

    let cost = costs
        .create_incremental_cost(freight(dec!(100), &orders))
        .await
        .unwrap();
    costs.submit(cost.id).await.unwrap();
    costs.approve(cost.id).await.unwrap();

    let closed = costs.close(cost.id).await.unwrap();
    assert_eq!(closed.order.status, IncrementalCostStatus::Closed);
    assert!(closed.order.closed_at.is_some());
    assert_eq!(closed.lines.len(), 3);
    assert_eq!(closed.movements.len(), 3);
    assert!(closed
        .movements
        .iter()
        .all(|m| m.kind == MovementKind::ValuationAdjustment
            && m.reference_id == Some(cost.id)
            && m.quantity.is_zero()));

    let spread: Decimal = closed.lines.iter().map(|l| l.increment).sum();
    assert_dec(spread, dec!(100));
    let valued: Decimal = closed.movements.iter().filter_map(|m| m.value_delta).sum();
    assert_dec(valued, dec!(100));

    let stored = costs.list_distribution(cost.id).await.unwrap();
    assert_eq!(stored.len(), 3);

    assert_matches!(
        costs.close(cost.id).await,
        Err(ServiceError::AlreadyClosed(id)) if id == cost.id
    );
    assert_matches!(
        costs.cancel(cost.id).await,
        Err(ServiceError::AlreadyClosed(_))
    );
    assert!(db.events.wait_for("incremental_cost_closed", 1).await);
}

#[tokio::test]
async fn close_requires_approval() {
    let db = TestDb::new().await;
    let orders = base_orders(&db).await;
    let costs = &db.services.incremental_costs;

    let cost = costs
        .create_incremental_cost(freight(dec!(100), &orders))
        .await
        .unwrap();
    assert_matches!(
        costs.close(cost.id).await,
        Err(ServiceError::InvalidTransition { .. })
    );

    costs.submit(cost.id).await.unwrap();
    costs.reject(cost.id).await.unwrap();
    costs.submit(cost.id).await.unwrap();
    let approved = costs.approve(cost.id).await.unwrap();
    assert_eq!(approved.status, IncrementalCostStatus::Approved);
}

#[tokio::test]
async fn foreign_base_lines_need_a_rate() {
    let db = TestDb::new().await;
    let req = db.requisition("IMP").await;
    let line = db.line(req.id, dec!(1)).await;
    let mut usd = quote(Uuid::new_v4(), dec!(10), dec!(1), true);
    usd.currency = "USD".to_string();
    let option = db
        .services
        .requisitions
        .add_quote_option(line.id, usd)
        .await
        .unwrap();
    db.services
        .requisitions
        .select_quote_option(option.id)
        .await
        .unwrap();
    let imported = db
        .services
        .consolidation
        .consolidate_quotes(req.id)
        .await
        .unwrap()
        .remove(0);
    let local = db.draft_order(dec!(1), dec!(200)).await;

    let costs = &db.services.incremental_costs;
    let base = [imported.order.id, local.order.id];

    let err = costs
        .preview_distribution(&base, &BTreeMap::new(), dec!(100), "MXN")
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::MissingExchangeRate(code) if code == "USD");

    let rates = BTreeMap::from([("usd".to_string(), dec!(20))]);
    let lines = costs
        .preview_distribution(&base, &rates, dec!(100), "mxn")
        .await
        .unwrap();
    assert_dec(lines[0].normalized_cost, dec!(200));
    assert_dec(lines[0].increment, dec!(50));
    assert_dec(lines[1].increment, dec!(50));
}

#[tokio::test]
async fn close_without_delivery_location_rolls_back() {
    let db = TestDb::new().await;
    let draft = db.draft_order(dec!(1), dec!(100)).await;
    let costs = &db.services.incremental_costs;

    let cost = costs
        .create_incremental_cost(freight(dec!(10), &[draft.order.clone()]))
        .await
        .unwrap();
    costs.submit(cost.id).await.unwrap();
    costs.approve(cost.id).await.unwrap();

    assert_matches!(
        costs.close(cost.id).await,
        Err(ServiceError::ValidationError(_))
    );
    let stored = costs.get(cost.id).await.unwrap();
    assert_eq!(stored.status, IncrementalCostStatus::Approved);
    assert!(costs.list_distribution(cost.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn creation_validates_base_orders() {
    let db = TestDb::new().await;
    let costs = &db.services.incremental_costs;

    assert_matches!(
        costs.create_incremental_cost(freight(dec!(10), &[])).await,
        Err(ServiceError::ValidationError(_))
    );

    let mut missing = freight(dec!(10), &[]);
    missing.purchase_order_ids = vec![Uuid::new_v4()];
    assert_matches!(
        costs.create_incremental_cost(missing).await,
        Err(ServiceError::NotFound(_))
    );

    let draft = db.draft_order(dec!(1), dec!(10)).await;
    let cancelled = db
        .services
        .purchase_orders
        .cancel(draft.order.id)
        .await
        .unwrap();
    assert_matches!(
        costs
            .create_incremental_cost(freight(dec!(10), &[cancelled]))
            .await,
        Err(ServiceError::ValidationError(_))
    );

    let mut blank = freight(dec!(10), &[draft.order]);
    blank.provider = String::new();
    assert_matches!(
        costs.create_incremental_cost(blank).await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn service_only_orders_have_no_distribution_base() {
    let db = TestDb::new().await;
    let draft = db.draft_order(dec!(1), dec!(100)).await;

    let mut lines = common::keep_lines(&draft.lines);
    lines[0].material_id = None;
    db.services
        .purchase_orders
        .edit(
            draft.order.id,
            procura::services::purchase_orders::EditPurchaseOrder {
                header: procura::services::purchase_orders::EditHeader {
                    notes: None,
                    expected_delivery_date: None,
                    delivery_location_id: None,
                    payment_method: draft.order.payment_method,
                    clear_forced_total: false,
                    changed_by: None,
                },
                lines,
            },
        )
        .await
        .unwrap();

    let err = db
        .services
        .incremental_costs
        .preview_distribution(&[draft.order.id], &BTreeMap::new(), dec!(10), "MXN")
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NoDistributionBase(_));
}

#[tokio::test]
async fn equal_shares_keep_the_given_order() {
    let db = TestDb::new().await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(db.draft_order(dec!(1), dec!(100)).await.order.id);
    }
    ids.reverse();
    let costs = &db.services.incremental_costs;

    let lines = costs
        .preview_distribution(&ids, &BTreeMap::new(), dec!(100), "MXN")
        .await
        .unwrap();
    let order: Vec<_> = lines.iter().map(|l| l.purchase_order_id).collect();
    assert_eq!(order, ids);
    assert_dec(lines[0].increment, dec!(33.34));
    assert_dec(lines[1].increment, dec!(33.33));
    assert_dec(lines[2].increment, dec!(33.33));

    let mut cost = freight(dec!(100), &[]);
    cost.purchase_order_ids = ids.clone();
    let cost = costs.create_incremental_cost(cost).await.unwrap();
    assert_eq!(costs.list_base_orders(cost.id).await.unwrap(), ids);

    let stored = costs.preview(cost.id).await.unwrap();
    assert_eq!(stored[0].purchase_order_id, ids[0]);
    assert_dec(stored[0].increment, dec!(33.34));
}

#[tokio::test]
async fn repeated_base_orders_count_once() {
    let db = TestDb::new().await;
    let draft = db.draft_order(dec!(1), dec!(100)).await;
    let id = draft.order.id;

    let lines = db
        .services
        .incremental_costs
        .preview_distribution(&[id, id], &BTreeMap::new(), dec!(10), "MXN")
        .await
        .unwrap();
    assert_eq!(lines.len(), 1);
    assert_dec(lines[0].increment, dec!(10));
}

#[tokio::test]
async fn amounts_finer_than_the_currency_are_rejected() {
    let db = TestDb::new().await;
    let orders = base_orders(&db).await;

    assert_matches!(
        db.services
            .incremental_costs
            .create_incremental_cost(freight(dec!(900.005), &orders))
            .await,
        Err(ServiceError::ValidationError(_))
    );
}
