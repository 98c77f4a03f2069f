//! Order state machines end to end against a real (in-memory) database.
//!
//! These tests are ignored by default because they need a migrated database;
//! run with: cargo test -- --ignored

mod common;

use rust_decimal_macros::dec;
use stockflow_api::errors::ServiceError;
use stockflow_api::services::inventory::AdjustStockRequest;
use stockflow_api::services::purchase_orders::{
    CreatePurchaseOrderRequest, PurchaseOrderLineRequest, ReceiptLineRequest,
};
use stockflow_api::services::sales_orders::{CreateSalesOrderRequest, SalesOrderLineRequest};

async fn seed_stock(ctx: &common::TestContext, quantity: i32) {
    ctx.services
        .inventory
        .adjust_stock(AdjustStockRequest {
            product_id: ctx.product_id,
            warehouse_id: ctx.warehouse_id,
            delta: quantity,
            notes: Some("seed".to_string()),
        })
        .await
        .expect("seed stock");
}

fn sales_request(
    ctx: &common::TestContext,
    quantity: i32,
) -> CreateSalesOrderRequest {
    CreateSalesOrderRequest {
        customer_id: ctx.customer_id,
        warehouse_id: ctx.warehouse_id,
        lines: vec![SalesOrderLineRequest {
            product_id: ctx.product_id,
            quantity,
            unit_price: dec!(19.9900),
        }],
        requested_date: None,
        notes: None,
    }
}

fn purchase_request(
    ctx: &common::TestContext,
    quantity: i32,
) -> CreatePurchaseOrderRequest {
    CreatePurchaseOrderRequest {
        supplier_id: ctx.supplier_id,
        warehouse_id: ctx.warehouse_id,
        lines: vec![PurchaseOrderLineRequest {
            product_id: ctx.product_id,
            quantity,
            unit_cost: dec!(3.0000),
        }],
        expected_date: None,
        notes: None,
    }
}

#[tokio::test]
#[ignore]
async fn sales_order_walks_the_full_lifecycle() {
    let ctx = common::setup().await;
    seed_stock(&ctx, 10).await;

    let created = ctx
        .services
        .sales_orders
        .create(sales_request(&ctx, 5))
        .await
        .unwrap();
    assert_eq!(created.status, "CREATED");
    assert!(created.order_number.starts_with("SO-"));
    assert_eq!(created.total_amount, dec!(99.9500));

    // Creation does not reserve.
    let row = common::stock_row(&ctx.db, ctx.product_id, ctx.warehouse_id)
        .await
        .unwrap();
    assert_eq!(row.reserved, 0);

    let confirmed = ctx.services.sales_orders.confirm(created.id).await.unwrap();
    assert_eq!(confirmed.status, "CONFIRMED");

    let picking = ctx
        .services
        .sales_orders
        .start_picking(created.id)
        .await
        .unwrap();
    assert_eq!(picking.status, "PICKING");

    let shipped = ctx.services.sales_orders.ship(created.id).await.unwrap();
    assert_eq!(shipped.status, "SHIPPED");
    assert!(shipped.shipped_at.is_some());

    let delivered = ctx.services.sales_orders.deliver(created.id).await.unwrap();
    assert_eq!(delivered.status, "DELIVERED");
    assert!(delivered.delivered_at.is_some());
}

#[tokio::test]
#[ignore]
async fn sales_order_rejects_out_of_order_transitions() {
    let ctx = common::setup().await;
    seed_stock(&ctx, 10).await;

    let order = ctx
        .services
        .sales_orders
        .create(sales_request(&ctx, 2))
        .await
        .unwrap();

    // Ship and deliver both need earlier states.
    assert!(matches!(
        ctx.services.sales_orders.ship(order.id).await.unwrap_err(),
        ServiceError::InvalidOrderState(_)
    ));
    assert!(matches!(
        ctx.services.sales_orders.deliver(order.id).await.unwrap_err(),
        ServiceError::InvalidOrderState(_)
    ));

    ctx.services.sales_orders.confirm(order.id).await.unwrap();
    assert!(matches!(
        ctx.services.sales_orders.confirm(order.id).await.unwrap_err(),
        ServiceError::InvalidOrderState(_)
    ));
}

#[tokio::test]
#[ignore]
async fn shipped_orders_cannot_be_cancelled() {
    let ctx = common::setup().await;
    seed_stock(&ctx, 10).await;

    let order = ctx
        .services
        .sales_orders
        .create(sales_request(&ctx, 3))
        .await
        .unwrap();
    ctx.services.sales_orders.confirm(order.id).await.unwrap();
    ctx.services.sales_orders.ship(order.id).await.unwrap();

    let err = ctx.services.sales_orders.cancel(order.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOrderState(_)));

    let unchanged = ctx.services.sales_orders.get(order.id).await.unwrap();
    assert_eq!(unchanged.status, "SHIPPED");
}

#[tokio::test]
#[ignore]
async fn confirming_the_last_unit_succeeds_and_one_more_fails() {
    let ctx = common::setup().await;
    seed_stock(&ctx, 5).await;

    let exact = ctx
        .services
        .sales_orders
        .create(sales_request(&ctx, 5))
        .await
        .unwrap();
    ctx.services.sales_orders.confirm(exact.id).await.unwrap();

    let extra = ctx
        .services
        .sales_orders
        .create(sales_request(&ctx, 1))
        .await
        .unwrap();
    let err = ctx.services.sales_orders.confirm(extra.id).await.unwrap_err();
    match err {
        ServiceError::InsufficientStock {
            requested,
            available,
            ..
        } => {
            assert_eq!(requested, 1);
            assert_eq!(available, 0);
        }
        other => panic!("expected InsufficientStock, got {other:?}"),
    }
}

#[tokio::test]
#[ignore]
async fn create_rejects_empty_lines_and_unknown_references() {
    let ctx = common::setup().await;

    let empty = CreateSalesOrderRequest {
        customer_id: ctx.customer_id,
        warehouse_id: ctx.warehouse_id,
        lines: vec![],
        requested_date: None,
        notes: None,
    };
    assert!(matches!(
        ctx.services.sales_orders.create(empty).await.unwrap_err(),
        ServiceError::ValidationError(_)
    ));

    let mut unknown_product = sales_request(&ctx, 1);
    unknown_product.lines[0].product_id = uuid::Uuid::new_v4();
    assert!(matches!(
        ctx.services
            .sales_orders
            .create(unknown_product)
            .await
            .unwrap_err(),
        ServiceError::NotFound(_)
    ));

    let mut unknown_customer = sales_request(&ctx, 1);
    unknown_customer.customer_id = uuid::Uuid::new_v4();
    assert!(matches!(
        ctx.services
            .sales_orders
            .create(unknown_customer)
            .await
            .unwrap_err(),
        ServiceError::NotFound(_)
    ));
}

#[tokio::test]
#[ignore]
async fn receiving_a_purchase_order_creates_the_stock_row() {
    let ctx = common::setup().await;

    let po = ctx
        .services
        .purchase_orders
        .create(purchase_request(&ctx, 20))
        .await
        .unwrap();
    assert_eq!(po.status, "CREATED");
    assert!(po.order_number.starts_with("PO-"));
    assert_eq!(po.total_amount, dec!(60.0000));
    assert!(common::stock_row(&ctx.db, ctx.product_id, ctx.warehouse_id)
        .await
        .is_none());

    let approved = ctx.services.purchase_orders.approve(po.id).await.unwrap();
    assert_eq!(approved.status, "APPROVED");
    assert!(approved.approved_at.is_some());

    let received = ctx.services.purchase_orders.receive(po.id).await.unwrap();
    assert_eq!(received.status, "RECEIVED");
    assert!(received.received_at.is_some());

    let row = common::stock_row(&ctx.db, ctx.product_id, ctx.warehouse_id)
        .await
        .unwrap();
    assert_eq!(row.on_hand, 20);
    assert_eq!(row.reserved, 0);
}

#[tokio::test]
#[ignore]
async fn partial_receipts_accumulate_until_received() {
    let ctx = common::setup().await;

    let po = ctx
        .services
        .purchase_orders
        .create(purchase_request(&ctx, 20))
        .await
        .unwrap();
    ctx.services.purchase_orders.approve(po.id).await.unwrap();

    let partial = ctx
        .services
        .purchase_orders
        .receive_lines(
            po.id,
            vec![ReceiptLineRequest {
                product_id: ctx.product_id,
                quantity: 5,
            }],
        )
        .await
        .unwrap();
    assert_eq!(partial.status, "PARTIALLY_RECEIVED");
    assert!(partial.received_at.is_none());
    let lines = partial.lines.unwrap();
    assert_eq!(lines[0].received_quantity, 5);
    assert_eq!(lines[0].pending_quantity, 15);

    let row = common::stock_row(&ctx.db, ctx.product_id, ctx.warehouse_id)
        .await
        .unwrap();
    assert_eq!(row.on_hand, 5);

    // Over-asking is clamped to the pending amount.
    let done = ctx
        .services
        .purchase_orders
        .receive_lines(
            po.id,
            vec![ReceiptLineRequest {
                product_id: ctx.product_id,
                quantity: 99,
            }],
        )
        .await
        .unwrap();
    assert_eq!(done.status, "RECEIVED");
    assert!(done.received_at.is_some());

    let row = common::stock_row(&ctx.db, ctx.product_id, ctx.warehouse_id)
        .await
        .unwrap();
    assert_eq!(row.on_hand, 20);
}

#[tokio::test]
#[ignore]
async fn received_purchase_orders_cannot_be_cancelled() {
    let ctx = common::setup().await;

    let po = ctx
        .services
        .purchase_orders
        .create(purchase_request(&ctx, 10))
        .await
        .unwrap();
    ctx.services.purchase_orders.approve(po.id).await.unwrap();
    ctx.services.purchase_orders.receive(po.id).await.unwrap();

    let err = ctx.services.purchase_orders.cancel(po.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOrderState(_)));
}

#[tokio::test]
#[ignore]
async fn cancelling_a_purchase_order_keeps_received_stock() {
    let ctx = common::setup().await;

    let po = ctx
        .services
        .purchase_orders
        .create(purchase_request(&ctx, 20))
        .await
        .unwrap();
    ctx.services.purchase_orders.approve(po.id).await.unwrap();
    ctx.services
        .purchase_orders
        .receive_lines(
            po.id,
            vec![ReceiptLineRequest {
                product_id: ctx.product_id,
                quantity: 8,
            }],
        )
        .await
        .unwrap();

    let cancelled = ctx.services.purchase_orders.cancel(po.id).await.unwrap();
    assert_eq!(cancelled.status, "CANCELLED");

    let row = common::stock_row(&ctx.db, ctx.product_id, ctx.warehouse_id)
        .await
        .unwrap();
    assert_eq!(row.on_hand, 8, "cancellation does not reverse receipts");
}

#[tokio::test]
#[ignore]
async fn order_totals_match_their_lines() {
    let ctx = common::setup().await;
    let second_product = common::seed_product(&ctx.db, "SKU-0002", 0).await;

    let order = ctx
        .services
        .sales_orders
        .create(CreateSalesOrderRequest {
            customer_id: ctx.customer_id,
            warehouse_id: ctx.warehouse_id,
            lines: vec![
                SalesOrderLineRequest {
                    product_id: ctx.product_id,
                    quantity: 3,
                    unit_price: dec!(2.5000),
                },
                SalesOrderLineRequest {
                    product_id: second_product,
                    quantity: 2,
                    unit_price: dec!(10.0000),
                },
            ],
            requested_date: None,
            notes: None,
        })
        .await
        .unwrap();

    assert_eq!(order.total_amount, dec!(27.5000));
    let lines = order.lines.unwrap();
    let line_sum: rust_decimal::Decimal = lines.iter().map(|l| l.line_total).sum();
    assert_eq!(line_sum, order.total_amount);
}
