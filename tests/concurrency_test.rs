//! Contended stock claims, voucher redemptions and double settlement. Every
//! attempt runs as its own task against the shared services. The test pool
//! holds one connection, so these check outcomes under contention; the
//! guarded updates themselves are covered by the unit tests in
//! `services::stock`, `services::settlement` and `services::orders`.

mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::TestApp;
use mmo_market::{
    entities::product::ProductType,
    errors::ServiceError,
    services::{
        orders::CreateOrderRequest, settlement::CreateAccOrderDetailRequest,
        vouchers::CreateVoucherRequest,
    },
};
use rust_decimal::Decimal;

#[tokio::test]
async fn last_units_are_sold_exactly_once() {
    let app = TestApp::new().await;
    let seller = app.seller("sally").await;
    app.open_store(&seller).await;
    let product = app.listed_product(&seller, ProductType::Account, 10).await;
    app.load_stock(&seller, product, 3).await;

    let mut tasks = Vec::new();
    for i in 0..6 {
        let buyer = app.buyer(&format!("buyer{i}")).await;
        app.deposit(&buyer, 10).await;
        let order_id = app.open_order(&buyer, None).await;
        let settlement = app.state.services.settlement.clone();
        tasks.push(tokio::spawn(async move {
            settlement
                .create_account_detail(
                    buyer.id,
                    CreateAccOrderDetailRequest {
                        order_id,
                        product_id: product,
                        quantity: 1,
                    },
                )
                .await
        }));
    }

    let mut delivered = Vec::new();
    let mut refused = 0;
    for task in tasks {
        match task.await.expect("task panicked") {
            Ok(detail) => delivered.push(detail.content_delivered),
            Err(e) => {
                assert_matches!(e, ServiceError::InsufficientStock(_));
                refused += 1;
            }
        }
    }
    assert_eq!(delivered.len(), 3);
    assert_eq!(refused, 3);

    delivered.sort();
    delivered.dedup();
    assert_eq!(delivered.len(), 3, "a stock unit was delivered twice");

    let view = app
        .state
        .services
        .catalog
        .get_product(&seller.actor(), product)
        .await
        .expect("product");
    assert_eq!(view.available_quantity, 0);
}

#[tokio::test]
async fn voucher_quantity_bounds_redemptions() {
    let app = TestApp::new().await;
    let seller = app.seller("sally").await;
    app.open_store(&seller).await;
    app.state
        .services
        .vouchers
        .create_voucher(
            &seller.actor(),
            CreateVoucherRequest {
                code: "RUSH".to_string(),
                discount_percent: Decimal::from(10),
                max_discount: None,
                expired_at: Utc::now() + Duration::hours(1),
                quantity: 2,
            },
        )
        .await
        .expect("voucher");

    let mut tasks = Vec::new();
    for i in 0..5 {
        let buyer = app.buyer(&format!("buyer{i}")).await;
        let orders = app.state.services.orders.clone();
        tasks.push(tokio::spawn(async move {
            orders
                .create_order(
                    buyer.id,
                    CreateOrderRequest {
                        voucher_code: Some("RUSH".to_string()),
                    },
                )
                .await
        }));
    }

    let mut opened = 0;
    for task in tasks {
        match task.await.expect("task panicked") {
            Ok(order) => {
                assert!(order.voucher_id.is_some());
                opened += 1;
            }
            Err(e) => assert_matches!(e, ServiceError::ValidationError(_)),
        }
    }
    assert_eq!(opened, 2);

    let left = app
        .state
        .services
        .vouchers
        .list_store_vouchers(&seller.actor())
        .await
        .expect("vouchers");
    assert_eq!(left[0].quantity, 0);
}

#[tokio::test]
async fn an_order_is_settled_at_most_once() {
    let app = TestApp::new().await;
    let seller = app.seller("sally").await;
    app.open_store(&seller).await;
    let product = app.listed_product(&seller, ProductType::Account, 10).await;
    app.load_stock(&seller, product, 10).await;

    let buyer = app.buyer("bob").await;
    app.deposit(&buyer, 100).await;
    let order_id = app.open_order(&buyer, None).await;

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let settlement = app.state.services.settlement.clone();
        let buyer_id = buyer.id;
        tasks.push(tokio::spawn(async move {
            settlement
                .create_account_detail(
                    buyer_id,
                    CreateAccOrderDetailRequest {
                        order_id,
                        product_id: product,
                        quantity: 1,
                    },
                )
                .await
        }));
    }

    let mut settled = 0;
    for task in tasks {
        match task.await.expect("task panicked") {
            Ok(_) => settled += 1,
            Err(e) => assert_matches!(e, ServiceError::Conflict(_)),
        }
    }
    assert_eq!(settled, 1);
    assert_eq!(app.balance(&buyer).await, Decimal::from(90));

    let report = app
        .state
        .services
        .accounts
        .reconcile(buyer.id)
        .await
        .expect("reconcile");
    assert!(report.consistent);
}
