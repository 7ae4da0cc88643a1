//! End-to-end settlement through the HTTP API.
//!
//! Covers the paid paths for both detail kinds, the refusal paths and the
//! seller notification raised after a sale.

mod common;

use axum::http::StatusCode;
use common::{decimal, TestApp};
use mmo_market::entities::product::ProductType;
use rust_decimal::Decimal;
use serde_json::json;

#[tokio::test]
async fn account_order_delivers_stock_and_charges_buyer() {
    let app = TestApp::new().await;
    let seller = app.seller("sally").await;
    app.open_store(&seller).await;
    let product = app.listed_product(&seller, ProductType::Account, 10).await;
    app.load_stock(&seller, product, 5).await;

    let buyer = app.buyer("bob").await;
    app.deposit(&buyer, 100).await;
    let order_id = app.open_order(&buyer, None).await;

    let (status, body) = app
        .post(
            "/api/v1/acc-order-details",
            json!({ "order_id": order_id, "product_id": product, "quantity": 2 }),
            &buyer,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(decimal(&body["data"]["total_amount"]), Decimal::from(20));
    let delivered = body["data"]["content_delivered"].as_str().unwrap();
    assert_eq!(delivered.lines().count(), 2);

    assert_eq!(app.balance(&buyer).await, Decimal::from(80));
    // Funds are held until the buyer confirms
    assert_eq!(app.balance(&seller).await, Decimal::ZERO);

    let (_, order) = app.get(&format!("/api/v1/orders/{order_id}"), &buyer).await;
    assert_eq!(order["data"]["status"], "delivered");
    assert_eq!(order["data"]["is_paid"], true);

    let (_, listed) = app.get(&format!("/api/v1/products/{product}"), &buyer).await;
    assert_eq!(listed["data"]["available_quantity"], 3);

    let (status, stock) = app
        .get(&format!("/api/v1/products/{product}/stock?sold=true"), &seller)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stock["data"]["items"].as_array().unwrap().len(), 2);

    let (_, history) = app.get("/api/v1/wallet/transactions", &buyer).await;
    let kinds: Vec<&str> = history["data"]["items"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["transaction_type"].as_str())
        .collect();
    assert!(kinds.contains(&"purchase"), "ledger kinds: {kinds:?}");
}

#[tokio::test]
async fn confirming_an_order_pays_the_seller() {
    let app = TestApp::new().await;
    let seller = app.seller("sally").await;
    app.open_store(&seller).await;
    let product = app.listed_product(&seller, ProductType::Software, 15).await;
    app.load_stock(&seller, product, 1).await;

    let buyer = app.buyer("bob").await;
    app.deposit(&buyer, 15).await;
    let order_id = app.open_order(&buyer, None).await;
    let (status, _) = app
        .post(
            "/api/v1/acc-order-details",
            json!({ "order_id": order_id, "product_id": product, "quantity": 1 }),
            &buyer,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // Only the buyer may confirm
    let (status, _) = app
        .post(&format!("/api/v1/orders/{order_id}/confirm"), json!({}), &seller)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .post(&format!("/api/v1/orders/{order_id}/confirm"), json!({}), &buyer)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "completed");
    assert!(body["data"]["released_at"].is_string());

    assert_eq!(app.balance(&buyer).await, Decimal::ZERO);
    assert_eq!(app.balance(&seller).await, Decimal::from(15));

    let (status, _) = app
        .post(&format!("/api/v1/orders/{order_id}/confirm"), json!({}), &buyer)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn seller_is_emailed_about_a_sale() {
    let app = TestApp::new().await;
    let seller = app.seller("sally").await;
    app.open_store(&seller).await;
    let product = app.listed_product(&seller, ProductType::Account, 5).await;
    app.load_stock(&seller, product, 2).await;

    let buyer = app.buyer("bob").await;
    app.deposit(&buyer, 50).await;
    let order_id = app.open_order(&buyer, None).await;
    let (_, order) = app.get(&format!("/api/v1/orders/{order_id}"), &buyer).await;
    let code = order["data"]["order_code"].as_str().unwrap().to_string();

    let (status, _) = app
        .post(
            "/api/v1/acc-order-details",
            json!({ "order_id": order_id, "product_id": product, "quantity": 1 }),
            &buyer,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let sent = app.wait_for_notifications(1).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "sally@example.com");
    assert_eq!(sent[0].subject, format!("[New order] {code}"));
    assert!(sent[0].body.contains("bob"));
}

#[tokio::test]
async fn refusals_leave_balance_and_order_untouched() {
    let app = TestApp::new().await;
    let seller = app.seller("sally").await;
    app.open_store(&seller).await;
    let product = app.listed_product(&seller, ProductType::Account, 10).await;
    app.load_stock(&seller, product, 2).await;

    let buyer = app.buyer("bob").await;
    app.deposit(&buyer, 15).await;
    let order_id = app.open_order(&buyer, None).await;

    // More units than are in stock
    let (status, body) = app
        .post(
            "/api/v1/acc-order-details",
            json!({ "order_id": order_id, "product_id": product, "quantity": 3 }),
            &buyer,
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    // In stock but more than the wallet covers
    let (status, _) = app
        .post(
            "/api/v1/acc-order-details",
            json!({ "order_id": order_id, "product_id": product, "quantity": 2 }),
            &buyer,
        )
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

    // Someone else's order
    let stranger = app.buyer("mallory").await;
    app.deposit(&stranger, 100).await;
    let (status, _) = app
        .post(
            "/api/v1/acc-order-details",
            json!({ "order_id": order_id, "product_id": product, "quantity": 1 }),
            &stranger,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    assert_eq!(app.balance(&buyer).await, Decimal::from(15));
    let (_, order) = app.get(&format!("/api/v1/orders/{order_id}"), &buyer).await;
    assert_eq!(order["data"]["status"], "processing");
    assert_eq!(order["data"]["is_paid"], false);
    let (_, listed) = app.get(&format!("/api/v1/products/{product}"), &buyer).await;
    assert_eq!(listed["data"]["available_quantity"], 2);

    // A valid settlement goes through, and a second one is refused
    let (status, _) = app
        .post(
            "/api/v1/acc-order-details",
            json!({ "order_id": order_id, "product_id": product, "quantity": 1 }),
            &buyer,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = app
        .post(
            "/api/v1/acc-order-details",
            json!({ "order_id": order_id, "product_id": product, "quantity": 1 }),
            &buyer,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(app.balance(&buyer).await, Decimal::from(5));
}

#[tokio::test]
async fn product_kind_must_match_detail_kind() {
    let app = TestApp::new().await;
    let seller = app.seller("sally").await;
    app.open_store(&seller).await;
    let account = app.listed_product(&seller, ProductType::Account, 10).await;
    let service = app.listed_product(&seller, ProductType::Service, 10).await;
    app.load_stock(&seller, account, 1).await;

    let buyer = app.buyer("bob").await;
    app.deposit(&buyer, 100).await;
    let order_id = app.open_order(&buyer, None).await;

    let (status, _) = app
        .post(
            "/api/v1/acc-order-details",
            json!({ "order_id": order_id, "product_id": service, "quantity": 1 }),
            &buyer,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(
            "/api/v1/service-order-details",
            json!({
                "order_id": order_id,
                "product_id": account,
                "quantity": 1,
                "target_url": "https://example.com/channel",
            }),
            &buyer,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.balance(&buyer).await, Decimal::from(100));
}

#[tokio::test]
async fn service_order_is_fulfilled_by_its_seller() {
    let app = TestApp::new().await;
    let seller = app.seller("sally").await;
    app.open_store(&seller).await;
    let product = app.listed_product(&seller, ProductType::Service, 25).await;

    let buyer = app.buyer("bob").await;
    app.deposit(&buyer, 100).await;
    let order_id = app.open_order(&buyer, None).await;

    let (status, body) = app
        .post(
            "/api/v1/service-order-details",
            json!({
                "order_id": order_id,
                "product_id": product,
                "quantity": 2,
                "target_url": "https://example.com/channel",
                "note": "1000 followers",
            }),
            &buyer,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["status"], "pending");
    let detail_id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(app.balance(&buyer).await, Decimal::from(50));

    let (_, order) = app.get(&format!("/api/v1/orders/{order_id}"), &buyer).await;
    assert_eq!(order["data"]["status"], "processing");
    assert_eq!(order["data"]["is_paid"], true);

    let status_uri = format!("/api/v1/service-order-details/{detail_id}/status");

    // The buyer cannot drive fulfilment
    let (status, _) = app
        .put(&status_uri, json!({ "status": "completed" }), &buyer)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .put(&status_uri, json!({ "status": "in_progress" }), &seller)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    // Started fulfilment blocks cancellation
    let (status, _) = app
        .post(&format!("/api/v1/orders/{order_id}/cancel"), json!({}), &buyer)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .put(&status_uri, json!({ "status": "completed" }), &seller)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["delivered_at"].is_string());

    let (_, order) = app.get(&format!("/api/v1/orders/{order_id}"), &buyer).await;
    assert_eq!(order["data"]["status"], "delivered");

    // Completed is terminal
    let (status, _) = app
        .put(&status_uri, json!({ "status": "failed" }), &seller)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, detail) = app
        .get(&format!("/api/v1/orders/{order_id}/detail"), &buyer)
        .await;
    assert_eq!(detail["data"]["kind"], "service");
    assert_eq!(detail["data"]["status"], "completed");
}

#[tokio::test]
async fn failed_service_refunds_the_buyer() {
    let app = TestApp::new().await;
    let seller = app.seller("sally").await;
    app.open_store(&seller).await;
    let product = app.listed_product(&seller, ProductType::Service, 30).await;

    let buyer = app.buyer("bob").await;
    app.deposit(&buyer, 30).await;
    let order_id = app.open_order(&buyer, None).await;
    let (_, body) = app
        .post(
            "/api/v1/service-order-details",
            json!({
                "order_id": order_id,
                "product_id": product,
                "quantity": 1,
                "target_url": "https://example.com/page",
            }),
            &buyer,
        )
        .await;
    let detail_id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(app.balance(&buyer).await, Decimal::ZERO);

    let (status, _) = app
        .put(
            &format!("/api/v1/service-order-details/{detail_id}/status"),
            json!({ "status": "failed" }),
            &seller,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(app.balance(&buyer).await, Decimal::from(30));
    let (_, order) = app.get(&format!("/api/v1/orders/{order_id}"), &buyer).await;
    assert_eq!(order["data"]["status"], "refunded");

    let (_, report) = app.get("/api/v1/wallet/reconcile", &buyer).await;
    assert_eq!(report["data"]["consistent"], true);
}

#[tokio::test]
async fn cancelling_a_pending_service_order_refunds_it() {
    let app = TestApp::new().await;
    let seller = app.seller("sally").await;
    app.open_store(&seller).await;
    let product = app.listed_product(&seller, ProductType::Service, 12).await;

    let buyer = app.buyer("bob").await;
    app.deposit(&buyer, 12).await;
    let order_id = app.open_order(&buyer, None).await;
    let (status, _) = app
        .post(
            "/api/v1/service-order-details",
            json!({
                "order_id": order_id,
                "product_id": product,
                "quantity": 1,
                "target_url": "https://example.com/page",
            }),
            &buyer,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .post(&format!("/api/v1/orders/{order_id}/cancel"), json!({}), &seller)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "cancel");
    assert_eq!(app.balance(&buyer).await, Decimal::from(12));

    let (_, detail) = app
        .get(&format!("/api/v1/orders/{order_id}/detail"), &buyer)
        .await;
    assert_eq!(detail["data"]["status"], "failed");
}

#[tokio::test]
async fn store_stats_count_paid_orders_only() {
    let app = TestApp::new().await;
    let seller = app.seller("sally").await;
    app.open_store(&seller).await;
    let account = app.listed_product(&seller, ProductType::Account, 10).await;
    let service = app.listed_product(&seller, ProductType::Service, 7).await;
    app.load_stock(&seller, account, 3).await;

    let buyer = app.buyer("bob").await;
    app.deposit(&buyer, 100).await;

    let first = app.open_order(&buyer, None).await;
    app.post(
        "/api/v1/acc-order-details",
        json!({ "order_id": first, "product_id": account, "quantity": 2 }),
        &buyer,
    )
    .await;
    let second = app.open_order(&buyer, None).await;
    app.post(
        "/api/v1/service-order-details",
        json!({
            "order_id": second,
            "product_id": service,
            "quantity": 1,
            "target_url": "https://example.com/x",
        }),
        &buyer,
    )
    .await;
    // Never paid
    app.open_order(&buyer, None).await;

    let (status, stats) = app.get("/api/v1/store/orders/stats", &seller).await;
    assert_eq!(status, StatusCode::OK, "{stats}");
    assert_eq!(stats["data"]["total_orders"], 2);
    assert_eq!(stats["data"]["account_orders"], 1);
    assert_eq!(stats["data"]["service_orders"], 1);
    assert_eq!(decimal(&stats["data"]["total_revenue"]), Decimal::from(27));

    let (_, orders) = app.get("/api/v1/store/orders", &seller).await;
    assert_eq!(orders["data"]["items"].as_array().unwrap().len(), 2);

    let (status, _) = app
        .get(
            "/api/v1/store/orders/stats?from=2030-01-02T00:00:00Z&to=2030-01-01T00:00:00Z",
            &seller,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
