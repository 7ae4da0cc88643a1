mod common;

use axum::http::StatusCode;
use common::{decimal, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

#[tokio::test]
async fn deposits_and_withdrawals_keep_the_ledger_consistent() {
    let app = TestApp::new().await;
    let user = app.buyer("bob").await;

    app.deposit(&user, 120).await;
    let (status, body) = app
        .post(
            "/api/v1/wallet/withdraw",
            json!({ "amount": "45.50", "note": "cash out" }),
            &user,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(decimal(&body["data"]["balance_after"]), dec!(74.50));

    let (_, me) = app.get("/api/v1/me", &user).await;
    assert_eq!(decimal(&me["data"]["balance"]), dec!(74.50));

    let (status, report) = app.get("/api/v1/wallet/reconcile", &user).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["data"]["consistent"], true);
    assert_eq!(report["data"]["entries"], 2);
    assert_eq!(
        decimal(&report["data"]["ledger_balance"]),
        decimal(&report["data"]["balance"])
    );

    let (_, history) = app
        .get("/api/v1/wallet/transactions?page=1&limit=1", &user)
        .await;
    assert_eq!(history["data"]["total"], 2);
    assert_eq!(history["data"]["total_pages"], 2);
    assert_eq!(history["data"]["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn overdrawing_is_refused() {
    let app = TestApp::new().await;
    let user = app.buyer("bob").await;
    app.deposit(&user, 10).await;

    let (status, _) = app
        .post("/api/v1/wallet/withdraw", json!({ "amount": 11 }), &user)
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(app.balance(&user).await, Decimal::from(10));
}

#[tokio::test]
async fn non_positive_amounts_are_rejected() {
    let app = TestApp::new().await;
    let user = app.buyer("bob").await;

    for amount in [json!(0), json!(-5)] {
        let (status, _) = app
            .post("/api/v1/wallet/deposit", json!({ "amount": amount }), &user)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    assert_eq!(app.balance(&user).await, Decimal::ZERO);
}
