#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use mmo_market::{
    auth::{AuthConfig, AuthService},
    config::AppConfig,
    db,
    entities::{product::ProductType, user},
    events::{self, EventProcessor, EventSender},
    notifications::{EmailMessage, NotificationError, Notifier},
    services::{
        catalog::{CreateProductRequest, CreateStoreRequest},
        stock::AddStockRequest,
        Actor,
    },
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str =
    "integration-tests-only/7f3c9a1e5b2d4f6081a3c5e7f9b1d3e5a7c9e1f3b5d7f9a1c3e5";
pub const PASSWORD: &str = "correct horse battery";

/// Collects every message handed to it
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: EmailMessage) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .map_err(|e| NotificationError::Delivery(e.to_string()))?
            .push(message);
        Ok(())
    }
}

/// A registered user with a valid bearer token
#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: Uuid,
    pub username: String,
    pub role: user::UserRole,
    pub token: String,
}

impl TestUser {
    pub fn actor(&self) -> Actor {
        Actor::new(self.id, self.role)
    }
}

/// Full application on an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub notifier: Arc<RecordingNotifier>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            3600,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // One connection keeps every task on the same in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_acquire_timeout_secs = 30;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let notifier = Arc::new(RecordingNotifier::default());
        let processor = EventProcessor::new(
            db_arc.clone(),
            notifier.clone(),
            cfg.mail_from.clone(),
            true,
        );
        let event_task = tokio::spawn(events::process_events(event_rx, processor));

        let auth_service = Arc::new(AuthService::new(AuthConfig::new(
            cfg.jwt_secret.clone(),
            cfg.auth_audience.clone(),
            cfg.auth_issuer.clone(),
            Duration::from_secs(cfg.jwt_expiration as u64),
        )));

        let state = AppState::new(db_arc, cfg, event_sender, auth_service);
        let router = mmo_market::build_router(state.clone());

        Self {
            router,
            state,
            notifier,
            _event_task: event_task,
        }
    }

    /// Sends a request and returns the status with the parsed JSON body
    /// (`Value::Null` for empty bodies).
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router error during test request");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, user: &TestUser) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None, Some(&user.token)).await
    }

    pub async fn post(&self, uri: &str, body: Value, user: &TestUser) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(body), Some(&user.token))
            .await
    }

    pub async fn put(&self, uri: &str, body: Value, user: &TestUser) -> (StatusCode, Value) {
        self.send(Method::PUT, uri, Some(body), Some(&user.token))
            .await
    }

    /// Registers through `/auth/register` and logs in through `/auth/token`.
    pub async fn register(&self, username: &str, role: &str) -> TestUser {
        let (status, body) = self
            .send(
                Method::POST,
                "/auth/register",
                Some(json!({
                    "username": username,
                    "password": PASSWORD,
                    "email": format!("{username}@example.com"),
                    "first_name": username,
                    "role": role,
                })),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
        let id: Uuid = serde_json::from_value(body["data"]["id"].clone()).expect("user id");

        let (status, body) = self
            .send(
                Method::POST,
                "/auth/token",
                Some(json!({
                    "grant_type": "password",
                    "username": username,
                    "password": PASSWORD,
                })),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "token failed: {body}");

        TestUser {
            id,
            username: username.to_string(),
            role: role.parse().expect("role"),
            token: body["data"]["access_token"]
                .as_str()
                .expect("access token")
                .to_string(),
        }
    }

    pub async fn buyer(&self, username: &str) -> TestUser {
        self.register(username, "customer").await
    }

    /// Registers and verifies a seller
    pub async fn seller(&self, username: &str) -> TestUser {
        let seller = self.register(username, "seller").await;
        self.state
            .services
            .accounts
            .verify_user(seller.id)
            .await
            .expect("verify seller");
        seller
    }

    /// Admins cannot self-register; they are inserted directly.
    pub async fn admin(&self, username: &str) -> TestUser {
        let hash = mmo_market::services::accounts::hash_password(PASSWORD).expect("hash");
        let model = user::ActiveModel {
            username: Set(username.to_string()),
            password_hash: Set(hash),
            email: Set(Some(format!("{username}@example.com"))),
            first_name: Set(String::new()),
            last_name: Set(String::new()),
            phone: Set(None),
            role: Set("admin".to_string()),
            balance: Set(Decimal::ZERO),
            is_verified: Set(true),
            active: Set(true),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("insert admin");

        let pair = self.state.auth.generate_token(&model).expect("admin token");
        TestUser {
            id: model.id,
            username: username.to_string(),
            role: user::UserRole::Admin,
            token: pair.access_token,
        }
    }

    pub async fn deposit(&self, user: &TestUser, amount: i64) {
        let (status, body) = self
            .post("/api/v1/wallet/deposit", json!({ "amount": amount }), user)
            .await;
        assert_eq!(status, StatusCode::CREATED, "deposit failed: {body}");
    }

    pub async fn balance(&self, user: &TestUser) -> Decimal {
        self.state
            .services
            .accounts
            .get_user(user.id)
            .await
            .expect("load user")
            .balance
    }

    pub async fn open_store(&self, seller: &TestUser) -> Uuid {
        self.state
            .services
            .catalog
            .create_store(
                &seller.actor(),
                CreateStoreRequest {
                    name: format!("{} shop", seller.username),
                    description: Some("Digital goods".to_string()),
                },
            )
            .await
            .expect("open store")
            .id
    }

    /// Creates and approves a product in the seller's store
    pub async fn listed_product(
        &self,
        seller: &TestUser,
        product_type: ProductType,
        price: i64,
    ) -> Uuid {
        let catalog = &self.state.services.catalog;
        let product = catalog
            .create_product(
                &seller.actor(),
                CreateProductRequest {
                    name: format!("{product_type} by {}", seller.username),
                    description: Some("Test product".to_string()),
                    image_url: None,
                    price: Decimal::from(price),
                    format: Some("username:password".to_string()),
                    product_type,
                    warranty_days: Some(3),
                },
            )
            .await
            .expect("create product");
        catalog
            .approve_product(product.id)
            .await
            .expect("approve product");
        product.id
    }

    pub async fn load_stock(&self, seller: &TestUser, product_id: Uuid, count: usize) {
        let contents = (0..count).map(|i| format!("login{i}:secret{i}")).collect();
        self.state
            .services
            .stock
            .add_stock(&seller.actor(), product_id, AddStockRequest { contents })
            .await
            .expect("add stock");
    }

    /// Opens an order through the API; returns its id
    pub async fn open_order(&self, buyer: &TestUser, voucher_code: Option<&str>) -> Uuid {
        let (status, body) = self
            .post("/api/v1/orders", json!({ "voucher_code": voucher_code }), buyer)
            .await;
        assert_eq!(status, StatusCode::CREATED, "create order failed: {body}");
        serde_json::from_value(body["data"]["id"].clone()).expect("order id")
    }

    /// Waits for the background processor to hand over `count` messages.
    pub async fn wait_for_notifications(&self, count: usize) -> Vec<EmailMessage> {
        for _ in 0..100 {
            let sent = self.notifier.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.notifier.sent()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a decimal: {other}"),
    }
}
