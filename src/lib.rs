//! mmo-market
//!
//! Marketplace backend for digital goods. Buyers fund a wallet, open an order
//! and settle it against a seller's product: account-type products are
//! delivered instantly from pre-loaded stock, service-type products are
//! fulfilled by the seller over time. Payments stay in escrow until the order
//! is confirmed by the buyer or released by an admin after a complaint.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod notifications;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    extract::State,
    http::{HeaderValue, Method},
    response::Json,
    routing::{delete, get, post, put},
    Extension, Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
};
use utoipa::{IntoParams, ToSchema};

use crate::auth::{AuthRouterExt, AuthService};
use crate::entities::user::UserRole;
use crate::services::Page;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
    pub auth: Arc<AuthService>,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: Arc<events::EventSender>,
        auth: Arc<AuthService>,
    ) -> Self {
        let services = handlers::AppServices::new(db.clone(), event_sender.clone());
        Self {
            db,
            config,
            event_sender,
            services,
            auth,
        }
    }

    /// Resolves page number and clamped page size for a list request
    pub fn paging(&self, query: &ListQuery) -> (u64, u64) {
        (query.page.unwrap_or(1).max(1), self.config.page_size(query.limit))
    }
}

// Common query parameters for list endpoints
#[derive(Debug, Default, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Page number, starting at 1
    pub page: Option<u64>,
    /// Items per page, clamped to the configured maximum
    pub limit: Option<u64>,
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> From<Page<T>> for PaginatedResponse<T> {
    fn from(page: Page<T>) -> Self {
        let total_pages = if page.limit == 0 {
            0
        } else {
            page.total.div_ceil(page.limit)
        };
        Self {
            items: page.items,
            total: page.total,
            page: page.page,
            limit: page.limit,
            total_pages,
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::success(data)
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Token issuance and sign-up; mounted outside `/api/v1`
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(handlers::auth::register))
        .route("/token", post(handlers::auth::issue_token))
}

pub fn api_v1_routes() -> Router<AppState> {
    // Any signed-in user
    let user_routes = Router::new()
        .route("/me", get(handlers::accounts::me))
        .route("/wallet/deposit", post(handlers::accounts::deposit))
        .route("/wallet/withdraw", post(handlers::accounts::withdraw))
        .route("/wallet/transactions", get(handlers::accounts::list_transactions))
        .route("/wallet/reconcile", get(handlers::accounts::reconcile))
        .route("/products", get(handlers::catalog::list_products))
        .route("/products/:id", get(handlers::catalog::get_product))
        .route("/products/:id/reviews", get(handlers::reviews::list_product_reviews))
        .route("/vouchers/check", post(handlers::vouchers::check_voucher))
        .route(
            "/orders",
            get(handlers::orders::list_orders).post(handlers::orders::create_order),
        )
        .route("/orders/:id", get(handlers::orders::get_order))
        .route("/orders/:id/detail", get(handlers::orders::get_order_detail))
        .route("/orders/:id/cancel", post(handlers::orders::cancel_order))
        .route("/orders/:id/confirm", post(handlers::orders::confirm_order))
        .route(
            "/orders/:id/complaints",
            get(handlers::complaints::list_order_complaints),
        )
        .route(
            "/acc-order-details",
            post(handlers::settlement::create_account_detail),
        )
        .route(
            "/service-order-details",
            post(handlers::settlement::create_service_detail),
        )
        // Seller or admin; ownership is checked by the service
        .route(
            "/service-order-details/:id/status",
            put(handlers::settlement::update_service_status),
        )
        .route("/complaints", post(handlers::complaints::file_complaint))
        .route("/reviews", post(handlers::reviews::create_review))
        .with_auth();

    let seller_routes = Router::new()
        .route("/stores", post(handlers::catalog::create_store))
        .route("/stores/mine", get(handlers::catalog::my_store))
        .route("/products", post(handlers::catalog::create_product))
        .route(
            "/products/:id",
            put(handlers::catalog::update_product).delete(handlers::catalog::deactivate_product),
        )
        .route(
            "/products/:id/stock",
            post(handlers::stock::add_stock).get(handlers::stock::list_stock),
        )
        .route("/stock/:id", delete(handlers::stock::remove_stock))
        .route(
            "/vouchers",
            post(handlers::vouchers::create_voucher).get(handlers::vouchers::list_vouchers),
        )
        .route("/store/orders", get(handlers::orders::list_store_orders))
        .route("/store/orders/stats", get(handlers::orders::store_order_stats))
        .with_role(UserRole::Seller);

    let admin_routes = Router::new()
        .route("/users/:id/verify", post(handlers::accounts::verify_user))
        .route("/products/:id/approve", post(handlers::catalog::approve_product))
        .route(
            "/complaints/:id/resolve",
            post(handlers::complaints::resolve_complaint),
        )
        .with_role(UserRole::Admin);

    Router::new()
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        .merge(user_routes)
        .merge(seller_routes)
        .nest("/admin", admin_routes)
}

/// Builds the complete application router with middleware applied
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let auth = state.auth.clone();

    Router::new()
        .nest("/auth", auth_routes())
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .layer(Extension(auth))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

fn cors_layer(config: &config::AppConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| origin.parse().ok())
        .collect();

    if origins.is_empty() && config.should_allow_permissive_cors() {
        base.allow_origin(Any)
    } else {
        base.allow_origin(origins)
    }
}

async fn api_status(State(state): State<AppState>) -> ApiResult<Value> {
    Ok(Json(ApiResponse::success(json!({
        "status": "ok",
        "service": "mmo-market",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "timestamp": Utc::now().to_rfc3339(),
    }))))
}

async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    let db_status = match db::check_connection(&state.db).await {
        Ok(()) => "healthy",
        Err(_) => "unhealthy",
    };

    Ok(Json(ApiResponse::success(json!({
        "status": db_status,
        "checks": { "database": db_status },
        "timestamp": Utc::now().to_rfc3339(),
    }))))
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[test]
    fn paginated_response_counts_pages() {
        let page = Page {
            items: vec![1, 2, 3],
            total: 7,
            page: 1,
            limit: 3,
        };
        let response = PaginatedResponse::from(page);
        assert_eq!(response.total_pages, 3);
        assert_eq!(response.items, vec![1, 2, 3]);
    }
}
