use crate::{
    auth::AuthUser,
    entities::order::OrderStatus,
    errors::ServiceError,
    handlers::common::{created, ok, paginated, Created},
    services::orders::{CreateOrderRequest, OrderDetailView, OrderStats, OrderView},
    ApiResponse, ApiResult, AppState, ListQuery, PaginatedResponse,
};
use axum::extract::{Json, Path, Query, State};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<OrderStatus>,
}

impl OrderQuery {
    fn list(&self) -> ListQuery {
        ListQuery {
            page: self.page,
            limit: self.limit,
        }
    }
}

/// Reporting window; both ends optional
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StatsQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Open order",
    description = "Creates an unpaid order in `processing`, optionally reserving a voucher. Settle it by attaching an account or service detail.",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderView>),
        (status = 400, description = "Voucher invalid, expired or exhausted", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<Created<OrderView>, ServiceError> {
    let order = state
        .services
        .orders
        .create_order(auth_user.user_id, request)
        .await?;
    Ok(created(order))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "My orders",
    params(OrderQuery),
    responses(
        (status = 200, description = "Orders of the caller", body = ApiResponse<PaginatedResponse<OrderView>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderQuery>,
    auth_user: AuthUser,
) -> ApiResult<PaginatedResponse<OrderView>> {
    let (page, limit) = state.paging(&query.list());
    let orders = state
        .services
        .orders
        .list_buyer_orders(auth_user.user_id, query.status, page, limit)
        .await?;
    Ok(paginated(orders, |o| o))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order", body = ApiResponse<OrderView>),
        (status = 403, description = "Not a party to the order", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    auth_user: AuthUser,
) -> ApiResult<OrderView> {
    let order = state
        .services
        .orders
        .get_order(&auth_user.actor(), order_id)
        .await?;
    Ok(ok(order))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/detail",
    summary = "Get order detail",
    description = "The settled line of the order: delivered account contents or service progress",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order detail", body = ApiResponse<OrderDetailView>),
        (status = 404, description = "Order not found or not settled", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn get_order_detail(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    auth_user: AuthUser,
) -> ApiResult<OrderDetailView> {
    let detail = state
        .services
        .orders
        .order_detail(&auth_user.actor(), order_id)
        .await?;
    Ok(ok(detail))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    summary = "Cancel order",
    description = "Cancels an order that has not been delivered; a paid order is refunded",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<OrderView>),
        (status = 400, description = "Order can no longer be cancelled", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the buyer", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    auth_user: AuthUser,
) -> ApiResult<OrderView> {
    let order = state
        .services
        .orders
        .cancel_order(&auth_user.actor(), order_id)
        .await?;
    Ok(ok(order))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/confirm",
    summary = "Confirm order",
    description = "Buyer accepts a delivered order; the payment is released to the seller",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order completed", body = ApiResponse<OrderView>),
        (status = 400, description = "Order is not delivered", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the buyer", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn confirm_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    auth_user: AuthUser,
) -> ApiResult<OrderView> {
    let order = state
        .services
        .orders
        .confirm_order(&auth_user.actor(), order_id)
        .await?;
    Ok(ok(order))
}

#[utoipa::path(
    get,
    path = "/api/v1/store/orders",
    summary = "Store orders",
    params(OrderQuery),
    responses(
        (status = 200, description = "Orders settled against the caller's products", body = ApiResponse<PaginatedResponse<OrderView>>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_store_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderQuery>,
    auth_user: AuthUser,
) -> ApiResult<PaginatedResponse<OrderView>> {
    let (page, limit) = state.paging(&query.list());
    let orders = state
        .services
        .orders
        .list_store_orders(auth_user.user_id, query.status, page, limit)
        .await?;
    Ok(paginated(orders, |o| o))
}

#[utoipa::path(
    get,
    path = "/api/v1/store/orders/stats",
    summary = "Store order statistics",
    params(StatsQuery),
    responses(
        (status = 200, description = "Order counts and revenue", body = ApiResponse<OrderStats>),
        (status = 400, description = "Window ends before it starts", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn store_order_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
    auth_user: AuthUser,
) -> ApiResult<OrderStats> {
    if let (Some(from), Some(to)) = (query.from, query.to) {
        if to < from {
            return Err(ServiceError::BadRequest(
                "`to` must not be earlier than `from`".to_string(),
            ));
        }
    }
    let stats = state
        .services
        .orders
        .order_stats(auth_user.user_id, query.from, query.to)
        .await?;
    Ok(ok(stats))
}
