use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::{created, paginated, Created},
    services::stock::{AddStockRequest, AddStockResult, StockItem},
    ApiResponse, ApiResult, AppState, ListQuery, PaginatedResponse,
};
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StockQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    /// Only sold (`true`) or only unsold (`false`) rows
    pub sold: Option<bool>,
}

#[utoipa::path(
    post,
    path = "/api/v1/products/{id}/stock",
    summary = "Load stock",
    description = "Adds one deliverable item per entry of `contents`. Blank entries are skipped.",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = AddStockRequest,
    responses(
        (status = 201, description = "Stock added", body = ApiResponse<AddStockResult>),
        (status = 400, description = "Product is not stock-backed", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the product owner", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "stock"
)]
pub async fn add_stock(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    auth_user: AuthUser,
    Json(request): Json<AddStockRequest>,
) -> Result<Created<AddStockResult>, ServiceError> {
    let result = state
        .services
        .stock
        .add_stock(&auth_user.actor(), product_id, request)
        .await?;
    Ok(created(result))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}/stock",
    summary = "List stock",
    params(("id" = Uuid, Path, description = "Product id"), StockQuery),
    responses(
        (status = 200, description = "Stock page", body = ApiResponse<PaginatedResponse<StockItem>>),
        (status = 403, description = "Not the product owner", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "stock"
)]
pub async fn list_stock(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Query(query): Query<StockQuery>,
    auth_user: AuthUser,
) -> ApiResult<PaginatedResponse<StockItem>> {
    let (page, limit) = state.paging(&ListQuery {
        page: query.page,
        limit: query.limit,
    });
    let items = state
        .services
        .stock
        .list_stock(&auth_user.actor(), product_id, query.sold, page, limit)
        .await?;
    Ok(paginated(items, |item| item))
}

#[utoipa::path(
    delete,
    path = "/api/v1/stock/{id}",
    summary = "Remove stock item",
    params(("id" = Uuid, Path, description = "Stock item id")),
    responses(
        (status = 204, description = "Stock item removed"),
        (status = 409, description = "Item already sold", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "stock"
)]
pub async fn remove_stock(
    State(state): State<AppState>,
    Path(stock_id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<StatusCode, ServiceError> {
    state
        .services
        .stock
        .remove_stock(&auth_user.actor(), stock_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
