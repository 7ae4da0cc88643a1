use crate::{
    auth::AuthUser,
    entities::{product::ProductType, store},
    errors::ServiceError,
    handlers::common::{created, ok, paginated, Created},
    services::catalog::{
        CreateProductRequest, CreateStoreRequest, ProductFilter, ProductView, UpdateProductRequest,
    },
    ApiResponse, ApiResult, AppState, ListQuery, PaginatedResponse,
};
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StoreResponse {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub name: String,
    pub description: String,
    pub verified: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<store::Model> for StoreResponse {
    fn from(s: store::Model) -> Self {
        Self {
            id: s.id,
            seller_id: s.seller_id,
            name: s.name,
            description: s.description,
            verified: s.verified,
            active: s.active,
            created_at: s.created_at,
        }
    }
}

/// Catalog search; only active, approved products are listed
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProductQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub product_type: Option<ProductType>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    /// Substring of the product name
    pub search: Option<String>,
    pub store_id: Option<Uuid>,
}

impl ProductQuery {
    fn split(self) -> (ListQuery, ProductFilter) {
        (
            ListQuery {
                page: self.page,
                limit: self.limit,
            },
            ProductFilter {
                product_type: self.product_type,
                min_price: self.min_price,
                max_price: self.max_price,
                search: self.search,
                store_id: self.store_id,
            },
        )
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/stores",
    summary = "Open store",
    description = "A verified seller may open exactly one store",
    request_body = CreateStoreRequest,
    responses(
        (status = 201, description = "Store created", body = ApiResponse<StoreResponse>),
        (status = 403, description = "Seller is not verified", body = crate::errors::ErrorResponse),
        (status = 409, description = "Seller already has a store", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "catalog"
)]
pub async fn create_store(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateStoreRequest>,
) -> Result<Created<StoreResponse>, ServiceError> {
    let store = state
        .services
        .catalog
        .create_store(&auth_user.actor(), request)
        .await?;
    Ok(created(StoreResponse::from(store)))
}

#[utoipa::path(
    get,
    path = "/api/v1/stores/mine",
    summary = "My store",
    responses(
        (status = 200, description = "The caller's store", body = ApiResponse<StoreResponse>),
        (status = 404, description = "No store opened yet", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "catalog"
)]
pub async fn my_store(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<StoreResponse> {
    let store = state.services.catalog.my_store(&auth_user.actor()).await?;
    Ok(ok(store.into()))
}

#[utoipa::path(
    post,
    path = "/api/v1/products",
    summary = "Create product",
    description = "New products start unapproved and are hidden from the catalog until an admin approves them",
    request_body = CreateProductRequest,
    responses(
        (status = 201, description = "Product created", body = ApiResponse<ProductView>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 404, description = "No store opened yet", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "catalog"
)]
pub async fn create_product(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateProductRequest>,
) -> Result<Created<ProductView>, ServiceError> {
    let product = state
        .services
        .catalog
        .create_product(&auth_user.actor(), request)
        .await?;
    Ok(created(product))
}

#[utoipa::path(
    put,
    path = "/api/v1/products/{id}",
    summary = "Update product",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = UpdateProductRequest,
    responses(
        (status = 200, description = "Product updated", body = ApiResponse<ProductView>),
        (status = 403, description = "Not the product owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "catalog"
)]
pub async fn update_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    auth_user: AuthUser,
    Json(request): Json<UpdateProductRequest>,
) -> ApiResult<ProductView> {
    let product = state
        .services
        .catalog
        .update_product(&auth_user.actor(), product_id, request)
        .await?;
    Ok(ok(product))
}

#[utoipa::path(
    delete,
    path = "/api/v1/products/{id}",
    summary = "Deactivate product",
    description = "Products are never deleted; they are taken off the catalog",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 204, description = "Product deactivated"),
        (status = 403, description = "Not the product owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "catalog"
)]
pub async fn deactivate_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<StatusCode, ServiceError> {
    state
        .services
        .catalog
        .deactivate_product(&auth_user.actor(), product_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/products/{id}/approve",
    summary = "Approve product",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product approved", body = ApiResponse<ProductView>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn approve_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> ApiResult<ProductView> {
    Ok(ok(state.services.catalog.approve_product(product_id).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    summary = "Get product",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product with live stock count", body = ApiResponse<ProductView>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "catalog"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    auth_user: AuthUser,
) -> ApiResult<ProductView> {
    let product = state
        .services
        .catalog
        .get_product(&auth_user.actor(), product_id)
        .await?;
    Ok(ok(product))
}

#[utoipa::path(
    get,
    path = "/api/v1/products",
    summary = "Browse catalog",
    params(ProductQuery),
    responses(
        (status = 200, description = "Products page", body = ApiResponse<PaginatedResponse<ProductView>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "catalog"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> ApiResult<PaginatedResponse<ProductView>> {
    let (list, filter) = query.split();
    let (page, limit) = state.paging(&list);
    let products = state
        .services
        .catalog
        .list_products(filter, page, limit)
        .await?;
    Ok(paginated(products, |p| p))
}
