use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::{created, ok, Created},
    services::{
        orders::{AccountDetailView, ServiceDetailView},
        settlement::{
            CreateAccOrderDetailRequest, CreateServiceOrderDetailRequest,
            UpdateServiceStatusRequest,
        },
    },
    ApiResponse, ApiResult, AppState,
};
use axum::extract::{Json, Path, State};
use uuid::Uuid;

#[utoipa::path(
    post,
    path = "/api/v1/acc-order-details",
    summary = "Buy account stock",
    description = "Pays for the order from the buyer's wallet and delivers `quantity` unsold stock items in one transaction. The order becomes `delivered`.",
    request_body = CreateAccOrderDetailRequest,
    responses(
        (status = 201, description = "Order settled and delivered", body = ApiResponse<AccountDetailView>),
        (status = 400, description = "Order or product not eligible", body = crate::errors::ErrorResponse),
        (status = 402, description = "Insufficient balance", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already settled", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "settlement"
)]
pub async fn create_account_detail(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateAccOrderDetailRequest>,
) -> Result<Created<AccountDetailView>, ServiceError> {
    let detail = state
        .services
        .settlement
        .create_account_detail(auth_user.user_id, request)
        .await?;
    Ok(created(detail))
}

#[utoipa::path(
    post,
    path = "/api/v1/service-order-details",
    summary = "Buy a service",
    description = "Pays for the order from the buyer's wallet and opens a `pending` service job for the seller",
    request_body = CreateServiceOrderDetailRequest,
    responses(
        (status = 201, description = "Service order placed", body = ApiResponse<ServiceDetailView>),
        (status = 400, description = "Order or product not eligible", body = crate::errors::ErrorResponse),
        (status = 402, description = "Insufficient balance", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already settled", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "settlement"
)]
pub async fn create_service_detail(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateServiceOrderDetailRequest>,
) -> Result<Created<ServiceDetailView>, ServiceError> {
    let detail = state
        .services
        .settlement
        .create_service_detail(auth_user.user_id, request)
        .await?;
    Ok(created(detail))
}

#[utoipa::path(
    put,
    path = "/api/v1/service-order-details/{id}/status",
    summary = "Advance a service job",
    description = "pending -> in_progress -> completed, or failed from any non-final state. Completing delivers the order, failing refunds the buyer.",
    params(("id" = Uuid, Path, description = "Service order detail id")),
    request_body = UpdateServiceStatusRequest,
    responses(
        (status = 200, description = "Status changed", body = ApiResponse<ServiceDetailView>),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the seller or an admin", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "settlement"
)]
pub async fn update_service_status(
    State(state): State<AppState>,
    Path(detail_id): Path<Uuid>,
    auth_user: AuthUser,
    Json(request): Json<UpdateServiceStatusRequest>,
) -> ApiResult<ServiceDetailView> {
    let detail = state
        .services
        .settlement
        .update_service_status(&auth_user.actor(), detail_id, request.status)
        .await?;
    Ok(ok(detail))
}
