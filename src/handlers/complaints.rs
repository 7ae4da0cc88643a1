use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::{created, ok, Created},
    services::complaints::{ComplaintView, FileComplaintRequest, ResolveComplaintRequest},
    ApiResponse, ApiResult, AppState,
};
use axum::extract::{Json, Path, State};
use uuid::Uuid;

#[utoipa::path(
    post,
    path = "/api/v1/complaints",
    summary = "File complaint",
    description = "Either party may dispute an order in `processing` or `delivered`. The payment stays in escrow until an admin rules.",
    request_body = FileComplaintRequest,
    responses(
        (status = 201, description = "Complaint filed", body = ApiResponse<ComplaintView>),
        (status = 400, description = "Order cannot be disputed", body = crate::errors::ErrorResponse),
        (status = 409, description = "An open complaint already exists", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "complaints"
)]
pub async fn file_complaint(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<FileComplaintRequest>,
) -> Result<Created<ComplaintView>, ServiceError> {
    let complaint = state
        .services
        .complaints
        .file_complaint(&auth_user.actor(), request)
        .await?;
    Ok(created(complaint))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/complaints",
    summary = "Order complaints",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Complaints, newest first", body = ApiResponse<Vec<ComplaintView>>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "complaints"
)]
pub async fn list_order_complaints(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    auth_user: AuthUser,
) -> ApiResult<Vec<ComplaintView>> {
    let complaints = state
        .services
        .complaints
        .list_order_complaints(&auth_user.actor(), order_id)
        .await?;
    Ok(ok(complaints))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/complaints/{id}/resolve",
    summary = "Resolve complaint",
    params(("id" = Uuid, Path, description = "Complaint id")),
    request_body = ResolveComplaintRequest,
    responses(
        (status = 200, description = "Ruling recorded", body = ApiResponse<ComplaintView>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 409, description = "Complaint already resolved", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn resolve_complaint(
    State(state): State<AppState>,
    Path(complaint_id): Path<Uuid>,
    auth_user: AuthUser,
    Json(request): Json<ResolveComplaintRequest>,
) -> ApiResult<ComplaintView> {
    let complaint = state
        .services
        .complaints
        .resolve_complaint(&auth_user.actor(), complaint_id, request.decision)
        .await?;
    Ok(ok(complaint))
}
