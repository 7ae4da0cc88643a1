use crate::{
    auth::AuthUser,
    entities::voucher,
    errors::ServiceError,
    handlers::common::{created, ok, Created},
    services::vouchers::{CheckVoucherRequest, CreateVoucherRequest, VoucherCheck},
    ApiResponse, ApiResult, AppState,
};
use axum::extract::{Json, State};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VoucherResponse {
    pub id: Uuid,
    pub store_id: Uuid,
    pub code: String,
    pub discount_percent: Decimal,
    /// Zero means uncapped
    pub max_discount: Decimal,
    pub expired_at: DateTime<Utc>,
    /// Redemptions left
    pub quantity: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<voucher::Model> for VoucherResponse {
    fn from(v: voucher::Model) -> Self {
        Self {
            id: v.id,
            store_id: v.store_id,
            code: v.code,
            discount_percent: v.discount_percent,
            max_discount: v.max_discount,
            expired_at: v.expired_at,
            quantity: v.quantity,
            active: v.active,
            created_at: v.created_at,
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/vouchers",
    summary = "Create voucher",
    request_body = CreateVoucherRequest,
    responses(
        (status = 201, description = "Voucher created", body = ApiResponse<VoucherResponse>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already in use", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "vouchers"
)]
pub async fn create_voucher(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateVoucherRequest>,
) -> Result<Created<VoucherResponse>, ServiceError> {
    let created_voucher = state
        .services
        .vouchers
        .create_voucher(&auth_user.actor(), request)
        .await?;
    Ok(created(created_voucher.into()))
}

#[utoipa::path(
    get,
    path = "/api/v1/vouchers",
    summary = "List store vouchers",
    responses(
        (status = 200, description = "Vouchers of the caller's store", body = ApiResponse<Vec<VoucherResponse>>),
        (status = 404, description = "No store opened yet", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "vouchers"
)]
pub async fn list_vouchers(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Vec<VoucherResponse>> {
    let vouchers = state
        .services
        .vouchers
        .list_store_vouchers(&auth_user.actor())
        .await?;
    Ok(ok(vouchers.into_iter().map(VoucherResponse::from).collect()))
}

#[utoipa::path(
    post,
    path = "/api/v1/vouchers/check",
    summary = "Check voucher",
    description = "Quotes a purchase with the voucher applied without redeeming it",
    request_body = CheckVoucherRequest,
    responses(
        (status = 200, description = "Quote", body = ApiResponse<VoucherCheck>),
        (status = 400, description = "Voucher invalid, expired or exhausted", body = crate::errors::ErrorResponse),
        (status = 404, description = "Voucher or product not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "vouchers"
)]
pub async fn check_voucher(
    State(state): State<AppState>,
    Json(request): Json<CheckVoucherRequest>,
) -> ApiResult<VoucherCheck> {
    Ok(ok(state.services.vouchers.check_voucher(request).await?))
}
