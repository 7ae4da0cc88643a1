use crate::{
    auth::AuthUser,
    handlers::common::{created, ok, paginated, Created},
    errors::ServiceError,
    services::{
        accounts::{TransactionEntry, UserProfile, WalletRequest},
        ledger::Reconciliation,
    },
    ApiResponse, ApiResult, AppState, ListQuery, PaginatedResponse,
};
use axum::extract::{Json, Path, Query, State};
use uuid::Uuid;

#[utoipa::path(
    get,
    path = "/api/v1/me",
    summary = "Current user",
    responses(
        (status = 200, description = "Profile of the caller", body = ApiResponse<UserProfile>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "accounts"
)]
pub async fn me(State(state): State<AppState>, auth_user: AuthUser) -> ApiResult<UserProfile> {
    Ok(ok(state.services.accounts.profile(auth_user.user_id).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/wallet/deposit",
    summary = "Deposit into wallet",
    request_body = WalletRequest,
    responses(
        (status = 201, description = "Deposit recorded", body = ApiResponse<TransactionEntry>),
        (status = 400, description = "Invalid amount", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "accounts"
)]
pub async fn deposit(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<WalletRequest>,
) -> Result<Created<TransactionEntry>, ServiceError> {
    let entry = state
        .services
        .accounts
        .deposit(auth_user.user_id, request)
        .await?;
    Ok(created(entry))
}

#[utoipa::path(
    post,
    path = "/api/v1/wallet/withdraw",
    summary = "Withdraw from wallet",
    request_body = WalletRequest,
    responses(
        (status = 201, description = "Withdrawal recorded", body = ApiResponse<TransactionEntry>),
        (status = 400, description = "Invalid amount", body = crate::errors::ErrorResponse),
        (status = 402, description = "Insufficient balance", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "accounts"
)]
pub async fn withdraw(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<WalletRequest>,
) -> Result<Created<TransactionEntry>, ServiceError> {
    let entry = state
        .services
        .accounts
        .withdraw(auth_user.user_id, request)
        .await?;
    Ok(created(entry))
}

#[utoipa::path(
    get,
    path = "/api/v1/wallet/transactions",
    summary = "Wallet history",
    description = "Ledger entries of the caller, newest first",
    params(ListQuery),
    responses(
        (status = 200, description = "Ledger page", body = ApiResponse<PaginatedResponse<TransactionEntry>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "accounts"
)]
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    auth_user: AuthUser,
) -> ApiResult<PaginatedResponse<TransactionEntry>> {
    let (page, limit) = state.paging(&query);
    let entries = state
        .services
        .accounts
        .list_transactions(auth_user.user_id, page, limit)
        .await?;
    Ok(paginated(entries, |entry| entry))
}

#[utoipa::path(
    get,
    path = "/api/v1/wallet/reconcile",
    summary = "Reconcile wallet",
    description = "Compares the stored balance against the sum of ledger entries",
    responses(
        (status = 200, description = "Reconciliation report", body = ApiResponse<Reconciliation>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "accounts"
)]
pub async fn reconcile(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Reconciliation> {
    Ok(ok(state.services.accounts.reconcile(auth_user.user_id).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{id}/verify",
    summary = "Verify user",
    description = "Marks a user as verified; sellers need this before opening a store",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User verified", body = ApiResponse<UserProfile>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "User not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "admin"
)]
pub async fn verify_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<UserProfile> {
    Ok(ok(state.services.accounts.verify_user(user_id).await?))
}
