use crate::{
    auth::TokenPair,
    errors::ServiceError,
    handlers::common::{created, ok, Created},
    services::accounts::{RegisterRequest, UserProfile},
    ApiResponse, ApiResult, AppState,
};
use axum::extract::{Json, State};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

/// Password grant
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenRequest {
    /// Must be `password` when present
    pub grant_type: Option<String>,
    pub username: String,
    pub password: String,
}

#[utoipa::path(
    post,
    path = "/auth/register",
    summary = "Register",
    description = "Create a customer or seller account. Admin accounts cannot self-register.",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = ApiResponse<UserProfile>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 409, description = "Username already taken", body = crate::errors::ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Created<UserProfile>, ServiceError> {
    let profile = state.services.accounts.register(request).await?;
    Ok(created(profile))
}

#[utoipa::path(
    post,
    path = "/auth/token",
    summary = "Issue access token",
    description = "OAuth2-style password grant returning a bearer JWT",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Token issued", body = ApiResponse<TokenPair>),
        (status = 400, description = "Unsupported grant type", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid credentials", body = crate::errors::ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn issue_token(
    State(state): State<AppState>,
    Json(request): Json<TokenRequest>,
) -> ApiResult<TokenPair> {
    if let Some(grant) = request.grant_type.as_deref() {
        if grant != "password" {
            return Err(ServiceError::BadRequest(format!(
                "Unsupported grant type: {grant}"
            )));
        }
    }

    let user = match state
        .services
        .accounts
        .authenticate(&request.username, &request.password)
        .await
    {
        Ok(user) => user,
        Err(e) => {
            warn!(username = %request.username, "token request rejected");
            return Err(e);
        }
    };

    let pair = state.auth.generate_token(&user)?;
    info!(user_id = %user.id, "access token issued");
    Ok(ok(pair))
}
