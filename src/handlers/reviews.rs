use crate::{
    auth::AuthUser,
    errors::ServiceError,
    handlers::common::{created, ok, Created},
    services::reviews::{CreateReviewRequest, ReviewView},
    ApiResponse, ApiResult, AppState, ListQuery, PaginatedResponse,
};
use axum::extract::{Json, Path, Query, State};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Serialize, ToSchema)]
pub struct ProductReviewsResponse {
    pub reviews: PaginatedResponse<ReviewView>,
    /// Mean rating over all reviews, absent when there are none
    pub average_rating: Option<f64>,
}

#[utoipa::path(
    post,
    path = "/api/v1/reviews",
    summary = "Review a product",
    description = "One review per buyer, product and order; the order must be settled against that product",
    request_body = CreateReviewRequest,
    responses(
        (status = 201, description = "Review created", body = ApiResponse<ReviewView>),
        (status = 400, description = "Order not eligible", body = crate::errors::ErrorResponse),
        (status = 409, description = "Already reviewed", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "reviews"
)]
pub async fn create_review(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateReviewRequest>,
) -> Result<Created<ReviewView>, ServiceError> {
    let review = state
        .services
        .reviews
        .create_review(auth_user.user_id, request)
        .await?;
    Ok(created(review))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}/reviews",
    summary = "Product reviews",
    params(("id" = Uuid, Path, description = "Product id"), ListQuery),
    responses(
        (status = 200, description = "Reviews page with average rating", body = ApiResponse<ProductReviewsResponse>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "reviews"
)]
pub async fn list_product_reviews(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> ApiResult<ProductReviewsResponse> {
    let (page, limit) = state.paging(&query);
    let found = state
        .services
        .reviews
        .list_product_reviews(product_id, page, limit)
        .await?;
    Ok(ok(ProductReviewsResponse {
        reviews: found.reviews.into(),
        average_rating: found.average_rating,
    }))
}
