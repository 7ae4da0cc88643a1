use crate::{services::Page, ApiResponse, PaginatedResponse};
use axum::{http::StatusCode, Json};
use serde::Serialize;

/// Response of an endpoint that creates a resource
pub type Created<T> = (StatusCode, Json<ApiResponse<T>>);

/// Standard created response
pub fn created<T: Serialize>(data: T) -> Created<T> {
    (StatusCode::CREATED, Json(ApiResponse::success(data)))
}

/// Standard success response
pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(data))
}

/// Wraps a service page into the paginated envelope
pub fn paginated<T, U>(
    page: Page<T>,
    f: impl FnMut(T) -> U,
) -> Json<ApiResponse<PaginatedResponse<U>>>
where
    U: Serialize,
{
    Json(ApiResponse::success(PaginatedResponse::from(page.map(f))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_uses_201() {
        let (status, Json(body)) = created("x");
        assert_eq!(status, StatusCode::CREATED);
        assert!(body.success);
    }
}
