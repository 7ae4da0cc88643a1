use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

/// Registers the `Bearer` scheme referenced by the secured paths
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "mmo-market API",
        version = "1.0.0",
        description = r#"
# mmo-market

Marketplace for digital goods. Sellers list account stock (delivered
instantly) and services (fulfilled over time). Buyers pay from a wallet;
payments are held until the order is confirmed or a complaint is resolved.

## Authentication

Obtain a token from `POST /auth/token` and send it as

```
Authorization: Bearer <access-token>
```

## Errors

Failures return `{error, message, request_id, timestamp}` with the HTTP
status of the failure class. Insufficient wallet balance is `402`,
insufficient stock is `422`.

## Pagination

List endpoints take `page` (from 1) and `limit` (clamped to the configured
maximum).
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers((url = "http://localhost:8080", description = "Local development")),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Registration and token issuance"),
        (name = "accounts", description = "Profile and wallet"),
        (name = "catalog", description = "Stores and products"),
        (name = "stock", description = "Deliverable account stock"),
        (name = "vouchers", description = "Store discount codes"),
        (name = "orders", description = "Order lifecycle"),
        (name = "settlement", description = "Paying for and fulfilling orders"),
        (name = "complaints", description = "Order disputes"),
        (name = "reviews", description = "Product reviews"),
        (name = "admin", description = "Administrative endpoints")
    ),
    paths(
        crate::handlers::auth::register,
        crate::handlers::auth::issue_token,

        crate::handlers::accounts::me,
        crate::handlers::accounts::deposit,
        crate::handlers::accounts::withdraw,
        crate::handlers::accounts::list_transactions,
        crate::handlers::accounts::reconcile,
        crate::handlers::accounts::verify_user,

        crate::handlers::catalog::create_store,
        crate::handlers::catalog::my_store,
        crate::handlers::catalog::create_product,
        crate::handlers::catalog::update_product,
        crate::handlers::catalog::deactivate_product,
        crate::handlers::catalog::approve_product,
        crate::handlers::catalog::get_product,
        crate::handlers::catalog::list_products,

        crate::handlers::stock::add_stock,
        crate::handlers::stock::list_stock,
        crate::handlers::stock::remove_stock,

        crate::handlers::vouchers::create_voucher,
        crate::handlers::vouchers::list_vouchers,
        crate::handlers::vouchers::check_voucher,

        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::get_order_detail,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::confirm_order,
        crate::handlers::orders::list_store_orders,
        crate::handlers::orders::store_order_stats,

        crate::handlers::settlement::create_account_detail,
        crate::handlers::settlement::create_service_detail,
        crate::handlers::settlement::update_service_status,

        crate::handlers::complaints::file_complaint,
        crate::handlers::complaints::list_order_complaints,
        crate::handlers::complaints::resolve_complaint,

        crate::handlers::reviews::create_review,
        crate::handlers::reviews::list_product_reviews,
    ),
    components(
        schemas(
            crate::ListQuery,
            crate::errors::ErrorResponse,
            crate::entities::user::UserRole,
            crate::entities::product::ProductType,
            crate::entities::order::OrderStatus,
            crate::entities::service_order_detail::ServiceStatus,
            crate::entities::complaint::ComplaintDecision,
            crate::entities::transaction_history::TransactionType,
            crate::services::pricing::PriceQuote,
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_settlement_paths_and_bearer_scheme() {
        let json = serde_json::to_string(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("mmo-market API"));
        assert!(json.contains("/api/v1/acc-order-details"));
        assert!(json.contains("/api/v1/service-order-details/{id}/status"));
        assert!(json.contains("\"Bearer\""));
    }
}
