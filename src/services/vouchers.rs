use crate::{
    db::DbPool,
    entities::{product, voucher},
    errors::ServiceError,
    services::{
        catalog::seller_store,
        conflict_on_unique,
        pricing::{self, PriceQuote, VoucherTerms},
        Actor,
    },
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

pub const INVALID_VOUCHER: &str = "Voucher is invalid, expired or exhausted";
pub const FOREIGN_VOUCHER: &str = "Voucher does not belong to this store";

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateVoucherRequest {
    #[validate(length(min = 3, max = 50, message = "Code must be 3-50 characters"))]
    pub code: String,
    pub discount_percent: Decimal,
    /// Zero or absent leaves the discount uncapped
    pub max_discount: Option<Decimal>,
    pub expired_at: DateTime<Utc>,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CheckVoucherRequest {
    #[validate(length(min = 1))]
    pub code: String,
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
}

/// Preview of what a voucher would take off an order
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VoucherCheck {
    pub voucher_id: Uuid,
    pub code: String,
    pub quote: PriceQuote,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

/// Atomically takes one redemption from the voucher with `code`.
///
/// The decrement only matches a voucher that is active, unexpired and has
/// redemptions left, so concurrent callers can never drive the count below
/// zero.
pub(crate) async fn redeem<C>(conn: &C, code: &str) -> Result<voucher::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let result = voucher::Entity::update_many()
        .col_expr(
            voucher::Column::Quantity,
            Expr::col(voucher::Column::Quantity).sub(1),
        )
        .col_expr(voucher::Column::UpdatedAt, Expr::value(now))
        .filter(voucher::Column::Code.eq(code))
        .filter(voucher::Column::Active.eq(true))
        .filter(voucher::Column::Quantity.gt(0))
        .filter(voucher::Column::ExpiredAt.gt(now))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        debug!(code = %code, "voucher redemption refused");
        return Err(ServiceError::ValidationError(INVALID_VOUCHER.to_string()));
    }

    voucher::Entity::find()
        .filter(voucher::Column::Code.eq(code))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::ValidationError(INVALID_VOUCHER.to_string()))
}

/// Prices `quantity` units of `product` with an optional voucher, rejecting
/// vouchers issued by a different store.
pub(crate) fn price_with_voucher(
    product: &product::Model,
    quantity: i32,
    voucher: Option<&voucher::Model>,
) -> Result<PriceQuote, ServiceError> {
    if let Some(v) = voucher {
        if v.store_id != product.store_id {
            return Err(ServiceError::ValidationError(FOREIGN_VOUCHER.to_string()));
        }
    }
    pricing::quote(product.price, quantity, voucher.map(VoucherTerms::from))
}

#[derive(Clone)]
pub struct VoucherService {
    db_pool: Arc<DbPool>,
}

impl VoucherService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create_voucher(
        &self,
        actor: &Actor,
        request: CreateVoucherRequest,
    ) -> Result<voucher::Model, ServiceError> {
        request.validate()?;
        if request.discount_percent <= Decimal::ZERO
            || request.discount_percent > Decimal::ONE_HUNDRED
        {
            return Err(ServiceError::ValidationError(
                "Discount percent must be in (0, 100]".to_string(),
            ));
        }
        let max_discount = request.max_discount.unwrap_or(Decimal::ZERO);
        if max_discount < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Max discount must not be negative".to_string(),
            ));
        }
        if request.expired_at <= Utc::now() {
            return Err(ServiceError::ValidationError(
                "Expiry must be in the future".to_string(),
            ));
        }

        let db = &*self.db_pool;
        let owned = seller_store(db, actor.user_id).await?;
        let code = request.code.trim().to_string();

        let exists = voucher::Entity::find()
            .filter(voucher::Column::Code.eq(code.clone()))
            .one(db)
            .await?
            .is_some();
        if exists {
            return Err(ServiceError::Conflict(format!(
                "Voucher code '{}' already exists",
                code
            )));
        }

        let created = voucher::ActiveModel {
            store_id: Set(owned.id),
            code: Set(code.clone()),
            discount_percent: Set(request.discount_percent),
            max_discount: Set(max_discount),
            expired_at: Set(request.expired_at),
            quantity: Set(request.quantity),
            active: Set(true),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(|e| conflict_on_unique(e, format!("Voucher code '{}' already exists", code)))?;

        info!(voucher_id = %created.id, store_id = %owned.id, "Voucher created");
        Ok(created)
    }

    pub async fn list_store_vouchers(
        &self,
        actor: &Actor,
    ) -> Result<Vec<voucher::Model>, ServiceError> {
        let db = &*self.db_pool;
        let owned = seller_store(db, actor.user_id).await?;
        Ok(voucher::Entity::find()
            .filter(voucher::Column::StoreId.eq(owned.id))
            .order_by_desc(voucher::Column::CreatedAt)
            .all(db)
            .await?)
    }

    /// Quotes an order with the voucher applied without consuming it.
    pub async fn check_voucher(
        &self,
        request: CheckVoucherRequest,
    ) -> Result<VoucherCheck, ServiceError> {
        request.validate()?;
        let db = &*self.db_pool;

        let found = voucher::Entity::find()
            .filter(voucher::Column::Code.eq(request.code.trim()))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Voucher {} not found", request.code)))?;
        if !found.is_redeemable_at(Utc::now()) {
            return Err(ServiceError::ValidationError(INVALID_VOUCHER.to_string()));
        }

        let target = product::Entity::find_by_id(request.product_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", request.product_id))?;
        if !target.active || !target.is_approved {
            return Err(ServiceError::ValidationError(format!(
                "Product '{}' is not available for sale",
                target.name
            )));
        }

        let quote = price_with_voucher(&target, request.quantity, Some(&found))?;
        Ok(VoucherCheck {
            voucher_id: found.id,
            code: found.code,
            discount_amount: quote.discount_amount,
            final_amount: quote.total_amount,
            quote,
        })
    }
}
