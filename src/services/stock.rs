use crate::{
    db::DbPool,
    entities::{account_stock, product},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{catalog::managed_product, Actor, Page},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddStockRequest {
    /// One credential payload per entry; blank entries are ignored
    #[validate(length(min = 1, max = 1000, message = "Provide 1-1000 stock entries"))]
    pub contents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddStockResult {
    pub product_id: Uuid,
    pub added: usize,
    pub available_quantity: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StockItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub content: String,
    pub is_sold: bool,
    pub sold_at: Option<DateTime<Utc>>,
    pub acc_order_detail_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<account_stock::Model> for StockItem {
    fn from(s: account_stock::Model) -> Self {
        Self {
            id: s.id,
            product_id: s.product_id,
            content: s.content,
            is_sold: s.is_sold,
            sold_at: s.sold_at,
            acc_order_detail_id: s.acc_order_detail_id,
            created_at: s.created_at,
        }
    }
}

/// Count of unsold, active stock rows for a product
pub async fn available_quantity<C>(conn: &C, product_id: Uuid) -> Result<u64, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(account_stock::Entity::find()
        .filter(account_stock::Column::ProductId.eq(product_id))
        .filter(account_stock::Column::IsSold.eq(false))
        .filter(account_stock::Column::Active.eq(true))
        .count(conn)
        .await?)
}

#[derive(Clone)]
pub struct StockService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl StockService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self, request), fields(entries = request.contents.len()))]
    pub async fn add_stock(
        &self,
        actor: &Actor,
        product_id: Uuid,
        request: AddStockRequest,
    ) -> Result<AddStockResult, ServiceError> {
        request.validate()?;
        let db = &*self.db_pool;
        let target = managed_product(db, actor, product_id).await?;

        let kind = target.kind().ok_or_else(|| {
            ServiceError::InternalError(format!("unknown product type {}", target.product_type))
        })?;
        if !kind.is_stock_backed() {
            return Err(ServiceError::ValidationError(
                "Service products do not carry stock".to_string(),
            ));
        }

        let rows: Vec<account_stock::ActiveModel> = request
            .contents
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(|content| {
                let now = Utc::now();
                account_stock::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    product_id: Set(product_id),
                    content: Set(content.to_string()),
                    is_sold: Set(false),
                    sold_at: Set(None),
                    acc_order_detail_id: Set(None),
                    active: Set(true),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
            })
            .collect();

        if rows.is_empty() {
            return Err(ServiceError::ValidationError(
                "Stock entries must not be blank".to_string(),
            ));
        }
        let added = rows.len();

        let txn = db.begin().await?;
        account_stock::Entity::insert_many(rows).exec(&txn).await?;
        let available = available_quantity(&txn, product_id).await?;
        txn.commit().await?;

        info!(product_id = %product_id, added, available, "Stock added");
        self.event_sender
            .send_or_log(Event::StockAdded {
                product_id,
                count: added,
            })
            .await;

        Ok(AddStockResult {
            product_id,
            added,
            available_quantity: available,
        })
    }

    pub async fn list_stock(
        &self,
        actor: &Actor,
        product_id: Uuid,
        sold: Option<bool>,
        page: u64,
        limit: u64,
    ) -> Result<Page<StockItem>, ServiceError> {
        let (page, limit) = (page.max(1), limit.max(1));
        let db = &*self.db_pool;
        managed_product(db, actor, product_id).await?;

        let mut query = account_stock::Entity::find()
            .filter(account_stock::Column::ProductId.eq(product_id))
            .filter(account_stock::Column::Active.eq(true));
        if let Some(sold) = sold {
            query = query.filter(account_stock::Column::IsSold.eq(sold));
        }

        let paginator = query
            .order_by_asc(account_stock::Column::CreatedAt)
            .paginate(db, limit);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;

        Ok(Page {
            items: items.into_iter().map(StockItem::from).collect(),
            total,
            page,
            limit,
        })
    }

    /// Deletes an unsold stock row. Sold rows are part of an order's history
    /// and cannot be removed.
    #[instrument(skip(self))]
    pub async fn remove_stock(&self, actor: &Actor, stock_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let row = account_stock::Entity::find_by_id(stock_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Stock item", stock_id))?;
        managed_product(db, actor, row.product_id).await?;

        let result = account_stock::Entity::delete_many()
            .filter(account_stock::Column::Id.eq(stock_id))
            .filter(account_stock::Column::IsSold.eq(false))
            .exec(db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "Sold stock cannot be removed".to_string(),
            ));
        }

        info!(stock_id = %stock_id, product_id = %row.product_id, "Stock removed");
        Ok(())
    }
}

/// Claims unsold rows for `product_id` one at a time until `quantity` have
/// been taken, binding each to `detail_id`.
///
/// Each claim is an `UPDATE .. WHERE is_sold = false`; a row that another
/// transaction sold in the meantime simply isn't counted. Returns the claimed
/// payloads in claim order, or `InsufficientStock` when the pool runs dry.
pub(crate) async fn claim_units<C>(
    conn: &C,
    product: &product::Model,
    quantity: u64,
    detail_id: Uuid,
) -> Result<Vec<String>, ServiceError>
where
    C: ConnectionTrait,
{
    let mut claimed: Vec<String> = Vec::with_capacity(quantity as usize);

    while (claimed.len() as u64) < quantity {
        let wanted = quantity - claimed.len() as u64;
        let candidates = account_stock::Entity::find()
            .filter(account_stock::Column::ProductId.eq(product.id))
            .filter(account_stock::Column::IsSold.eq(false))
            .filter(account_stock::Column::Active.eq(true))
            .order_by_asc(account_stock::Column::CreatedAt)
            .order_by_asc(account_stock::Column::Id)
            .limit(wanted)
            .all(conn)
            .await?;

        if candidates.is_empty() {
            return Err(ServiceError::InsufficientStock(format!(
                "not enough unsold items left for product '{}'",
                product.name
            )));
        }

        for candidate in candidates {
            if claim_unit(conn, candidate.id, detail_id).await? {
                claimed.push(candidate.content);
            }
        }
    }

    Ok(claimed)
}

/// Marks one stock row sold to `detail_id`. `false` means it was already sold.
async fn claim_unit<C>(conn: &C, stock_id: Uuid, detail_id: Uuid) -> Result<bool, ServiceError>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let result = account_stock::Entity::update_many()
        .set(account_stock::ActiveModel {
            is_sold: Set(true),
            sold_at: Set(Some(now)),
            acc_order_detail_id: Set(Some(detail_id)),
            updated_at: Set(now),
            ..Default::default()
        })
        .filter(account_stock::Column::Id.eq(stock_id))
        .filter(account_stock::Column::IsSold.eq(false))
        .exec(conn)
        .await?;
    Ok(result.rows_affected == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{entities::product::ProductType, services::fixtures};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn claims_skip_rows_sold_elsewhere() {
        let db = fixtures::database().await;
        let seller = fixtures::user(&db, "stock_seller", "seller", dec!(0)).await;
        let product = fixtures::product(&db, &seller, ProductType::Account, dec!(5)).await;

        fixtures::stock_row(&db, &product, "a@x|1", true).await;
        fixtures::stock_row(&db, &product, "b@x|2", false).await;
        fixtures::stock_row(&db, &product, "c@x|3", true).await;
        fixtures::stock_row(&db, &product, "d@x|4", false).await;
        fixtures::stock_row(&db, &product, "e@x|5", false).await;

        let detail_id = Uuid::new_v4();
        let mut claimed = claim_units(&db, &product, 3, detail_id).await.unwrap();
        claimed.sort();
        assert_eq!(claimed, vec!["b@x|2", "d@x|4", "e@x|5"]);

        let bound = account_stock::Entity::find()
            .filter(account_stock::Column::AccOrderDetailId.eq(detail_id))
            .count(&db)
            .await
            .unwrap();
        assert_eq!(bound, 3);
        assert_eq!(available_quantity(&db, product.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn a_row_sold_after_it_was_listed_is_not_claimed_twice() {
        let db = fixtures::database().await;
        let seller = fixtures::user(&db, "race_seller", "seller", dec!(0)).await;
        let product = fixtures::product(&db, &seller, ProductType::Account, dec!(5)).await;
        let row = fixtures::stock_row(&db, &product, "only@x|1", false).await;

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        assert!(claim_unit(&db, row.id, first).await.unwrap());
        assert!(!claim_unit(&db, row.id, second).await.unwrap());

        let stored = account_stock::Entity::find_by_id(row.id)
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_sold);
        assert_eq!(stored.acc_order_detail_id, Some(first));
    }

    #[tokio::test]
    async fn claiming_more_than_is_left_fails() {
        let db = fixtures::database().await;
        let seller = fixtures::user(&db, "short_seller", "seller", dec!(0)).await;
        let product = fixtures::product(&db, &seller, ProductType::Account, dec!(5)).await;
        fixtures::stock_row(&db, &product, "one@x|1", false).await;
        fixtures::stock_row(&db, &product, "two@x|2", true).await;

        let result = claim_units(&db, &product, 2, Uuid::new_v4()).await;
        assert_matches!(result, Err(ServiceError::InsufficientStock(_)));
    }
}
