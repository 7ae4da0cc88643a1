use crate::{
    db::DbPool,
    entities::{order, product, review},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{conflict_on_unique, orders::settled_detail, Page},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateReviewRequest {
    pub product_id: Uuid,
    pub order_id: Uuid,
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i32,
    #[validate(length(max = 2000))]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReviewView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub buyer_id: Uuid,
    pub order_id: Uuid,
    pub rating: i32,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

impl From<review::Model> for ReviewView {
    fn from(r: review::Model) -> Self {
        Self {
            id: r.id,
            product_id: r.product_id,
            buyer_id: r.buyer_id,
            order_id: r.order_id,
            rating: r.rating,
            comment: r.comment,
            created_at: r.created_at,
        }
    }
}

/// A page of reviews with the product's overall average
#[derive(Debug, Clone)]
pub struct ProductReviews {
    pub reviews: Page<ReviewView>,
    pub average_rating: Option<f64>,
}

fn average(ratings: &[i32]) -> Option<f64> {
    if ratings.is_empty() {
        return None;
    }
    let sum: i64 = ratings.iter().map(|r| i64::from(*r)).sum();
    let avg = sum as f64 / ratings.len() as f64;
    Some((avg * 100.0).round() / 100.0)
}

#[derive(Clone)]
pub struct ReviewService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl ReviewService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// One review per (product, buyer, order); the order must be the buyer's,
    /// paid, and settled for that product.
    #[instrument(skip(self, request), fields(product_id = %request.product_id, order_id = %request.order_id))]
    pub async fn create_review(
        &self,
        buyer_id: Uuid,
        request: CreateReviewRequest,
    ) -> Result<ReviewView, ServiceError> {
        request.validate()?;
        let db = &*self.db_pool;

        product::Entity::find_by_id(request.product_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", request.product_id))?;

        let reviewed = order::Entity::find_by_id(request.order_id)
            .one(db)
            .await?
            .filter(|o| o.active && o.buyer_id == buyer_id)
            .ok_or_else(|| ServiceError::not_found("Order", request.order_id))?;
        if !reviewed.is_paid {
            return Err(ServiceError::ValidationError(
                "Only paid orders can be reviewed".to_string(),
            ));
        }
        let bought = settled_detail(db, reviewed.id)
            .await?
            .map(|d| d.product_id == request.product_id)
            .unwrap_or(false);
        if !bought {
            return Err(ServiceError::ValidationError(
                "This order does not contain the product".to_string(),
            ));
        }

        let duplicate = review::Entity::find()
            .filter(review::Column::ProductId.eq(request.product_id))
            .filter(review::Column::BuyerId.eq(buyer_id))
            .filter(review::Column::OrderId.eq(reviewed.id))
            .one(db)
            .await?
            .is_some();
        const DUPLICATE: &str = "You already reviewed this product for this order";
        if duplicate {
            return Err(ServiceError::Conflict(DUPLICATE.to_string()));
        }

        let created = review::ActiveModel {
            product_id: Set(request.product_id),
            buyer_id: Set(buyer_id),
            order_id: Set(reviewed.id),
            rating: Set(request.rating),
            comment: Set(request.comment.unwrap_or_default()),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(|e| conflict_on_unique(e, DUPLICATE))?;

        info!(review_id = %created.id, rating = created.rating, "Review created");
        self.event_sender
            .send_or_log(Event::ReviewCreated {
                review_id: created.id,
                product_id: created.product_id,
            })
            .await;
        Ok(created.into())
    }

    pub async fn list_product_reviews(
        &self,
        product_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<ProductReviews, ServiceError> {
        let (page, limit) = (page.max(1), limit.max(1));
        let db = &*self.db_pool;

        let all = review::Entity::find()
            .filter(review::Column::ProductId.eq(product_id))
            .all(db)
            .await?;
        let ratings: Vec<i32> = all.iter().map(|r| r.rating).collect();

        let paginator = review::Entity::find()
            .filter(review::Column::ProductId.eq(product_id))
            .order_by_desc(review::Column::CreatedAt)
            .paginate(db, limit);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;

        Ok(ProductReviews {
            reviews: Page {
                items: items.into_iter().map(ReviewView::from).collect(),
                total,
                page,
                limit,
            },
            average_rating: average(&ratings),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::average;

    #[test]
    fn average_rounds_to_two_places() {
        assert_eq!(average(&[]), None);
        assert_eq!(average(&[5, 4, 4]), Some(4.33));
        assert_eq!(average(&[1]), Some(1.0));
    }
}
