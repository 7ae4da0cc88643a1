use crate::{
    db::DbPool,
    entities::{
        product::{self, ProductType},
        store, user,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{conflict_on_unique, stock, Actor, Page},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateStoreRequest {
    #[validate(length(min = 1, max = 255, message = "Store name is required"))]
    pub name: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 255, message = "Product name is required"))]
    pub name: String,
    #[validate(length(max = 10000))]
    pub description: Option<String>,
    #[validate(url(message = "Image URL must be a valid URL"))]
    pub image_url: Option<String>,
    pub price: Decimal,
    #[validate(length(max = 50))]
    pub format: Option<String>,
    pub product_type: ProductType,
    #[validate(range(min = 0, max = 3650))]
    pub warranty_days: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 10000))]
    pub description: Option<String>,
    #[validate(url)]
    pub image_url: Option<String>,
    pub price: Option<Decimal>,
    #[validate(length(max = 50))]
    pub format: Option<String>,
    #[validate(range(min = 0, max = 3650))]
    pub warranty_days: Option<i32>,
}

/// Catalog search filters. Only active, approved products are listed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductFilter {
    pub product_type: Option<ProductType>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    /// Case-sensitive substring match on the product name
    pub search: Option<String>,
    pub store_id: Option<Uuid>,
}

/// Product row plus its live stock count
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductView {
    pub id: Uuid,
    pub store_id: Uuid,
    pub name: String,
    pub description: String,
    pub image_url: Option<String>,
    pub price: Decimal,
    pub format: String,
    pub product_type: String,
    pub warranty_days: i32,
    pub is_approved: bool,
    pub active: bool,
    pub available_quantity: u64,
    pub created_at: DateTime<Utc>,
}

impl ProductView {
    fn new(p: product::Model, available_quantity: u64) -> Self {
        Self {
            id: p.id,
            store_id: p.store_id,
            name: p.name,
            description: p.description,
            image_url: p.image_url,
            price: p.price,
            format: p.format,
            product_type: p.product_type,
            warranty_days: p.warranty_days,
            is_approved: p.is_approved,
            active: p.active,
            available_quantity,
            created_at: p.created_at,
        }
    }
}

fn ensure_positive_price(price: Decimal) -> Result<(), ServiceError> {
    if price <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Price must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Loads a product the actor may manage: its store's seller, or an admin.
pub(crate) async fn managed_product<C>(
    conn: &C,
    actor: &Actor,
    product_id: Uuid,
) -> Result<product::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let found = product::Entity::find_by_id(product_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Product", product_id))?;

    if actor.is_admin() {
        return Ok(found);
    }

    let owner = store::Entity::find_by_id(found.store_id)
        .one(conn)
        .await?
        .map(|s| s.seller_id);
    if owner != Some(actor.user_id) {
        return Err(ServiceError::Forbidden(
            "You do not own this product".to_string(),
        ));
    }
    Ok(found)
}

/// Resolves the seller owning a product's store
pub(crate) async fn product_seller_id<C>(conn: &C, product_id: Uuid) -> Result<Uuid, ServiceError>
where
    C: ConnectionTrait,
{
    let found = product::Entity::find_by_id(product_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Product", product_id))?;
    store::Entity::find_by_id(found.store_id)
        .one(conn)
        .await?
        .map(|s| s.seller_id)
        .ok_or_else(|| ServiceError::not_found("Store", found.store_id))
}

/// The store owned by `seller_id`
pub(crate) async fn seller_store<C>(conn: &C, seller_id: Uuid) -> Result<store::Model, ServiceError>
where
    C: ConnectionTrait,
{
    store::Entity::find()
        .filter(store::Column::SellerId.eq(seller_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound("You have not opened a store yet".to_string()))
}

/// Stores and products
#[derive(Clone)]
pub struct CatalogService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl CatalogService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self, request))]
    pub async fn create_store(
        &self,
        actor: &Actor,
        request: CreateStoreRequest,
    ) -> Result<store::Model, ServiceError> {
        request.validate()?;
        let db = &*self.db_pool;

        let seller = user::Entity::find_by_id(actor.user_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("User", actor.user_id))?;
        if !seller.is_seller() || !seller.is_verified {
            return Err(ServiceError::Forbidden(
                "Only verified sellers can open a store".to_string(),
            ));
        }

        let existing = store::Entity::find()
            .filter(store::Column::SellerId.eq(seller.id))
            .one(db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(
                "Seller already owns a store".to_string(),
            ));
        }

        let created = store::ActiveModel {
            seller_id: Set(seller.id),
            name: Set(request.name.trim().to_string()),
            description: Set(request.description.unwrap_or_default()),
            verified: Set(seller.is_verified),
            active: Set(true),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(|e| conflict_on_unique(e, "Seller already owns a store"))?;

        info!(store_id = %created.id, seller_id = %seller.id, "Store created");
        self.event_sender
            .send_or_log(Event::StoreCreated(created.id))
            .await;
        Ok(created)
    }

    pub async fn my_store(&self, actor: &Actor) -> Result<store::Model, ServiceError> {
        seller_store(&*self.db_pool, actor.user_id).await
    }

    #[instrument(skip(self, request), fields(product_type = %request.product_type))]
    pub async fn create_product(
        &self,
        actor: &Actor,
        request: CreateProductRequest,
    ) -> Result<ProductView, ServiceError> {
        request.validate()?;
        ensure_positive_price(request.price)?;

        let db = &*self.db_pool;
        let owned = seller_store(db, actor.user_id).await?;
        if !owned.active {
            return Err(ServiceError::Forbidden("Store is not active".to_string()));
        }

        let created = product::ActiveModel {
            store_id: Set(owned.id),
            name: Set(request.name.trim().to_string()),
            description: Set(request.description.unwrap_or_default()),
            image_url: Set(request.image_url),
            price: Set(request.price),
            format: Set(request.format.unwrap_or_default()),
            product_type: Set(request.product_type.as_str().to_string()),
            warranty_days: Set(request.warranty_days.unwrap_or(0)),
            is_approved: Set(false),
            active: Set(true),
            ..Default::default()
        }
        .insert(db)
        .await?;

        info!(product_id = %created.id, store_id = %owned.id, "Product created, awaiting approval");
        self.event_sender
            .send_or_log(Event::ProductCreated(created.id))
            .await;
        Ok(ProductView::new(created, 0))
    }

    #[instrument(skip(self, request))]
    pub async fn update_product(
        &self,
        actor: &Actor,
        product_id: Uuid,
        request: UpdateProductRequest,
    ) -> Result<ProductView, ServiceError> {
        request.validate()?;
        let db = &*self.db_pool;
        let found = managed_product(db, actor, product_id).await?;

        let mut active: product::ActiveModel = found.into();
        if let Some(name) = request.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(description) = request.description {
            active.description = Set(description);
        }
        if let Some(image_url) = request.image_url {
            active.image_url = Set(Some(image_url));
        }
        if let Some(price) = request.price {
            ensure_positive_price(price)?;
            active.price = Set(price);
        }
        if let Some(format) = request.format {
            active.format = Set(format);
        }
        if let Some(days) = request.warranty_days {
            active.warranty_days = Set(days);
        }

        let updated = active.update(db).await?;
        let available = stock::available_quantity(db, updated.id).await?;
        Ok(ProductView::new(updated, available))
    }

    #[instrument(skip(self))]
    pub async fn deactivate_product(
        &self,
        actor: &Actor,
        product_id: Uuid,
    ) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let found = managed_product(db, actor, product_id).await?;
        let mut active: product::ActiveModel = found.into();
        active.active = Set(false);
        active.update(db).await?;

        info!(product_id = %product_id, "Product deactivated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn approve_product(&self, product_id: Uuid) -> Result<ProductView, ServiceError> {
        let db = &*self.db_pool;
        let found = product::Entity::find_by_id(product_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", product_id))?;

        let mut active: product::ActiveModel = found.into();
        active.is_approved = Set(true);
        let updated = active.update(db).await?;

        info!(product_id = %product_id, "Product approved");
        self.event_sender
            .send_or_log(Event::ProductApproved(product_id))
            .await;

        let available = stock::available_quantity(db, product_id).await?;
        Ok(ProductView::new(updated, available))
    }

    /// Unlisted products (inactive or unapproved) are only visible to their
    /// seller and to admins.
    pub async fn get_product(
        &self,
        actor: &Actor,
        product_id: Uuid,
    ) -> Result<ProductView, ServiceError> {
        let db = &*self.db_pool;
        let found = product::Entity::find_by_id(product_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", product_id))?;

        if !(found.active && found.is_approved) && !actor.is_admin() {
            let seller = product_seller_id(db, product_id).await?;
            if seller != actor.user_id {
                return Err(ServiceError::not_found("Product", product_id));
            }
        }

        let available = stock::available_quantity(db, product_id).await?;
        Ok(ProductView::new(found, available))
    }

    pub async fn list_products(
        &self,
        filter: ProductFilter,
        page: u64,
        limit: u64,
    ) -> Result<Page<ProductView>, ServiceError> {
        let (page, limit) = (page.max(1), limit.max(1));
        let db = &*self.db_pool;

        let mut condition = Condition::all()
            .add(product::Column::Active.eq(true))
            .add(product::Column::IsApproved.eq(true));
        if let Some(kind) = filter.product_type {
            condition = condition.add(product::Column::ProductType.eq(kind.as_str()));
        }
        if let Some(min) = filter.min_price {
            condition = condition.add(product::Column::Price.gte(min));
        }
        if let Some(max) = filter.max_price {
            condition = condition.add(product::Column::Price.lte(max));
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            condition = condition.add(product::Column::Name.contains(search));
        }
        if let Some(store_id) = filter.store_id {
            condition = condition.add(product::Column::StoreId.eq(store_id));
        }

        let paginator = product::Entity::find()
            .filter(condition)
            .order_by_desc(product::Column::CreatedAt)
            .paginate(db, limit);
        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page - 1).await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let available = stock::available_quantity(db, row.id).await?;
            items.push(ProductView::new(row, available));
        }

        Ok(Page {
            items,
            total,
            page,
            limit,
        })
    }
}
