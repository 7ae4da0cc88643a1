use crate::{
    db::DbPool,
    entities::{
        acc_order_detail,
        order::{self, OrderStatus},
        product,
        service_order_detail::{self, ServiceStatus},
        transaction_history::TransactionType,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        catalog::{product_seller_id, seller_store},
        ledger::{self, Posting},
        vouchers, Actor, Page,
    },
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, sync::Arc};
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    /// Voucher code to redeem against this order
    #[validate(length(min = 1, max = 50))]
    pub voucher_code: Option<String>,
}

/// The settled line of an order, whichever table it lives in
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderDetailView {
    Account(AccountDetailView),
    Service(ServiceDetailView),
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccountDetailView {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub content_delivered: String,
    pub created_at: DateTime<Utc>,
}

impl From<acc_order_detail::Model> for AccountDetailView {
    fn from(d: acc_order_detail::Model) -> Self {
        Self {
            id: d.id,
            order_id: d.order_id,
            product_id: d.product_id,
            unit_price: d.unit_price,
            quantity: d.quantity,
            discount_amount: d.discount_amount,
            total_amount: d.total_amount,
            content_delivered: d.content_delivered,
            created_at: d.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceDetailView {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub target_url: String,
    pub note: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub status: String,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<service_order_detail::Model> for ServiceDetailView {
    fn from(d: service_order_detail::Model) -> Self {
        Self {
            id: d.id,
            order_id: d.order_id,
            product_id: d.product_id,
            target_url: d.target_url,
            note: d.note,
            unit_price: d.unit_price,
            quantity: d.quantity,
            discount_amount: d.discount_amount,
            total_amount: d.total_amount,
            status: d.status,
            delivered_at: d.delivered_at,
            created_at: d.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub order_code: String,
    pub buyer_id: Uuid,
    pub voucher_id: Option<Uuid>,
    pub discount_amount: Decimal,
    pub total_amount: Decimal,
    pub is_paid: bool,
    pub status: String,
    pub released_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<order::Model> for OrderView {
    fn from(o: order::Model) -> Self {
        Self {
            id: o.id,
            order_code: o.order_code,
            buyer_id: o.buyer_id,
            voucher_id: o.voucher_id,
            discount_amount: o.discount_amount,
            total_amount: o.total_amount,
            is_paid: o.is_paid,
            status: o.status,
            released_at: o.released_at,
            created_at: o.created_at,
            updated_at: o.updated_at,
        }
    }
}

/// Seller-side sales figures over paid orders
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderStats {
    pub total_orders: u64,
    pub account_orders: u64,
    pub service_orders: u64,
    pub account_revenue: Decimal,
    pub service_revenue: Decimal,
    pub total_revenue: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DetailKind {
    Account,
    Service,
}

/// Money-relevant facts about an order's settled detail
#[derive(Debug, Clone)]
pub(crate) struct SettledDetail {
    pub kind: DetailKind,
    pub detail_id: Uuid,
    pub product_id: Uuid,
    pub total_amount: Decimal,
    pub seller_id: Uuid,
    pub service_status: Option<ServiceStatus>,
}

pub(crate) async fn settled_detail<C>(
    conn: &C,
    order_id: Uuid,
) -> Result<Option<SettledDetail>, ServiceError>
where
    C: ConnectionTrait,
{
    if let Some(d) = acc_order_detail::Entity::find()
        .filter(acc_order_detail::Column::OrderId.eq(order_id))
        .one(conn)
        .await?
    {
        return Ok(Some(SettledDetail {
            kind: DetailKind::Account,
            detail_id: d.id,
            product_id: d.product_id,
            total_amount: d.total_amount,
            seller_id: product_seller_id(conn, d.product_id).await?,
            service_status: None,
        }));
    }

    if let Some(d) = service_order_detail::Entity::find()
        .filter(service_order_detail::Column::OrderId.eq(order_id))
        .one(conn)
        .await?
    {
        return Ok(Some(SettledDetail {
            kind: DetailKind::Service,
            detail_id: d.id,
            product_id: d.product_id,
            total_amount: d.total_amount,
            seller_id: product_seller_id(conn, d.product_id).await?,
            service_status: d.status(),
        }));
    }

    Ok(None)
}

/// Moves an order from one of `from` to `to`, returning false when the order
/// was no longer in any of the expected statuses.
pub(crate) async fn transition_order<C>(
    conn: &C,
    order_id: Uuid,
    from: &[OrderStatus],
    to: OrderStatus,
    released: bool,
) -> Result<bool, ServiceError>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let mut update = order::Entity::update_many()
        .col_expr(order::Column::Status, Expr::value(to.as_str()))
        .col_expr(order::Column::UpdatedAt, Expr::value(now));
    if released {
        update = update.col_expr(order::Column::ReleasedAt, Expr::value(Some(now)));
    }

    let result = update
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::Status.is_in(from.iter().map(|s| s.as_str())))
        .exec(conn)
        .await?;
    Ok(result.rows_affected == 1)
}

/// Credits `amount` when there is anything to move
pub(crate) async fn pay_out<C>(
    conn: &C,
    user_id: Uuid,
    kind: TransactionType,
    amount: Decimal,
    note: String,
    order_id: Uuid,
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    if amount > Decimal::ZERO {
        ledger::credit(
            conn,
            user_id,
            Posting::new(kind, amount, note).reference(order_id),
        )
        .await?;
    }
    Ok(())
}

/// Marks a still-pending service detail as failed. A detail that has moved on
/// since it was read is a `Conflict`.
pub(crate) async fn fail_pending_service<C>(conn: &C, detail_id: Uuid) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let result = service_order_detail::Entity::update_many()
        .col_expr(
            service_order_detail::Column::Status,
            Expr::value(ServiceStatus::Failed.as_str()),
        )
        .col_expr(service_order_detail::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(service_order_detail::Column::Id.eq(detail_id))
        .filter(service_order_detail::Column::Status.eq(ServiceStatus::Pending.as_str()))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::Conflict(
            "Fulfilment has already started".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn new_order_code() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("OD{}", hex[..8].to_uppercase())
}

/// Order creation, visibility and the buyer/seller lifecycle outside of
/// settlement
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Opens an empty order, redeeming the voucher code if one is given.
    #[instrument(skip(self, request), fields(buyer_id = %buyer_id))]
    pub async fn create_order(
        &self,
        buyer_id: Uuid,
        request: CreateOrderRequest,
    ) -> Result<OrderView, ServiceError> {
        request.validate()?;

        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let voucher_id = match request
            .voucher_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            Some(code) => Some(vouchers::redeem(&txn, code).await?.id),
            None => None,
        };

        let mut order_code = new_order_code();
        while order::Entity::find()
            .filter(order::Column::OrderCode.eq(order_code.clone()))
            .one(&txn)
            .await?
            .is_some()
        {
            order_code = new_order_code();
        }

        let created = order::ActiveModel {
            order_code: Set(order_code),
            buyer_id: Set(buyer_id),
            voucher_id: Set(voucher_id),
            discount_amount: Set(Decimal::ZERO),
            total_amount: Set(Decimal::ZERO),
            is_paid: Set(false),
            status: Set(OrderStatus::Processing.as_str().to_string()),
            released_at: Set(None),
            active: Set(true),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(
            order_id = %created.id,
            order_code = %created.order_code,
            voucher_id = ?voucher_id,
            "Order created"
        );
        self.event_sender
            .send_or_log(Event::OrderCreated(created.id))
            .await;
        Ok(created.into())
    }

    async fn visible_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let db = &*self.db_pool;
        let found = order::Entity::find_by_id(order_id)
            .one(db)
            .await?
            .filter(|o| o.active)
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;

        if actor.is_admin() || found.buyer_id == actor.user_id {
            return Ok(found);
        }
        match settled_detail(db, order_id).await? {
            Some(detail) if detail.seller_id == actor.user_id => Ok(found),
            _ => Err(ServiceError::not_found("Order", order_id)),
        }
    }

    /// Visible to the buyer, the seller of the ordered product and admins.
    pub async fn get_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<OrderView, ServiceError> {
        self.visible_order(actor, order_id).await.map(OrderView::from)
    }

    pub async fn order_detail(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<OrderDetailView, ServiceError> {
        let db = &*self.db_pool;
        self.visible_order(actor, order_id).await?;

        if let Some(d) = acc_order_detail::Entity::find()
            .filter(acc_order_detail::Column::OrderId.eq(order_id))
            .one(db)
            .await?
        {
            return Ok(OrderDetailView::Account(d.into()));
        }
        if let Some(d) = service_order_detail::Entity::find()
            .filter(service_order_detail::Column::OrderId.eq(order_id))
            .one(db)
            .await?
        {
            return Ok(OrderDetailView::Service(d.into()));
        }
        Err(ServiceError::NotFound(
            "Order has not been settled yet".to_string(),
        ))
    }

    pub async fn list_buyer_orders(
        &self,
        buyer_id: Uuid,
        status: Option<OrderStatus>,
        page: u64,
        limit: u64,
    ) -> Result<Page<OrderView>, ServiceError> {
        let (page, limit) = (page.max(1), limit.max(1));
        let mut query = order::Entity::find()
            .filter(order::Column::BuyerId.eq(buyer_id))
            .filter(order::Column::Active.eq(true));
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status.as_str()));
        }

        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db_pool, limit);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;

        Ok(Page {
            items: items.into_iter().map(OrderView::from).collect(),
            total,
            page,
            limit,
        })
    }

    async fn store_order_ids(&self, seller_id: Uuid) -> Result<Vec<Uuid>, ServiceError> {
        let db = &*self.db_pool;
        let owned = seller_store(db, seller_id).await?;
        let product_ids: Vec<Uuid> = product::Entity::find()
            .filter(product::Column::StoreId.eq(owned.id))
            .all(db)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids: HashSet<Uuid> = acc_order_detail::Entity::find()
            .filter(acc_order_detail::Column::ProductId.is_in(product_ids.clone()))
            .all(db)
            .await?
            .into_iter()
            .map(|d| d.order_id)
            .collect();
        ids.extend(
            service_order_detail::Entity::find()
                .filter(service_order_detail::Column::ProductId.is_in(product_ids))
                .all(db)
                .await?
                .into_iter()
                .map(|d| d.order_id),
        );
        Ok(ids.into_iter().collect())
    }

    /// Orders containing one of the seller's products
    pub async fn list_store_orders(
        &self,
        seller_id: Uuid,
        status: Option<OrderStatus>,
        page: u64,
        limit: u64,
    ) -> Result<Page<OrderView>, ServiceError> {
        let (page, limit) = (page.max(1), limit.max(1));
        let ids = self.store_order_ids(seller_id).await?;
        if ids.is_empty() {
            return Ok(Page {
                items: Vec::new(),
                total: 0,
                page,
                limit,
            });
        }

        let mut query = order::Entity::find()
            .filter(order::Column::Id.is_in(ids))
            .filter(order::Column::Active.eq(true));
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status.as_str()));
        }

        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db_pool, limit);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;

        Ok(Page {
            items: items.into_iter().map(OrderView::from).collect(),
            total,
            page,
            limit,
        })
    }

    /// Cancels a processing order. A paid service order is refunded and its
    /// detail marked failed; fulfilment must not have started.
    #[instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<OrderView, ServiceError> {
        let txn = self.db_pool.begin().await?;

        let found = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .filter(|o| o.active)
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
        let detail = settled_detail(&txn, order_id).await?;

        let is_buyer = found.buyer_id == actor.user_id;
        let is_seller = detail
            .as_ref()
            .map(|d| d.seller_id == actor.user_id)
            .unwrap_or(false);
        if !is_buyer && !is_seller {
            return Err(ServiceError::Forbidden(
                "Only the buyer or the seller can cancel this order".to_string(),
            ));
        }

        if !found.has_status(OrderStatus::Processing) {
            return Err(ServiceError::Conflict(format!(
                "Order in status '{}' cannot be cancelled",
                found.status
            )));
        }
        if let Some(d) = &detail {
            if d.kind == DetailKind::Service && d.service_status != Some(ServiceStatus::Pending) {
                return Err(ServiceError::Conflict(
                    "Fulfilment has already started".to_string(),
                ));
            }
        }

        let moved = transition_order(
            &txn,
            order_id,
            &[OrderStatus::Processing],
            OrderStatus::Cancel,
            false,
        )
        .await?;
        if !moved {
            return Err(ServiceError::Conflict(
                "Order status changed concurrently".to_string(),
            ));
        }

        let mut refunded = None;
        if let Some(d) = detail.filter(|_| found.is_paid) {
            if d.kind == DetailKind::Service {
                fail_pending_service(&txn, d.detail_id).await?;
            }
            pay_out(
                &txn,
                found.buyer_id,
                TransactionType::Refund,
                d.total_amount,
                format!("Refund for cancelled order {}", found.order_code),
                order_id,
            )
            .await?;
            refunded = Some(d.total_amount);
        }

        let updated = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
        txn.commit().await?;

        info!(order_id = %order_id, refunded = ?refunded, "Order cancelled");
        self.event_sender
            .send_or_log(Event::OrderCancelled { order_id, refunded })
            .await;
        Ok(updated.into())
    }

    /// Buyer accepts a delivered order; the seller is paid.
    #[instrument(skip(self))]
    pub async fn confirm_order(
        &self,
        actor: &Actor,
        order_id: Uuid,
    ) -> Result<OrderView, ServiceError> {
        let txn = self.db_pool.begin().await?;

        let found = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .filter(|o| o.active)
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
        if found.buyer_id != actor.user_id {
            return Err(ServiceError::Forbidden(
                "Only the buyer can confirm this order".to_string(),
            ));
        }
        if !found.has_status(OrderStatus::Delivered) {
            return Err(ServiceError::Conflict(format!(
                "Order in status '{}' cannot be confirmed",
                found.status
            )));
        }

        let detail = settled_detail(&txn, order_id)
            .await?
            .ok_or_else(|| ServiceError::Conflict("Order has not been settled".to_string()))?;

        let moved = transition_order(
            &txn,
            order_id,
            &[OrderStatus::Delivered],
            OrderStatus::Completed,
            true,
        )
        .await?;
        if !moved {
            return Err(ServiceError::Conflict(
                "Order status changed concurrently".to_string(),
            ));
        }
        pay_out(
            &txn,
            detail.seller_id,
            TransactionType::Receive,
            detail.total_amount,
            format!("Payment received for order {}", found.order_code),
            order_id,
        )
        .await?;

        let updated = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
        txn.commit().await?;

        info!(
            order_id = %order_id,
            seller_id = %detail.seller_id,
            amount = %detail.total_amount,
            "Order completed"
        );
        self.event_sender
            .send_or_log(Event::OrderCompleted(order_id))
            .await;
        Ok(updated.into())
    }

    /// Sales figures for the seller's store, optionally bounded by settlement
    /// time.
    pub async fn order_stats(
        &self,
        seller_id: Uuid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<OrderStats, ServiceError> {
        let db = &*self.db_pool;
        let owned = seller_store(db, seller_id).await?;
        let product_ids: Vec<Uuid> = product::Entity::find()
            .filter(product::Column::StoreId.eq(owned.id))
            .all(db)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect();

        let mut stats = OrderStats::default();
        if product_ids.is_empty() {
            return Ok(stats);
        }

        let in_range = |at: DateTime<Utc>| {
            from.map(|f| at >= f).unwrap_or(true) && to.map(|t| at <= t).unwrap_or(true)
        };

        let account_details = acc_order_detail::Entity::find()
            .filter(acc_order_detail::Column::ProductId.is_in(product_ids.clone()))
            .all(db)
            .await?;
        let service_details = service_order_detail::Entity::find()
            .filter(service_order_detail::Column::ProductId.is_in(product_ids))
            .all(db)
            .await?;

        let order_ids: Vec<Uuid> = account_details
            .iter()
            .map(|d| d.order_id)
            .chain(service_details.iter().map(|d| d.order_id))
            .collect();
        let paid: HashSet<Uuid> = order::Entity::find()
            .filter(order::Column::Id.is_in(order_ids))
            .filter(order::Column::IsPaid.eq(true))
            .all(db)
            .await?
            .into_iter()
            .map(|o| o.id)
            .collect();

        for d in account_details
            .iter()
            .filter(|d| paid.contains(&d.order_id) && in_range(d.created_at))
        {
            stats.account_orders += 1;
            stats.account_revenue += d.total_amount;
        }
        for d in service_details
            .iter()
            .filter(|d| paid.contains(&d.order_id) && in_range(d.created_at))
        {
            stats.service_orders += 1;
            stats.service_revenue += d.total_amount;
        }

        stats.total_orders = stats.account_orders + stats.service_orders;
        stats.total_revenue = stats.account_revenue + stats.service_revenue;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{entities::product::ProductType, services::fixtures};
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn cancelling_fails_a_pending_service() {
        let db = fixtures::database().await;
        let seller = fixtures::user(&db, "svc_seller", "seller", dec!(0)).await;
        let buyer = fixtures::user(&db, "svc_buyer", "customer", dec!(0)).await;
        let product = fixtures::product(&db, &seller, ProductType::Service, dec!(15)).await;
        let order = fixtures::order(&db, &buyer, OrderStatus::Processing, true, dec!(15)).await;
        let detail =
            fixtures::service_detail(&db, &order, &product, ServiceStatus::Pending).await;

        fail_pending_service(&db, detail.id).await.unwrap();

        let stored = service_order_detail::Entity::find_by_id(detail.id)
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status(), Some(ServiceStatus::Failed));
    }

    #[tokio::test]
    async fn a_service_the_seller_already_started_is_not_failed() {
        let db = fixtures::database().await;
        let seller = fixtures::user(&db, "busy_seller", "seller", dec!(0)).await;
        let buyer = fixtures::user(&db, "eager_buyer", "customer", dec!(0)).await;
        let product = fixtures::product(&db, &seller, ProductType::Service, dec!(15)).await;
        let order = fixtures::order(&db, &buyer, OrderStatus::Processing, true, dec!(15)).await;
        let detail =
            fixtures::service_detail(&db, &order, &product, ServiceStatus::InProgress).await;

        let result = fail_pending_service(&db, detail.id).await;
        assert_matches!(result, Err(ServiceError::Conflict(_)));

        let stored = service_order_detail::Entity::find_by_id(detail.id)
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status(), Some(ServiceStatus::InProgress));
    }

    #[test]
    fn order_codes_are_od_plus_eight_upper_hex() {
        let code = new_order_code();
        assert_eq!(code.len(), 10);
        assert!(code.starts_with("OD"));
        assert!(code[2..]
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }
}
