//! Settlement: turning an open order into a paid one by attaching exactly one
//! detail.
//!
//! Both flows run in a single transaction and rely on guarded updates rather
//! than row locks:
//!
//! * the order's `is_paid` flag flips only if it is still false, so an order
//!   can never gain two details;
//! * the buyer's balance is debited only if it covers the total;
//! * each stock row is claimed only if it is still unsold.
//!
//! Any failure drops the transaction, which rolls everything back.

use crate::{
    db::DbPool,
    entities::{
        acc_order_detail,
        order::{self, OrderStatus},
        product::{self, ProductType},
        service_order_detail::{self, ServiceStatus},
        transaction_history::TransactionType,
        user, voucher,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        catalog::product_seller_id,
        ledger::{self, Posting},
        orders::{pay_out, settled_detail, transition_order, AccountDetailView, ServiceDetailView},
        pricing::PriceQuote,
        stock::{self, claim_units},
        vouchers::price_with_voucher,
        Actor,
    },
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateAccOrderDetailRequest {
    pub order_id: Uuid,
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 1000, message = "Quantity must be between 1 and 1000"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateServiceOrderDetailRequest {
    pub order_id: Uuid,
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 1000, message = "Quantity must be between 1 and 1000"))]
    pub quantity: i32,
    #[validate(url(message = "Target must be a valid URL"))]
    pub target_url: String,
    #[validate(length(max = 2000))]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateServiceStatusRequest {
    pub status: ServiceStatus,
}

/// State shared by both settlement flows once the preconditions hold
struct Checkout {
    order: order::Model,
    product: product::Model,
    quote: PriceQuote,
}

#[derive(Clone)]
pub struct SettlementService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl SettlementService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Loads and checks everything both flows need: order ownership and
    /// state, product availability and type, voucher store and price.
    async fn prepare(
        &self,
        txn: &DatabaseTransaction,
        buyer_id: Uuid,
        order_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        service: bool,
    ) -> Result<Checkout, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(txn)
            .await?
            .filter(|o| o.active)
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;

        if order.buyer_id != buyer_id {
            return Err(ServiceError::Forbidden(
                "Only the buyer can pay for this order".to_string(),
            ));
        }
        if order.is_paid || !order.has_status(OrderStatus::Processing) {
            return Err(ServiceError::Conflict(format!(
                "Order {} has already been settled",
                order.order_code
            )));
        }
        if settled_detail(txn, order_id).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Order {} already has a detail",
                order.order_code
            )));
        }

        let product = product::Entity::find_by_id(product_id)
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", product_id))?;
        if !product.active || !product.is_approved {
            return Err(ServiceError::ValidationError(format!(
                "Product '{}' is not available for sale",
                product.name
            )));
        }

        let kind = product.kind().ok_or_else(|| {
            ServiceError::InternalError(format!("unknown product type {}", product.product_type))
        })?;
        match (service, kind) {
            (true, ProductType::Service) => {}
            (true, _) => {
                return Err(ServiceError::ValidationError(
                    "Only service products can be ordered as a service".to_string(),
                ))
            }
            (false, k) if k.is_stock_backed() => {}
            (false, _) => {
                return Err(ServiceError::ValidationError(
                    "Service products must be ordered through a service order".to_string(),
                ))
            }
        }

        let voucher = match order.voucher_id {
            Some(voucher_id) => voucher::Entity::find_by_id(voucher_id).one(txn).await?,
            None => None,
        };
        let quote = price_with_voucher(&product, quantity, voucher.as_ref())?;

        Ok(Checkout {
            order,
            product,
            quote,
        })
    }

    /// Fails with `InsufficientBalance` before any write when the buyer
    /// cannot cover the total.
    async fn ensure_funds(
        txn: &DatabaseTransaction,
        buyer_id: Uuid,
        total: Decimal,
    ) -> Result<(), ServiceError> {
        let balance = user::Entity::find_by_id(buyer_id)
            .one(txn)
            .await?
            .map(|u| u.balance)
            .ok_or_else(|| ServiceError::not_found("User", buyer_id))?;
        if balance < total {
            return Err(ServiceError::InsufficientBalance(format!(
                "order total is {} but balance is {}",
                total, balance
            )));
        }
        Ok(())
    }

    /// Flips the order to paid. Returns `Conflict` if another settlement got
    /// there first.
    async fn claim_payment(
        txn: &DatabaseTransaction,
        order: &order::Model,
        quote: &PriceQuote,
        next_status: OrderStatus,
    ) -> Result<(), ServiceError> {
        let result = order::Entity::update_many()
            .col_expr(order::Column::IsPaid, Expr::value(true))
            .col_expr(order::Column::Status, Expr::value(next_status.as_str()))
            .col_expr(order::Column::DiscountAmount, Expr::value(quote.discount_amount))
            .col_expr(order::Column::TotalAmount, Expr::value(quote.total_amount))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::IsPaid.eq(false))
            .filter(order::Column::Status.eq(OrderStatus::Processing.as_str()))
            .exec(txn)
            .await?;

        if result.rows_affected == 0 {
            warn!(order_id = %order.id, "concurrent settlement lost the race");
            return Err(ServiceError::Conflict(format!(
                "Order {} has already been settled",
                order.order_code
            )));
        }
        Ok(())
    }

    async fn charge(
        txn: &DatabaseTransaction,
        buyer_id: Uuid,
        order_id: Uuid,
        amount: Decimal,
        note: String,
    ) -> Result<(), ServiceError> {
        let posting = Posting::new(TransactionType::Purchase, amount, note).reference(order_id);
        if amount.is_zero() {
            ledger::record(txn, buyer_id, posting).await?;
        } else {
            ledger::debit(txn, buyer_id, posting).await?;
        }
        Ok(())
    }

    /// Moves the order along with a finished service. The order must still be
    /// `processing`; a complaint filed since it was read makes this a
    /// `Conflict` and nothing is refunded.
    async fn follow_service_outcome(
        txn: &DatabaseTransaction,
        order: &order::Model,
        total_amount: Decimal,
        next: ServiceStatus,
    ) -> Result<(), ServiceError> {
        let target = match next {
            ServiceStatus::Completed => OrderStatus::Delivered,
            ServiceStatus::Failed => OrderStatus::Refunded,
            ServiceStatus::Pending | ServiceStatus::InProgress => return Ok(()),
        };

        let moved =
            transition_order(txn, order.id, &[OrderStatus::Processing], target, false).await?;
        if !moved {
            warn!(order_id = %order.id, to = %target, "order left processing during fulfilment");
            return Err(ServiceError::Conflict(format!(
                "Order {} is no longer processing",
                order.order_code
            )));
        }

        if next == ServiceStatus::Failed && order.is_paid {
            pay_out(
                txn,
                order.buyer_id,
                TransactionType::Refund,
                total_amount,
                format!("Refund for failed service in order {}", order.order_code),
                order.id,
            )
            .await?;
        }
        Ok(())
    }

    /// Pays for stock-backed goods and delivers their contents immediately.
    ///
    /// Check order: voucher store, then stock, then balance.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, product_id = %request.product_id, quantity = request.quantity))]
    pub async fn create_account_detail(
        &self,
        buyer_id: Uuid,
        request: CreateAccOrderDetailRequest,
    ) -> Result<AccountDetailView, ServiceError> {
        request.validate()?;

        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start settlement transaction");
            ServiceError::DatabaseError(e)
        })?;

        let Checkout {
            order,
            product,
            quote,
        } = self
            .prepare(
                &txn,
                buyer_id,
                request.order_id,
                request.product_id,
                request.quantity,
                false,
            )
            .await?;

        let wanted = request.quantity as u64;
        let available = stock::available_quantity(&txn, product.id).await?;
        if available < wanted {
            counter!("mmo_market.settlement.insufficient_stock", 1);
            return Err(ServiceError::InsufficientStock(format!(
                "requested {} but only {} unsold items left for product '{}'",
                wanted, available, product.name
            )));
        }
        if let Err(e) = Self::ensure_funds(&txn, buyer_id, quote.total_amount).await {
            counter!("mmo_market.settlement.insufficient_balance", 1);
            return Err(e);
        }

        Self::claim_payment(&txn, &order, &quote, OrderStatus::Delivered).await?;

        let detail = acc_order_detail::ActiveModel {
            order_id: Set(order.id),
            product_id: Set(product.id),
            unit_price: Set(quote.unit_price),
            quantity: Set(quote.quantity),
            discount_amount: Set(quote.discount_amount),
            total_amount: Set(quote.total_amount),
            content_delivered: Set(String::new()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let contents = claim_units(&txn, &product, wanted, detail.id).await?;

        Self::charge(
            &txn,
            buyer_id,
            order.id,
            quote.total_amount,
            format!("Payment for order {}", order.order_code),
        )
        .await?;

        let mut delivered: acc_order_detail::ActiveModel = detail.into();
        delivered.content_delivered = Set(contents.join("\n"));
        let detail = delivered.update(&txn).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id = %order.id, "Failed to commit settlement");
            ServiceError::DatabaseError(e)
        })?;

        counter!("mmo_market.settlement.account_orders", 1);
        info!(
            order_id = %order.id,
            detail_id = %detail.id,
            total = %quote.total_amount,
            discount = %quote.discount_amount,
            "Account order delivered"
        );
        self.event_sender
            .send_or_log(Event::AccountOrderDelivered {
                order_id: order.id,
                detail_id: detail.id,
                product_id: product.id,
                quantity: detail.quantity,
            })
            .await;

        Ok(detail.into())
    }

    /// Pays for a service; the order stays `processing` until the seller
    /// fulfils it.
    #[instrument(skip(self, request), fields(order_id = %request.order_id, product_id = %request.product_id, quantity = request.quantity))]
    pub async fn create_service_detail(
        &self,
        buyer_id: Uuid,
        request: CreateServiceOrderDetailRequest,
    ) -> Result<ServiceDetailView, ServiceError> {
        request.validate()?;

        let txn = self.db_pool.begin().await?;
        let Checkout {
            order,
            product,
            quote,
        } = self
            .prepare(
                &txn,
                buyer_id,
                request.order_id,
                request.product_id,
                request.quantity,
                true,
            )
            .await?;

        if let Err(e) = Self::ensure_funds(&txn, buyer_id, quote.total_amount).await {
            counter!("mmo_market.settlement.insufficient_balance", 1);
            return Err(e);
        }

        Self::claim_payment(&txn, &order, &quote, OrderStatus::Processing).await?;

        let detail = service_order_detail::ActiveModel {
            order_id: Set(order.id),
            product_id: Set(product.id),
            target_url: Set(request.target_url),
            note: Set(request.note.unwrap_or_default()),
            unit_price: Set(quote.unit_price),
            quantity: Set(quote.quantity),
            discount_amount: Set(quote.discount_amount),
            total_amount: Set(quote.total_amount),
            status: Set(ServiceStatus::Pending.as_str().to_string()),
            delivered_at: Set(None),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        Self::charge(
            &txn,
            buyer_id,
            order.id,
            quote.total_amount,
            format!(
                "Payment for service {} in order {}",
                product.name, order.order_code
            ),
        )
        .await?;

        txn.commit().await?;

        counter!("mmo_market.settlement.service_orders", 1);
        info!(
            order_id = %order.id,
            detail_id = %detail.id,
            total = %quote.total_amount,
            "Service order placed"
        );
        self.event_sender
            .send_or_log(Event::ServiceOrderPlaced {
                order_id: order.id,
                detail_id: detail.id,
                product_id: product.id,
            })
            .await;

        Ok(detail.into())
    }

    /// Moves a service detail through its fulfilment states. Completion marks
    /// the order delivered; failure refunds the buyer.
    #[instrument(skip(self))]
    pub async fn update_service_status(
        &self,
        actor: &Actor,
        detail_id: Uuid,
        next: ServiceStatus,
    ) -> Result<ServiceDetailView, ServiceError> {
        let txn = self.db_pool.begin().await?;

        let detail = service_order_detail::Entity::find_by_id(detail_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Service order detail", detail_id))?;

        if !actor.is_admin() && product_seller_id(&txn, detail.product_id).await? != actor.user_id {
            return Err(ServiceError::Forbidden(
                "Only the seller or an admin can update this service order".to_string(),
            ));
        }

        let current = detail.status().ok_or_else(|| {
            ServiceError::InternalError(format!("unknown service status {}", detail.status))
        })?;
        if !current.can_transition_to(next) {
            return Err(ServiceError::InvalidStatus(format!(
                "cannot move service order from {} to {}",
                current, next
            )));
        }

        let order = order::Entity::find_by_id(detail.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", detail.order_id))?;
        if !order.has_status(OrderStatus::Processing) {
            return Err(ServiceError::Conflict(format!(
                "Order {} is {}; fulfilment is frozen",
                order.order_code, order.status
            )));
        }

        let now = Utc::now();
        let mut update = service_order_detail::Entity::update_many()
            .col_expr(service_order_detail::Column::Status, Expr::value(next.as_str()))
            .col_expr(service_order_detail::Column::UpdatedAt, Expr::value(now));
        if next == ServiceStatus::Completed {
            update = update.col_expr(
                service_order_detail::Column::DeliveredAt,
                Expr::value(Some(now)),
            );
        }
        let result = update
            .filter(service_order_detail::Column::Id.eq(detail_id))
            .filter(service_order_detail::Column::Status.eq(current.as_str()))
            .exec(&txn)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "Service order status changed concurrently".to_string(),
            ));
        }

        Self::follow_service_outcome(&txn, &order, detail.total_amount, next).await?;

        let updated = service_order_detail::Entity::find_by_id(detail_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Service order detail", detail_id))?;
        txn.commit().await?;

        info!(detail_id = %detail_id, from = %current, to = %next, "Service order status changed");
        self.event_sender
            .send_or_log(Event::ServiceOrderStatusChanged {
                order_id: order.id,
                detail_id,
                old_status: current.as_str().to_string(),
                new_status: next.as_str().to_string(),
            })
            .await;

        Ok(updated.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entities::transaction_history,
        services::{fixtures, pricing::quote},
    };
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use sea_orm::PaginatorTrait;

    #[tokio::test]
    async fn a_stale_order_cannot_be_paid_twice() {
        let db = fixtures::database().await;
        let buyer = fixtures::user(&db, "payer", "customer", dec!(100)).await;
        let stale = fixtures::order(&db, &buyer, OrderStatus::Processing, false, dec!(0)).await;
        let priced = quote(dec!(10), 1, None).unwrap();

        let txn = db.begin().await.unwrap();
        SettlementService::claim_payment(&txn, &stale, &priced, OrderStatus::Delivered)
            .await
            .unwrap();

        // `stale` still reads as unpaid, as it would for a second settlement
        // that loaded the order before the first one committed.
        let second =
            SettlementService::claim_payment(&txn, &stale, &priced, OrderStatus::Delivered).await;
        assert_matches!(second, Err(ServiceError::Conflict(_)));

        let stored = order::Entity::find_by_id(stale.id).one(&txn).await.unwrap().unwrap();
        assert!(stored.is_paid);
        assert_eq!(stored.total_amount, dec!(10));
    }

    #[tokio::test]
    async fn paying_an_order_marked_paid_elsewhere_conflicts() {
        let db = fixtures::database().await;
        let buyer = fixtures::user(&db, "late_payer", "customer", dec!(100)).await;
        let stale = fixtures::order(&db, &buyer, OrderStatus::Processing, false, dec!(0)).await;
        order::Entity::update_many()
            .col_expr(order::Column::IsPaid, Expr::value(true))
            .filter(order::Column::Id.eq(stale.id))
            .exec(&db)
            .await
            .unwrap();

        let txn = db.begin().await.unwrap();
        let priced = quote(dec!(10), 1, None).unwrap();
        let result =
            SettlementService::claim_payment(&txn, &stale, &priced, OrderStatus::Delivered).await;
        assert_matches!(result, Err(ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn a_failed_service_on_a_complained_order_refunds_nothing() {
        let db = fixtures::database().await;
        let buyer = fixtures::user(&db, "svc_buyer", "customer", dec!(0)).await;
        let stale = fixtures::order(&db, &buyer, OrderStatus::Processing, true, dec!(20)).await;
        order::Entity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Complained.as_str()),
            )
            .filter(order::Column::Id.eq(stale.id))
            .exec(&db)
            .await
            .unwrap();

        let txn = db.begin().await.unwrap();
        let result = SettlementService::follow_service_outcome(
            &txn,
            &stale,
            dec!(20),
            ServiceStatus::Failed,
        )
        .await;
        assert_matches!(result, Err(ServiceError::Conflict(_)));

        let refunds = transaction_history::Entity::find()
            .filter(transaction_history::Column::UserId.eq(buyer.id))
            .count(&txn)
            .await
            .unwrap();
        assert_eq!(refunds, 0);
        let stored = order::Entity::find_by_id(stale.id).one(&txn).await.unwrap().unwrap();
        assert!(stored.has_status(OrderStatus::Complained));
    }

    #[tokio::test]
    async fn completing_a_service_on_a_complained_order_conflicts() {
        let db = fixtures::database().await;
        let buyer = fixtures::user(&db, "svc_buyer2", "customer", dec!(0)).await;
        let stale = fixtures::order(&db, &buyer, OrderStatus::Processing, true, dec!(20)).await;
        order::Entity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Complained.as_str()),
            )
            .filter(order::Column::Id.eq(stale.id))
            .exec(&db)
            .await
            .unwrap();

        let txn = db.begin().await.unwrap();
        let result = SettlementService::follow_service_outcome(
            &txn,
            &stale,
            dec!(20),
            ServiceStatus::Completed,
        )
        .await;
        assert_matches!(result, Err(ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn a_failed_service_refunds_the_buyer_once() {
        let db = fixtures::database().await;
        let buyer = fixtures::user(&db, "svc_buyer3", "customer", dec!(0)).await;
        let paid = fixtures::order(&db, &buyer, OrderStatus::Processing, true, dec!(20)).await;

        let txn = db.begin().await.unwrap();
        SettlementService::follow_service_outcome(&txn, &paid, dec!(20), ServiceStatus::Failed)
            .await
            .unwrap();
        txn.commit().await.unwrap();

        let stored = order::Entity::find_by_id(paid.id).one(&db).await.unwrap().unwrap();
        assert!(stored.has_status(OrderStatus::Refunded));
        let refunded = user::Entity::find_by_id(buyer.id).one(&db).await.unwrap().unwrap();
        assert_eq!(refunded.balance, dec!(20));
    }
}
