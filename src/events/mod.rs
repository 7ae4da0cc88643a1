use crate::{
    db::DbPool,
    entities::{acc_order_detail, order, product, service_order_detail, store, user},
    errors::ServiceError,
    notifications::{NewOrderNotice, Notifier},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::EntityTrait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Used after a transaction has committed, where the caller's result must
    /// not depend on the event pipeline.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropping domain event");
        }
    }
}

/// Domain events emitted after the corresponding transaction commits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Account events
    UserRegistered(Uuid),
    UserVerified(Uuid),
    WalletDeposited {
        user_id: Uuid,
        amount: Decimal,
    },
    WalletWithdrawn {
        user_id: Uuid,
        amount: Decimal,
    },

    // Catalog events
    StoreCreated(Uuid),
    ProductCreated(Uuid),
    ProductApproved(Uuid),
    StockAdded {
        product_id: Uuid,
        count: usize,
    },

    // Order events
    OrderCreated(Uuid),
    OrderCancelled {
        order_id: Uuid,
        refunded: Option<Decimal>,
    },
    OrderCompleted(Uuid),
    AccountOrderDelivered {
        order_id: Uuid,
        detail_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    ServiceOrderPlaced {
        order_id: Uuid,
        detail_id: Uuid,
        product_id: Uuid,
    },
    ServiceOrderStatusChanged {
        order_id: Uuid,
        detail_id: Uuid,
        old_status: String,
        new_status: String,
    },

    // After-sale events
    ComplaintFiled {
        complaint_id: Uuid,
        order_id: Uuid,
    },
    ComplaintResolved {
        complaint_id: Uuid,
        order_id: Uuid,
        decision: String,
    },
    ReviewCreated {
        review_id: Uuid,
        product_id: Uuid,
    },
}

/// Which order detail table a new-order notice is built from
#[derive(Debug, Clone, Copy)]
enum DetailKind {
    Account,
    Service,
}

/// Consumes the event channel and performs the side effects that must not
/// run inside a request: currently the seller "new order" e-mail.
#[derive(Clone)]
pub struct EventProcessor {
    db: Arc<DbPool>,
    notifier: Arc<dyn Notifier>,
    mail_from: String,
    seller_notifications_enabled: bool,
}

impl EventProcessor {
    pub fn new(
        db: Arc<DbPool>,
        notifier: Arc<dyn Notifier>,
        mail_from: impl Into<String>,
        seller_notifications_enabled: bool,
    ) -> Self {
        Self {
            db,
            notifier,
            mail_from: mail_from.into(),
            seller_notifications_enabled,
        }
    }

    pub async fn handle(&self, event: Event) -> Result<(), ServiceError> {
        match event {
            Event::AccountOrderDelivered {
                order_id,
                detail_id,
                ..
            } => self.notify_seller(order_id, detail_id, DetailKind::Account).await,
            Event::ServiceOrderPlaced {
                order_id,
                detail_id,
                ..
            } => self.notify_seller(order_id, detail_id, DetailKind::Service).await,
            Event::ComplaintFiled {
                complaint_id,
                order_id,
            } => {
                info!(
                    complaint_id = %complaint_id,
                    order_id = %order_id,
                    "complaint awaiting admin review"
                );
                Ok(())
            }
            other => {
                debug!(event = ?other, "event has no side effects");
                Ok(())
            }
        }
    }

    async fn notify_seller(
        &self,
        order_id: Uuid,
        detail_id: Uuid,
        kind: DetailKind,
    ) -> Result<(), ServiceError> {
        if !self.seller_notifications_enabled {
            return Ok(());
        }

        let Some(notice) = self.load_notice(order_id, detail_id, kind).await? else {
            warn!(order_id = %order_id, "seller has no e-mail address; notice skipped");
            return Ok(());
        };

        let order_code = notice.order_code.clone();
        self.notifier
            .send(notice.into_email(&self.mail_from))
            .await
            .map_err(|e| ServiceError::EventError(e.to_string()))?;

        info!(order_id = %order_id, order_code = %order_code, "seller notified of new order");
        Ok(())
    }

    async fn load_notice(
        &self,
        order_id: Uuid,
        detail_id: Uuid,
        kind: DetailKind,
    ) -> Result<Option<NewOrderNotice>, ServiceError> {
        let db = &*self.db;

        let (product_id, quantity, total_amount, created_at): (Uuid, i32, Decimal, DateTime<Utc>) =
            match kind {
                DetailKind::Account => {
                    let d = acc_order_detail::Entity::find_by_id(detail_id)
                        .one(db)
                        .await?
                        .ok_or_else(|| ServiceError::not_found("AccOrderDetail", detail_id))?;
                    (d.product_id, d.quantity, d.total_amount, d.created_at)
                }
                DetailKind::Service => {
                    let d = service_order_detail::Entity::find_by_id(detail_id)
                        .one(db)
                        .await?
                        .ok_or_else(|| ServiceError::not_found("ServiceOrderDetail", detail_id))?;
                    (d.product_id, d.quantity, d.total_amount, d.created_at)
                }
            };

        let order = order::Entity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
        let buyer = user::Entity::find_by_id(order.buyer_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("User", order.buyer_id))?;
        let product = product::Entity::find_by_id(product_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", product_id))?;
        let store = store::Entity::find_by_id(product.store_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Store", product.store_id))?;
        let seller = user::Entity::find_by_id(store.seller_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("User", store.seller_id))?;

        let Some(seller_email) = seller.email.clone().filter(|e| !e.trim().is_empty()) else {
            return Ok(None);
        };

        Ok(Some(NewOrderNotice {
            order_code: order.order_code,
            seller_email,
            seller_name: seller.display_name(),
            buyer_username: buyer.username,
            product_name: product.name,
            quantity,
            total_amount,
            created_at,
        }))
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, processor: EventProcessor) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        debug!("Received event: {:?}", event);

        if let Err(e) = processor.handle(event).await {
            error!(error = %e, "Failed to handle event");
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::MockNotifier;

    #[tokio::test]
    async fn sender_reports_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        assert!(matches!(
            sender.send(Event::OrderCreated(Uuid::new_v4())).await,
            Err(ServiceError::EventError(_))
        ));
    }

    #[tokio::test]
    async fn disabled_notifications_never_touch_the_notifier() {
        let db = sea_orm::Database::connect("sqlite::memory:").await.unwrap();
        let mut notifier = MockNotifier::new();
        notifier.expect_send().never();

        let processor =
            EventProcessor::new(Arc::new(db), Arc::new(notifier), "noreply@test", false);
        processor
            .handle(Event::AccountOrderDelivered {
                order_id: Uuid::new_v4(),
                detail_id: Uuid::new_v4(),
                product_id: Uuid::new_v4(),
                quantity: 1,
            })
            .await
            .unwrap();
    }
}
