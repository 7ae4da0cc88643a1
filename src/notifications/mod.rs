//! Seller notifications.
//!
//! The marketplace only composes messages; delivery is delegated to a
//! [`Notifier`]. The default [`LogNotifier`] writes the message to the log so
//! the rest of the pipeline can run without a mail transport.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// An outgoing e-mail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Everything a seller needs to know about a freshly paid order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderNotice {
    pub order_code: String,
    pub seller_email: String,
    pub seller_name: String,
    pub buyer_username: String,
    pub product_name: String,
    pub quantity: i32,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl NewOrderNotice {
    pub fn into_email(self, from: &str) -> EmailMessage {
        let body = format!(
            "Hello {seller},\n\n\
             You have a new order {code}.\n\
             Buyer: {buyer}\n\
             Product: {product}\n\
             Quantity: {qty}\n\
             Total: {total}\n\
             Placed at: {created}\n",
            seller = self.seller_name,
            code = self.order_code,
            buyer = self.buyer_username,
            product = self.product_name,
            qty = self.quantity,
            total = self.total_amount,
            created = self.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        );

        EmailMessage {
            from: from.to_string(),
            to: self.seller_email,
            subject: format!("[New order] {}", self.order_code),
            body,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Recipient has no e-mail address")]
    MissingRecipient,
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), NotificationError>;
}

/// Writes messages to the log instead of sending them
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: EmailMessage) -> Result<(), NotificationError> {
        if message.to.trim().is_empty() {
            return Err(NotificationError::MissingRecipient);
        }
        info!(
            to = %message.to,
            subject = %message.subject,
            body = %message.body,
            "notification email"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn notice() -> NewOrderNotice {
        NewOrderNotice {
            order_code: "OD1A2B3C4D".into(),
            seller_email: "seller@example.com".into(),
            seller_name: "Shop Owner".into(),
            buyer_username: "buyer1".into(),
            product_name: "Steam account".into(),
            quantity: 2,
            total_amount: dec!(90000),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn email_subject_carries_order_code() {
        let email = notice().into_email("noreply@mmo.local");
        assert_eq!(email.subject, "[New order] OD1A2B3C4D");
        assert_eq!(email.to, "seller@example.com");
        assert!(email.body.contains("buyer1"));
        assert!(email.body.contains("Steam account"));
        assert!(email.body.contains("90000"));
    }

    #[tokio::test]
    async fn log_notifier_requires_recipient() {
        let mut email = notice().into_email("noreply@mmo.local");
        email.to = String::new();
        assert!(matches!(
            LogNotifier.send(email).await,
            Err(NotificationError::MissingRecipient)
        ));
    }
}
