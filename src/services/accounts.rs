use crate::{
    db::DbPool,
    entities::{
        transaction_history::{self, TransactionType},
        user::{self, UserRole},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        conflict_on_unique,
        ledger::{self, Posting, Reconciliation},
        Page,
    },
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 150, message = "Username must be 3-150 characters"))]
    pub username: String,
    #[validate(length(min = 8, max = 128, message = "Password must be 8-128 characters"))]
    pub password: String,
    #[validate(email(message = "Invalid e-mail address"))]
    pub email: Option<String>,
    #[validate(length(max = 150))]
    pub first_name: Option<String>,
    #[validate(length(max = 150))]
    pub last_name: Option<String>,
    #[validate(length(max = 20))]
    pub phone: Option<String>,
    /// `customer` (default) or `seller`
    pub role: Option<UserRole>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct WalletRequest {
    pub amount: Decimal,
    #[validate(length(max = 255))]
    pub note: Option<String>,
}

/// Public view of a user row
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: String,
    pub balance: Decimal,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl From<user::Model> for UserProfile {
    fn from(u: user::Model) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            first_name: u.first_name,
            last_name: u.last_name,
            phone: u.phone,
            role: u.role,
            balance: u.balance,
            is_verified: u.is_verified,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionEntry {
    pub id: Uuid,
    pub transaction_type: String,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub note: String,
    pub reference_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<transaction_history::Model> for TransactionEntry {
    fn from(t: transaction_history::Model) -> Self {
        Self {
            id: t.id,
            transaction_type: t.transaction_type,
            amount: t.amount,
            balance_after: t.balance_after,
            note: t.note,
            reference_id: t.reference_id,
            created_at: t.created_at,
        }
    }
}

pub fn hash_password(password: &str) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServiceError::HashError(e.to_string()))
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, ServiceError> {
    let parsed =
        PasswordHash::new(password_hash).map_err(|e| ServiceError::HashError(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Users and their wallets
#[derive(Clone)]
pub struct AccountService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl AccountService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self, request), fields(username = %request.username))]
    pub async fn register(&self, request: RegisterRequest) -> Result<UserProfile, ServiceError> {
        request.validate()?;

        let role = request.role.unwrap_or(UserRole::Customer);
        if role == UserRole::Admin {
            return Err(ServiceError::ValidationError(
                "Role must be customer or seller".to_string(),
            ));
        }

        let db = &*self.db_pool;
        let username = request.username.trim().to_string();

        let taken = user::Entity::find()
            .filter(user::Column::Username.eq(username.clone()))
            .one(db)
            .await?
            .is_some();
        if taken {
            return Err(ServiceError::Conflict(format!(
                "Username '{}' is already taken",
                username
            )));
        }

        let password_hash = hash_password(&request.password)?;
        let created = user::ActiveModel {
            username: Set(username.clone()),
            password_hash: Set(password_hash),
            email: Set(request.email),
            first_name: Set(request.first_name.unwrap_or_default()),
            last_name: Set(request.last_name.unwrap_or_default()),
            phone: Set(request.phone),
            role: Set(role.as_str().to_string()),
            balance: Set(Decimal::ZERO),
            is_verified: Set(false),
            active: Set(true),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(|e| conflict_on_unique(e, format!("Username '{}' is already taken", username)))?;

        info!(user_id = %created.id, role = %role, "User registered");
        self.event_sender
            .send_or_log(Event::UserRegistered(created.id))
            .await;

        Ok(created.into())
    }

    /// Password grant check. Unknown users and wrong passwords are
    /// indistinguishable to the caller.
    #[instrument(skip(self, password))]
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<user::Model, ServiceError> {
        let db = &*self.db_pool;
        let invalid = || ServiceError::Unauthorized("Invalid username or password".to_string());

        let Some(found) = user::Entity::find()
            .filter(user::Column::Username.eq(username.trim()))
            .filter(user::Column::Active.eq(true))
            .one(db)
            .await?
        else {
            warn!("Login attempt for unknown user");
            return Err(invalid());
        };

        if !verify_password(password, &found.password_hash)? {
            warn!(user_id = %found.id, "Login attempt with wrong password");
            return Err(invalid());
        }

        Ok(found)
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<user::Model, ServiceError> {
        user::Entity::find_by_id(user_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("User", user_id))
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<UserProfile, ServiceError> {
        self.get_user(user_id).await.map(UserProfile::from)
    }

    #[instrument(skip(self, request), fields(amount = %request.amount))]
    pub async fn deposit(
        &self,
        user_id: Uuid,
        request: WalletRequest,
    ) -> Result<TransactionEntry, ServiceError> {
        request.validate()?;
        let amount = request.amount;
        let note = request
            .note
            .unwrap_or_else(|| "Wallet deposit".to_string());

        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start deposit transaction");
            ServiceError::DatabaseError(e)
        })?;
        let posting = Posting::new(TransactionType::Deposit, amount, note);
        let entry = ledger::credit(&txn, user_id, posting).await?;
        txn.commit().await?;

        info!(
            user_id = %user_id,
            amount = %amount,
            balance = %entry.balance_after,
            "Wallet deposit"
        );
        self.event_sender
            .send_or_log(Event::WalletDeposited { user_id, amount })
            .await;

        Ok(entry.into())
    }

    #[instrument(skip(self, request), fields(amount = %request.amount))]
    pub async fn withdraw(
        &self,
        user_id: Uuid,
        request: WalletRequest,
    ) -> Result<TransactionEntry, ServiceError> {
        request.validate()?;
        let amount = request.amount;
        let note = request
            .note
            .unwrap_or_else(|| "Wallet withdrawal".to_string());

        let txn = self.db_pool.begin().await?;
        let posting = Posting::new(TransactionType::Withdraw, amount, note);
        let entry = ledger::debit(&txn, user_id, posting).await?;
        txn.commit().await?;

        info!(
            user_id = %user_id,
            amount = %amount,
            balance = %entry.balance_after,
            "Wallet withdrawal"
        );
        self.event_sender
            .send_or_log(Event::WalletWithdrawn { user_id, amount })
            .await;

        Ok(entry.into())
    }

    pub async fn list_transactions(
        &self,
        user_id: Uuid,
        page: u64,
        limit: u64,
    ) -> Result<Page<TransactionEntry>, ServiceError> {
        let (page, limit) = (page.max(1), limit.max(1));
        let paginator = transaction_history::Entity::find()
            .filter(transaction_history::Column::UserId.eq(user_id))
            .order_by_desc(transaction_history::Column::CreatedAt)
            .paginate(&*self.db_pool, limit);

        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;

        Ok(Page {
            items: items.into_iter().map(TransactionEntry::from).collect(),
            total,
            page,
            limit,
        })
    }

    pub async fn reconcile(&self, user_id: Uuid) -> Result<Reconciliation, ServiceError> {
        let report = ledger::reconcile(&*self.db_pool, user_id).await?;
        if !report.consistent {
            warn!(
                user_id = %user_id,
                balance = %report.balance,
                ledger_balance = %report.ledger_balance,
                "Wallet balance does not match its ledger"
            );
        }
        Ok(report)
    }

    #[instrument(skip(self))]
    pub async fn verify_user(&self, user_id: Uuid) -> Result<UserProfile, ServiceError> {
        let found = self.get_user(user_id).await?;
        let mut active: user::ActiveModel = found.into();
        active.is_verified = Set(true);
        let updated = active.update(&*self.db_pool).await?;

        info!(user_id = %user_id, "User verified");
        self.event_sender.send_or_log(Event::UserVerified(user_id)).await;
        Ok(updated.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse battery", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn register_request_validation() {
        let req = RegisterRequest {
            username: "ab".into(),
            password: "short".into(),
            email: Some("not-an-email".into()),
            first_name: None,
            last_name: None,
            phone: None,
            role: None,
        };
        let err = req.validate().unwrap_err();
        let fields = err.field_errors();
        assert!(fields.contains_key("username"));
        assert!(fields.contains_key("password"));
        assert!(fields.contains_key("email"));
    }
}
