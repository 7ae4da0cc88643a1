//! Wallet ledger.
//!
//! Every balance mutation goes through [`debit`] or [`credit`], which apply a
//! guarded `UPDATE` on the user row and append one `transaction_histories`
//! row recording the resulting balance. A zero-amount purchase still needs
//! its row, which [`record`] writes without touching the balance. All three
//! are generic over [`ConnectionTrait`] so callers run them inside their own
//! transaction.

use crate::{
    entities::{
        transaction_history::{self, TransactionType},
        user,
    },
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// What a ledger mutation is about
#[derive(Debug, Clone)]
pub struct Posting {
    pub kind: TransactionType,
    pub amount: Decimal,
    pub note: String,
    pub reference_id: Option<Uuid>,
}

impl Posting {
    pub fn new(kind: TransactionType, amount: Decimal, note: impl Into<String>) -> Self {
        Self {
            kind,
            amount,
            note: note.into(),
            reference_id: None,
        }
    }

    pub fn reference(mut self, reference_id: Uuid) -> Self {
        self.reference_id = Some(reference_id);
        self
    }
}

/// Result of comparing a stored balance with the sum of its ledger rows
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Reconciliation {
    pub user_id: Uuid,
    pub balance: Decimal,
    pub ledger_balance: Decimal,
    pub entries: u64,
    pub consistent: bool,
}

fn ensure_positive(amount: Decimal) -> Result<(), ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Amount must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Takes `posting.amount` from the user's balance.
///
/// Fails with `InsufficientBalance` when the balance is lower than the amount;
/// nothing is written in that case.
pub async fn debit<C>(
    conn: &C,
    user_id: Uuid,
    posting: Posting,
) -> Result<transaction_history::Model, ServiceError>
where
    C: ConnectionTrait,
{
    ensure_positive(posting.amount)?;
    if posting.kind.is_credit() {
        return Err(ServiceError::InternalError(format!(
            "{} cannot be posted as a debit",
            posting.kind
        )));
    }

    let result = user::Entity::update_many()
        .col_expr(
            user::Column::Balance,
            Expr::col(user::Column::Balance).sub(posting.amount),
        )
        .col_expr(user::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(user::Column::Id.eq(user_id))
        .filter(user::Column::Balance.gte(posting.amount))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        let exists = user::Entity::find_by_id(user_id).one(conn).await?.is_some();
        if !exists {
            return Err(ServiceError::not_found("User", user_id));
        }
        warn!(user_id = %user_id, amount = %posting.amount, "debit refused: insufficient balance");
        return Err(ServiceError::InsufficientBalance(format!(
            "balance is lower than {}",
            posting.amount
        )));
    }

    append(conn, user_id, posting).await
}

/// Adds `posting.amount` to the user's balance.
pub async fn credit<C>(
    conn: &C,
    user_id: Uuid,
    posting: Posting,
) -> Result<transaction_history::Model, ServiceError>
where
    C: ConnectionTrait,
{
    ensure_positive(posting.amount)?;
    if !posting.kind.is_credit() {
        return Err(ServiceError::InternalError(format!(
            "{} cannot be posted as a credit",
            posting.kind
        )));
    }

    let result = user::Entity::update_many()
        .col_expr(
            user::Column::Balance,
            Expr::col(user::Column::Balance).add(posting.amount),
        )
        .col_expr(user::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(user::Column::Id.eq(user_id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::not_found("User", user_id));
    }

    append(conn, user_id, posting).await
}

/// Appends a zero-amount row, leaving the balance as it is.
///
/// Non-zero postings must go through [`debit`] or [`credit`] so the ledger
/// keeps summing to the stored balance.
pub async fn record<C>(
    conn: &C,
    user_id: Uuid,
    posting: Posting,
) -> Result<transaction_history::Model, ServiceError>
where
    C: ConnectionTrait,
{
    if !posting.amount.is_zero() {
        return Err(ServiceError::InternalError(format!(
            "{} of {} would change the balance",
            posting.kind, posting.amount
        )));
    }
    append(conn, user_id, posting).await
}

async fn append<C>(
    conn: &C,
    user_id: Uuid,
    posting: Posting,
) -> Result<transaction_history::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let balance_after = user::Entity::find_by_id(user_id)
        .one(conn)
        .await?
        .map(|u| u.balance)
        .ok_or_else(|| ServiceError::not_found("User", user_id))?;

    let entry = transaction_history::ActiveModel {
        user_id: Set(user_id),
        transaction_type: Set(posting.kind.as_str().to_string()),
        amount: Set(posting.amount),
        balance_after: Set(balance_after),
        note: Set(posting.note),
        reference_id: Set(posting.reference_id),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    debug!(
        user_id = %user_id,
        kind = %posting.kind,
        amount = %posting.amount,
        balance_after = %balance_after,
        "ledger entry recorded"
    );
    Ok(entry)
}

/// Checks that the stored balance equals the signed sum of the user's ledger.
pub async fn reconcile<C>(conn: &C, user_id: Uuid) -> Result<Reconciliation, ServiceError>
where
    C: ConnectionTrait,
{
    let balance = user::Entity::find_by_id(user_id)
        .one(conn)
        .await?
        .map(|u| u.balance)
        .ok_or_else(|| ServiceError::not_found("User", user_id))?;

    let entries = transaction_history::Entity::find()
        .filter(transaction_history::Column::UserId.eq(user_id))
        .all(conn)
        .await?;

    let ledger_balance = entries
        .iter()
        .map(transaction_history::Model::signed_amount)
        .fold(Decimal::ZERO, |acc, amount| acc + amount);

    Ok(Reconciliation {
        user_id,
        balance,
        ledger_balance,
        entries: entries.len() as u64,
        consistent: ledger_balance == balance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn zero_postings_keep_the_ledger_balanced() {
        let db = fixtures::database().await;
        let buyer = fixtures::user(&db, "ledger_user", "customer", dec!(0)).await;

        credit(
            &db,
            buyer.id,
            Posting::new(TransactionType::Deposit, dec!(30), "top up"),
        )
        .await
        .unwrap();
        let free = record(
            &db,
            buyer.id,
            Posting::new(TransactionType::Purchase, Decimal::ZERO, "free order"),
        )
        .await
        .unwrap();
        assert_eq!(free.amount, Decimal::ZERO);
        assert_eq!(free.balance_after, dec!(30));

        let summary = reconcile(&db, buyer.id).await.unwrap();
        assert_eq!(summary.entries, 2);
        assert!(summary.consistent);
    }

    #[tokio::test]
    async fn record_refuses_amounts_that_move_money() {
        let db = fixtures::database().await;
        let buyer = fixtures::user(&db, "ledger_user2", "customer", dec!(10)).await;

        let result = record(
            &db,
            buyer.id,
            Posting::new(TransactionType::Purchase, dec!(5), "not free"),
        )
        .await;
        assert_matches!(result, Err(ServiceError::InternalError(_)));
        assert_eq!(reconcile(&db, buyer.id).await.unwrap().entries, 0);
    }
}
