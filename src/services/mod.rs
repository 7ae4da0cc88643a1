// Pure helpers
pub mod pricing;

// Wallet ledger shared by every money-moving service
pub mod ledger;

// Users, wallets and the catalog
pub mod accounts;
pub mod catalog;
pub mod stock;
pub mod vouchers;

// Order lifecycle and settlement
pub mod orders;
pub mod settlement;

// After-sale workflows
pub mod complaints;
pub mod reviews;

#[cfg(test)]
pub(crate) mod fixtures;

use crate::{entities::user::UserRole, errors::ServiceError};
use sea_orm::{DbErr, SqlErr};
use uuid::Uuid;

/// The authenticated caller of a service operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: UserRole,
}

impl Actor {
    pub fn new(user_id: Uuid, role: UserRole) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn is_seller(&self) -> bool {
        self.role == UserRole::Seller
    }
}

/// One page of rows plus the unpaginated row count
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            limit: self.limit,
        }
    }
}

/// Turns a unique-index violation into `Conflict`, passing other errors through.
pub(crate) fn conflict_on_unique(err: DbErr, message: impl Into<String>) -> ServiceError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => ServiceError::Conflict(message.into()),
        _ => ServiceError::DatabaseError(err),
    }
}
