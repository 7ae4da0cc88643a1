pub mod accounts;
pub mod auth;
pub mod catalog;
pub mod common;
pub mod complaints;
pub mod orders;
pub mod reviews;
pub mod settlement;
pub mod stock;
pub mod vouchers;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    accounts::AccountService, catalog::CatalogService, complaints::ComplaintService,
    orders::OrderService, reviews::ReviewService, settlement::SettlementService,
    stock::StockService, vouchers::VoucherService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub accounts: Arc<AccountService>,
    pub catalog: Arc<CatalogService>,
    pub stock: Arc<StockService>,
    pub vouchers: Arc<VoucherService>,
    pub orders: Arc<OrderService>,
    pub settlement: Arc<SettlementService>,
    pub complaints: Arc<ComplaintService>,
    pub reviews: Arc<ReviewService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            accounts: Arc::new(AccountService::new(db_pool.clone(), event_sender.clone())),
            catalog: Arc::new(CatalogService::new(db_pool.clone(), event_sender.clone())),
            stock: Arc::new(StockService::new(db_pool.clone(), event_sender.clone())),
            vouchers: Arc::new(VoucherService::new(db_pool.clone())),
            orders: Arc::new(OrderService::new(db_pool.clone(), event_sender.clone())),
            settlement: Arc::new(SettlementService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            complaints: Arc::new(ComplaintService::new(db_pool.clone(), event_sender.clone())),
            reviews: Arc::new(ReviewService::new(db_pool, event_sender)),
        }
    }
}
