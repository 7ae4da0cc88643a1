//! sea-orm entities for the marketplace schema.
//!
//! Every table is keyed by a v4 UUID. Money columns are `Decimal` with two
//! decimal places; status columns are stored as snake_case strings and parsed
//! through the enums defined next to each model.

pub mod acc_order_detail;
pub mod account_stock;
pub mod complaint;
pub mod order;
pub mod product;
pub mod review;
pub mod service_order_detail;
pub mod store;
pub mod transaction_history;
pub mod user;
pub mod voucher;
