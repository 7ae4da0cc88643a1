//! Seed rows for service tests that need to reach below the HTTP surface.

use crate::{
    db::{establish_connection_with_config, run_migrations, DbConfig, DbPool},
    entities::{
        account_stock,
        order::{self, OrderStatus},
        product::{self, ProductType},
        service_order_detail::{self, ServiceStatus},
        store, user,
    },
    services::orders::new_order_code,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};

pub(crate) async fn database() -> DbPool {
    let cfg = DbConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        ..Default::default()
    };
    let pool = establish_connection_with_config(&cfg)
        .await
        .expect("connect to in-memory sqlite");
    run_migrations(&pool).await.expect("run migrations");
    pool
}

pub(crate) async fn user(db: &DbPool, username: &str, role: &str, balance: Decimal) -> user::Model {
    user::ActiveModel {
        username: Set(username.to_string()),
        password_hash: Set("unused".to_string()),
        email: Set(None),
        first_name: Set(String::new()),
        last_name: Set(String::new()),
        phone: Set(None),
        role: Set(role.to_string()),
        balance: Set(balance),
        is_verified: Set(true),
        active: Set(true),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert user")
}

pub(crate) async fn product(
    db: &DbPool,
    seller: &user::Model,
    kind: ProductType,
    price: Decimal,
) -> product::Model {
    let shop = store::ActiveModel {
        seller_id: Set(seller.id),
        name: Set(format!("{} shop", seller.username)),
        description: Set(String::new()),
        verified: Set(true),
        active: Set(true),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert store");

    product::ActiveModel {
        store_id: Set(shop.id),
        name: Set(format!("{} item", kind)),
        description: Set(String::new()),
        image_url: Set(None),
        price: Set(price),
        format: Set("email|password".to_string()),
        product_type: Set(kind.as_str().to_string()),
        warranty_days: Set(0),
        is_approved: Set(true),
        active: Set(true),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert product")
}

pub(crate) async fn stock_row(
    db: &DbPool,
    product: &product::Model,
    content: &str,
    sold: bool,
) -> account_stock::Model {
    account_stock::ActiveModel {
        product_id: Set(product.id),
        content: Set(content.to_string()),
        is_sold: Set(sold),
        sold_at: Set(None),
        acc_order_detail_id: Set(None),
        active: Set(true),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert stock row")
}

pub(crate) async fn order(
    db: &DbPool,
    buyer: &user::Model,
    status: OrderStatus,
    paid: bool,
    total: Decimal,
) -> order::Model {
    order::ActiveModel {
        order_code: Set(new_order_code()),
        buyer_id: Set(buyer.id),
        voucher_id: Set(None),
        discount_amount: Set(Decimal::ZERO),
        total_amount: Set(total),
        is_paid: Set(paid),
        status: Set(status.as_str().to_string()),
        released_at: Set(None),
        active: Set(true),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert order")
}

pub(crate) async fn service_detail(
    db: &DbPool,
    order: &order::Model,
    product: &product::Model,
    status: ServiceStatus,
) -> service_order_detail::Model {
    service_order_detail::ActiveModel {
        order_id: Set(order.id),
        product_id: Set(product.id),
        target_url: Set("https://example.com/page".to_string()),
        note: Set(String::new()),
        unit_price: Set(product.price),
        quantity: Set(1),
        discount_amount: Set(Decimal::ZERO),
        total_amount: Set(order.total_amount),
        status: Set(status.as_str().to_string()),
        delivered_at: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert service detail")
}
