#![allow(dead_code)] // not every integration binary uses every helper

use std::sync::Arc;

use chrono::Utc;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use stockflow_api::config::AppConfig;
use stockflow_api::db::{self, DbPool};
use stockflow_api::entities::{customer, product, stock_level, supplier, warehouse};
use stockflow_api::events::{self, EventSender};
use stockflow_api::services::AppServices;
use tokio::sync::mpsc;
use uuid::Uuid;

pub struct TestContext {
    pub db: Arc<DbPool>,
    pub services: AppServices,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub customer_id: Uuid,
    pub supplier_id: Uuid,
}

/// Connects to an in-memory database, migrates it, and seeds one product,
/// warehouse, customer, and supplier.
pub async fn setup() -> TestContext {
    let cfg = AppConfig::new("sqlite::memory:", "test");
    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .expect("db connect");
    db::run_migrations(&pool).await.expect("migrations");
    let db = Arc::new(pool);

    let (tx, rx) = mpsc::channel(100);
    let sender = EventSender::new(tx);
    tokio::spawn(events::process_events(rx));

    let services = AppServices::new(db.clone(), Arc::new(sender), &cfg);

    let warehouse_id = seed_warehouse(&db, "WH-MAIN").await;
    let product_id = seed_product(&db, "SKU-0001", 5).await;
    let customer_id = seed_customer(&db, "acme@example.com").await;
    let supplier_id = seed_supplier(&db).await;

    TestContext {
        db,
        services,
        product_id,
        warehouse_id,
        customer_id,
        supplier_id,
    }
}

pub async fn seed_product(db: &DbPool, sku: &str, reorder_level: i32) -> Uuid {
    let id = Uuid::new_v4();
    product::ActiveModel {
        id: Set(id),
        sku: Set(sku.to_string()),
        name: Set(format!("Product {}", sku)),
        description: Set(None),
        unit_price: Set(dec!(19.9900)),
        cost_price: Set(dec!(12.5000)),
        reorder_level: Set(reorder_level),
        reorder_quantity: Set(25),
        status: Set("ACTIVE".to_string()),
        version: Set(0),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("seed product");
    id
}

pub async fn seed_warehouse(db: &DbPool, code: &str) -> Uuid {
    let id = Uuid::new_v4();
    warehouse::ActiveModel {
        id: Set(id),
        code: Set(code.to_string()),
        name: Set(format!("Warehouse {}", code)),
        status: Set("ACTIVE".to_string()),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("seed warehouse");
    id
}

pub async fn seed_customer(db: &DbPool, email: &str) -> Uuid {
    let id = Uuid::new_v4();
    customer::ActiveModel {
        id: Set(id),
        name: Set("Acme Corp".to_string()),
        email: Set(email.to_string()),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("seed customer");
    id
}

pub async fn seed_supplier(db: &DbPool) -> Uuid {
    let id = Uuid::new_v4();
    supplier::ActiveModel {
        id: Set(id),
        name: Set("Parts & Co".to_string()),
        email: Set(None),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("seed supplier");
    id
}

/// Raw counter row, straight from the table.
pub async fn stock_row(
    db: &DbPool,
    product_id: Uuid,
    warehouse_id: Uuid,
) -> Option<stock_level::Model> {
    stock_level::Entity::find()
        .filter(stock_level::Column::ProductId.eq(product_id))
        .filter(stock_level::Column::WarehouseId.eq(warehouse_id))
        .one(db)
        .await
        .expect("stock row query")
}
