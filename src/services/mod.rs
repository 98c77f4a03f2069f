// Stock core
pub mod audit;
pub mod inventory;
pub mod stock_ledger;

// Order engines
pub mod purchase_orders;
pub mod sales_orders;

// Supporting services
pub mod order_numbers;
pub mod products;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;

/// Bundles the service layer for injection into the HTTP edge.
#[derive(Clone)]
pub struct AppServices {
    pub inventory: Arc<inventory::InventoryService>,
    pub audit: Arc<audit::AuditTrailService>,
    pub sales_orders: Arc<sales_orders::SalesOrderService>,
    pub purchase_orders: Arc<purchase_orders::PurchaseOrderService>,
    pub products: Arc<products::ProductService>,
}

impl AppServices {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, cfg: &AppConfig) -> Self {
        let actor = cfg.system_actor.clone();
        Self {
            inventory: Arc::new(inventory::InventoryService::new(
                db.clone(),
                Some(event_sender.clone()),
                actor.clone(),
            )),
            audit: Arc::new(audit::AuditTrailService::new(db.clone())),
            sales_orders: Arc::new(sales_orders::SalesOrderService::new(
                db.clone(),
                Some(event_sender.clone()),
                actor.clone(),
            )),
            purchase_orders: Arc::new(purchase_orders::PurchaseOrderService::new(
                db.clone(),
                Some(event_sender),
                actor,
            )),
            products: Arc::new(products::ProductService::new(db)),
        }
    }
}
