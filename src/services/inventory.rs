use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{
    product::{self, ProductStatus},
    stock_level::{self, Entity as StockLevel},
    warehouse,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::stock_ledger;

#[derive(Debug, Serialize, Deserialize)]
pub struct AdjustStockRequest {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    /// Signed correction; must be non-zero.
    pub delta: i32,
    pub notes: Option<String>,
}

/// Derived stock posture for the read model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    OutOfStock,
    LowStock,
    InStock,
}

pub fn classify_stock(on_hand: i32, reorder_level: i32) -> StockStatus {
    if on_hand == 0 {
        StockStatus::OutOfStock
    } else if reorder_level > 0 && on_hand <= reorder_level {
        StockStatus::LowStock
    } else {
        StockStatus::InStock
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StockResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_sku: String,
    pub product_name: String,
    pub warehouse_id: Uuid,
    pub warehouse_name: String,
    pub on_hand: i32,
    pub reserved: i32,
    pub available: i32,
    pub stock_status: StockStatus,
    /// `cost_price * on_hand`
    pub stock_value: Decimal,
    pub last_updated: DateTime<Utc>,
}

/// Public surface over the stock ledger: manual corrections plus the
/// lock-free read model. Reads run at read-committed isolation; there is no
/// in-process cache, every call re-reads.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    actor: String,
}

impl InventoryService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>, actor: String) -> Self {
        Self {
            db,
            event_sender,
            actor,
        }
    }

    /// Manual stock correction. One transaction: row lock, counter update,
    /// movement append.
    #[instrument(skip(self, request), fields(product_id = %request.product_id, warehouse_id = %request.warehouse_id, delta = request.delta))]
    pub async fn adjust_stock(
        &self,
        request: AdjustStockRequest,
    ) -> Result<StockResponse, ServiceError> {
        let db = &*self.db;

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for stock adjustment");
            ServiceError::DatabaseError(e)
        })?;

        let updated = stock_ledger::adjust(
            &txn,
            request.product_id,
            request.warehouse_id,
            request.delta,
            request.notes,
            &self.actor,
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit stock adjustment");
            ServiceError::DatabaseError(e)
        })?;

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::StockAdjusted {
                    product_id: request.product_id,
                    warehouse_id: request.warehouse_id,
                    delta: request.delta,
                    on_hand: updated.on_hand,
                })
                .await
            {
                warn!(error = %e, "Failed to send stock adjusted event");
            }
        }

        let mut responses = self.to_responses(vec![updated]).await?;
        responses
            .pop()
            .ok_or_else(|| ServiceError::Internal("adjusted row vanished".to_string()))
    }

    /// Counter row for one (product, warehouse) pair, if it exists.
    #[instrument(skip(self))]
    pub async fn get_stock(
        &self,
        product_id: Uuid,
        warehouse_id: Uuid,
    ) -> Result<Option<StockResponse>, ServiceError> {
        let row = stock_ledger::get(&*self.db, product_id, warehouse_id).await?;

        match row {
            Some(row) => Ok(self.to_responses(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    /// All counter rows, paginated.
    #[instrument(skip(self))]
    pub async fn list_stock(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<StockResponse>, u64), ServiceError> {
        let paginator = StockLevel::find()
            .order_by_asc(stock_level::Column::ProductId)
            .paginate(&*self.db, per_page);

        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let rows = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok((self.to_responses(rows).await?, total))
    }

    /// Rows whose ACTIVE product sits at or below its reorder level
    /// (reorder level zero means the product opted out of the check).
    #[instrument(skip(self))]
    pub async fn list_low_stock(&self) -> Result<Vec<StockResponse>, ServiceError> {
        let rows = StockLevel::find()
            .find_also_related(product::Entity)
            .filter(product::Column::Status.eq(ProductStatus::Active.as_ref()))
            .filter(product::Column::ReorderLevel.gt(0))
            .filter(
                Expr::col((StockLevel, stock_level::Column::OnHand))
                    .lte(Expr::col((product::Entity, product::Column::ReorderLevel))),
            )
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        self.joined_to_responses(rows).await
    }

    /// Rows with an ACTIVE product and nothing on hand.
    #[instrument(skip(self))]
    pub async fn list_out_of_stock(&self) -> Result<Vec<StockResponse>, ServiceError> {
        let rows = StockLevel::find()
            .find_also_related(product::Entity)
            .filter(product::Column::Status.eq(ProductStatus::Active.as_ref()))
            .filter(stock_level::Column::OnHand.eq(0))
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        self.joined_to_responses(rows).await
    }

    // -----------------------------------------------------------------------
    // read-model assembly

    async fn to_responses(
        &self,
        rows: Vec<stock_level::Model>,
    ) -> Result<Vec<StockResponse>, ServiceError> {
        let product_ids: Vec<Uuid> = rows.iter().map(|r| r.product_id).collect();
        let products: HashMap<Uuid, product::Model> = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let paired = rows
            .into_iter()
            .map(|row| {
                let prod = products.get(&row.product_id).cloned();
                (row, prod)
            })
            .collect();
        self.joined_to_responses(paired).await
    }

    async fn joined_to_responses(
        &self,
        rows: Vec<(stock_level::Model, Option<product::Model>)>,
    ) -> Result<Vec<StockResponse>, ServiceError> {
        let warehouse_ids: Vec<Uuid> = rows.iter().map(|(r, _)| r.warehouse_id).collect();
        let warehouses: HashMap<Uuid, warehouse::Model> = warehouse::Entity::find()
            .filter(warehouse::Column::Id.is_in(warehouse_ids))
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .into_iter()
            .map(|w| (w.id, w))
            .collect();

        rows.into_iter()
            .map(|(row, prod)| {
                let prod = prod.ok_or_else(|| {
                    ServiceError::Internal(format!(
                        "stock row {} references missing product {}",
                        row.id, row.product_id
                    ))
                })?;
                let wh = warehouses.get(&row.warehouse_id).ok_or_else(|| {
                    ServiceError::Internal(format!(
                        "stock row {} references missing warehouse {}",
                        row.id, row.warehouse_id
                    ))
                })?;
                Ok(StockResponse {
                    id: row.id,
                    product_id: row.product_id,
                    product_sku: prod.sku.clone(),
                    product_name: prod.name.clone(),
                    warehouse_id: row.warehouse_id,
                    warehouse_name: wh.name.clone(),
                    available: row.available(),
                    stock_status: classify_stock(row.on_hand, prod.reorder_level),
                    stock_value: prod.cost_price * Decimal::from(row.on_hand),
                    on_hand: row.on_hand,
                    reserved: row.reserved,
                    last_updated: row.last_updated,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_classification() {
        assert_eq!(classify_stock(0, 5), StockStatus::OutOfStock);
        assert_eq!(classify_stock(3, 5), StockStatus::LowStock);
        assert_eq!(classify_stock(5, 5), StockStatus::LowStock);
        assert_eq!(classify_stock(6, 5), StockStatus::InStock);
        // Reorder level zero opts out of the low-stock check.
        assert_eq!(classify_stock(1, 0), StockStatus::InStock);
        assert_eq!(classify_stock(0, 0), StockStatus::OutOfStock);
    }
}
