use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Alias, Expr, Func, Order, Query};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, FromQueryResult, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use tracing::instrument;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::stock_movement::{self, Entity as StockMovement, MovementType, ReferenceType};
use crate::errors::ServiceError;

/// A movement about to be appended to the trail. `created_at` is assigned at
/// insert time, never by the caller.
#[derive(Debug)]
pub struct NewMovement<'a> {
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: i32,
    pub quantity_before: i32,
    pub quantity_after: i32,
    pub reference_type: Option<ReferenceType>,
    pub reference_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_by: &'a str,
}

/// Appends one movement inside the caller's transaction. The trail is
/// append-only: there is no update or delete counterpart.
pub async fn record_movement<C: ConnectionTrait>(
    conn: &C,
    movement: NewMovement<'_>,
) -> Result<stock_movement::Model, ServiceError> {
    if movement.quantity == 0 {
        return Err(ServiceError::BusinessValidation(
            "stock movements must carry a non-zero delta".to_string(),
        ));
    }

    // A movement that does not balance its snapshots is a ledger bug; abort
    // the enclosing transaction rather than persist a lie.
    let balanced = if movement.movement_type.affects_on_hand() {
        movement.quantity_before + movement.quantity == movement.quantity_after
    } else {
        movement.quantity_before == movement.quantity_after
    };
    if !balanced {
        return Err(ServiceError::Internal(format!(
            "unbalanced {} movement: before {} + delta {} != after {}",
            movement.movement_type,
            movement.quantity_before,
            movement.quantity,
            movement.quantity_after
        )));
    }

    let model = stock_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(movement.product_id),
        warehouse_id: Set(movement.warehouse_id),
        movement_type: Set(movement.movement_type.as_ref().to_string()),
        quantity: Set(movement.quantity),
        quantity_before: Set(movement.quantity_before),
        quantity_after: Set(movement.quantity_after),
        reference_type: Set(movement.reference_type.map(|r| r.as_ref().to_string())),
        reference_id: Set(movement.reference_id),
        notes: Set(movement.notes),
        created_by: Set(movement.created_by.to_string()),
        created_at: Set(Utc::now()),
    };

    model.insert(conn).await.map_err(ServiceError::DatabaseError)
}

/// Movement volume aggregated per product.
#[derive(Debug, Clone, FromQueryResult)]
pub struct ProductVolume {
    pub product_id: Uuid,
    pub total_volume: i64,
}

/// Read side of the audit trail.
#[derive(Clone)]
pub struct AuditTrailService {
    db: Arc<DbPool>,
}

impl AuditTrailService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Paginated movements for one product, newest first, optionally
    /// restricted to a [from, to] window.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn list_by_product(
        &self,
        product_id: Uuid,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<stock_movement::Model>, u64), ServiceError> {
        let db = &*self.db;

        let mut query = StockMovement::find()
            .filter(stock_movement::Column::ProductId.eq(product_id))
            .order_by_desc(stock_movement::Column::CreatedAt);
        if let Some((from, to)) = window {
            query = query
                .filter(stock_movement::Column::CreatedAt.gte(from))
                .filter(stock_movement::Column::CreatedAt.lte(to));
        }

        let paginator = query.paginate(db, per_page);
        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let movements = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok((movements, total))
    }

    /// Movements attributed to one business entity (an order, a manual
    /// correction batch).
    #[instrument(skip(self), fields(reference_id = %reference_id))]
    pub async fn list_by_reference(
        &self,
        reference_type: ReferenceType,
        reference_id: Uuid,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        StockMovement::find()
            .filter(stock_movement::Column::ReferenceType.eq(reference_type.as_ref()))
            .filter(stock_movement::Column::ReferenceId.eq(reference_id))
            .order_by_desc(stock_movement::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }

    /// Top `k` products by Σ|delta| for movements of `movement_type` after
    /// `since`. Feeds the fast-mover review.
    #[instrument(skip(self))]
    pub async fn top_movers_since(
        &self,
        movement_type: MovementType,
        since: DateTime<Utc>,
        k: u64,
    ) -> Result<Vec<ProductVolume>, ServiceError> {
        let db = &*self.db;
        let backend = db.get_database_backend();

        let query = Query::select()
            .column(stock_movement::Column::ProductId)
            .expr_as(
                Func::sum(Func::abs(Expr::col(stock_movement::Column::Quantity))),
                Alias::new("total_volume"),
            )
            .from(StockMovement)
            .and_where(Expr::col(stock_movement::Column::MovementType).eq(movement_type.as_ref()))
            .and_where(Expr::col(stock_movement::Column::CreatedAt).gte(since))
            .group_by_col(stock_movement::Column::ProductId)
            .order_by(Alias::new("total_volume"), Order::Desc)
            .limit(k)
            .to_owned();

        ProductVolume::find_by_statement(backend.build(&query))
            .all(db)
            .await
            .map_err(ServiceError::DatabaseError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movement(movement_type: MovementType, quantity: i32, before: i32, after: i32) -> NewMovement<'static> {
        NewMovement {
            product_id: Uuid::new_v4(),
            warehouse_id: Uuid::new_v4(),
            movement_type,
            quantity,
            quantity_before: before,
            quantity_after: after,
            reference_type: None,
            reference_id: None,
            notes: None,
            created_by: "system",
        }
    }

    #[tokio::test]
    async fn zero_delta_movements_are_rejected() {
        let db = sea_orm::DatabaseConnection::Disconnected;
        let err = record_movement(&db, movement(MovementType::Adjustment, 0, 5, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BusinessValidation(_)));
    }

    #[tokio::test]
    async fn unbalanced_movements_are_rejected() {
        let db = sea_orm::DatabaseConnection::Disconnected;
        let err = record_movement(&db, movement(MovementType::Sale, -5, 10, 7))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Internal(_)));
    }

    #[tokio::test]
    async fn reservations_must_leave_on_hand_untouched() {
        let db = sea_orm::DatabaseConnection::Disconnected;
        let err = record_movement(&db, movement(MovementType::Reservation, -5, 10, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Internal(_)));
    }
}
