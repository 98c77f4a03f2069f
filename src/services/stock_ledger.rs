//! Per-(product, warehouse) stock counters.
//!
//! Every mutator here runs inside the caller's transaction and takes an
//! exclusive row lock (`SELECT ... FOR UPDATE`) on the counter row for the
//! rest of that transaction. Callers touching several rows in one
//! transaction must invoke these in ascending product id order; the order
//! engines sort their lines before looping. Each mutation appends exactly
//! one movement to the audit trail in the same transaction (`release` is the
//! exception: it is the logical undo of a reservation whose entry stays in
//! the log).

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter,
    QuerySelect, Set,
};
use tracing::info;
use uuid::Uuid;

use crate::entities::{
    product,
    stock_level::{self, Entity as StockLevel},
    stock_movement::{MovementType, ReferenceType},
    warehouse,
};
use crate::errors::ServiceError;
use crate::services::audit::{self, NewMovement};

/// Counter pair after a manual adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustedCounters {
    pub on_hand: i32,
    pub reserved: i32,
    /// Reserved was pulled down to the new on-hand.
    pub clipped: bool,
}

/// Applies a signed delta to the counters. Returns `None` when the result
/// would be negative (or overflow). When the new on-hand falls below the
/// current reservation, the reservation is clipped down to it.
pub fn apply_adjustment(on_hand: i32, reserved: i32, delta: i32) -> Option<AdjustedCounters> {
    let next = on_hand.checked_add(delta)?;
    if next < 0 {
        return None;
    }
    let (next_reserved, clipped) = if reserved > next {
        (next, true)
    } else {
        (reserved, false)
    };
    Some(AdjustedCounters {
        on_hand: next,
        reserved: next_reserved,
        clipped,
    })
}

/// Counter invariants checked before every write. A violation aborts the
/// enclosing transaction.
pub fn check_invariants(on_hand: i32, reserved: i32) -> Result<(), String> {
    if on_hand < 0 {
        return Err(format!("on-hand cannot be negative (got {on_hand})"));
    }
    if reserved < 0 {
        return Err(format!("reserved cannot be negative (got {reserved})"));
    }
    if reserved > on_hand {
        return Err(format!(
            "reserved ({reserved}) cannot exceed on-hand ({on_hand})"
        ));
    }
    Ok(())
}

/// Earmarks stock for a confirmed sales order. Fails when no counter row
/// exists or fewer than `quantity` units are available.
pub async fn reserve(
    txn: &DatabaseTransaction,
    product_id: Uuid,
    warehouse_id: Uuid,
    quantity: i32,
    actor: &str,
) -> Result<stock_level::Model, ServiceError> {
    require_positive(quantity)?;
    let row = lock_row(txn, product_id, warehouse_id)
        .await?
        .ok_or_else(|| missing_row(product_id, warehouse_id))?;
    let sku = load_sku(txn, product_id).await?;

    let available = row.available();
    if available < quantity {
        return Err(ServiceError::InsufficientStock {
            sku,
            requested: quantity,
            available,
        });
    }

    let updated = store(txn, &row, row.on_hand, row.reserved + quantity).await?;

    audit::record_movement(
        txn,
        NewMovement {
            product_id,
            warehouse_id,
            movement_type: MovementType::Reservation,
            quantity: -quantity,
            quantity_before: row.on_hand,
            quantity_after: row.on_hand,
            reference_type: Some(ReferenceType::SalesOrder),
            reference_id: None,
            notes: Some("Reserved for sales order".to_string()),
            created_by: actor,
        },
    )
    .await?;

    info!(%sku, %warehouse_id, quantity, "reserved stock");
    Ok(updated)
}

/// Undoes a reservation. Reserved never drops below zero; no movement is
/// appended.
pub async fn release(
    txn: &DatabaseTransaction,
    product_id: Uuid,
    warehouse_id: Uuid,
    quantity: i32,
) -> Result<stock_level::Model, ServiceError> {
    require_positive(quantity)?;
    let row = lock_row(txn, product_id, warehouse_id)
        .await?
        .ok_or_else(|| missing_row(product_id, warehouse_id))?;

    let updated = store(txn, &row, row.on_hand, (row.reserved - quantity).max(0)).await?;

    info!(%product_id, %warehouse_id, quantity, "released reservation");
    Ok(updated)
}

/// Discharges a shipment: on-hand drops by `quantity`, the matching
/// reservation is consumed (never below zero).
pub async fn ship(
    txn: &DatabaseTransaction,
    product_id: Uuid,
    warehouse_id: Uuid,
    quantity: i32,
    sales_order_id: Uuid,
    actor: &str,
) -> Result<stock_level::Model, ServiceError> {
    require_positive(quantity)?;
    let row = lock_row(txn, product_id, warehouse_id)
        .await?
        .ok_or_else(|| missing_row(product_id, warehouse_id))?;
    let sku = load_sku(txn, product_id).await?;

    if row.on_hand < quantity {
        return Err(ServiceError::InsufficientStock {
            sku,
            requested: quantity,
            available: row.on_hand,
        });
    }

    let updated = store(
        txn,
        &row,
        row.on_hand - quantity,
        (row.reserved - quantity).max(0),
    )
    .await?;

    audit::record_movement(
        txn,
        NewMovement {
            product_id,
            warehouse_id,
            movement_type: MovementType::Sale,
            quantity: -quantity,
            quantity_before: row.on_hand,
            quantity_after: updated.on_hand,
            reference_type: Some(ReferenceType::SalesOrder),
            reference_id: Some(sales_order_id),
            notes: Some("Shipped".to_string()),
            created_by: actor,
        },
    )
    .await?;

    info!(%sku, %sales_order_id, quantity, "deducted stock for shipment");
    Ok(updated)
}

/// Books a purchase receipt. Creates the counter row on first touch.
pub async fn receive(
    txn: &DatabaseTransaction,
    product_id: Uuid,
    warehouse_id: Uuid,
    quantity: i32,
    purchase_order_id: Uuid,
    actor: &str,
) -> Result<stock_level::Model, ServiceError> {
    require_positive(quantity)?;
    let row = lock_or_create_row(txn, product_id, warehouse_id).await?;

    let updated = store(txn, &row, row.on_hand + quantity, row.reserved).await?;

    audit::record_movement(
        txn,
        NewMovement {
            product_id,
            warehouse_id,
            movement_type: MovementType::Purchase,
            quantity,
            quantity_before: row.on_hand,
            quantity_after: updated.on_hand,
            reference_type: Some(ReferenceType::PurchaseOrder),
            reference_id: Some(purchase_order_id),
            notes: Some("Received from supplier".to_string()),
            created_by: actor,
        },
    )
    .await?;

    info!(%product_id, %purchase_order_id, quantity, "received stock");
    Ok(updated)
}

/// Manual correction by a signed delta. Creates the counter row on first
/// touch; rejects a result below zero; clips reserved to the new on-hand
/// when it would exceed it (and says so in the movement notes).
pub async fn adjust(
    txn: &DatabaseTransaction,
    product_id: Uuid,
    warehouse_id: Uuid,
    delta: i32,
    notes: Option<String>,
    actor: &str,
) -> Result<stock_level::Model, ServiceError> {
    if delta == 0 {
        return Err(ServiceError::BusinessValidation(
            "adjustment delta must be non-zero".to_string(),
        ));
    }
    let row = lock_or_create_row(txn, product_id, warehouse_id).await?;

    let adjusted = apply_adjustment(row.on_hand, row.reserved, delta).ok_or_else(|| {
        ServiceError::BusinessValidation(format!(
            "Adjustment would result in negative inventory. Current: {}, delta: {}",
            row.on_hand, delta
        ))
    })?;

    let updated = store(txn, &row, adjusted.on_hand, adjusted.reserved).await?;

    let notes = match (notes, adjusted.clipped) {
        (Some(n), true) => Some(format!("{}; reserved clipped to {}", n, adjusted.reserved)),
        (None, true) => Some(format!("reserved clipped to {}", adjusted.reserved)),
        (n, false) => n,
    };

    audit::record_movement(
        txn,
        NewMovement {
            product_id,
            warehouse_id,
            movement_type: MovementType::Adjustment,
            quantity: delta,
            quantity_before: row.on_hand,
            quantity_after: updated.on_hand,
            reference_type: Some(ReferenceType::Manual),
            reference_id: None,
            notes,
            created_by: actor,
        },
    )
    .await?;

    info!(%product_id, %warehouse_id, delta, "adjusted stock");
    Ok(updated)
}

/// Reads the counter row without locking.
pub async fn get<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    warehouse_id: Uuid,
) -> Result<Option<stock_level::Model>, ServiceError> {
    StockLevel::find()
        .filter(stock_level::Column::ProductId.eq(product_id))
        .filter(stock_level::Column::WarehouseId.eq(warehouse_id))
        .one(conn)
        .await
        .map_err(ServiceError::DatabaseError)
}

// ---------------------------------------------------------------------------
// helpers

fn require_positive(quantity: i32) -> Result<(), ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::BusinessValidation(
            "quantity must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Reads a product's SKU for error messages. Errors `NotFound` when the
/// product is gone.
async fn load_sku(txn: &DatabaseTransaction, product_id: Uuid) -> Result<String, ServiceError> {
    product::Entity::find_by_id(product_id)
        .one(txn)
        .await
        .map_err(ServiceError::DatabaseError)?
        .map(|p| p.sku)
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
}

fn missing_row(product_id: Uuid, warehouse_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!(
        "No stock for product {} in warehouse {}",
        product_id, warehouse_id
    ))
}

/// `SELECT ... FOR UPDATE` on the counter row; the lock is held to commit.
async fn lock_row(
    txn: &DatabaseTransaction,
    product_id: Uuid,
    warehouse_id: Uuid,
) -> Result<Option<stock_level::Model>, ServiceError> {
    StockLevel::find()
        .filter(stock_level::Column::ProductId.eq(product_id))
        .filter(stock_level::Column::WarehouseId.eq(warehouse_id))
        .lock_exclusive()
        .one(txn)
        .await
        .map_err(ServiceError::DatabaseError)
}

/// Locks the counter row, creating it with zero counters on first touch.
/// The insert happens inside the caller's transaction, so the fresh row is
/// exclusively ours until commit.
async fn lock_or_create_row(
    txn: &DatabaseTransaction,
    product_id: Uuid,
    warehouse_id: Uuid,
) -> Result<stock_level::Model, ServiceError> {
    if let Some(row) = lock_row(txn, product_id, warehouse_id).await? {
        return Ok(row);
    }

    product::Entity::find_by_id(product_id)
        .one(txn)
        .await
        .map_err(ServiceError::DatabaseError)?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
    warehouse::Entity::find_by_id(warehouse_id)
        .one(txn)
        .await
        .map_err(ServiceError::DatabaseError)?
        .ok_or_else(|| ServiceError::NotFound(format!("Warehouse {} not found", warehouse_id)))?;

    let fresh = stock_level::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        warehouse_id: Set(warehouse_id),
        on_hand: Set(0),
        reserved: Set(0),
        version: Set(0),
        last_updated: Set(Utc::now()),
    };
    fresh.insert(txn).await.map_err(ServiceError::DatabaseError)
}

/// Writes new counter values after checking the invariants; bumps the row
/// version.
async fn store(
    txn: &DatabaseTransaction,
    row: &stock_level::Model,
    on_hand: i32,
    reserved: i32,
) -> Result<stock_level::Model, ServiceError> {
    check_invariants(on_hand, reserved).map_err(ServiceError::Internal)?;

    let mut active: stock_level::ActiveModel = row.clone().into();
    active.on_hand = Set(on_hand);
    active.reserved = Set(reserved);
    active.version = Set(row.version + 1);
    active.last_updated = Set(Utc::now());
    active.update(txn).await.map_err(ServiceError::DatabaseError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjustment_applies_positive_delta() {
        let adjusted = apply_adjustment(10, 3, 5).unwrap();
        assert_eq!(adjusted.on_hand, 15);
        assert_eq!(adjusted.reserved, 3);
        assert!(!adjusted.clipped);
    }

    #[test]
    fn adjustment_rejects_negative_result() {
        assert!(apply_adjustment(2, 0, -5).is_none());
        assert!(apply_adjustment(0, 0, -1).is_none());
    }

    #[test]
    fn adjustment_to_zero_clips_reserved() {
        let adjusted = apply_adjustment(10, 4, -10).unwrap();
        assert_eq!(adjusted.on_hand, 0);
        assert_eq!(adjusted.reserved, 0);
        assert!(adjusted.clipped);
    }

    #[test]
    fn adjustment_clips_reserved_to_new_on_hand() {
        let adjusted = apply_adjustment(10, 8, -5).unwrap();
        assert_eq!(adjusted.on_hand, 5);
        assert_eq!(adjusted.reserved, 5);
        assert!(adjusted.clipped);
    }

    #[test]
    fn adjustment_survives_overflow_probe() {
        assert!(apply_adjustment(i32::MAX, 0, 1).is_none());
    }

    #[test]
    fn invariants_hold_on_boundaries() {
        assert!(check_invariants(0, 0).is_ok());
        assert!(check_invariants(5, 5).is_ok());
        assert!(check_invariants(-1, 0).is_err());
        assert!(check_invariants(5, -1).is_err());
        assert!(check_invariants(3, 4).is_err());
    }
}
