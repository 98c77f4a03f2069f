use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::{
    product,
    purchase_order::{self, Entity as PurchaseOrder, PurchaseOrderStatus},
    purchase_order_line::{self, Entity as PurchaseOrderLine},
    supplier,
    warehouse,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::{order_numbers, stock_ledger};

#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseOrderLineRequest {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_cost: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreatePurchaseOrderRequest {
    pub supplier_id: Uuid,
    pub warehouse_id: Uuid,
    #[validate(length(min = 1, message = "order must have at least one line"))]
    pub lines: Vec<PurchaseOrderLineRequest>,
    pub expected_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Per-line received quantity for a partial receipt. Deltas beyond the
/// line's pending amount are clamped.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReceiptLineRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseOrderLineResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub received_quantity: i32,
    pub pending_quantity: i32,
    pub unit_cost: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseOrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub supplier_id: Uuid,
    pub warehouse_id: Uuid,
    pub status: String,
    pub total_amount: Decimal,
    pub notes: Option<String>,
    pub expected_date: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub version: i32,
    pub lines: Option<Vec<PurchaseOrderLineResponse>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseOrderListResponse {
    pub orders: Vec<PurchaseOrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// `total = Σ unit_cost × quantity` over the requested lines.
pub fn compute_total(lines: &[PurchaseOrderLineRequest]) -> Decimal {
    lines
        .iter()
        .map(|l| l.unit_cost * Decimal::from(l.quantity))
        .sum()
}

/// Drives purchase orders through CREATED → APPROVED →
/// (PARTIALLY_RECEIVED) → RECEIVED with CANCELLED as the sink. Receipts
/// book stock through the ledger inside the same transaction.
#[derive(Clone)]
pub struct PurchaseOrderService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    actor: String,
}

impl PurchaseOrderService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>, actor: String) -> Self {
        Self {
            db,
            event_sender,
            actor,
        }
    }

    /// Persists a new order in CREATED.
    #[instrument(skip(self, request), fields(supplier_id = %request.supplier_id, warehouse_id = %request.warehouse_id))]
    pub async fn create(
        &self,
        request: CreatePurchaseOrderRequest,
    ) -> Result<PurchaseOrderResponse, ServiceError> {
        request.validate()?;
        validate_lines(&request.lines)?;

        let db = &*self.db;

        supplier::Entity::find_by_id(request.supplier_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Supplier {} not found", request.supplier_id))
            })?;
        warehouse::Entity::find_by_id(request.warehouse_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Warehouse {} not found", request.warehouse_id))
            })?;
        for line in &request.lines {
            product::Entity::find_by_id(line.product_id)
                .one(db)
                .await
                .map_err(ServiceError::DatabaseError)?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", line.product_id))
                })?;
        }

        let total = compute_total(&request.lines);
        let now = Utc::now();

        let mut attempt = 0;
        let order = loop {
            attempt += 1;
            let order_number = order_numbers::generate("PO");
            let order_id = Uuid::new_v4();

            let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

            let active = purchase_order::ActiveModel {
                id: Set(order_id),
                order_number: Set(order_number.clone()),
                supplier_id: Set(request.supplier_id),
                warehouse_id: Set(request.warehouse_id),
                status: Set(PurchaseOrderStatus::Created.as_ref().to_string()),
                total_amount: Set(total),
                notes: Set(request.notes.clone()),
                expected_date: Set(request.expected_date),
                approved_at: Set(None),
                received_at: Set(None),
                created_at: Set(now),
                updated_at: Set(Some(now)),
                version: Set(0),
            };

            let inserted = match active.insert(&txn).await {
                Ok(model) => model,
                Err(err) if ServiceError::is_unique_violation(&err, "order_number") => {
                    let _ = txn.rollback().await;
                    if attempt < order_numbers::MAX_ATTEMPTS {
                        warn!(%order_number, attempt, "order number collision, retrying");
                        continue;
                    }
                    return Err(ServiceError::DuplicateResource(
                        "could not allocate a unique order number".to_string(),
                    ));
                }
                Err(err) => return Err(ServiceError::DatabaseError(err)),
            };

            let line_models: Vec<purchase_order_line::ActiveModel> = request
                .lines
                .iter()
                .map(|l| purchase_order_line::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    purchase_order_id: Set(order_id),
                    product_id: Set(l.product_id),
                    quantity: Set(l.quantity),
                    received_quantity: Set(0),
                    unit_cost: Set(l.unit_cost),
                    notes: Set(None),
                })
                .collect();
            PurchaseOrderLine::insert_many(line_models)
                .exec(&txn)
                .await
                .map_err(|err| {
                    if ServiceError::is_unique_violation(&err, "purchase_order_lines") {
                        ServiceError::DuplicateResource(
                            "duplicate product in order lines".to_string(),
                        )
                    } else {
                        ServiceError::DatabaseError(err)
                    }
                })?;

            txn.commit().await.map_err(ServiceError::DatabaseError)?;
            break inserted;
        };

        info!(order_id = %order.id, order_number = %order.order_number, "Purchase order created");
        self.emit(Event::PurchaseOrderCreated(order.id)).await;
        self.load_response(order.id).await
    }

    /// Moves a CREATED order to APPROVED.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn approve(&self, order_id: Uuid) -> Result<PurchaseOrderResponse, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let (order, status) = self.lock_order(&txn, order_id).await?;
        require_transition(&order, status, PurchaseOrderStatus::Approved)?;

        let updated = write_status(&txn, order, PurchaseOrderStatus::Approved, |active| {
            active.approved_at = Set(Some(Utc::now()));
        })
        .await?;
        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_number = %updated.order_number, "Purchase order approved");
        self.emit(Event::PurchaseOrderApproved(order_id)).await;
        Ok(to_response(updated, None))
    }

    /// Books every pending line into stock and lands on RECEIVED.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn receive(&self, order_id: Uuid) -> Result<PurchaseOrderResponse, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let (order, status) = self.lock_order(&txn, order_id).await?;
        require_receivable(&order, status)?;

        let lines = load_lines_for_update(&txn, order_id).await?;
        let mut received = Vec::with_capacity(lines.len());
        for line in lines {
            let pending = line.pending();
            if pending > 0 {
                stock_ledger::receive(
                    &txn,
                    line.product_id,
                    order.warehouse_id,
                    pending,
                    order_id,
                    &self.actor,
                )
                .await?;
                received.push(advance_received(&txn, line, pending).await?);
            } else {
                received.push(line);
            }
        }

        let updated = write_status(&txn, order, PurchaseOrderStatus::Received, |active| {
            active.received_at = Set(Some(Utc::now()));
        })
        .await?;
        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_number = %updated.order_number, "Purchase order fully received");
        self.emit(Event::PurchaseOrderReceived {
            purchase_order_id: order_id,
            partial: false,
        })
        .await;
        Ok(to_response(updated, Some(received)))
    }

    /// Books per-line received quantities; lands on PARTIALLY_RECEIVED while
    /// pending stock remains, RECEIVED once every line is discharged.
    #[instrument(skip(self, receipts), fields(order_id = %order_id, receipt_lines = receipts.len()))]
    pub async fn receive_lines(
        &self,
        order_id: Uuid,
        mut receipts: Vec<ReceiptLineRequest>,
    ) -> Result<PurchaseOrderResponse, ServiceError> {
        if receipts.is_empty() {
            return Err(ServiceError::ValidationError(
                "receipt must list at least one line".to_string(),
            ));
        }
        for receipt in &receipts {
            if receipt.quantity < 1 {
                return Err(ServiceError::ValidationError(format!(
                    "received quantity must be at least 1 (product {})",
                    receipt.product_id
                )));
            }
        }
        // Stock rows are locked in ascending product id order.
        receipts.sort_by_key(|r| r.product_id);

        let db = &*self.db;
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let (order, status) = self.lock_order(&txn, order_id).await?;
        require_receivable(&order, status)?;

        let lines = load_lines_for_update(&txn, order_id).await?;
        let mut by_product: HashMap<Uuid, purchase_order_line::Model> =
            lines.into_iter().map(|l| (l.product_id, l)).collect();

        for receipt in &receipts {
            let line = by_product.remove(&receipt.product_id).ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Order {} has no line for product {}",
                    order.order_number, receipt.product_id
                ))
            })?;
            let delta = receipt.quantity.min(line.pending());
            let line = if delta > 0 {
                stock_ledger::receive(
                    &txn,
                    line.product_id,
                    order.warehouse_id,
                    delta,
                    order_id,
                    &self.actor,
                )
                .await?;
                advance_received(&txn, line, delta).await?
            } else {
                line
            };
            by_product.insert(receipt.product_id, line);
        }

        let all_discharged = by_product.values().all(|l| l.pending() == 0);
        let target = if all_discharged {
            PurchaseOrderStatus::Received
        } else {
            PurchaseOrderStatus::PartiallyReceived
        };
        require_transition(&order, status, target)?;

        let updated = write_status(&txn, order, target, |active| {
            if all_discharged {
                active.received_at = Set(Some(Utc::now()));
            }
        })
        .await?;
        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        let mut lines: Vec<purchase_order_line::Model> = by_product.into_values().collect();
        lines.sort_by_key(|l| l.product_id);

        info!(order_number = %updated.order_number, fully_received = all_discharged, "Purchase order receipt booked");
        self.emit(Event::PurchaseOrderReceived {
            purchase_order_id: order_id,
            partial: !all_discharged,
        })
        .await;
        Ok(to_response(updated, Some(lines)))
    }

    /// Cancels the order. Stock already received stays received. Rejected
    /// once the order is fully RECEIVED.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel(&self, order_id: Uuid) -> Result<PurchaseOrderResponse, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let (order, status) = self.lock_order(&txn, order_id).await?;
        require_transition(&order, status, PurchaseOrderStatus::Cancelled)?;

        let updated = write_status(&txn, order, PurchaseOrderStatus::Cancelled, |_| {}).await?;
        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_number = %updated.order_number, "Purchase order cancelled");
        self.emit(Event::PurchaseOrderCancelled(order_id)).await;
        Ok(to_response(updated, None))
    }

    /// One order with its lines.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get(&self, order_id: Uuid) -> Result<PurchaseOrderResponse, ServiceError> {
        self.load_response(order_id).await
    }

    /// Orders newest first.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<PurchaseOrderListResponse, ServiceError> {
        self.list_filtered(None, page, per_page).await
    }

    #[instrument(skip(self))]
    pub async fn list_by_status(
        &self,
        status: PurchaseOrderStatus,
        page: u64,
        per_page: u64,
    ) -> Result<PurchaseOrderListResponse, ServiceError> {
        self.list_filtered(Some(status), page, per_page).await
    }

    // -----------------------------------------------------------------------

    async fn list_filtered(
        &self,
        status: Option<PurchaseOrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<PurchaseOrderListResponse, ServiceError> {
        let mut query = PurchaseOrder::find().order_by_desc(purchase_order::Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(purchase_order::Column::Status.eq(status.as_ref()));
        }
        let paginator = query.paginate(&*self.db, per_page);

        let total = paginator
            .num_items()
            .await
            .map_err(ServiceError::DatabaseError)?;
        let orders = paginator
            .fetch_page(page.saturating_sub(1))
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(PurchaseOrderListResponse {
            orders: orders.into_iter().map(|o| to_response(o, None)).collect(),
            total,
            page,
            per_page,
        })
    }

    async fn lock_order(
        &self,
        txn: &DatabaseTransaction,
        order_id: Uuid,
    ) -> Result<(purchase_order::Model, PurchaseOrderStatus), ServiceError> {
        let order = PurchaseOrder::find_by_id(order_id)
            .lock_exclusive()
            .one(txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Purchase order {} not found", order_id))
            })?;
        let status = parse_status(&order.status)?;
        Ok((order, status))
    }

    async fn load_response(&self, order_id: Uuid) -> Result<PurchaseOrderResponse, ServiceError> {
        let order = PurchaseOrder::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Purchase order {} not found", order_id))
            })?;
        let lines = PurchaseOrderLine::find()
            .filter(purchase_order_line::Column::PurchaseOrderId.eq(order_id))
            .order_by_asc(purchase_order_line::Column::ProductId)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(to_response(order, Some(lines)))
    }

    async fn emit(&self, event: Event) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, "Failed to send purchase order event");
            }
        }
    }
}

fn validate_lines(lines: &[PurchaseOrderLineRequest]) -> Result<(), ServiceError> {
    let mut seen = std::collections::HashSet::new();
    for line in lines {
        if line.quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "line quantity must be at least 1 (product {})",
                line.product_id
            )));
        }
        if line.unit_cost < Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "unit cost cannot be negative (product {})",
                line.product_id
            )));
        }
        if !seen.insert(line.product_id) {
            return Err(ServiceError::ValidationError(format!(
                "product {} appears in more than one line",
                line.product_id
            )));
        }
    }
    Ok(())
}

fn parse_status(raw: &str) -> Result<PurchaseOrderStatus, ServiceError> {
    raw.parse::<PurchaseOrderStatus>()
        .map_err(|_| ServiceError::Internal(format!("unknown purchase order status '{}'", raw)))
}

fn require_transition(
    order: &purchase_order::Model,
    from: PurchaseOrderStatus,
    to: PurchaseOrderStatus,
) -> Result<(), ServiceError> {
    if !PurchaseOrderStatus::can_transition(from, to) {
        error!(order_number = %order.order_number, %from, %to, "invalid purchase order transition");
        return Err(ServiceError::InvalidOrderState(format!(
            "Order {} cannot move from {} to {}",
            order.order_number, from, to
        )));
    }
    Ok(())
}

fn require_receivable(
    order: &purchase_order::Model,
    status: PurchaseOrderStatus,
) -> Result<(), ServiceError> {
    if !matches!(
        status,
        PurchaseOrderStatus::Approved | PurchaseOrderStatus::PartiallyReceived
    ) {
        return Err(ServiceError::InvalidOrderState(format!(
            "Order {} must be APPROVED or PARTIALLY_RECEIVED to receive (status: {})",
            order.order_number, status
        )));
    }
    Ok(())
}

/// Lines in ascending product id order, matching the ledger's lock order.
async fn load_lines_for_update(
    txn: &DatabaseTransaction,
    order_id: Uuid,
) -> Result<Vec<purchase_order_line::Model>, ServiceError> {
    let mut lines = PurchaseOrderLine::find()
        .filter(purchase_order_line::Column::PurchaseOrderId.eq(order_id))
        .all(txn)
        .await
        .map_err(ServiceError::DatabaseError)?;
    lines.sort_by_key(|l| l.product_id);
    Ok(lines)
}

async fn advance_received(
    txn: &DatabaseTransaction,
    line: purchase_order_line::Model,
    delta: i32,
) -> Result<purchase_order_line::Model, ServiceError> {
    let received = line.received_quantity + delta;
    let mut active: purchase_order_line::ActiveModel = line.into();
    active.received_quantity = Set(received);
    active.update(txn).await.map_err(ServiceError::DatabaseError)
}

async fn write_status(
    txn: &DatabaseTransaction,
    order: purchase_order::Model,
    to: PurchaseOrderStatus,
    stamp: impl FnOnce(&mut purchase_order::ActiveModel),
) -> Result<purchase_order::Model, ServiceError> {
    let version = order.version;
    let mut active: purchase_order::ActiveModel = order.into();
    active.status = Set(to.as_ref().to_string());
    active.updated_at = Set(Some(Utc::now()));
    active.version = Set(version + 1);
    stamp(&mut active);
    active.update(txn).await.map_err(ServiceError::DatabaseError)
}

fn to_response(
    order: purchase_order::Model,
    lines: Option<Vec<purchase_order_line::Model>>,
) -> PurchaseOrderResponse {
    PurchaseOrderResponse {
        id: order.id,
        order_number: order.order_number,
        supplier_id: order.supplier_id,
        warehouse_id: order.warehouse_id,
        status: order.status,
        total_amount: order.total_amount,
        notes: order.notes,
        expected_date: order.expected_date,
        approved_at: order.approved_at,
        received_at: order.received_at,
        created_at: order.created_at,
        version: order.version,
        lines: lines.map(|ls| {
            ls.into_iter()
                .map(|l| PurchaseOrderLineResponse {
                    id: l.id,
                    product_id: l.product_id,
                    quantity: l.quantity,
                    received_quantity: l.received_quantity,
                    pending_quantity: l.pending(),
                    unit_cost: l.unit_cost,
                    line_total: l.line_total(),
                })
                .collect()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(quantity: i32, unit_cost: Decimal) -> PurchaseOrderLineRequest {
        PurchaseOrderLineRequest {
            product_id: Uuid::new_v4(),
            quantity,
            unit_cost,
        }
    }

    #[test]
    fn total_is_sum_of_line_costs() {
        let lines = vec![line(20, dec!(3.0000)), line(5, dec!(1.2500))];
        assert_eq!(compute_total(&lines), dec!(66.2500));
    }

    #[test]
    fn zero_quantity_lines_are_rejected() {
        let err = validate_lines(&[line(0, dec!(1))]).unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[test]
    fn negative_cost_lines_are_rejected() {
        let err = validate_lines(&[line(1, dec!(-1))]).unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[test]
    fn empty_line_list_fails_request_validation() {
        let request = CreatePurchaseOrderRequest {
            supplier_id: Uuid::new_v4(),
            warehouse_id: Uuid::new_v4(),
            lines: vec![],
            expected_date: None,
            notes: None,
        };
        assert!(request.validate().is_err());
    }
}
