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
    customer,
    product,
    sales_order::{self, Entity as SalesOrder, SalesOrderStatus},
    sales_order_line::{self, Entity as SalesOrderLine},
    warehouse,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::{order_numbers, stock_ledger};

#[derive(Debug, Serialize, Deserialize)]
pub struct SalesOrderLineRequest {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateSalesOrderRequest {
    pub customer_id: Uuid,
    pub warehouse_id: Uuid,
    #[validate(length(min = 1, message = "order must have at least one line"))]
    pub lines: Vec<SalesOrderLineRequest>,
    pub requested_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SalesOrderLineResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SalesOrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub warehouse_id: Uuid,
    pub status: String,
    pub total_amount: Decimal,
    pub notes: Option<String>,
    pub requested_date: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub version: i32,
    /// Present when the lines were loaded with the order (single reads).
    pub lines: Option<Vec<SalesOrderLineResponse>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SalesOrderListResponse {
    pub orders: Vec<SalesOrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// `total = Σ unit_price × quantity` over the requested lines.
pub fn compute_total(lines: &[SalesOrderLineRequest]) -> Decimal {
    lines
        .iter()
        .map(|l| l.unit_price * Decimal::from(l.quantity))
        .sum()
}

/// Drives sales orders through CREATED → CONFIRMED → (PICKING) → SHIPPED →
/// DELIVERED with CANCELLED as the sink. Stock effects go through the stock
/// ledger inside the same transaction as the status write.
#[derive(Clone)]
pub struct SalesOrderService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    actor: String,
}

impl SalesOrderService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>, actor: String) -> Self {
        Self {
            db,
            event_sender,
            actor,
        }
    }

    /// Persists a new order in CREATED without touching stock.
    #[instrument(skip(self, request), fields(customer_id = %request.customer_id, warehouse_id = %request.warehouse_id))]
    pub async fn create(
        &self,
        request: CreateSalesOrderRequest,
    ) -> Result<SalesOrderResponse, ServiceError> {
        request.validate()?;
        validate_lines(&request.lines)?;

        let db = &*self.db;

        customer::Entity::find_by_id(request.customer_id)
            .one(db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Customer {} not found", request.customer_id))
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

        // Order and lines commit together. A fresh attempt (new number, new
        // transaction) when the generated order number collides.
        let mut attempt = 0;
        let order = loop {
            attempt += 1;
            let order_number = order_numbers::generate("SO");
            let order_id = Uuid::new_v4();

            let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

            let active = sales_order::ActiveModel {
                id: Set(order_id),
                order_number: Set(order_number.clone()),
                customer_id: Set(request.customer_id),
                warehouse_id: Set(request.warehouse_id),
                status: Set(SalesOrderStatus::Created.as_ref().to_string()),
                total_amount: Set(total),
                notes: Set(request.notes.clone()),
                requested_date: Set(request.requested_date),
                shipped_at: Set(None),
                delivered_at: Set(None),
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

            let line_models: Vec<sales_order_line::ActiveModel> = request
                .lines
                .iter()
                .map(|l| sales_order_line::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    sales_order_id: Set(order_id),
                    product_id: Set(l.product_id),
                    quantity: Set(l.quantity),
                    unit_price: Set(l.unit_price),
                    notes: Set(None),
                })
                .collect();
            SalesOrderLine::insert_many(line_models)
                .exec(&txn)
                .await
                .map_err(|err| {
                    if ServiceError::is_unique_violation(&err, "sales_order_lines") {
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

        info!(order_id = %order.id, order_number = %order.order_number, "Sales order created");
        self.emit(Event::SalesOrderCreated(order.id)).await;
        self.load_response(order.id).await
    }

    /// Reserves stock for every line and moves the order to CONFIRMED.
    /// All-or-nothing: any failed reservation aborts the whole transaction.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn confirm(&self, order_id: Uuid) -> Result<SalesOrderResponse, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let (order, status) = self.lock_order(&txn, order_id).await?;
        require_transition(&order, status, SalesOrderStatus::Confirmed)?;

        let lines = load_lines_for_update(&txn, order_id).await?;
        for line in &lines {
            stock_ledger::reserve(
                &txn,
                line.product_id,
                order.warehouse_id,
                line.quantity,
                &self.actor,
            )
            .await?;
        }

        let updated = write_status(&txn, order, SalesOrderStatus::Confirmed, |_| {}).await?;
        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_number = %updated.order_number, "Sales order confirmed and stock reserved");
        self.emit(Event::SalesOrderConfirmed(order_id)).await;
        Ok(to_response(updated, Some(lines)))
    }

    /// Marks a confirmed order as being picked in the warehouse.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn start_picking(&self, order_id: Uuid) -> Result<SalesOrderResponse, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let (order, status) = self.lock_order(&txn, order_id).await?;
        require_transition(&order, status, SalesOrderStatus::Picking)?;

        let updated = write_status(&txn, order, SalesOrderStatus::Picking, |_| {}).await?;
        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_number = %updated.order_number, "Sales order picking started");
        self.emit(Event::SalesOrderPicking(order_id)).await;
        Ok(to_response(updated, None))
    }

    /// Deducts on-hand for every line and moves the order to SHIPPED.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn ship(&self, order_id: Uuid) -> Result<SalesOrderResponse, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let (order, status) = self.lock_order(&txn, order_id).await?;
        require_transition(&order, status, SalesOrderStatus::Shipped)?;

        let lines = load_lines_for_update(&txn, order_id).await?;
        for line in &lines {
            stock_ledger::ship(
                &txn,
                line.product_id,
                order.warehouse_id,
                line.quantity,
                order_id,
                &self.actor,
            )
            .await?;
        }

        let updated = write_status(&txn, order, SalesOrderStatus::Shipped, |active| {
            active.shipped_at = Set(Some(Utc::now()));
        })
        .await?;
        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_number = %updated.order_number, "Sales order shipped");
        self.emit(Event::SalesOrderShipped(order_id)).await;
        Ok(to_response(updated, Some(lines)))
    }

    /// Marks a shipped order as delivered. Stock is untouched.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn deliver(&self, order_id: Uuid) -> Result<SalesOrderResponse, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let (order, status) = self.lock_order(&txn, order_id).await?;
        require_transition(&order, status, SalesOrderStatus::Delivered)?;

        let updated = write_status(&txn, order, SalesOrderStatus::Delivered, |active| {
            active.delivered_at = Set(Some(Utc::now()));
        })
        .await?;
        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_number = %updated.order_number, "Sales order delivered");
        self.emit(Event::SalesOrderDelivered(order_id)).await;
        Ok(to_response(updated, None))
    }

    /// Cancels the order, releasing any reservation it holds. Rejected once
    /// the order has shipped.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel(&self, order_id: Uuid) -> Result<SalesOrderResponse, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let (order, status) = self.lock_order(&txn, order_id).await?;
        require_transition(&order, status, SalesOrderStatus::Cancelled)?;

        if matches!(
            status,
            SalesOrderStatus::Confirmed | SalesOrderStatus::Picking
        ) {
            let lines = load_lines_for_update(&txn, order_id).await?;
            for line in &lines {
                stock_ledger::release(&txn, line.product_id, order.warehouse_id, line.quantity)
                    .await?;
            }
        }

        let updated = write_status(&txn, order, SalesOrderStatus::Cancelled, |_| {}).await?;
        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_number = %updated.order_number, "Sales order cancelled and reservations released");
        self.emit(Event::SalesOrderCancelled(order_id)).await;
        Ok(to_response(updated, None))
    }

    /// One order with its lines.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get(&self, order_id: Uuid) -> Result<SalesOrderResponse, ServiceError> {
        self.load_response(order_id).await
    }

    /// Orders newest first.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<SalesOrderListResponse, ServiceError> {
        self.list_filtered(None, page, per_page).await
    }

    #[instrument(skip(self))]
    pub async fn list_by_status(
        &self,
        status: SalesOrderStatus,
        page: u64,
        per_page: u64,
    ) -> Result<SalesOrderListResponse, ServiceError> {
        self.list_filtered(Some(status), page, per_page).await
    }

    // -----------------------------------------------------------------------

    async fn list_filtered(
        &self,
        status: Option<SalesOrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<SalesOrderListResponse, ServiceError> {
        let mut query = SalesOrder::find().order_by_desc(sales_order::Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(sales_order::Column::Status.eq(status.as_ref()));
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

        Ok(SalesOrderListResponse {
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
    ) -> Result<(sales_order::Model, SalesOrderStatus), ServiceError> {
        let order = SalesOrder::find_by_id(order_id)
            .lock_exclusive()
            .one(txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Sales order {} not found", order_id))
            })?;
        let status = parse_status(&order.status)?;
        Ok((order, status))
    }

    async fn load_response(&self, order_id: Uuid) -> Result<SalesOrderResponse, ServiceError> {
        let order = SalesOrder::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Sales order {} not found", order_id))
            })?;
        let lines = SalesOrderLine::find()
            .filter(sales_order_line::Column::SalesOrderId.eq(order_id))
            .order_by_asc(sales_order_line::Column::ProductId)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(to_response(order, Some(lines)))
    }

    async fn emit(&self, event: Event) {
        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(event).await {
                warn!(error = %e, "Failed to send sales order event");
            }
        }
    }
}

fn validate_lines(lines: &[SalesOrderLineRequest]) -> Result<(), ServiceError> {
    let mut seen = std::collections::HashSet::new();
    for line in lines {
        if line.quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "line quantity must be at least 1 (product {})",
                line.product_id
            )));
        }
        if line.unit_price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "unit price cannot be negative (product {})",
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

fn parse_status(raw: &str) -> Result<SalesOrderStatus, ServiceError> {
    raw.parse::<SalesOrderStatus>()
        .map_err(|_| ServiceError::Internal(format!("unknown sales order status '{}'", raw)))
}

fn require_transition(
    order: &sales_order::Model,
    from: SalesOrderStatus,
    to: SalesOrderStatus,
) -> Result<(), ServiceError> {
    if !SalesOrderStatus::can_transition(from, to) {
        error!(order_number = %order.order_number, %from, %to, "invalid sales order transition");
        return Err(ServiceError::InvalidOrderState(format!(
            "Order {} cannot move from {} to {}",
            order.order_number, from, to
        )));
    }
    Ok(())
}

/// Lines in ascending product id order, the row-lock acquisition order for
/// every multi-line stock operation.
async fn load_lines_for_update(
    txn: &DatabaseTransaction,
    order_id: Uuid,
) -> Result<Vec<sales_order_line::Model>, ServiceError> {
    let mut lines = SalesOrderLine::find()
        .filter(sales_order_line::Column::SalesOrderId.eq(order_id))
        .all(txn)
        .await
        .map_err(ServiceError::DatabaseError)?;
    lines.sort_by_key(|l| l.product_id);
    Ok(lines)
}

async fn write_status(
    txn: &DatabaseTransaction,
    order: sales_order::Model,
    to: SalesOrderStatus,
    stamp: impl FnOnce(&mut sales_order::ActiveModel),
) -> Result<sales_order::Model, ServiceError> {
    let version = order.version;
    let mut active: sales_order::ActiveModel = order.into();
    active.status = Set(to.as_ref().to_string());
    active.updated_at = Set(Some(Utc::now()));
    active.version = Set(version + 1);
    stamp(&mut active);
    active.update(txn).await.map_err(ServiceError::DatabaseError)
}

fn to_response(
    order: sales_order::Model,
    lines: Option<Vec<sales_order_line::Model>>,
) -> SalesOrderResponse {
    SalesOrderResponse {
        id: order.id,
        order_number: order.order_number,
        customer_id: order.customer_id,
        warehouse_id: order.warehouse_id,
        status: order.status,
        total_amount: order.total_amount,
        notes: order.notes,
        requested_date: order.requested_date,
        shipped_at: order.shipped_at,
        delivered_at: order.delivered_at,
        created_at: order.created_at,
        version: order.version,
        lines: lines.map(|ls| {
            ls.into_iter()
                .map(|l| SalesOrderLineResponse {
                    id: l.id,
                    product_id: l.product_id,
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                    line_total: l.line_total(),
                })
                .collect()
        }),
    }
}
