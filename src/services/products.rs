use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::product::{self, Entity as Product, ProductStatus};
use crate::errors::ServiceError;

/// Partial product edit. The sku is immutable and deliberately absent.
/// `version` must match the row's current version; a mismatch means someone
/// else edited the product first.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub unit_price: Option<Decimal>,
    pub cost_price: Option<Decimal>,
    pub reorder_level: Option<i32>,
    pub reorder_quantity: Option<i32>,
    pub status: Option<ProductStatus>,
    pub version: i32,
}

/// Product reads and optimistic-version edits. Product rows are never
/// pessimistically locked; lost updates are detected by comparing the
/// version column in the UPDATE's WHERE clause.
#[derive(Clone)]
pub struct ProductService {
    db: Arc<DbPool>,
}

impl ProductService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn get(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        Product::find_by_id(product_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    #[instrument(skip(self), fields(sku = %sku))]
    pub async fn get_by_sku(&self, sku: &str) -> Result<product::Model, ServiceError> {
        Product::find()
            .filter(product::Column::Sku.eq(sku))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| ServiceError::NotFound(format!("Product with sku {} not found", sku)))
    }

    /// Compare-and-swap edit: `UPDATE products SET ... WHERE id = ? AND
    /// version = ?`. Zero rows affected means either the product is gone or
    /// the caller read a stale version.
    #[instrument(skip(self, request), fields(product_id = %product_id, expected_version = request.version))]
    pub async fn update(
        &self,
        product_id: Uuid,
        request: UpdateProductRequest,
    ) -> Result<product::Model, ServiceError> {
        validate_update(&request)?;
        let db = &*self.db;

        let mut update = Product::update_many()
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Version.eq(request.version))
            .col_expr(
                product::Column::Version,
                Expr::col(product::Column::Version).add(1),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()));

        if let Some(name) = request.name {
            update = update.col_expr(product::Column::Name, Expr::value(name));
        }
        if let Some(description) = request.description {
            update = update.col_expr(product::Column::Description, Expr::value(description));
        }
        if let Some(unit_price) = request.unit_price {
            update = update.col_expr(product::Column::UnitPrice, Expr::value(unit_price));
        }
        if let Some(cost_price) = request.cost_price {
            update = update.col_expr(product::Column::CostPrice, Expr::value(cost_price));
        }
        if let Some(reorder_level) = request.reorder_level {
            update = update.col_expr(product::Column::ReorderLevel, Expr::value(reorder_level));
        }
        if let Some(reorder_quantity) = request.reorder_quantity {
            update = update.col_expr(
                product::Column::ReorderQuantity,
                Expr::value(reorder_quantity),
            );
        }
        if let Some(status) = request.status {
            update = update.col_expr(
                product::Column::Status,
                Expr::value(status.as_ref().to_string()),
            );
        }

        let result = update.exec(db).await.map_err(ServiceError::DatabaseError)?;
        if result.rows_affected == 0 {
            // Stale version and vanished row look identical here; a second
            // read tells them apart.
            return match Product::find_by_id(product_id)
                .one(db)
                .await
                .map_err(ServiceError::DatabaseError)?
            {
                Some(_) => Err(ServiceError::ConcurrentModification(product_id)),
                None => Err(ServiceError::NotFound(format!(
                    "Product {} not found",
                    product_id
                ))),
            };
        }

        info!(product_id = %product_id, "Product updated");
        self.get(product_id).await
    }
}

fn validate_update(request: &UpdateProductRequest) -> Result<(), ServiceError> {
    if let Some(price) = request.unit_price {
        if price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "unit price cannot be negative".to_string(),
            ));
        }
    }
    if let Some(cost) = request.cost_price {
        if cost < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "cost price cannot be negative".to_string(),
            ));
        }
    }
    if matches!(request.reorder_level, Some(level) if level < 0) {
        return Err(ServiceError::ValidationError(
            "reorder level cannot be negative".to_string(),
        ));
    }
    if matches!(request.reorder_quantity, Some(qty) if qty < 0) {
        return Err(ServiceError::ValidationError(
            "reorder quantity cannot be negative".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn empty_update(version: i32) -> UpdateProductRequest {
        UpdateProductRequest {
            name: None,
            description: None,
            unit_price: None,
            cost_price: None,
            reorder_level: None,
            reorder_quantity: None,
            status: None,
            version,
        }
    }

    #[test]
    fn negative_prices_are_rejected() {
        let request = UpdateProductRequest {
            unit_price: Some(dec!(-0.01)),
            ..empty_update(0)
        };
        assert!(matches!(
            validate_update(&request),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn negative_reorder_level_is_rejected() {
        let request = UpdateProductRequest {
            reorder_level: Some(-1),
            ..empty_update(0)
        };
        assert!(matches!(
            validate_update(&request),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn empty_update_is_structurally_valid() {
        assert!(validate_update(&empty_update(3)).is_ok());
    }
}
