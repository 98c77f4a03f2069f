use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;
use validator::Validate;

/// Lifecycle of a sales order.
///
/// ```text
/// CREATED -> CONFIRMED -> PICKING -> SHIPPED -> DELIVERED
///    |           |           |
///    +-----------+-----------+--> CANCELLED
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SalesOrderStatus {
    Created,
    Confirmed,
    Picking,
    Shipped,
    Delivered,
    Cancelled,
}

impl SalesOrderStatus {
    /// Pure transition table; the engine checks this inside the transaction
    /// after locking the order row, then writes.
    pub fn can_transition(from: Self, to: Self) -> bool {
        use SalesOrderStatus::*;
        matches!(
            (from, to),
            (Created, Confirmed)
                | (Created, Cancelled)
                | (Confirmed, Picking)
                | (Confirmed, Shipped)
                | (Confirmed, Cancelled)
                | (Picking, Shipped)
                | (Picking, Cancelled)
                | (Shipped, Delivered)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SalesOrderStatus::Delivered | SalesOrderStatus::Cancelled)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "sales_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Human-facing identifier, distinct from the internal id.
    #[sea_orm(unique)]
    #[validate(length(min = 1, max = 50))]
    pub order_number: String,

    pub customer_id: Uuid,
    pub warehouse_id: Uuid,
    pub status: String,
    #[sea_orm(column_type = "Decimal(Some((18, 4)))")]
    pub total_amount: Decimal,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub requested_date: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sales_order_line::Entity")]
    Lines,
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id"
    )]
    Customer,
    #[sea_orm(
        belongs_to = "super::warehouse::Entity",
        from = "Column::WarehouseId",
        to = "super::warehouse::Column::Id"
    )]
    Warehouse,
}

impl Related<super::sales_order_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lines.def()
    }
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl Related<super::warehouse::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Warehouse.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::SalesOrderStatus::{self, *};

    #[rstest]
    #[case(Created, Confirmed, true)]
    #[case(Created, Cancelled, true)]
    #[case(Created, Shipped, false)]
    #[case(Created, Delivered, false)]
    #[case(Confirmed, Picking, true)]
    #[case(Confirmed, Shipped, true)]
    #[case(Confirmed, Cancelled, true)]
    #[case(Picking, Shipped, true)]
    #[case(Picking, Cancelled, true)]
    #[case(Shipped, Delivered, true)]
    #[case(Shipped, Cancelled, false)]
    #[case(Delivered, Cancelled, false)]
    #[case(Cancelled, Confirmed, false)]
    fn transition_table(
        #[case] from: SalesOrderStatus,
        #[case] to: SalesOrderStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(SalesOrderStatus::can_transition(from, to), allowed);
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for terminal in [Delivered, Cancelled] {
            assert!(terminal.is_terminal());
            for to in [Created, Confirmed, Picking, Shipped, Delivered, Cancelled] {
                assert!(!SalesOrderStatus::can_transition(terminal, to));
            }
        }
    }

    #[test]
    fn status_round_trips_through_storage_form() {
        for s in [Created, Confirmed, Picking, Shipped, Delivered, Cancelled] {
            assert_eq!(s.as_ref().parse::<SalesOrderStatus>().unwrap(), s);
        }
    }
}
