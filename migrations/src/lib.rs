pub use sea_orm_migration::prelude::*;

mod m20240102_000001_create_master_data_tables;
mod m20240102_000002_create_stock_tables;
mod m20240102_000003_create_order_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240102_000001_create_master_data_tables::Migration),
            Box::new(m20240102_000002_create_stock_tables::Migration),
            Box::new(m20240102_000003_create_order_tables::Migration),
        ]
    }
}
