pub use sea_orm_migration::prelude::*;

mod m20250301_000001_create_users;
mod m20250301_000002_create_rides;
mod m20250301_000003_create_ride_requests;
mod m20250301_000004_create_bookings;
mod m20250301_000005_create_ratings;
mod m20250301_000006_create_messages;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_users::Migration),
            Box::new(m20250301_000002_create_rides::Migration),
            Box::new(m20250301_000003_create_ride_requests::Migration),
            Box::new(m20250301_000004_create_bookings::Migration),
            Box::new(m20250301_000005_create_ratings::Migration),
            Box::new(m20250301_000006_create_messages::Migration),
        ]
    }
}
