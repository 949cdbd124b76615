use sea_orm_migration::{prelude::*, schema::*, sea_orm::sea_query::extension::postgres::Type};

use super::m20250301_000001_create_users::User;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_type(
                Type::create()
                    .as_enum(RouteFlexibility::Enum)
                    .values([RouteFlexibility::Rigid, RouteFlexibility::Flexible])
                    .to_owned(),
            )
            .await?;

        manager
            .create_type(
                Type::create()
                    .as_enum(RideStatus::Enum)
                    .values([RideStatus::Active, RideStatus::Completed, RideStatus::Cancelled])
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Ride::Table)
                    .if_not_exists()
                    .col(uuid(Ride::Id).primary_key())
                    .col(uuid(Ride::DriverId).not_null())
                    .col(double(Ride::StartLat).not_null())
                    .col(double(Ride::StartLng).not_null())
                    .col(string_len(Ride::StartAddress, 255).not_null())
                    .col(double(Ride::EndLat).not_null())
                    .col(double(Ride::EndLng).not_null())
                    .col(string_len(Ride::EndAddress, 255).not_null())
                    .col(timestamp_with_time_zone(Ride::DepartureTime).not_null())
                    .col(
                        integer(Ride::AvailableSeats)
                            .not_null()
                            .check(Expr::col(Ride::AvailableSeats).gt(0)),
                    )
                    .col(
                        double(Ride::PricePerSeat)
                            .not_null()
                            .check(Expr::col(Ride::PricePerSeat).gt(0)),
                    )
                    .col(
                        ColumnDef::new(Ride::RouteFlexibility)
                            .custom(RouteFlexibility::Enum)
                            .not_null()
                            .default("flexible"),
                    )
                    .col(
                        ColumnDef::new(Ride::Status)
                            .custom(RideStatus::Enum)
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        timestamp_with_time_zone(Ride::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(Ride::UpdatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_ride_driver")
                            .from(Ride::Table, Ride::DriverId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_ride_status_departure")
                    .table(Ride::Table)
                    .col(Ride::Status)
                    .col(Ride::DepartureTime)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Ride::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(RideStatus::Enum).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(RouteFlexibility::Enum).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Ride {
    Table,
    Id,
    DriverId,
    StartLat,
    StartLng,
    StartAddress,
    EndLat,
    EndLng,
    EndAddress,
    DepartureTime,
    AvailableSeats,
    PricePerSeat,
    RouteFlexibility,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum RouteFlexibility {
    #[sea_orm(iden = "route_flexibility")]
    Enum,
    #[sea_orm(iden = "rigid")]
    Rigid,
    #[sea_orm(iden = "flexible")]
    Flexible,
}

#[derive(DeriveIden)]
pub enum RideStatus {
    #[sea_orm(iden = "ride_status")]
    Enum,
    #[sea_orm(iden = "active")]
    Active,
    #[sea_orm(iden = "completed")]
    Completed,
    #[sea_orm(iden = "cancelled")]
    Cancelled,
}
