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
                    .as_enum(RideRequestStatus::Enum)
                    .values([
                        RideRequestStatus::Open,
                        RideRequestStatus::Matched,
                        RideRequestStatus::Completed,
                        RideRequestStatus::Cancelled,
                    ])
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(RideRequest::Table)
                    .if_not_exists()
                    .col(uuid(RideRequest::Id).primary_key())
                    .col(uuid(RideRequest::RiderId).not_null())
                    .col(double(RideRequest::PickupLat).not_null())
                    .col(double(RideRequest::PickupLng).not_null())
                    .col(string_len(RideRequest::PickupAddress, 255).not_null())
                    .col(double(RideRequest::DropoffLat).not_null())
                    .col(double(RideRequest::DropoffLng).not_null())
                    .col(string_len(RideRequest::DropoffAddress, 255).not_null())
                    .col(timestamp_with_time_zone(RideRequest::DesiredTime).not_null())
                    .col(
                        integer(RideRequest::TimeFlexibility)
                            .not_null()
                            .default(30)
                            .check(Expr::col(RideRequest::TimeFlexibility).gte(0)),
                    )
                    .col(
                        integer(RideRequest::SeatsNeeded)
                            .not_null()
                            .check(Expr::col(RideRequest::SeatsNeeded).gt(0)),
                    )
                    .col(double_null(RideRequest::MaxPrice))
                    .col(
                        ColumnDef::new(RideRequest::Status)
                            .custom(RideRequestStatus::Enum)
                            .not_null()
                            .default("open"),
                    )
                    .col(
                        timestamp_with_time_zone(RideRequest::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(RideRequest::UpdatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_ride_request_rider")
                            .from(RideRequest::Table, RideRequest::RiderId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RideRequest::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(RideRequestStatus::Enum).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum RideRequest {
    Table,
    Id,
    RiderId,
    PickupLat,
    PickupLng,
    PickupAddress,
    DropoffLat,
    DropoffLng,
    DropoffAddress,
    DesiredTime,
    TimeFlexibility,
    SeatsNeeded,
    MaxPrice,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum RideRequestStatus {
    #[sea_orm(iden = "ride_request_status")]
    Enum,
    #[sea_orm(iden = "open")]
    Open,
    #[sea_orm(iden = "matched")]
    Matched,
    #[sea_orm(iden = "completed")]
    Completed,
    #[sea_orm(iden = "cancelled")]
    Cancelled,
}
