use sea_orm_migration::{prelude::*, schema::*, sea_orm::sea_query::extension::postgres::Type};

use super::m20250301_000001_create_users::User;
use super::m20250301_000002_create_rides::Ride;
use super::m20250301_000003_create_ride_requests::RideRequest;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_type(
                Type::create()
                    .as_enum(BookingStatus::Enum)
                    .values([
                        BookingStatus::Pending,
                        BookingStatus::Confirmed,
                        BookingStatus::Completed,
                        BookingStatus::Cancelled,
                    ])
                    .to_owned(),
            )
            .await?;

        manager
            .create_type(
                Type::create()
                    .as_enum(PaymentStatus::Enum)
                    .values([PaymentStatus::Hold, PaymentStatus::Charged, PaymentStatus::Refunded])
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Booking::Table)
                    .if_not_exists()
                    .col(uuid(Booking::Id).primary_key())
                    .col(uuid(Booking::RideId).not_null())
                    .col(uuid(Booking::RiderId).not_null())
                    .col(uuid_null(Booking::RideRequestId))
                    .col(double(Booking::PickupLat).not_null())
                    .col(double(Booking::PickupLng).not_null())
                    .col(string_len(Booking::PickupAddress, 255).not_null())
                    .col(double(Booking::DropoffLat).not_null())
                    .col(double(Booking::DropoffLng).not_null())
                    .col(string_len(Booking::DropoffAddress, 255).not_null())
                    .col(
                        integer(Booking::SeatsBooked)
                            .not_null()
                            .check(Expr::col(Booking::SeatsBooked).gt(0)),
                    )
                    .col(
                        double(Booking::AgreedPrice)
                            .not_null()
                            .check(Expr::col(Booking::AgreedPrice).gte(0)),
                    )
                    .col(
                        ColumnDef::new(Booking::Status)
                            .custom(BookingStatus::Enum)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Booking::PaymentStatus)
                            .custom(PaymentStatus::Enum)
                            .not_null()
                            .default("hold"),
                    )
                    .col(string_len_null(Booking::PaymentIntentRef, 255))
                    .col(
                        timestamp_with_time_zone(Booking::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(Booking::UpdatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_booking_ride")
                            .from(Booking::Table, Booking::RideId)
                            .to(Ride::Table, Ride::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_booking_rider")
                            .from(Booking::Table, Booking::RiderId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_booking_ride_request")
                            .from(Booking::Table, Booking::RideRequestId)
                            .to(RideRequest::Table, RideRequest::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_booking_ride")
                    .table(Booking::Table)
                    .col(Booking::RideId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_booking_rider")
                    .table(Booking::Table)
                    .col(Booking::RiderId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Booking::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(PaymentStatus::Enum).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(BookingStatus::Enum).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Booking {
    Table,
    Id,
    RideId,
    RiderId,
    RideRequestId,
    PickupLat,
    PickupLng,
    PickupAddress,
    DropoffLat,
    DropoffLng,
    DropoffAddress,
    SeatsBooked,
    AgreedPrice,
    Status,
    PaymentStatus,
    PaymentIntentRef,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum BookingStatus {
    #[sea_orm(iden = "booking_status")]
    Enum,
    #[sea_orm(iden = "pending")]
    Pending,
    #[sea_orm(iden = "confirmed")]
    Confirmed,
    #[sea_orm(iden = "completed")]
    Completed,
    #[sea_orm(iden = "cancelled")]
    Cancelled,
}

#[derive(DeriveIden)]
pub enum PaymentStatus {
    #[sea_orm(iden = "payment_status")]
    Enum,
    #[sea_orm(iden = "hold")]
    Hold,
    #[sea_orm(iden = "charged")]
    Charged,
    #[sea_orm(iden = "refunded")]
    Refunded,
}
