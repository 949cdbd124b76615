use sea_orm_migration::{prelude::*, schema::*, sea_orm::sea_query::extension::postgres::Type};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_type(
                Type::create()
                    .as_enum(UserRole::Enum)
                    .values([UserRole::Rider, UserRole::Driver, UserRole::Both])
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(User::Table)
                    .if_not_exists()
                    .col(uuid(User::Id).primary_key())
                    .col(string_len(User::Email, 255).not_null().unique_key())
                    .col(string_len(User::Phone, 32).not_null().unique_key())
                    .col(string_len(User::PasswordHash, 255).not_null())
                    .col(string_len(User::Name, 100).not_null())
                    .col(string_len_null(User::ProfilePhoto, 512))
                    .col(
                        ColumnDef::new(User::Role)
                            .custom(UserRole::Enum)
                            .not_null()
                            .default("rider"),
                    )
                    // Aggregate rating is stored as a running sum and count.
                    .col(big_integer(User::RatingSum).not_null().default(0))
                    .col(integer(User::RatingCount).not_null().default(0))
                    .col(integer(User::TotalRides).not_null().default(0))
                    .col(string_len_null(User::DriverLicense, 64))
                    .col(string_len_null(User::VehicleMake, 64))
                    .col(string_len_null(User::VehicleModel, 64))
                    .col(integer_null(User::VehicleYear))
                    .col(string_len_null(User::LicensePlate, 32))
                    .col(
                        timestamp_with_time_zone(User::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(User::UpdatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(User::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(UserRole::Enum).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum User {
    Table,
    Id,
    Email,
    Phone,
    PasswordHash,
    Name,
    ProfilePhoto,
    Role,
    RatingSum,
    RatingCount,
    TotalRides,
    DriverLicense,
    VehicleMake,
    VehicleModel,
    VehicleYear,
    LicensePlate,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum UserRole {
    #[sea_orm(iden = "user_role")]
    Enum,
    #[sea_orm(iden = "rider")]
    Rider,
    #[sea_orm(iden = "driver")]
    Driver,
    #[sea_orm(iden = "both")]
    Both,
}
