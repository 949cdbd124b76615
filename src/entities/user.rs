use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "user_role")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    #[sea_orm(string_value = "rider")]
    Rider,
    #[sea_orm(string_value = "driver")]
    Driver,
    #[sea_orm(string_value = "both")]
    Both,
}

impl UserRole {
    pub fn can_drive(self) -> bool {
        matches!(self, UserRole::Driver | UserRole::Both)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub email: String,
    #[sea_orm(unique)]
    pub phone: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub profile_photo: Option<String>,
    pub role: UserRole,
    pub rating_sum: i64,
    pub rating_count: i32,
    pub total_rides: i32,
    pub driver_license: Option<String>,
    pub vehicle_make: Option<String>,
    pub vehicle_model: Option<String>,
    pub vehicle_year: Option<i32>,
    pub license_plate: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Mean of all stars received, 0 when unrated.
    pub fn average_rating(&self) -> f64 {
        if self.rating_count == 0 {
            return 0.0;
        }
        self.rating_sum as f64 / self.rating_count as f64
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::ride::Entity")]
    Rides,
    #[sea_orm(has_many = "super::ride_request::Entity")]
    RideRequests,
    #[sea_orm(has_many = "super::booking::Entity")]
    Bookings,
}

impl Related<super::ride::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Rides.def()
    }
}

impl Related<super::ride_request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RideRequests.def()
    }
}

impl Related<super::booking::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Bookings.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn rated(rating_sum: i64, rating_count: i32) -> Model {
        let now = Utc::now().fixed_offset();
        Model {
            id: Uuid::new_v4(),
            email: "dana@example.com".into(),
            phone: "+14125550101".into(),
            password_hash: String::new(),
            name: "Dana".into(),
            profile_photo: None,
            role: UserRole::Both,
            rating_sum,
            rating_count,
            total_rides: rating_count,
            driver_license: None,
            vehicle_make: None,
            vehicle_model: None,
            vehicle_year: None,
            license_plate: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn unrated_user_averages_zero() {
        assert_eq!(rated(0, 0).average_rating(), 0.0);
    }

    #[test]
    fn average_is_the_mean_of_received_stars() {
        // 5 + 4 + 4
        assert_eq!(rated(13, 3).average_rating(), 13.0 / 3.0);
        assert_eq!(rated(5, 1).average_rating(), 5.0);
    }
}
