use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{DateTime, Datelike, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::user::{self, UserRole};
use crate::error::{AppError, AppResult};
use crate::utils::jwt::Claims;
use crate::utils::validate::{is_valid_phone, require_text};
use crate::AppState;

/// The signed-in user's own view of their account.
#[derive(Debug, Serialize)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub phone: String,
    pub name: String,
    pub profile_photo: Option<String>,
    pub role: UserRole,
    pub rating: f64,
    pub rating_count: i32,
    pub total_rides: i32,
    pub driver_license: Option<String>,
    pub vehicle_make: Option<String>,
    pub vehicle_model: Option<String>,
    pub vehicle_year: Option<i32>,
    pub license_plate: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<user::Model> for Profile {
    fn from(u: user::Model) -> Self {
        Self {
            rating: u.average_rating(),
            id: u.id,
            email: u.email,
            phone: u.phone,
            name: u.name,
            profile_photo: u.profile_photo,
            role: u.role,
            rating_count: u.rating_count,
            total_rides: u.total_rides,
            driver_license: u.driver_license,
            vehicle_make: u.vehicle_make,
            vehicle_model: u.vehicle_model,
            vehicle_year: u.vehicle_year,
            license_plate: u.license_plate,
            created_at: u.created_at.with_timezone(&Utc),
        }
    }
}

/// What other users may see.
#[derive(Debug, Clone, Serialize)]
pub struct PublicProfile {
    pub id: Uuid,
    pub name: String,
    pub profile_photo: Option<String>,
    pub role: UserRole,
    pub rating: f64,
    pub rating_count: i32,
    pub total_rides: i32,
    pub vehicle_make: Option<String>,
    pub vehicle_model: Option<String>,
    pub vehicle_year: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl From<user::Model> for PublicProfile {
    fn from(u: user::Model) -> Self {
        Self {
            rating: u.average_rating(),
            id: u.id,
            name: u.name,
            profile_photo: u.profile_photo,
            role: u.role,
            rating_count: u.rating_count,
            total_rides: u.total_rides,
            vehicle_make: u.vehicle_make,
            vehicle_model: u.vehicle_model,
            vehicle_year: u.vehicle_year,
            created_at: u.created_at.with_timezone(&Utc),
        }
    }
}

/// Batch-load public profiles keyed by user id.
pub async fn load_public_profiles<C: ConnectionTrait>(
    db: &C,
    ids: impl IntoIterator<Item = Uuid>,
) -> AppResult<HashMap<Uuid, PublicProfile>> {
    let mut ids: Vec<Uuid> = ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let users = user::Entity::find()
        .filter(user::Column::Id.is_in(ids))
        .all(db)
        .await?;

    Ok(users
        .into_iter()
        .map(|u| (u.id, PublicProfile::from(u)))
        .collect())
}

pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Profile>> {
    let user = user::Entity::find_by_id(claims.sub)
        .one(&*state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    Ok(Json(Profile::from(user)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub profile_photo: Option<String>,
    pub role: Option<UserRole>,
    pub driver_license: Option<String>,
    pub vehicle_make: Option<String>,
    pub vehicle_model: Option<String>,
    pub vehicle_year: Option<i32>,
    pub license_plate: Option<String>,
}

fn check_vehicle_year(year: i32) -> AppResult<()> {
    let latest = Utc::now().year() + 1;
    if !(1950..=latest).contains(&year) {
        return Err(AppError::Validation(format!(
            "Vehicle year must be between 1950 and {}",
            latest
        )));
    }
    Ok(())
}

/// Blank strings clear optional fields.
fn optional_text(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<UpdateProfileRequest>,
) -> AppResult<Json<Profile>> {
    let user = user::Entity::find_by_id(claims.sub)
        .one(&*state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    let mut active: user::ActiveModel = user.into();

    if let Some(name) = payload.name {
        require_text(&name, "Name")?;
        active.name = Set(name.trim().to_string());
    }
    if let Some(phone) = payload.phone {
        let phone = phone.trim().to_string();
        if !is_valid_phone(&phone) {
            return Err(AppError::Validation("Invalid phone number".to_string()));
        }
        active.phone = Set(phone);
    }
    if let Some(role) = payload.role {
        active.role = Set(role);
    }
    if let Some(photo) = payload.profile_photo {
        active.profile_photo = Set(optional_text(photo));
    }
    if let Some(license) = payload.driver_license {
        active.driver_license = Set(optional_text(license));
    }
    if let Some(make) = payload.vehicle_make {
        active.vehicle_make = Set(optional_text(make));
    }
    if let Some(model) = payload.vehicle_model {
        active.vehicle_model = Set(optional_text(model));
    }
    if let Some(year) = payload.vehicle_year {
        check_vehicle_year(year)?;
        active.vehicle_year = Set(Some(year));
    }
    if let Some(plate) = payload.license_plate {
        active.license_plate = Set(optional_text(plate));
    }
    active.updated_at = Set(Utc::now().fixed_offset());

    // Phone collisions surface as Conflict via the unique index
    let user = active.update(&*state.db).await?;
    tracing::info!(user_id = %user.id, "Profile updated");

    Ok(Json(Profile::from(user)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<PublicProfile>> {
    let user = user::Entity::find_by_id(user_id)
        .one(&*state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    Ok(Json(PublicProfile::from(user)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vehicle_year_bounds() {
        assert!(check_vehicle_year(2019).is_ok());
        assert!(check_vehicle_year(1949).is_err());
        assert!(check_vehicle_year(Utc::now().year() + 2).is_err());
    }

    #[test]
    fn blank_optional_text_clears() {
        assert_eq!(optional_text("  ".into()), None);
        assert_eq!(optional_text(" ABC-1234 ".into()), Some("ABC-1234".into()));
    }
}
