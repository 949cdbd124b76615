pub mod auth;
pub mod bookings;
pub mod geocode;
pub mod messages;
pub mod payments;
pub mod ratings;
pub mod realtime;
pub mod requests;
pub mod rides;
pub mod users;

use axum::Json;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::utils::geo::Coordinates;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": Utc::now() }))
}

pub(crate) fn check_coordinates(lat: f64, lng: f64, label: &str) -> AppResult<()> {
    if !Coordinates::new(lat, lng).is_valid() {
        return Err(AppError::Validation(format!("{} coordinates are invalid", label)));
    }
    Ok(())
}

pub(crate) fn check_departure(at: DateTime<Utc>) -> AppResult<()> {
    if at <= Utc::now() {
        return Err(AppError::Validation("Time must be in the future".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn coordinates_out_of_range_are_rejected() {
        assert!(check_coordinates(40.44, -79.95, "Start").is_ok());
        assert!(check_coordinates(91.0, 0.0, "Start").is_err());
        assert!(check_coordinates(0.0, f64::INFINITY, "End").is_err());
    }

    #[test]
    fn departure_must_be_ahead() {
        assert!(check_departure(Utc::now() + Duration::hours(1)).is_ok());
        assert!(check_departure(Utc::now() - Duration::minutes(1)).is_err());
    }
}
