use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::ride::{self, RideStatus};
use crate::entities::ride_request::{self, RideRequestStatus};
use crate::entities::user;
use crate::error::{AppError, AppResult};
use crate::handlers::users::{load_public_profiles, PublicProfile};
use crate::handlers::{check_coordinates, check_departure};
use crate::services::bookings::held_seats;
use crate::services::matching;
use crate::services::policy::{self, Action, Resource};
use crate::utils::jwt::Claims;
use crate::utils::validate::require_text;
use crate::AppState;

pub const DEFAULT_TIME_FLEXIBILITY: i32 = 30;
const MAX_TIME_FLEXIBILITY: i32 = 24 * 60;

#[derive(Debug, Serialize)]
pub struct RideRequestResponse {
    #[serde(flatten)]
    pub request: ride_request::Model,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rider: Option<PublicProfile>,
}

#[derive(Debug, Serialize)]
pub struct RideMatch {
    #[serde(flatten)]
    pub ride: ride::Model,
    pub driver: Option<PublicProfile>,
    pub remaining_seats: i32,
    pub match_score: f64,
}

#[derive(Debug, Deserialize)]
pub struct CreateRideRequestRequest {
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub pickup_address: String,
    pub dropoff_lat: f64,
    pub dropoff_lng: f64,
    pub dropoff_address: String,
    pub desired_time: DateTime<Utc>,
    pub time_flexibility: Option<i32>,
    pub seats_needed: i32,
    pub max_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRideRequestRequest {
    pub pickup_lat: Option<f64>,
    pub pickup_lng: Option<f64>,
    pub pickup_address: Option<String>,
    pub dropoff_lat: Option<f64>,
    pub dropoff_lng: Option<f64>,
    pub dropoff_address: Option<String>,
    pub desired_time: Option<DateTime<Utc>>,
    pub time_flexibility: Option<i32>,
    pub seats_needed: Option<i32>,
    pub max_price: Option<f64>,
}

fn check_constraints(flexibility: i32, seats: i32, max_price: Option<f64>) -> AppResult<()> {
    if !(0..=MAX_TIME_FLEXIBILITY).contains(&flexibility) {
        return Err(AppError::Validation(format!(
            "Time flexibility must be between 0 and {} minutes",
            MAX_TIME_FLEXIBILITY
        )));
    }
    if seats < 1 {
        return Err(AppError::Validation("Must request at least 1 seat".to_string()));
    }
    if let Some(price) = max_price {
        if !price.is_finite() || price <= 0.0 {
            return Err(AppError::Validation("Max price must be positive".to_string()));
        }
    }
    Ok(())
}

async fn find_request(state: &AppState, request_id: Uuid) -> AppResult<ride_request::Model> {
    ride_request::Entity::find_by_id(request_id)
        .one(&*state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Ride request not found".to_string()))
}

pub async fn create_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateRideRequestRequest>,
) -> AppResult<(StatusCode, Json<RideRequestResponse>)> {
    check_coordinates(payload.pickup_lat, payload.pickup_lng, "Pickup")?;
    check_coordinates(payload.dropoff_lat, payload.dropoff_lng, "Dropoff")?;
    require_text(&payload.pickup_address, "Pickup address")?;
    require_text(&payload.dropoff_address, "Dropoff address")?;
    check_departure(payload.desired_time)?;

    let flexibility = payload.time_flexibility.unwrap_or(DEFAULT_TIME_FLEXIBILITY);
    check_constraints(flexibility, payload.seats_needed, payload.max_price)?;

    let now = Utc::now().fixed_offset();
    let new_request = ride_request::ActiveModel {
        id: Set(Uuid::new_v4()),
        rider_id: Set(claims.sub),
        pickup_lat: Set(payload.pickup_lat),
        pickup_lng: Set(payload.pickup_lng),
        pickup_address: Set(payload.pickup_address.trim().to_string()),
        dropoff_lat: Set(payload.dropoff_lat),
        dropoff_lng: Set(payload.dropoff_lng),
        dropoff_address: Set(payload.dropoff_address.trim().to_string()),
        desired_time: Set(payload.desired_time.fixed_offset()),
        time_flexibility: Set(flexibility),
        seats_needed: Set(payload.seats_needed),
        max_price: Set(payload.max_price),
        status: Set(RideRequestStatus::Open),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let request = new_request.insert(&*state.db).await?;
    tracing::info!(request_id = %request.id, rider_id = %claims.sub, "Ride request posted");

    Ok((
        StatusCode::CREATED,
        Json(RideRequestResponse {
            request,
            rider: None,
        }),
    ))
}

pub async fn my_requests(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<ride_request::Model>>> {
    let requests = ride_request::Entity::find()
        .filter(ride_request::Column::RiderId.eq(claims.sub))
        .order_by_desc(ride_request::Column::DesiredTime)
        .all(&*state.db)
        .await?;

    Ok(Json(requests))
}

pub async fn get_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<RideRequestResponse>> {
    let request = find_request(&state, request_id).await?;
    policy::authorize(claims.sub, Resource::RideRequest(&request), Action::View)?;

    let rider = user::Entity::find_by_id(request.rider_id)
        .one(&*state.db)
        .await?
        .map(PublicProfile::from);

    Ok(Json(RideRequestResponse { request, rider }))
}

/// Edit a request. Only OPEN requests can change.
pub async fn update_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<Uuid>,
    Json(payload): Json<UpdateRideRequestRequest>,
) -> AppResult<Json<RideRequestResponse>> {
    let request = find_request(&state, request_id).await?;
    policy::authorize(claims.sub, Resource::RideRequest(&request), Action::Update)?;

    if request.status != RideRequestStatus::Open {
        return Err(AppError::Conflict(
            "Only open ride requests can be updated".to_string(),
        ));
    }

    let flexibility = payload.time_flexibility.unwrap_or(request.time_flexibility);
    let seats = payload.seats_needed.unwrap_or(request.seats_needed);
    let max_price = payload.max_price.or(request.max_price);
    check_constraints(flexibility, seats, max_price)?;

    let pickup_lat = payload.pickup_lat.unwrap_or(request.pickup_lat);
    let pickup_lng = payload.pickup_lng.unwrap_or(request.pickup_lng);
    let dropoff_lat = payload.dropoff_lat.unwrap_or(request.dropoff_lat);
    let dropoff_lng = payload.dropoff_lng.unwrap_or(request.dropoff_lng);
    check_coordinates(pickup_lat, pickup_lng, "Pickup")?;
    check_coordinates(dropoff_lat, dropoff_lng, "Dropoff")?;

    let mut active: ride_request::ActiveModel = request.into();
    active.pickup_lat = Set(pickup_lat);
    active.pickup_lng = Set(pickup_lng);
    active.dropoff_lat = Set(dropoff_lat);
    active.dropoff_lng = Set(dropoff_lng);
    active.time_flexibility = Set(flexibility);
    active.seats_needed = Set(seats);
    active.max_price = Set(max_price);

    if let Some(address) = payload.pickup_address {
        require_text(&address, "Pickup address")?;
        active.pickup_address = Set(address.trim().to_string());
    }
    if let Some(address) = payload.dropoff_address {
        require_text(&address, "Dropoff address")?;
        active.dropoff_address = Set(address.trim().to_string());
    }
    if let Some(desired) = payload.desired_time {
        check_departure(desired)?;
        active.desired_time = Set(desired.fixed_offset());
    }
    active.updated_at = Set(Utc::now().fixed_offset());

    let request = active.update(&*state.db).await?;

    Ok(Json(RideRequestResponse {
        request,
        rider: None,
    }))
}

/// Withdraw an OPEN request. A matched request is released by cancelling its booking.
pub async fn cancel_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<RideRequestResponse>> {
    let request = find_request(&state, request_id).await?;
    policy::authorize(claims.sub, Resource::RideRequest(&request), Action::Cancel)?;

    match request.status {
        RideRequestStatus::Open => {}
        RideRequestStatus::Matched => {
            return Err(AppError::Conflict(
                "Ride request has an active booking, cancel the booking instead".to_string(),
            ));
        }
        RideRequestStatus::Completed | RideRequestStatus::Cancelled => {
            return Err(AppError::Conflict("Ride request is already closed".to_string()));
        }
    }

    let mut active: ride_request::ActiveModel = request.into();
    active.status = Set(RideRequestStatus::Cancelled);
    active.updated_at = Set(Utc::now().fixed_offset());
    let request = active.update(&*state.db).await?;

    tracing::info!(request_id = %request.id, "Ride request cancelled");

    Ok(Json(RideRequestResponse {
        request,
        rider: None,
    }))
}

/// Upcoming active rides ranked against this request
pub async fn request_matches(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(request_id): Path<Uuid>,
) -> AppResult<Json<Vec<RideMatch>>> {
    let request = find_request(&state, request_id).await?;
    policy::authorize(claims.sub, Resource::RideRequest(&request), Action::ViewMatches)?;

    if request.status != RideRequestStatus::Open {
        return Ok(Json(Vec::new()));
    }

    let rides = ride::Entity::find()
        .filter(ride::Column::Status.eq(RideStatus::Active))
        .filter(ride::Column::DepartureTime.gte(Utc::now().fixed_offset()))
        .filter(ride::Column::DriverId.ne(request.rider_id))
        .all(&*state.db)
        .await?;

    let ride_ids: Vec<Uuid> = rides.iter().map(|r| r.id).collect();
    let held = held_seats(&*state.db, &ride_ids).await?;

    let ranked = matching::rank_rides(
        &request,
        rides.into_iter().map(|ride| {
            let remaining = ride.available_seats - held.get(&ride.id).copied().unwrap_or(0);
            (ride, remaining)
        }),
    );
    let drivers = load_public_profiles(&*state.db, ranked.iter().map(|m| m.item.driver_id)).await?;

    tracing::debug!(request_id = %request.id, matches = ranked.len(), "Ranked rides for request");

    Ok(Json(
        ranked
            .into_iter()
            .map(|m| RideMatch {
                driver: drivers.get(&m.item.driver_id).cloned(),
                remaining_seats: m.remaining_seats,
                match_score: m.match_score,
                ride: m.item,
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_constraints() {
        assert!(check_constraints(DEFAULT_TIME_FLEXIBILITY, 1, None).is_ok());
        assert!(check_constraints(0, 2, Some(15.0)).is_ok());
        assert!(check_constraints(-5, 1, None).is_err());
        assert!(check_constraints(30, 0, None).is_err());
        assert!(check_constraints(30, 1, Some(0.0)).is_err());
    }
}
