use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::booking::{self, BookingStatus};
use crate::entities::ride::{self, RideStatus, RouteFlexibility};
use crate::entities::ride_request::{self, RideRequestStatus};
use crate::entities::user;
use crate::error::{AppError, AppResult};
use crate::handlers::users::{load_public_profiles, PublicProfile};
use crate::handlers::{check_coordinates, check_departure};
use crate::services::bookings::{self, held_seats};
use crate::services::lifecycle::remaining_seats;
use crate::services::matching;
use crate::services::policy::{self, Action, Resource};
use crate::utils::jwt::Claims;
use crate::utils::validate::require_text;
use crate::AppState;

const DEFAULT_LIST_LIMIT: u64 = 50;
const MAX_LIST_LIMIT: u64 = 200;

#[derive(Debug, Serialize)]
pub struct RideResponse {
    #[serde(flatten)]
    pub ride: ride::Model,
    pub remaining_seats: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<PublicProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookings: Option<Vec<booking::Model>>,
}

#[derive(Debug, Serialize)]
pub struct RequestMatch {
    #[serde(flatten)]
    pub request: ride_request::Model,
    pub rider: Option<PublicProfile>,
    pub match_score: f64,
}

#[derive(Debug, Deserialize)]
pub struct CreateRideRequest {
    pub start_lat: f64,
    pub start_lng: f64,
    pub start_address: String,
    pub end_lat: f64,
    pub end_lng: f64,
    pub end_address: String,
    pub departure_time: DateTime<Utc>,
    pub available_seats: i32,
    pub price_per_seat: f64,
    #[serde(default)]
    pub route_flexibility: Option<RouteFlexibility>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRideRequest {
    pub start_lat: Option<f64>,
    pub start_lng: Option<f64>,
    pub start_address: Option<String>,
    pub end_lat: Option<f64>,
    pub end_lng: Option<f64>,
    pub end_address: Option<String>,
    pub departure_time: Option<DateTime<Utc>>,
    pub available_seats: Option<i32>,
    pub price_per_seat: Option<f64>,
    pub route_flexibility: Option<RouteFlexibility>,
    pub status: Option<RideStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ListRidesQuery {
    pub status: Option<RideStatus>,
    pub limit: Option<u64>,
}

fn check_seats_and_price(seats: i32, price: f64) -> AppResult<()> {
    if seats < 1 {
        return Err(AppError::Validation("Ride must offer at least 1 seat".to_string()));
    }
    if !price.is_finite() || price <= 0.0 {
        return Err(AppError::Validation("Price per seat must be positive".to_string()));
    }
    Ok(())
}

async fn find_ride(state: &AppState, ride_id: Uuid) -> AppResult<ride::Model> {
    ride::Entity::find_by_id(ride_id)
        .one(&*state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Ride not found".to_string()))
}

/// Post a new ride. Requires a DRIVER or BOTH account.
pub async fn create_ride(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateRideRequest>,
) -> AppResult<(StatusCode, Json<RideResponse>)> {
    let driver = user::Entity::find_by_id(claims.sub)
        .one(&*state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    policy::authorize(claims.sub, Resource::Account(&driver), Action::OfferRide)?;

    check_coordinates(payload.start_lat, payload.start_lng, "Start")?;
    check_coordinates(payload.end_lat, payload.end_lng, "End")?;
    require_text(&payload.start_address, "Start address")?;
    require_text(&payload.end_address, "End address")?;
    check_departure(payload.departure_time)?;
    check_seats_and_price(payload.available_seats, payload.price_per_seat)?;

    let now = Utc::now().fixed_offset();
    let new_ride = ride::ActiveModel {
        id: Set(Uuid::new_v4()),
        driver_id: Set(driver.id),
        start_lat: Set(payload.start_lat),
        start_lng: Set(payload.start_lng),
        start_address: Set(payload.start_address.trim().to_string()),
        end_lat: Set(payload.end_lat),
        end_lng: Set(payload.end_lng),
        end_address: Set(payload.end_address.trim().to_string()),
        departure_time: Set(payload.departure_time.fixed_offset()),
        available_seats: Set(payload.available_seats),
        price_per_seat: Set(payload.price_per_seat),
        route_flexibility: Set(payload.route_flexibility.unwrap_or(RouteFlexibility::Flexible)),
        status: Set(RideStatus::Active),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let ride = new_ride.insert(&*state.db).await?;
    tracing::info!(ride_id = %ride.id, driver_id = %driver.id, "Ride posted");

    Ok((
        StatusCode::CREATED,
        Json(RideResponse {
            remaining_seats: ride.available_seats,
            ride,
            driver: Some(PublicProfile::from(driver)),
            bookings: None,
        }),
    ))
}

/// List upcoming rides, soonest first
pub async fn list_rides(
    State(state): State<AppState>,
    Query(query): Query<ListRidesQuery>,
) -> AppResult<Json<Vec<RideResponse>>> {
    let status = query.status.unwrap_or(RideStatus::Active);
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);

    let rides = ride::Entity::find()
        .filter(ride::Column::Status.eq(status))
        .filter(ride::Column::DepartureTime.gte(Utc::now().fixed_offset()))
        .order_by_asc(ride::Column::DepartureTime)
        .limit(limit)
        .all(&*state.db)
        .await?;

    let ride_ids: Vec<Uuid> = rides.iter().map(|r| r.id).collect();
    let held = held_seats(&*state.db, &ride_ids).await?;
    let drivers = load_public_profiles(&*state.db, rides.iter().map(|r| r.driver_id)).await?;

    let responses = rides
        .into_iter()
        .map(|ride| RideResponse {
            remaining_seats: ride.available_seats - held.get(&ride.id).copied().unwrap_or(0),
            driver: drivers.get(&ride.driver_id).cloned(),
            ride,
            bookings: None,
        })
        .collect();

    Ok(Json(responses))
}

/// Rides posted by the caller, with their bookings
pub async fn my_rides(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<RideResponse>>> {
    let rides = ride::Entity::find()
        .filter(ride::Column::DriverId.eq(claims.sub))
        .order_by_desc(ride::Column::DepartureTime)
        .all(&*state.db)
        .await?;

    let ride_ids: Vec<Uuid> = rides.iter().map(|r| r.id).collect();
    let all_bookings = booking::Entity::find()
        .filter(booking::Column::RideId.is_in(ride_ids))
        .order_by_asc(booking::Column::CreatedAt)
        .all(&*state.db)
        .await?;

    let responses = rides
        .into_iter()
        .map(|ride| {
            let bookings: Vec<booking::Model> = all_bookings
                .iter()
                .filter(|b| b.ride_id == ride.id)
                .cloned()
                .collect();
            let held: i32 = bookings
                .iter()
                .filter(|b| b.status.holds_seats())
                .map(|b| b.seats_booked)
                .sum();

            RideResponse {
                remaining_seats: ride.available_seats - held,
                ride,
                driver: None,
                bookings: Some(bookings),
            }
        })
        .collect();

    Ok(Json(responses))
}

/// Ride details. Bookings are included for the driver only.
pub async fn get_ride(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ride_id): Path<Uuid>,
) -> AppResult<Json<RideResponse>> {
    let ride = find_ride(&state, ride_id).await?;
    policy::authorize(claims.sub, Resource::Ride(&ride), Action::View)?;

    let bookings = booking::Entity::find()
        .filter(booking::Column::RideId.eq(ride.id))
        .order_by_asc(booking::Column::CreatedAt)
        .all(&*state.db)
        .await?;
    let held: i32 = bookings
        .iter()
        .filter(|b| b.status.holds_seats())
        .map(|b| b.seats_booked)
        .sum();

    let driver = user::Entity::find_by_id(ride.driver_id)
        .one(&*state.db)
        .await?
        .map(PublicProfile::from);

    let is_driver = ride.driver_id == claims.sub;
    Ok(Json(RideResponse {
        remaining_seats: ride.available_seats - held,
        ride,
        driver,
        bookings: is_driver.then_some(bookings),
    }))
}

pub async fn update_ride(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ride_id): Path<Uuid>,
    Json(payload): Json<UpdateRideRequest>,
) -> AppResult<Json<RideResponse>> {
    let txn = state.db.begin().await?;

    // Same lock as booking creation, so held seats cannot change under us
    let ride = ride::Entity::find_by_id(ride_id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("Ride not found".to_string()))?;
    policy::authorize(claims.sub, Resource::Ride(&ride), Action::Update)?;

    if ride.status.is_terminal() {
        return Err(AppError::Conflict("Ride is no longer active".to_string()));
    }

    let held = held_seats(&txn, &[ride.id])
        .await?
        .get(&ride.id)
        .copied()
        .unwrap_or(0);

    let seats = payload.available_seats.unwrap_or(ride.available_seats);
    let price = payload.price_per_seat.unwrap_or(ride.price_per_seat);
    check_seats_and_price(seats, price)?;
    if seats < held {
        return Err(AppError::Validation(format!(
            "{} seats are already booked on this ride",
            held
        )));
    }

    let start_lat = payload.start_lat.unwrap_or(ride.start_lat);
    let start_lng = payload.start_lng.unwrap_or(ride.start_lng);
    let end_lat = payload.end_lat.unwrap_or(ride.end_lat);
    let end_lng = payload.end_lng.unwrap_or(ride.end_lng);
    check_coordinates(start_lat, start_lng, "Start")?;
    check_coordinates(end_lat, end_lng, "End")?;

    let mut active: ride::ActiveModel = ride.into();
    active.start_lat = Set(start_lat);
    active.start_lng = Set(start_lng);
    active.end_lat = Set(end_lat);
    active.end_lng = Set(end_lng);
    active.available_seats = Set(seats);
    active.price_per_seat = Set(price);

    if let Some(address) = payload.start_address {
        require_text(&address, "Start address")?;
        active.start_address = Set(address.trim().to_string());
    }
    if let Some(address) = payload.end_address {
        require_text(&address, "End address")?;
        active.end_address = Set(address.trim().to_string());
    }
    if let Some(departure) = payload.departure_time {
        check_departure(departure)?;
        active.departure_time = Set(departure.fixed_offset());
    }
    if let Some(flexibility) = payload.route_flexibility {
        active.route_flexibility = Set(flexibility);
    }
    match payload.status {
        None | Some(RideStatus::Active) => {}
        Some(RideStatus::Completed) => active.status = Set(RideStatus::Completed),
        Some(RideStatus::Cancelled) => {
            return Err(AppError::Validation(
                "Use DELETE to cancel a ride".to_string(),
            ));
        }
    }
    active.updated_at = Set(Utc::now().fixed_offset());

    let ride = active.update(&txn).await?;
    txn.commit().await?;

    tracing::info!(ride_id = %ride.id, status = ?ride.status, "Ride updated");

    Ok(Json(RideResponse {
        remaining_seats: ride.available_seats - held,
        ride,
        driver: None,
        bookings: None,
    }))
}

/// Cancel a ride; its open bookings are cancelled and refunded.
pub async fn cancel_ride(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ride_id): Path<Uuid>,
) -> AppResult<Json<RideResponse>> {
    let ride = bookings::cancel_ride(&state, ride_id, claims.sub).await?;

    Ok(Json(RideResponse {
        remaining_seats: ride.available_seats,
        ride,
        driver: None,
        bookings: None,
    }))
}

/// Open ride requests ranked against this ride
pub async fn ride_matches(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(ride_id): Path<Uuid>,
) -> AppResult<Json<Vec<RequestMatch>>> {
    let ride = find_ride(&state, ride_id).await?;
    policy::authorize(claims.sub, Resource::Ride(&ride), Action::ViewMatches)?;

    if ride.status != RideStatus::Active {
        return Ok(Json(Vec::new()));
    }

    let held = booking::Entity::find()
        .filter(booking::Column::RideId.eq(ride.id))
        .filter(booking::Column::Status.is_in(BookingStatus::HOLDING_SEATS))
        .all(&*state.db)
        .await?;
    let remaining = remaining_seats(ride.available_seats, &held);

    let requests = ride_request::Entity::find()
        .filter(ride_request::Column::Status.eq(RideRequestStatus::Open))
        .filter(ride_request::Column::RiderId.ne(ride.driver_id))
        .all(&*state.db)
        .await?;

    let ranked = matching::rank_requests(&ride, remaining, requests);
    let riders = load_public_profiles(&*state.db, ranked.iter().map(|m| m.item.rider_id)).await?;

    tracing::debug!(ride_id = %ride.id, matches = ranked.len(), "Ranked requests for ride");

    Ok(Json(
        ranked
            .into_iter()
            .map(|m| RequestMatch {
                rider: riders.get(&m.item.rider_id).cloned(),
                match_score: m.match_score,
                request: m.item,
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use sea_orm::{DatabaseBackend, MockDatabase};
    use serde_json::json;

    use crate::test_support::{
        booking_on, logged_statements, ride_for, state_with, RecordingProcessor,
    };

    fn claims_for(user_id: Uuid) -> Claims {
        let now = Utc::now().timestamp();
        Claims {
            sub: user_id,
            email: "driver@example.com".into(),
            exp: now + 3600,
            iat: now,
        }
    }

    fn seats(available_seats: i32) -> UpdateRideRequest {
        serde_json::from_value(json!({ "available_seats": available_seats })).unwrap()
    }

    #[tokio::test]
    async fn seat_update_locks_the_ride_and_counts_holds_in_one_transaction() {
        let driver = Uuid::new_v4();
        let ride = ride_for(driver, 2);
        let held = booking_on(&ride, Uuid::new_v4(), 1, BookingStatus::Confirmed);
        let shrunk = ride::Model {
            available_seats: 1,
            ..ride.clone()
        };

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![ride.clone()]])
            .append_query_results([vec![held]])
            .append_query_results([vec![shrunk]])
            .into_connection();
        let state = state_with(db, Arc::new(RecordingProcessor::default()));

        let Json(response) = update_ride(
            State(state.clone()),
            Extension(claims_for(driver)),
            Path(ride.id),
            Json(seats(1)),
        )
        .await
        .unwrap();
        assert_eq!(response.ride.available_seats, 1);
        assert_eq!(response.remaining_seats, 0);

        let sql: Vec<String> = logged_statements(state).into_iter().map(|s| s.sql).collect();
        assert_eq!(sql.first().map(String::as_str), Some("BEGIN"));
        assert!(sql[1].starts_with(r#"SELECT"#) && sql[1].contains(r#"FROM "ride""#));
        assert!(sql[1].contains("FOR UPDATE"));
        assert!(sql[2].contains(r#"FROM "booking""#));
        assert!(sql[3].starts_with(r#"UPDATE "ride" "#));
        assert_eq!(sql.last().map(String::as_str), Some("COMMIT"));
        assert_eq!(sql.len(), 5);
    }

    #[tokio::test]
    async fn seats_cannot_drop_below_held() {
        let driver = Uuid::new_v4();
        let ride = ride_for(driver, 3);
        let held = booking_on(&ride, Uuid::new_v4(), 2, BookingStatus::Pending);

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![ride.clone()]])
            .append_query_results([vec![held]])
            .into_connection();
        let state = state_with(db, Arc::new(RecordingProcessor::default()));

        let err = update_ride(
            State(state.clone()),
            Extension(claims_for(driver)),
            Path(ride.id),
            Json(seats(1)),
        )
        .await
        .unwrap_err();
        match err {
            AppError::Validation(msg) => assert_eq!(msg, "2 seats are already booked on this ride"),
            other => panic!("unexpected error: {other:?}"),
        }

        let statements = logged_statements(state);
        assert!(!statements.iter().any(|s| s.sql.starts_with("UPDATE")));
    }

    #[test]
    fn seats_and_price_must_be_positive() {
        assert!(check_seats_and_price(3, 12.5).is_ok());
        assert!(check_seats_and_price(0, 12.5).is_err());
        assert!(check_seats_and_price(2, 0.0).is_err());
        assert!(check_seats_and_price(2, f64::NAN).is_err());
    }
}
