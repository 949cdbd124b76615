use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use uuid::Uuid;

use crate::entities::{booking, rating, ride};
use crate::error::{AppError, AppResult};
use crate::handlers::users::{load_public_profiles, PublicProfile};
use crate::services::bookings::{self, NewBooking};
use crate::services::lifecycle::BookingAction;
use crate::services::policy::{self, Action, Resource};
use crate::utils::jwt::Claims;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    #[serde(flatten)]
    pub booking: booking::Model,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ride: Option<ride::Model>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<PublicProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rider: Option<PublicProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<rating::Model>,
}

impl BookingResponse {
    fn bare(booking: booking::Model) -> Self {
        Self {
            booking,
            ride: None,
            driver: None,
            rider: None,
            rating: None,
        }
    }
}

pub async fn create_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<NewBooking>,
) -> AppResult<(StatusCode, Json<BookingResponse>)> {
    let booking = bookings::create(&state, claims.sub, payload).await?;
    Ok((StatusCode::CREATED, Json(BookingResponse::bare(booking))))
}

/// Bookings made by the caller as a rider, newest first
pub async fn my_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> AppResult<Json<Vec<BookingResponse>>> {
    let rows = booking::Entity::find()
        .filter(booking::Column::RiderId.eq(claims.sub))
        .find_also_related(ride::Entity)
        .order_by_desc(booking::Column::CreatedAt)
        .all(&*state.db)
        .await?;

    let drivers = load_public_profiles(
        &*state.db,
        rows.iter().filter_map(|(_, ride)| ride.as_ref().map(|r| r.driver_id)),
    )
    .await?;

    let responses = rows
        .into_iter()
        .map(|(booking, ride)| BookingResponse {
            driver: ride
                .as_ref()
                .and_then(|r| drivers.get(&r.driver_id).cloned()),
            ride,
            rider: None,
            rating: None,
            booking,
        })
        .collect();

    Ok(Json(responses))
}

/// Booking details for the rider or the driver
pub async fn get_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(booking_id): Path<Uuid>,
) -> AppResult<Json<BookingResponse>> {
    let (booking, ride) = booking::Entity::find_by_id(booking_id)
        .find_also_related(ride::Entity)
        .one(&*state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Booking not found".to_string()))?;
    let ride = ride.ok_or_else(|| AppError::NotFound("Ride not found".to_string()))?;

    policy::authorize(claims.sub, Resource::Booking { booking: &booking, ride: &ride }, Action::View)?;

    let mut profiles = load_public_profiles(&*state.db, [booking.rider_id, ride.driver_id]).await?;
    let rating = rating::Entity::find()
        .filter(rating::Column::BookingId.eq(booking.id))
        .one(&*state.db)
        .await?;

    Ok(Json(BookingResponse {
        driver: profiles.remove(&ride.driver_id),
        rider: profiles.remove(&booking.rider_id),
        ride: Some(ride),
        rating,
        booking,
    }))
}

async fn transition(
    state: AppState,
    claims: Claims,
    booking_id: Uuid,
    action: BookingAction,
) -> AppResult<Json<BookingResponse>> {
    let booking = bookings::transition(&state, booking_id, claims.sub, action).await?;
    Ok(Json(BookingResponse::bare(booking)))
}

/// Driver accepts a pending booking
pub async fn confirm_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(booking_id): Path<Uuid>,
) -> AppResult<Json<BookingResponse>> {
    transition(state, claims, booking_id, BookingAction::Confirm).await
}

/// Driver marks the trip done; the held payment is captured
pub async fn complete_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(booking_id): Path<Uuid>,
) -> AppResult<Json<BookingResponse>> {
    transition(state, claims, booking_id, BookingAction::Complete).await
}

/// Either party cancels; the held payment is released
pub async fn cancel_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(booking_id): Path<Uuid>,
) -> AppResult<Json<BookingResponse>> {
    transition(state, claims, booking_id, BookingAction::Cancel).await
}
