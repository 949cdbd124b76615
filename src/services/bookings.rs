//! Persistence side of the booking lifecycle.
//!
//! Every mutation here runs in one transaction. Rows whose state is being
//! decided are locked first, the external payment call (if any) happens next,
//! and the local writes commit only after it succeeds.

use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction,
    EntityTrait, QueryFilter, QuerySelect, Set, TransactionTrait,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::entities::booking::{self, BookingStatus, PaymentStatus};
use crate::entities::ride::{self, RideStatus};
use crate::entities::ride_request::{self, RideRequestStatus};
use crate::entities::user;
use crate::error::{AppError, AppResult};
use crate::services::hub::EventKind;
use crate::services::lifecycle::{self, BookingAction, PaymentCall};
use crate::services::payments::{to_cents, PaymentIntent, PaymentMetadata};
use crate::services::policy::{self, Action, Resource};
use crate::utils::geo::Coordinates;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct NewBooking {
    pub ride_id: Uuid,
    pub ride_request_id: Option<Uuid>,
    pub seats_booked: i32,
    pub pickup_lat: Option<f64>,
    pub pickup_lng: Option<f64>,
    pub pickup_address: Option<String>,
    pub dropoff_lat: Option<f64>,
    pub dropoff_lng: Option<f64>,
    pub dropoff_address: Option<String>,
    pub agreed_price: Option<f64>,
}

struct Endpoint {
    lat: f64,
    lng: f64,
    address: String,
}

/// Resolve one end of the trip: explicit input, then the request, then the ride.
fn endpoint(
    label: &str,
    lat: Option<f64>,
    lng: Option<f64>,
    address: Option<String>,
    from_request: Option<(f64, f64, &str)>,
    from_ride: (f64, f64, &str),
) -> AppResult<Endpoint> {
    let (fallback_lat, fallback_lng, fallback_address) = from_request.unwrap_or(from_ride);
    let address = address.unwrap_or_else(|| fallback_address.to_string());

    match (lat, lng) {
        (Some(lat), Some(lng)) => {
            if !Coordinates::new(lat, lng).is_valid() {
                return Err(AppError::Validation(format!("{} coordinates are invalid", label)));
            }
            Ok(Endpoint { lat, lng, address })
        }
        _ => Ok(Endpoint {
            lat: fallback_lat,
            lng: fallback_lng,
            address,
        }),
    }
}

/// Seats held by PENDING and CONFIRMED bookings, per ride.
pub async fn held_seats<C: ConnectionTrait>(
    db: &C,
    ride_ids: &[Uuid],
) -> AppResult<HashMap<Uuid, i32>> {
    if ride_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let bookings = booking::Entity::find()
        .filter(booking::Column::RideId.is_in(ride_ids.iter().copied()))
        .filter(booking::Column::Status.is_in(BookingStatus::HOLDING_SEATS))
        .all(db)
        .await?;

    let mut held = HashMap::new();
    for b in bookings {
        *held.entry(b.ride_id).or_insert(0) += b.seats_booked;
    }
    Ok(held)
}

/// Book seats on a ride for `rider_id`.
pub async fn create(state: &AppState, rider_id: Uuid, input: NewBooking) -> AppResult<booking::Model> {
    let txn = state.db.begin().await?;

    // Concurrent bookers serialize here
    let ride = ride::Entity::find_by_id(input.ride_id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("Ride not found".to_string()))?;

    let existing = booking::Entity::find()
        .filter(booking::Column::RideId.eq(ride.id))
        .filter(booking::Column::Status.is_in(BookingStatus::HOLDING_SEATS))
        .all(&txn)
        .await?;

    let remaining = lifecycle::check_new_booking(&ride, rider_id, &existing, input.seats_booked, Utc::now())?;

    let request = match input.ride_request_id {
        Some(request_id) => {
            let request = ride_request::Entity::find_by_id(request_id)
                .lock_exclusive()
                .one(&txn)
                .await?
                .ok_or_else(|| AppError::NotFound("Ride request not found".to_string()))?;

            if request.rider_id != rider_id {
                return Err(AppError::Forbidden(
                    "You can only book with your own ride requests".to_string(),
                ));
            }
            if request.status != RideRequestStatus::Open {
                return Err(AppError::Validation("Ride request is no longer open".to_string()));
            }
            Some(request)
        }
        None => None,
    };

    let agreed_price = input
        .agreed_price
        .unwrap_or(ride.price_per_seat * f64::from(input.seats_booked));
    if !agreed_price.is_finite() || agreed_price < 0.0 {
        return Err(AppError::Validation("Agreed price cannot be negative".to_string()));
    }

    let pickup = endpoint(
        "Pickup",
        input.pickup_lat,
        input.pickup_lng,
        input.pickup_address,
        request
            .as_ref()
            .map(|r| (r.pickup_lat, r.pickup_lng, r.pickup_address.as_str())),
        (ride.start_lat, ride.start_lng, ride.start_address.as_str()),
    )?;
    let dropoff = endpoint(
        "Dropoff",
        input.dropoff_lat,
        input.dropoff_lng,
        input.dropoff_address,
        request
            .as_ref()
            .map(|r| (r.dropoff_lat, r.dropoff_lng, r.dropoff_address.as_str())),
        (ride.end_lat, ride.end_lng, ride.end_address.as_str()),
    )?;

    let now = Utc::now().fixed_offset();
    let new_booking = booking::ActiveModel {
        id: Set(Uuid::new_v4()),
        ride_id: Set(ride.id),
        rider_id: Set(rider_id),
        ride_request_id: Set(request.as_ref().map(|r| r.id)),
        pickup_lat: Set(pickup.lat),
        pickup_lng: Set(pickup.lng),
        pickup_address: Set(pickup.address),
        dropoff_lat: Set(dropoff.lat),
        dropoff_lng: Set(dropoff.lng),
        dropoff_address: Set(dropoff.address),
        seats_booked: Set(input.seats_booked),
        agreed_price: Set(agreed_price),
        status: Set(BookingStatus::Pending),
        payment_status: Set(PaymentStatus::Hold),
        payment_intent_ref: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };
    let booking = new_booking.insert(&txn).await?;

    if let Some(request) = &request {
        set_request_status(&txn, request.id, RideRequestStatus::Open, RideRequestStatus::Matched).await?;
    }

    txn.commit().await?;

    tracing::info!(
        booking_id = %booking.id,
        ride_id = %ride.id,
        rider_id = %rider_id,
        seats = booking.seats_booked,
        remaining_seats = remaining,
        "Booking created"
    );

    state
        .hub
        .publish(ride.driver_id, EventKind::NewBooking, &booking)
        .await;

    Ok(booking)
}

/// Apply a confirm, complete or cancel requested by `actor`.
pub async fn transition(
    state: &AppState,
    booking_id: Uuid,
    actor: Uuid,
    action: BookingAction,
) -> AppResult<booking::Model> {
    let txn = state.db.begin().await?;

    let (booking, ride) = load_locked(&txn, booking_id).await?;
    let updated = apply_transition(state, &txn, booking, &ride, actor, action).await?;

    txn.commit().await?;

    notify(state, &updated, &ride, actor, action).await;
    Ok(updated)
}

/// Place a payment hold for the booking's agreed price. Rider only, once per booking.
pub async fn authorize_payment(
    state: &AppState,
    booking_id: Uuid,
    actor: Uuid,
) -> AppResult<(booking::Model, PaymentIntent)> {
    let txn = state.db.begin().await?;

    let (booking, ride) = load_locked(&txn, booking_id).await?;
    policy::authorize(actor, Resource::Booking { booking: &booking, ride: &ride }, Action::Pay)?;

    if booking.status.is_terminal() {
        return Err(AppError::Validation(
            "Cannot pay for a booking that is closed".to_string(),
        ));
    }
    if booking.payment_intent_ref.is_some() {
        return Err(AppError::Conflict(
            "Payment already initiated for this booking".to_string(),
        ));
    }

    let amount = to_cents(booking.agreed_price);
    if amount <= 0 {
        return Err(AppError::Validation("Nothing to pay for this booking".to_string()));
    }

    let metadata = PaymentMetadata {
        booking_id: booking.id,
        rider_id: booking.rider_id,
        driver_id: ride.driver_id,
    };
    let intent = state.payments.authorize(amount, &metadata).await?;

    let mut active: booking::ActiveModel = booking.into();
    active.payment_intent_ref = Set(Some(intent.id.clone()));
    active.payment_status = Set(PaymentStatus::Hold);
    active.updated_at = Set(Utc::now().fixed_offset());
    let booking = active.update(&txn).await?;

    txn.commit().await?;

    tracing::info!(booking_id = %booking.id, intent = %intent.id, amount_cents = amount, "Payment authorized");
    Ok((booking, intent))
}

/// Cancel a booking that has been paid for. Fails when no payment exists.
pub async fn refund(state: &AppState, booking_id: Uuid, actor: Uuid) -> AppResult<booking::Model> {
    let txn = state.db.begin().await?;

    let (booking, ride) = load_locked(&txn, booking_id).await?;
    policy::authorize(actor, Resource::Booking { booking: &booking, ride: &ride }, Action::Refund)?;

    if booking.payment_intent_ref.is_none() {
        return Err(AppError::Validation("No payment found for this booking".to_string()));
    }

    let updated = apply_transition(state, &txn, booking, &ride, actor, BookingAction::Cancel).await?;
    txn.commit().await?;

    notify(state, &updated, &ride, actor, BookingAction::Cancel).await;
    Ok(updated)
}

/// Cancel a ride and every booking still holding seats on it.
pub async fn cancel_ride(state: &AppState, ride_id: Uuid, actor: Uuid) -> AppResult<ride::Model> {
    let txn = state.db.begin().await?;

    let ride = ride::Entity::find_by_id(ride_id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("Ride not found".to_string()))?;

    policy::authorize(actor, Resource::Ride(&ride), Action::Cancel)?;

    if ride.status.is_terminal() {
        return Err(AppError::Conflict("Ride is no longer active".to_string()));
    }

    let active = booking::Entity::find()
        .filter(booking::Column::RideId.eq(ride.id))
        .filter(booking::Column::Status.is_in(BookingStatus::HOLDING_SEATS))
        .lock_exclusive()
        .all(&txn)
        .await?;

    let mut cancelled = Vec::with_capacity(active.len());
    for booking in active {
        cancelled.push(apply_transition(state, &txn, booking, &ride, actor, BookingAction::Cancel).await?);
    }

    let mut active_ride: ride::ActiveModel = ride.into();
    active_ride.status = Set(RideStatus::Cancelled);
    active_ride.updated_at = Set(Utc::now().fixed_offset());
    let ride = active_ride.update(&txn).await?;

    txn.commit().await?;

    tracing::info!(ride_id = %ride.id, bookings = cancelled.len(), "Ride cancelled");

    for booking in &cancelled {
        notify(state, booking, &ride, actor, BookingAction::Cancel).await;
    }

    Ok(ride)
}

async fn load_locked(
    txn: &DatabaseTransaction,
    booking_id: Uuid,
) -> AppResult<(booking::Model, ride::Model)> {
    let booking = booking::Entity::find_by_id(booking_id)
        .lock_exclusive()
        .one(txn)
        .await?
        .ok_or_else(|| AppError::NotFound("Booking not found".to_string()))?;

    let ride = ride::Entity::find_by_id(booking.ride_id)
        .one(txn)
        .await?
        .ok_or_else(|| AppError::NotFound("Ride not found".to_string()))?;

    Ok((booking, ride))
}

async fn apply_transition(
    state: &AppState,
    txn: &DatabaseTransaction,
    booking: booking::Model,
    ride: &ride::Model,
    actor: Uuid,
    action: BookingAction,
) -> AppResult<booking::Model> {
    let plan = lifecycle::plan_transition(&booking, ride, actor, action)?;

    if let (Some(call), Some(intent_ref)) = (plan.payment_call, booking.payment_intent_ref.as_deref()) {
        let receipt = match call {
            PaymentCall::Capture => state.payments.capture(intent_ref).await?,
            PaymentCall::Refund => state.payments.refund(intent_ref).await?,
        };
        tracing::info!(
            booking_id = %booking.id,
            call = ?call,
            receipt = %receipt.id,
            status = %receipt.status,
            "Payment settled"
        );
    }

    let rider_id = booking.rider_id;
    let request_id = booking.ride_request_id;

    let mut active: booking::ActiveModel = booking.into();
    active.status = Set(plan.to);
    active.payment_status = Set(plan.payment_status);
    active.updated_at = Set(Utc::now().fixed_offset());
    let updated = active.update(txn).await?;

    match plan.to {
        BookingStatus::Completed => {
            user::Entity::update_many()
                .col_expr(user::Column::TotalRides, Expr::col(user::Column::TotalRides).add(1))
                .filter(user::Column::Id.is_in([rider_id, ride.driver_id]))
                .exec(txn)
                .await?;

            if let Some(request_id) = request_id {
                set_request_status(txn, request_id, RideRequestStatus::Matched, RideRequestStatus::Completed)
                    .await?;
            }
        }
        BookingStatus::Cancelled => {
            if let Some(request_id) = request_id {
                set_request_status(txn, request_id, RideRequestStatus::Matched, RideRequestStatus::Open)
                    .await?;
            }
        }
        _ => {}
    }

    tracing::info!(
        booking_id = %updated.id,
        actor = %actor,
        from = ?plan.from,
        to = ?plan.to,
        "Booking transitioned"
    );

    Ok(updated)
}

/// Moves the request to `to` only if it is currently `from`.
async fn set_request_status(
    txn: &DatabaseTransaction,
    request_id: Uuid,
    from: RideRequestStatus,
    to: RideRequestStatus,
) -> AppResult<()> {
    ride_request::Entity::update_many()
        .set(ride_request::ActiveModel {
            status: Set(to),
            updated_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        })
        .filter(ride_request::Column::Id.eq(request_id))
        .filter(ride_request::Column::Status.eq(from))
        .exec(txn)
        .await?;
    Ok(())
}

async fn notify(
    state: &AppState,
    booking: &booking::Model,
    ride: &ride::Model,
    actor: Uuid,
    action: BookingAction,
) {
    let event = match action {
        BookingAction::Confirm => EventKind::BookingConfirmed,
        BookingAction::Complete => EventKind::BookingCompleted,
        BookingAction::Cancel => EventKind::BookingCancelled,
    };
    let counterparty = if actor == booking.rider_id {
        ride.driver_id
    } else {
        booking.rider_id
    };

    state
        .hub
        .publish(
            counterparty,
            event,
            json!({ "booking": booking, "ride_id": ride.id }),
        )
        .await;
}
