use axum::{
    extract::{Path, State},
    Extension, Json,
};
use sea_orm::EntityTrait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::booking::{self, BookingStatus, PaymentStatus};
use crate::entities::ride;
use crate::error::{AppError, AppResult};
use crate::services::bookings;
use crate::services::payments::PaymentIntent;
use crate::services::policy::{self, Action, Resource};
use crate::utils::jwt::Claims;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct BookingPaymentRequest {
    pub booking_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct PaymentIntentResponse {
    pub booking_id: Uuid,
    pub payment_intent_id: String,
    pub client_secret: Option<String>,
    pub amount: f64,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub booking_id: Uuid,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub amount: f64,
    pub processor: Option<PaymentIntent>,
}

/// Only the paying rider may see the client secret.
fn redact_for(mut intent: PaymentIntent, booking: &booking::Model, viewer: Uuid) -> PaymentIntent {
    if viewer != booking.rider_id {
        intent.client_secret = None;
    }
    intent
}

/// Hold the booking's agreed price with the payment processor
pub async fn create_intent(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<BookingPaymentRequest>,
) -> AppResult<Json<PaymentIntentResponse>> {
    let (booking, intent) = bookings::authorize_payment(&state, payload.booking_id, claims.sub).await?;

    Ok(Json(PaymentIntentResponse {
        booking_id: booking.id,
        payment_intent_id: intent.id,
        client_secret: intent.client_secret,
        amount: booking.agreed_price,
        payment_status: booking.payment_status,
    }))
}

/// Release or refund the payment and cancel the booking
pub async fn refund(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<BookingPaymentRequest>,
) -> AppResult<Json<booking::Model>> {
    let booking = bookings::refund(&state, payload.booking_id, claims.sub).await?;
    Ok(Json(booking))
}

/// Local payment state, plus the processor's view when a payment exists
pub async fn payment_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(booking_id): Path<Uuid>,
) -> AppResult<Json<PaymentStatusResponse>> {
    let (booking, ride) = booking::Entity::find_by_id(booking_id)
        .find_also_related(ride::Entity)
        .one(&*state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Booking not found".to_string()))?;
    let ride = ride.ok_or_else(|| AppError::NotFound("Ride not found".to_string()))?;

    policy::authorize(claims.sub, Resource::Booking { booking: &booking, ride: &ride }, Action::View)?;

    let processor = match booking.payment_intent_ref.as_deref() {
        Some(intent_ref) => {
            let intent = state.payments.retrieve(intent_ref).await?;
            Some(redact_for(intent, &booking, claims.sub))
        }
        None => None,
    };

    Ok(Json(PaymentStatusResponse {
        booking_id: booking.id,
        status: booking.status,
        payment_status: booking.payment_status,
        amount: booking.agreed_price,
        processor,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{booking_on, ride_for};

    fn intent() -> PaymentIntent {
        PaymentIntent {
            id: "pi_3Nc".to_string(),
            status: "requires_capture".to_string(),
            client_secret: Some("pi_3Nc_secret_x".to_string()),
            amount: Some(2000),
        }
    }

    #[test]
    fn rider_sees_client_secret() {
        let rider = Uuid::new_v4();
        let ride = ride_for(Uuid::new_v4(), 3);
        let booking = booking_on(&ride, rider, 2, BookingStatus::Confirmed);

        let visible = redact_for(intent(), &booking, rider);
        assert_eq!(visible.client_secret.as_deref(), Some("pi_3Nc_secret_x"));
    }

    #[test]
    fn driver_does_not_see_client_secret() {
        let driver = Uuid::new_v4();
        let ride = ride_for(driver, 3);
        let booking = booking_on(&ride, Uuid::new_v4(), 2, BookingStatus::Confirmed);

        let visible = redact_for(intent(), &booking, driver);
        assert_eq!(visible.client_secret, None);
        assert_eq!(visible.id, "pi_3Nc");
        assert_eq!(visible.status, "requires_capture");
    }
}
