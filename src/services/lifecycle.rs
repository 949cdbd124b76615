//! Booking state machine.
//!
//! ```text
//! PENDING ──confirm──▶ CONFIRMED ──complete──▶ COMPLETED
//!    │  └──────────────complete──────────────────▲
//!    └──cancel──▶ CANCELLED ◀──cancel── CONFIRMED
//! ```
//!
//! These functions only decide; persistence and payment calls live in
//! [`crate::services::bookings`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::entities::booking::{self, BookingStatus, PaymentStatus};
use crate::entities::ride::{self, RideStatus};
use crate::error::{AppError, AppResult};
use crate::services::policy::{self, Action, Resource};

pub const MIN_STARS: i32 = 1;
pub const MAX_STARS: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingAction {
    Confirm,
    Complete,
    Cancel,
}

impl BookingAction {
    fn policy_action(self) -> Action {
        match self {
            BookingAction::Confirm => Action::Confirm,
            BookingAction::Complete => Action::Complete,
            BookingAction::Cancel => Action::Cancel,
        }
    }
}

/// External payment operation a transition depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentCall {
    Capture,
    Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub payment_status: PaymentStatus,
    pub payment_call: Option<PaymentCall>,
}

/// Seats left on a ride after subtracting bookings that still hold seats.
pub fn remaining_seats(available_seats: i32, bookings: &[booking::Model]) -> i32 {
    let held: i32 = bookings
        .iter()
        .filter(|b| b.status.holds_seats())
        .map(|b| b.seats_booked)
        .sum();
    available_seats - held
}

/// Checks a new booking of `seats` against the ride and its existing bookings.
/// Returns the seats that will remain afterwards.
pub fn check_new_booking(
    ride: &ride::Model,
    rider_id: Uuid,
    existing: &[booking::Model],
    seats: i32,
    now: DateTime<Utc>,
) -> AppResult<i32> {
    if seats <= 0 {
        return Err(AppError::Validation("Must book at least 1 seat".to_string()));
    }
    if ride.status != RideStatus::Active {
        return Err(AppError::Validation("Ride is no longer accepting bookings".to_string()));
    }
    if ride.driver_id == rider_id {
        return Err(AppError::Validation("You cannot book your own ride".to_string()));
    }
    if ride.departure_time.with_timezone(&Utc) < now {
        return Err(AppError::Validation("Cannot book a ride that has already departed".to_string()));
    }

    let remaining = remaining_seats(ride.available_seats, existing);
    if remaining < seats {
        return Err(AppError::Validation("Not enough seats available".to_string()));
    }

    Ok(remaining - seats)
}

/// Decide the outcome of `action` by `actor`. Authorization is checked before state.
pub fn plan_transition(
    booking: &booking::Model,
    ride: &ride::Model,
    actor: Uuid,
    action: BookingAction,
) -> AppResult<Transition> {
    policy::authorize(actor, Resource::Booking { booking, ride }, action.policy_action())?;

    let from = booking.status;
    let transition = match (action, from) {
        (BookingAction::Confirm, BookingStatus::Pending) => Transition {
            from,
            to: BookingStatus::Confirmed,
            payment_status: booking.payment_status,
            payment_call: None,
        },
        (BookingAction::Complete, BookingStatus::Pending | BookingStatus::Confirmed) => Transition {
            from,
            to: BookingStatus::Completed,
            payment_status: PaymentStatus::Charged,
            payment_call: Some(PaymentCall::Capture),
        },
        (BookingAction::Cancel, BookingStatus::Pending | BookingStatus::Confirmed) => Transition {
            from,
            to: BookingStatus::Cancelled,
            payment_status: PaymentStatus::Refunded,
            payment_call: Some(PaymentCall::Refund),
        },
        (BookingAction::Confirm, BookingStatus::Confirmed) => {
            return Err(AppError::Conflict("Booking is already confirmed".to_string()));
        }
        (_, status) => {
            return Err(AppError::Conflict(format!(
                "Cannot {} a booking that is {}",
                action_verb(action),
                status_label(status)
            )));
        }
    };

    Ok(transition)
}

/// Validates a rating and returns the ratee: the other party on the booking.
pub fn check_rating(
    booking: &booking::Model,
    ride: &ride::Model,
    actor: Uuid,
    stars: i32,
    already_rated: bool,
) -> AppResult<Uuid> {
    if !(MIN_STARS..=MAX_STARS).contains(&stars) {
        return Err(AppError::Validation(format!(
            "Stars must be between {} and {}",
            MIN_STARS, MAX_STARS
        )));
    }

    policy::authorize(actor, Resource::Booking { booking, ride }, Action::Rate)?;

    if booking.status != BookingStatus::Completed {
        return Err(AppError::Validation("Can only rate completed bookings".to_string()));
    }
    if already_rated {
        return Err(AppError::Conflict("This booking has already been rated".to_string()));
    }

    Ok(if actor == booking.rider_id {
        ride.driver_id
    } else {
        booking.rider_id
    })
}

fn action_verb(action: BookingAction) -> &'static str {
    match action {
        BookingAction::Confirm => "confirm",
        BookingAction::Complete => "complete",
        BookingAction::Cancel => "cancel",
    }
}

fn status_label(status: BookingStatus) -> &'static str {
    match status {
        BookingStatus::Pending => "pending",
        BookingStatus::Confirmed => "confirmed",
        BookingStatus::Completed => "completed",
        BookingStatus::Cancelled => "cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::test_support::{booking_on, ride_for};

    #[test]
    fn remaining_seats_ignores_finished_bookings() {
        let ride = ride_for(Uuid::new_v4(), 4);
        let bookings = vec![
            booking_on(&ride, Uuid::new_v4(), 1, BookingStatus::Pending),
            booking_on(&ride, Uuid::new_v4(), 1, BookingStatus::Confirmed),
            booking_on(&ride, Uuid::new_v4(), 2, BookingStatus::Cancelled),
            booking_on(&ride, Uuid::new_v4(), 2, BookingStatus::Completed),
        ];

        assert_eq!(remaining_seats(ride.available_seats, &bookings), 2);
    }

    #[test]
    fn full_ride_rejects_new_booking() {
        let ride = ride_for(Uuid::new_v4(), 2);
        let existing = vec![booking_on(&ride, Uuid::new_v4(), 2, BookingStatus::Confirmed)];

        let err = check_new_booking(&ride, Uuid::new_v4(), &existing, 1, Utc::now()).unwrap_err();
        match err {
            AppError::Validation(msg) => assert_eq!(msg, "Not enough seats available"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn booking_leaves_remaining_seats_non_negative() {
        let ride = ride_for(Uuid::new_v4(), 3);
        let existing = vec![booking_on(&ride, Uuid::new_v4(), 1, BookingStatus::Pending)];

        assert_eq!(check_new_booking(&ride, Uuid::new_v4(), &existing, 2, Utc::now()).unwrap(), 0);
    }

    #[test]
    fn cannot_book_own_or_inactive_or_departed_ride() {
        let driver = Uuid::new_v4();
        let mut ride = ride_for(driver, 3);

        assert!(check_new_booking(&ride, driver, &[], 1, Utc::now()).is_err());

        ride.status = RideStatus::Cancelled;
        assert!(check_new_booking(&ride, Uuid::new_v4(), &[], 1, Utc::now()).is_err());

        ride.status = RideStatus::Active;
        let later = Utc::now() + Duration::hours(4);
        assert!(check_new_booking(&ride, Uuid::new_v4(), &[], 1, later).is_err());

        assert!(check_new_booking(&ride, Uuid::new_v4(), &[], 0, Utc::now()).is_err());
    }

    #[test]
    fn confirm_only_from_pending_and_only_by_driver() {
        let driver = Uuid::new_v4();
        let rider = Uuid::new_v4();
        let ride = ride_for(driver, 3);
        let pending = booking_on(&ride, rider, 1, BookingStatus::Pending);

        assert!(matches!(
            plan_transition(&pending, &ride, rider, BookingAction::Confirm),
            Err(AppError::Forbidden(_))
        ));

        let t = plan_transition(&pending, &ride, driver, BookingAction::Confirm).unwrap();
        assert_eq!(t.to, BookingStatus::Confirmed);
        assert_eq!(t.payment_status, PaymentStatus::Hold);
        assert_eq!(t.payment_call, None);

        let confirmed = booking_on(&ride, rider, 1, BookingStatus::Confirmed);
        assert!(matches!(
            plan_transition(&confirmed, &ride, driver, BookingAction::Confirm),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn complete_charges_and_is_terminal() {
        let driver = Uuid::new_v4();
        let rider = Uuid::new_v4();
        let ride = ride_for(driver, 3);
        let mut booking = booking_on(&ride, rider, 1, BookingStatus::Confirmed);

        assert!(matches!(
            plan_transition(&booking, &ride, rider, BookingAction::Complete),
            Err(AppError::Forbidden(_))
        ));

        let t = plan_transition(&booking, &ride, driver, BookingAction::Complete).unwrap();
        assert_eq!(t.to, BookingStatus::Completed);
        assert_eq!(t.payment_status, PaymentStatus::Charged);
        assert_eq!(t.payment_call, Some(PaymentCall::Capture));

        booking.status = t.to;
        assert!(matches!(
            plan_transition(&booking, &ride, driver, BookingAction::Complete),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            plan_transition(&booking, &ride, rider, BookingAction::Cancel),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn pending_booking_can_be_completed_directly() {
        let driver = Uuid::new_v4();
        let ride = ride_for(driver, 3);
        let booking = booking_on(&ride, Uuid::new_v4(), 1, BookingStatus::Pending);

        let t = plan_transition(&booking, &ride, driver, BookingAction::Complete).unwrap();
        assert_eq!(t.from, BookingStatus::Pending);
        assert_eq!(t.to, BookingStatus::Completed);
    }

    #[test]
    fn cancel_refunds_for_either_party() {
        let driver = Uuid::new_v4();
        let rider = Uuid::new_v4();
        let ride = ride_for(driver, 3);
        let booking = booking_on(&ride, rider, 1, BookingStatus::Pending);

        for actor in [rider, driver] {
            let t = plan_transition(&booking, &ride, actor, BookingAction::Cancel).unwrap();
            assert_eq!(t.to, BookingStatus::Cancelled);
            assert_eq!(t.payment_status, PaymentStatus::Refunded);
            assert_eq!(t.payment_call, Some(PaymentCall::Refund));
        }

        assert!(matches!(
            plan_transition(&booking, &ride, Uuid::new_v4(), BookingAction::Cancel),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn rating_rules() {
        let driver = Uuid::new_v4();
        let rider = Uuid::new_v4();
        let ride = ride_for(driver, 3);
        let mut booking = booking_on(&ride, rider, 1, BookingStatus::Confirmed);

        assert!(matches!(
            check_rating(&booking, &ride, rider, 5, false),
            Err(AppError::Validation(_))
        ));

        booking.status = BookingStatus::Completed;
        assert_eq!(check_rating(&booking, &ride, rider, 5, false).unwrap(), driver);
        assert_eq!(check_rating(&booking, &ride, driver, 4, false).unwrap(), rider);

        assert!(matches!(
            check_rating(&booking, &ride, rider, 0, false),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            check_rating(&booking, &ride, rider, 6, false),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            check_rating(&booking, &ride, Uuid::new_v4(), 3, false),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            check_rating(&booking, &ride, driver, 3, true),
            Err(AppError::Conflict(_))
        ));
    }
}
