//! Authorization rules for every actor-initiated operation.

use uuid::Uuid;

use crate::entities::{booking, message, ride, ride_request, user};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    View,
    Update,
    Cancel,
    ViewMatches,
    OfferRide,
    Confirm,
    Complete,
    Rate,
    Pay,
    Refund,
    MarkRead,
}

#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    Account(&'a user::Model),
    Ride(&'a ride::Model),
    RideRequest(&'a ride_request::Model),
    Booking {
        booking: &'a booking::Model,
        ride: &'a ride::Model,
    },
    Message(&'a message::Model),
}

pub fn authorize(actor: Uuid, resource: Resource<'_>, action: Action) -> AppResult<()> {
    use Action::*;

    let denial = match resource {
        Resource::Account(account) => match action {
            View => None,
            Update if account.id == actor => None,
            OfferRide if account.id != actor => Some("You can only post rides as yourself"),
            OfferRide if !account.role.can_drive() => {
                Some("Switch your role to DRIVER or BOTH to post rides")
            }
            OfferRide => None,
            _ => Some("You can only manage your own account"),
        },
        Resource::Ride(ride) => match action {
            View => None,
            Update | Cancel | ViewMatches if ride.driver_id == actor => None,
            Update => Some("You can only update your own rides"),
            Cancel => Some("You can only cancel your own rides"),
            ViewMatches => Some("You can only view matches for your own rides"),
            _ => Some("You do not have permission to perform this action on the ride"),
        },
        Resource::RideRequest(request) => match action {
            View => None,
            Update | Cancel | ViewMatches if request.rider_id == actor => None,
            Update => Some("You can only update your own ride requests"),
            Cancel => Some("You can only cancel your own ride requests"),
            ViewMatches => Some("You can only view matches for your own ride requests"),
            _ => Some("You do not have permission to perform this action on the ride request"),
        },
        Resource::Booking { booking, ride } => {
            let is_rider = booking.rider_id == actor;
            let is_driver = ride.driver_id == actor;
            match action {
                View | Cancel | Rate | Refund if is_rider || is_driver => None,
                View => Some("You do not have access to this booking"),
                Cancel => Some("You do not have permission to cancel this booking"),
                Rate => Some("You can only rate bookings you were involved in"),
                Refund => Some("You do not have permission to refund this booking"),
                Confirm if is_driver => None,
                Confirm => Some("Only the driver can confirm this booking"),
                Complete if is_driver => None,
                Complete => Some("Only the driver can complete this booking"),
                Pay if is_rider => None,
                Pay => Some("You can only create payment for your own bookings"),
                _ => Some("You do not have permission to perform this action on the booking"),
            }
        }
        Resource::Message(message) => match action {
            View if message.sender_id == actor || message.receiver_id == actor => None,
            MarkRead if message.receiver_id == actor => None,
            MarkRead => Some("You can only mark your own messages as read"),
            _ => Some("You do not have access to this message"),
        },
    };

    match denial {
        None => Ok(()),
        Some(reason) => {
            tracing::debug!(actor = %actor, action = ?action, reason, "Authorization denied");
            Err(AppError::Forbidden(reason.to_string()))
        }
    }
}
