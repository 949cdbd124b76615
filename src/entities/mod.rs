pub mod booking;
pub mod message;
pub mod rating;
pub mod ride;
pub mod ride_request;
pub mod user;
