pub mod bookings;
pub mod geocoding;
pub mod hub;
pub mod lifecycle;
pub mod matching;
pub mod messaging;
pub mod payments;
pub mod policy;
pub mod ratings;
