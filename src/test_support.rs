//! Fixtures shared by unit tests that run services against a mock database.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sea_orm::{DatabaseConnection, Statement, Value};
use uuid::Uuid;

use crate::config::{Config, GeocodingConfig, PaymentConfig};
use crate::entities::booking::{self, BookingStatus, PaymentStatus};
use crate::entities::ride::{self, RideStatus, RouteFlexibility};
use crate::services::geocoding::MapboxGeocoder;
use crate::services::hub::Hub;
use crate::services::payments::{
    PaymentError, PaymentIntent, PaymentMetadata, PaymentProcessor, Receipt,
};
use crate::AppState;

pub fn config() -> Config {
    Config {
        database_url: "postgres://localhost/carpool_test".to_string(),
        database_max_connections: 1,
        jwt_secret: "test-secret".to_string(),
        jwt_expiration_hours: 1,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        payments: PaymentConfig {
            stripe_secret_key: None,
            stripe_api_base: "http://127.0.0.1:9".to_string(),
            currency: "usd".to_string(),
        },
        geocoding: GeocodingConfig {
            mapbox_access_token: None,
            mapbox_api_base: "http://127.0.0.1:9".to_string(),
        },
    }
}

pub fn state_with(db: DatabaseConnection, payments: Arc<dyn PaymentProcessor>) -> AppState {
    let config = config();
    AppState {
        db: Arc::new(db),
        geocoder: Arc::new(MapboxGeocoder::new(&config.geocoding)),
        config,
        payments,
        hub: Hub::new(),
    }
}

/// Every statement the mock database saw, in order, including BEGIN/COMMIT.
pub fn logged_statements(state: AppState) -> Vec<Statement> {
    let db = Arc::try_unwrap(state.db).unwrap_or_else(|_| panic!("database handle still shared"));
    db.into_transaction_log()
        .into_iter()
        .flat_map(|txn| txn.statements().to_vec())
        .collect()
}

pub fn binds(statement: &Statement, value: impl Into<Value>) -> bool {
    let value = value.into();
    statement
        .values
        .as_ref()
        .is_some_and(|values| values.0.contains(&value))
}

pub fn ride_for(driver_id: Uuid, available_seats: i32) -> ride::Model {
    let now = Utc::now();
    ride::Model {
        id: Uuid::new_v4(),
        driver_id,
        start_lat: 40.4443,
        start_lng: -79.9532,
        start_address: "Cathedral of Learning".into(),
        end_lat: 40.4915,
        end_lng: -80.2329,
        end_address: "PIT Airport".into(),
        departure_time: (now + Duration::hours(3)).fixed_offset(),
        available_seats,
        price_per_seat: 10.0,
        route_flexibility: RouteFlexibility::Flexible,
        status: RideStatus::Active,
        created_at: now.fixed_offset(),
        updated_at: now.fixed_offset(),
    }
}

pub fn booking_on(ride: &ride::Model, rider_id: Uuid, seats: i32, status: BookingStatus) -> booking::Model {
    let now = Utc::now().fixed_offset();
    booking::Model {
        id: Uuid::new_v4(),
        ride_id: ride.id,
        rider_id,
        ride_request_id: None,
        pickup_lat: ride.start_lat,
        pickup_lng: ride.start_lng,
        pickup_address: ride.start_address.clone(),
        dropoff_lat: ride.end_lat,
        dropoff_lng: ride.end_lng,
        dropoff_address: ride.end_address.clone(),
        seats_booked: seats,
        agreed_price: ride.price_per_seat * f64::from(seats),
        status,
        payment_status: PaymentStatus::Hold,
        payment_intent_ref: None,
        created_at: now,
        updated_at: now,
    }
}

/// Records each call as `"<op>:<ref>"`; optionally declines every capture and refund.
#[derive(Default)]
pub struct RecordingProcessor {
    calls: Mutex<Vec<String>>,
    decline: bool,
}

impl RecordingProcessor {
    pub fn declining() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            decline: true,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn settle(&self, op: &str, intent_ref: &str) -> Result<Receipt, PaymentError> {
        self.calls.lock().unwrap().push(format!("{}:{}", op, intent_ref));
        if self.decline {
            return Err(PaymentError::Rejected("Your card was declined.".to_string()));
        }
        Ok(Receipt {
            id: format!("{}_{}", op, intent_ref),
            status: "succeeded".to_string(),
        })
    }
}

#[async_trait]
impl PaymentProcessor for RecordingProcessor {
    async fn authorize(
        &self,
        amount_cents: i64,
        metadata: &PaymentMetadata,
    ) -> Result<PaymentIntent, PaymentError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("authorize:{}", metadata.booking_id));
        Ok(PaymentIntent {
            id: format!("pi_{}", metadata.booking_id.simple()),
            status: "requires_capture".to_string(),
            client_secret: Some("secret".to_string()),
            amount: Some(amount_cents),
        })
    }

    async fn capture(&self, intent_ref: &str) -> Result<Receipt, PaymentError> {
        self.settle("capture", intent_ref)
    }

    async fn refund(&self, intent_ref: &str) -> Result<Receipt, PaymentError> {
        self.settle("refund", intent_ref)
    }

    async fn retrieve(&self, intent_ref: &str) -> Result<PaymentIntent, PaymentError> {
        Ok(PaymentIntent {
            id: intent_ref.to_string(),
            status: "requires_capture".to_string(),
            client_secret: None,
            amount: None,
        })
    }
}
