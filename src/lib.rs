pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod utils;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

pub use config::Config;
pub use error::{AppError, AppResult};

use services::geocoding::AddressLookup;
use services::hub::Hub;
use services::payments::PaymentProcessor;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Config,
    pub payments: Arc<dyn PaymentProcessor>,
    pub geocoder: Arc<dyn AddressLookup>,
    pub hub: Hub,
}
