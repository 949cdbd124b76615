use std::env;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub jwt_expiration_hours: i64,
    pub server_host: String,
    pub server_port: u16,
    pub payments: PaymentConfig,
    pub geocoding: GeocodingConfig,
}

#[derive(Clone)]
pub struct PaymentConfig {
    /// When unset, payments are settled by the offline processor.
    pub stripe_secret_key: Option<String>,
    pub stripe_api_base: String,
    pub currency: String,
}

#[derive(Clone)]
pub struct GeocodingConfig {
    pub mapbox_access_token: Option<String>,
    pub mapbox_api_base: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            database_url: env::var("DATABASE_URL")
                .expect("DATABASE_URL must be set"),
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .expect("DATABASE_MAX_CONNECTIONS must be a number"),
            jwt_secret: env::var("JWT_SECRET")
                .expect("JWT_SECRET must be set"),
            jwt_expiration_hours: env::var("JWT_EXPIRATION_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .expect("JWT_EXPIRATION_HOURS must be a number"),
            server_host: env::var("SERVER_HOST")
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("SERVER_PORT must be a number"),
            payments: PaymentConfig {
                stripe_secret_key: optional_var("STRIPE_SECRET_KEY"),
                stripe_api_base: env::var("STRIPE_API_BASE")
                    .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
                currency: env::var("PAYMENT_CURRENCY")
                    .unwrap_or_else(|_| "usd".to_string()),
            },
            geocoding: GeocodingConfig {
                mapbox_access_token: optional_var("MAPBOX_ACCESS_TOKEN"),
                mapbox_api_base: env::var("MAPBOX_API_BASE")
                    .unwrap_or_else(|_| "https://api.mapbox.com".to_string()),
            },
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

/// Empty values count as unset.
fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
