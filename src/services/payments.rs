//! Payment processor seam.
//!
//! Bookings are paid with a manual-capture intent: funds are authorized
//! (held) when the rider pays, captured when the driver completes the booking,
//! and released or refunded when either party cancels.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PaymentConfig;
use crate::error::AppError;

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("payment processor rejected the request: {0}")]
    Rejected(String),

    #[error("payment processor unreachable: {0}")]
    Transport(String),

    #[error("unexpected payment processor response: {0}")]
    Decode(String),
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        AppError::ExternalService(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentMetadata {
    pub booking_id: Uuid,
    pub rider_id: Uuid,
    pub driver_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Receipt {
    pub id: String,
    pub status: String,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Place a hold for `amount_cents`; nothing is charged yet.
    async fn authorize(
        &self,
        amount_cents: i64,
        metadata: &PaymentMetadata,
    ) -> Result<PaymentIntent, PaymentError>;

    /// Charge a previously authorized hold.
    async fn capture(&self, intent_ref: &str) -> Result<Receipt, PaymentError>;

    /// Release an uncaptured hold or refund a captured charge.
    async fn refund(&self, intent_ref: &str) -> Result<Receipt, PaymentError>;

    async fn retrieve(&self, intent_ref: &str) -> Result<PaymentIntent, PaymentError>;
}

/// Convert a decimal amount into minor units.
pub fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

pub fn processor_from_config(config: &PaymentConfig) -> std::sync::Arc<dyn PaymentProcessor> {
    match &config.stripe_secret_key {
        Some(key) => {
            tracing::info!("Using Stripe payment processor");
            std::sync::Arc::new(StripeProcessor::new(
                config.stripe_api_base.clone(),
                key.clone(),
                config.currency.clone(),
            ))
        }
        None => {
            tracing::warn!("STRIPE_SECRET_KEY not set, payments are settled offline");
            std::sync::Arc::new(OfflineProcessor)
        }
    }
}

// ============ Stripe ============

pub struct StripeProcessor {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeObject {
    id: String,
    status: String,
}

impl StripeProcessor {
    pub fn new(api_base: String, secret_key: String, currency: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key,
            currency,
        }
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: &[(&str, String)],
        idempotency_key: &str,
    ) -> Result<T, PaymentError> {
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", idempotency_key)
            .form(form)
            .send()
            .await
            .map_err(|e| PaymentError::Transport(e.to_string()))?;

        Self::decode(response).await
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, PaymentError> {
        let response = self
            .client
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| PaymentError::Transport(e.to_string()))?;

        Self::decode(response).await
    }

    async fn decode<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T, PaymentError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(PaymentError::Rejected(stripe_error_message(status.as_u16(), &body)));
        }

        serde_json::from_str(&body).map_err(|e| PaymentError::Decode(e.to_string()))
    }
}

/// Extract the human-readable message from a Stripe error payload.
fn stripe_error_message(status: u16, body: &str) -> String {
    match serde_json::from_str::<StripeErrorBody>(body) {
        Ok(StripeErrorBody { error }) => match (error.message, error.code) {
            (Some(message), _) => message,
            (None, Some(code)) => code,
            (None, None) => format!("HTTP {}", status),
        },
        Err(_) => format!("HTTP {}", status),
    }
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    async fn authorize(
        &self,
        amount_cents: i64,
        metadata: &PaymentMetadata,
    ) -> Result<PaymentIntent, PaymentError> {
        let form = [
            ("amount", amount_cents.to_string()),
            ("currency", self.currency.clone()),
            ("capture_method", "manual".to_string()),
            ("metadata[booking_id]", metadata.booking_id.to_string()),
            ("metadata[rider_id]", metadata.rider_id.to_string()),
            ("metadata[driver_id]", metadata.driver_id.to_string()),
        ];

        self.post(
            "/v1/payment_intents",
            &form,
            &format!("authorize-{}", metadata.booking_id),
        )
        .await
    }

    async fn capture(&self, intent_ref: &str) -> Result<Receipt, PaymentError> {
        let intent: StripeObject = self
            .post(
                &format!("/v1/payment_intents/{}/capture", intent_ref),
                &[],
                &format!("capture-{}", intent_ref),
            )
            .await?;

        Ok(Receipt {
            id: intent.id,
            status: intent.status,
        })
    }

    async fn refund(&self, intent_ref: &str) -> Result<Receipt, PaymentError> {
        let intent = self.retrieve(intent_ref).await?;

        let object: StripeObject = match intent.status.as_str() {
            "canceled" => {
                return Ok(Receipt {
                    id: intent.id,
                    status: intent.status,
                });
            }
            "succeeded" => {
                self.post(
                    "/v1/refunds",
                    &[("payment_intent", intent_ref.to_string())],
                    &format!("refund-{}", intent_ref),
                )
                .await?
            }
            _ => {
                self.post(
                    &format!("/v1/payment_intents/{}/cancel", intent_ref),
                    &[],
                    &format!("cancel-{}", intent_ref),
                )
                .await?
            }
        };

        Ok(Receipt {
            id: object.id,
            status: object.status,
        })
    }

    async fn retrieve(&self, intent_ref: &str) -> Result<PaymentIntent, PaymentError> {
        self.get(&format!("/v1/payment_intents/{}", intent_ref)).await
    }
}

// ============ Offline ============

/// Settles everything locally. Used when no processor is configured.
pub struct OfflineProcessor;

#[async_trait]
impl PaymentProcessor for OfflineProcessor {
    async fn authorize(
        &self,
        amount_cents: i64,
        metadata: &PaymentMetadata,
    ) -> Result<PaymentIntent, PaymentError> {
        Ok(PaymentIntent {
            id: format!("offline_{}", metadata.booking_id.simple()),
            status: "requires_capture".to_string(),
            client_secret: None,
            amount: Some(amount_cents),
        })
    }

    async fn capture(&self, intent_ref: &str) -> Result<Receipt, PaymentError> {
        Ok(Receipt {
            id: intent_ref.to_string(),
            status: "succeeded".to_string(),
        })
    }

    async fn refund(&self, intent_ref: &str) -> Result<Receipt, PaymentError> {
        Ok(Receipt {
            id: intent_ref.to_string(),
            status: "canceled".to_string(),
        })
    }

    async fn retrieve(&self, intent_ref: &str) -> Result<PaymentIntent, PaymentError> {
        Ok(PaymentIntent {
            id: intent_ref.to_string(),
            status: "offline".to_string(),
            client_secret: None,
            amount: None,
        })
    }
}
