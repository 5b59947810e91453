use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::BoxError;

pub const CURRENCY: &str = "LKR";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

wire_enum!(PaymentStatus, "paymentStatus", {
    Pending => "PENDING",
    Success => "SUCCESS",
    Failed => "FAILED",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
}

wire_enum!(PaymentMethod, "paymentMethod", {
    Card => "CARD",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    Booking,
}

wire_enum!(PaymentType, "paymentType", {
    Booking => "BOOKING",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookingPayment {
    pub payment_id: i64,
    pub booking_id: i64,
    pub amount: i64,
    pub currency: String,
    pub method: PaymentMethod,
    #[serde(rename = "type")]
    pub payment_type: PaymentType,
    pub status: PaymentStatus,
    pub payment_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Links one payment attempt to the gateway's transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub request_id: i64,
    pub payment_id: i64,
    pub booking_id: i64,
    pub system_transaction_id: String,
    pub gateway_transaction_id: String,
    pub redirect_url: String,
    pub callback_url: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit entry for an inbound gateway notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCallback {
    pub callback_id: i64,
    pub request_id: i64,
    pub status: String,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayInitiation {
    pub amount: i64,
    pub currency: String,
    pub system_transaction_id: String,
    pub callback_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySession {
    pub redirect_url: String,
    pub gateway_transaction_id: String,
}

#[async_trait]
pub trait PaymentGatewayPort: Send + Sync {
    /// Open a hosted payment session. Exactly one attempt; callers bound it
    /// with their own timeout.
    async fn initiate(&self, request: &GatewayInitiation) -> Result<GatewaySession, BoxError>;
}

/// Gateway double that answers with a deterministic session, or fails on demand.
#[derive(Debug, Clone, Default)]
pub struct MockPaymentGateway {
    fail: bool,
    delay: Option<Duration>,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true, delay: None }
    }

    pub fn slow(delay: Duration) -> Self {
        Self { fail: false, delay: Some(delay) }
    }
}

#[async_trait]
impl PaymentGatewayPort for MockPaymentGateway {
    async fn initiate(&self, request: &GatewayInitiation) -> Result<GatewaySession, BoxError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err("Simulated payment gateway failure".into());
        }

        tracing::info!("Mock gateway session for {}", request.system_transaction_id);
        Ok(GatewaySession {
            redirect_url: format!("https://pay.example.test/checkout/{}", request.system_transaction_id),
            gateway_transaction_id: format!("gw-{}", request.system_transaction_id),
        })
    }
}
