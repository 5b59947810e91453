use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::booking::TripInfo;
use crate::BoxError;

#[async_trait]
pub trait TripInfoPort: Send + Sync {
    async fn get_trip(&self, trip_id: i64) -> Result<Option<TripInfo>, BoxError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationTemplate {
    CommuterVerificationOtp,
    ETicketVerificationOtp,
    LostParcelVerificationOtp,
    PaymentSuccess,
    ETicket,
    BookingCancelled,
    Onboarded,
    LostParcelRequested,
    LostParcelStatus,
}

impl NotificationTemplate {
    pub fn subject(&self) -> &'static str {
        match self {
            NotificationTemplate::CommuterVerificationOtp => "OTP for Commuter Verification",
            NotificationTemplate::ETicketVerificationOtp => "OTP for E-Ticket Verification",
            NotificationTemplate::LostParcelVerificationOtp => "OTP for Lost Parcel Verification",
            NotificationTemplate::PaymentSuccess => "Booking Payment Successful",
            NotificationTemplate::ETicket => "Your E-Ticket",
            NotificationTemplate::BookingCancelled => "Booking Cancelled",
            NotificationTemplate::Onboarded => "Welcome Aboard",
            NotificationTemplate::LostParcelRequested => "Lost Parcel Request Submitted",
            NotificationTemplate::LostParcelStatus => "Lost Parcel Status",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub template: NotificationTemplate,
    pub data: Value,
}

impl Notification {
    pub fn new(to: impl Into<String>, template: NotificationTemplate, data: Value) -> Self {
        Self {
            to: to.into(),
            subject: template.subject().to_string(),
            template,
            data,
        }
    }
}

#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), BoxError>;
}

#[async_trait]
pub trait EventPort: Send + Sync {
    async fn publish(&self, topic: &str, event_type: &str, payload: &Value) -> Result<(), BoxError>;
}

/// A one-shot callback waiting in the schedule queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledCallback {
    pub name: String,
    pub target: String,
    pub payload: Value,
    pub fire_at: DateTime<Utc>,
}

#[async_trait]
pub trait SchedulePort: Send + Sync {
    /// Arrange for `target` to receive `payload` at `when`. Re-using a name
    /// replaces the earlier entry.
    async fn schedule_once(&self, name: &str, when: DateTime<Utc>, target: &str, payload: &Value) -> Result<(), BoxError>;
}

#[async_trait]
pub trait ScheduleSource: Send + Sync {
    /// Claim up to `limit` entries due at `now`. A claimed entry is not
    /// handed out again unless it is released.
    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledCallback>, BoxError>;

    /// Put a claimed entry back in the queue, due again at `retry_at`.
    async fn release(&self, callback: &ScheduledCallback, retry_at: DateTime<Utc>) -> Result<(), BoxError>;
}

#[async_trait]
pub trait ObjectStoragePort: Send + Sync {
    /// Store `bytes` and return a URL a mail client can load.
    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, BoxError>;
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// `true` while `key` has seen at most `limit` hits in the current window.
    async fn check(&self, key: &str, limit: i64, window_seconds: i64) -> Result<bool, BoxError>;
}
