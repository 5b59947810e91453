use chrono::{DateTime, Duration, Utc};
use coachline_core::booking::Booking;
use coachline_core::ports::{SchedulePort, ScheduleSource, ScheduledCallback};
use coachline_core::BoxError;
use coachline_shared::models::events::BookingExpiryCheck;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::manager::{BookingManager, ExpireOutcome};

/// Handler name expiry callbacks are addressed to.
pub const EXPIRY_TARGET: &str = "booking-expiry";

/// Delay before a callback whose expiry failed is claimed again.
pub const RETRY_BACKOFF_SECONDS: i64 = 30;

pub fn schedule_name(booking_id: i64) -> String {
    format!("booking-expiration-{}", booking_id)
}

/// Arm the one-shot expiry check for a freshly created booking.
pub async fn schedule_expiry(scheduler: &dyn SchedulePort, booking: &Booking) -> Result<(), BoxError> {
    let check = BookingExpiryCheck::new(booking.booking_id, booking.trip_id(), booking.seat_number);
    let payload = serde_json::to_value(&check)?;

    scheduler
        .schedule_once(&schedule_name(booking.booking_id), booking.expiry_at, EXPIRY_TARGET, &payload)
        .await
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryReport {
    pub claimed: usize,
    pub expired: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Failed entries handed back to the queue.
    pub retried: usize,
}

/// Drains due expiry callbacks and applies them to their bookings.
pub struct ExpiryRunner {
    source: Arc<dyn ScheduleSource>,
    manager: Arc<BookingManager>,
}

impl ExpiryRunner {
    pub fn new(source: Arc<dyn ScheduleSource>, manager: Arc<BookingManager>) -> Self {
        Self { source, manager }
    }

    pub async fn run_due(&self, now: DateTime<Utc>, limit: i64) -> Result<ExpiryReport, BoxError> {
        let due = self.source.claim_due(now, limit).await?;
        let mut report = ExpiryReport {
            claimed: due.len(),
            ..Default::default()
        };

        for callback in due {
            let Some(check) = Self::decode(&callback) else {
                // malformed entries would fail the same way on every retry
                report.failed += 1;
                continue;
            };

            match self.manager.expire(check.booking_id).await {
                Ok(ExpireOutcome::Expired(_)) => report.expired += 1,
                Ok(ExpireOutcome::Unchanged(_)) => report.unchanged += 1,
                Err(e) => {
                    error!("Expiry callback {} failed: {}", callback.name, e);
                    report.failed += 1;
                    if self.retry_later(&callback, now).await {
                        report.retried += 1;
                    }
                }
            }
        }

        if report.claimed > 0 {
            info!(
                "Expiry sweep: {} claimed, {} expired, {} unchanged, {} failed, {} retried",
                report.claimed, report.expired, report.unchanged, report.failed, report.retried
            );
        }
        Ok(report)
    }

    fn decode(callback: &ScheduledCallback) -> Option<BookingExpiryCheck> {
        if callback.target != EXPIRY_TARGET {
            warn!("Dropping scheduled callback {} for target {}", callback.name, callback.target);
            return None;
        }

        match serde_json::from_value(callback.payload.clone()) {
            Ok(check) => Some(check),
            Err(e) => {
                error!("Dropping scheduled callback {} with bad payload: {}", callback.name, e);
                None
            }
        }
    }

    async fn retry_later(&self, callback: &ScheduledCallback, now: DateTime<Utc>) -> bool {
        let retry_at = now + Duration::seconds(RETRY_BACKOFF_SECONDS);
        match self.source.release(callback, retry_at).await {
            Ok(()) => true,
            Err(e) => {
                // the booking keeps its seat until someone re-arms the callback
                error!("Could not release expiry callback {}: {}", callback.name, e);
                false
            }
        }
    }
}
