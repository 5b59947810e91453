use chrono::Utc;
use coachline_booking::{BookingServices, ExpiryReport};
use coachline_core::BoxError;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expiry: ExpiryReport,
    pub purged_otps: u64,
}

/// One pass: fire due expiry callbacks, then drop lapsed OTPs.
pub async fn sweep(services: &BookingServices, batch_size: i64) -> Result<SweepReport, BoxError> {
    let expiry = services.expiry.run_due(Utc::now(), batch_size).await?;
    let purged_otps = services.otps.purge_expired().await?;
    Ok(SweepReport { expiry, purged_otps })
}

/// Polls the schedule queue forever. Safe to run on every instance; due
/// entries are claimed with row locks, and failed ones come back after a backoff.
pub async fn start_expiry_worker(services: BookingServices, poll_interval: Duration, batch_size: i64) {
    info!(
        "Expiry worker started, polling every {:?} for up to {} callbacks",
        poll_interval, batch_size
    );

    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match sweep(&services, batch_size).await {
            Ok(report) if report.expiry.claimed > 0 || report.purged_otps > 0 => info!(
                "Expiry sweep: {} claimed, {} expired, {} unchanged, {} failed ({} retried), {} OTPs purged",
                report.expiry.claimed,
                report.expiry.expired,
                report.expiry.unchanged,
                report.expiry.failed,
                report.expiry.retried,
                report.purged_otps
            ),
            Ok(_) => debug!("Expiry sweep found nothing due"),
            Err(e) => error!("Expiry sweep failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coachline_booking::{BookingSettings, InMemoryHarness};
    use coachline_core::booking::BookingStatus;
    use prometheus::Registry;

    #[tokio::test]
    async fn test_sweep_expires_due_bookings() {
        let settings = BookingSettings {
            booking_waiting: chrono::Duration::seconds(-1),
            ..Default::default()
        };
        let harness = InMemoryHarness::new(settings, &Registry::new()).unwrap();
        harness.seed_trip(5, 40, 150_000).await;
        harness.seed_commuter(501).await;

        let created = harness.services.manager.create(501, 5, 12).await.unwrap();
        let booking_id = created.booking.booking.booking_id;

        let report = sweep(&harness.services, 50).await.unwrap();
        assert_eq!(report.expiry.claimed, 1);
        assert_eq!(report.expiry.expired, 1);

        let view = harness.services.manager.get(booking_id).await.unwrap().unwrap();
        assert_eq!(view.booking.booking_status, BookingStatus::Expired);

        let again = sweep(&harness.services, 50).await.unwrap();
        assert_eq!(again.expiry.claimed, 0);
    }
}
