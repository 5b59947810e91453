use chrono::Utc;
use coachline_core::booking::{Booking, BookingStatus, BookingView, Commuter, NewBooking, TicketStatus, TripInfo};
use coachline_core::ids;
use coachline_core::otp::{OtpVerification, VerificationType};
use coachline_core::ports::{Notification, NotificationTemplate, SchedulePort, TripInfoPort};
use coachline_core::repository::{BookingRepository, CommuterRepository};
use coachline_core::BoxError;
use coachline_shared::models::events::BookingEvent;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::effects::Effects;
use crate::expiry;
use crate::otp::{OtpCheck, OtpError, OtpVerificationStore};
use crate::seats::{SeatError, SeatLedger};
use crate::settings::BookingSettings;

/// Response to a successful booking request: the hydrated booking plus the
/// verification the commuter has to complete before paying.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedBooking {
    #[serde(flatten)]
    pub booking: BookingView,
    pub verification_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpireOutcome {
    Expired(Booking),
    /// The booking had already moved on; nothing was changed.
    Unchanged(BookingStatus),
}

/// Owns booking status transitions and their preconditions.
pub struct BookingManager {
    bookings: Arc<dyn BookingRepository>,
    commuters: Arc<dyn CommuterRepository>,
    trips: Arc<dyn TripInfoPort>,
    scheduler: Arc<dyn SchedulePort>,
    seats: SeatLedger,
    otps: OtpVerificationStore,
    effects: Effects,
    settings: BookingSettings,
}

impl BookingManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        commuters: Arc<dyn CommuterRepository>,
        trips: Arc<dyn TripInfoPort>,
        scheduler: Arc<dyn SchedulePort>,
        otps: OtpVerificationStore,
        effects: Effects,
        settings: BookingSettings,
    ) -> Self {
        Self {
            seats: SeatLedger::new(bookings.clone()),
            bookings,
            commuters,
            trips,
            scheduler,
            otps,
            effects,
            settings,
        }
    }

    /// Claim a seat and start the verification window.
    pub async fn create(&self, commuter_id: i64, trip_id: i64, seat_number: i32) -> Result<CreatedBooking, BookingError> {
        // 1. Trip, commuter and sale window
        let trip = self
            .trips
            .get_trip(trip_id)
            .await
            .map_err(BookingError::Storage)?
            .ok_or(BookingError::TripNotFound)?;

        let commuter = self
            .commuters
            .get_commuter(commuter_id)
            .await
            .map_err(BookingError::Storage)?
            .ok_or(BookingError::CommuterNotFound)?;

        if !trip.booking_enabled {
            return Err(BookingError::BookingDisabled);
        }

        // 2. Atomic seat claim
        let now = Utc::now();
        let booking = self
            .seats
            .reserve(
                NewBooking {
                    booking_id: ids::short_id(),
                    trip,
                    commuter_id,
                    seat_number,
                    expiry_at: now + self.settings.booking_waiting,
                },
                now,
            )
            .await?;
        self.effects.metrics().transitioned(BookingStatus::Creating);

        // 3. Expiry must be armed, otherwise the seat would be held forever
        if let Err(e) = expiry::schedule_expiry(self.scheduler.as_ref(), &booking).await {
            error!("Failed to schedule expiry for booking {}: {}", booking.booking_id, e);
            self.abandon(booking.booking_id).await;
            return Err(BookingError::Scheduling(e));
        }

        self.effects
            .publish(&BookingEvent::Created {
                booking_id: booking.booking_id,
                trip_id: booking.trip_id(),
                seat_number: booking.seat_number,
            })
            .await;

        // 4. Commuter verification OTP
        let verification = match self
            .otps
            .issue(booking.booking_id, VerificationType::CommuterVerification, self.settings.otp_waiting)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                self.abandon(booking.booking_id).await;
                return Err(e.into());
            }
        };
        self.send_otp(&commuter, &verification, NotificationTemplate::CommuterVerificationOtp, self.settings.otp_waiting)
            .await;

        info!(
            "Booking {} created for commuter {} on trip {} seat {}",
            booking.booking_id,
            commuter_id,
            booking.trip_id(),
            booking.seat_number
        );

        Ok(CreatedBooking {
            verification_id: verification.verification_id,
            booking: BookingView {
                booking,
                commuter: Some(commuter),
            },
        })
    }

    /// Check a submitted code. A freshly verified commuter OTP moves its
    /// booking from `CREATING` to `PENDING`.
    pub async fn submit_otp(&self, verification_id: i64, otp: &str) -> Result<OtpVerification, BookingError> {
        let check = self.otps.check(verification_id, otp).await?;

        if let OtpCheck::Verified(ref verification) = check {
            if verification.verification_type == VerificationType::CommuterVerification {
                let moved = self
                    .bookings
                    .transition(
                        verification.booking_id,
                        &[BookingStatus::Creating],
                        BookingStatus::Pending,
                        Utc::now(),
                    )
                    .await
                    .map_err(BookingError::Storage)?;

                match moved {
                    Some(b) => {
                        self.effects.metrics().transitioned(BookingStatus::Pending);
                        info!("Booking {} verified, awaiting payment", b.booking_id);
                    }
                    None => warn!(
                        "Commuter verified for booking {} but it is no longer CREATING",
                        verification.booking_id
                    ),
                }
            }
        }

        Ok(check.into_record())
    }

    /// Expiry callback. Only unpaid bookings move; anything else is reported
    /// back unchanged.
    pub async fn expire(&self, booking_id: i64) -> Result<ExpireOutcome, BookingError> {
        let expired = self
            .bookings
            .transition(booking_id, &BookingStatus::EXPIRABLE, BookingStatus::Expired, Utc::now())
            .await
            .map_err(BookingError::Storage)?;

        if let Some(booking) = expired {
            self.effects.metrics().transitioned(BookingStatus::Expired);
            info!("Booking {} expired, seat {} released", booking_id, booking.seat_number);
            return Ok(ExpireOutcome::Expired(booking));
        }

        let current = self.find(booking_id).await?;
        info!("Expiry for booking {} ignored, status is {}", booking_id, current.booking_status);
        Ok(ExpireOutcome::Unchanged(current.booking_status))
    }

    /// `PENDING -> PAID`. Driven only by a settled gateway callback.
    pub async fn mark_paid(&self, booking_id: i64) -> Result<Option<Booking>, BookingError> {
        let paid = self
            .bookings
            .transition(booking_id, &[BookingStatus::Pending], BookingStatus::Paid, Utc::now())
            .await
            .map_err(BookingError::Storage)?;

        if paid.is_some() {
            self.effects.metrics().transitioned(BookingStatus::Paid);
            info!("Booking {} marked as PAID", booking_id);
        }
        Ok(paid)
    }

    /// Cancel a paid booking. Preconditions are checked in a fixed order and
    /// the first one that fails is reported.
    pub async fn cancel(&self, booking_id: i64, requested: BookingStatus) -> Result<Booking, BookingError> {
        if requested != BookingStatus::Cancelled {
            return Err(BookingError::UnsupportedStatus(requested));
        }

        let booking = self.find(booking_id).await?;
        let trip = self.check_cancellable(&booking).await?;

        let cancelled = match self.bookings.cancel_paid(booking_id, Utc::now()).await.map_err(BookingError::Storage)? {
            Some(b) => b,
            None => {
                // Lost to a concurrent transition; report what blocks us now.
                let current = self.find(booking_id).await?;
                self.check_cancellable(&current).await?;
                return Err(BookingError::NotCancellable(current.booking_status));
            }
        };
        self.effects.metrics().transitioned(BookingStatus::Cancelled);

        self.effects
            .publish(&BookingEvent::Cancelled {
                booking_id,
                trip_id: cancelled.trip_id(),
                seat_number: cancelled.seat_number,
            })
            .await;

        if let Some(commuter) = self.commuter_of(&cancelled).await {
            self.effects
                .notify(Notification::new(
                    commuter.email(),
                    NotificationTemplate::BookingCancelled,
                    json!({
                        "firstName": commuter.name.first_name,
                        "bookingId": booking_id,
                        "tripId": cancelled.trip_id(),
                        "seatNumber": cancelled.seat_number,
                        "price": cancelled.price,
                        "cancellationPolicy": trip.cancellation_policy,
                    }),
                ))
                .await;
        }

        info!("Booking {} cancelled", booking_id);
        Ok(cancelled)
    }

    async fn check_cancellable(&self, booking: &Booking) -> Result<TripInfo, BookingError> {
        let trip = self
            .trips
            .get_trip(booking.trip_id())
            .await
            .map_err(BookingError::Storage)?
            .ok_or(BookingError::TripUnavailable)?;

        if booking.ticket_status == TicketStatus::Used {
            return Err(BookingError::TicketAlreadyUsed);
        }
        if !trip.booking_enabled {
            return Err(BookingError::BookingDisabled);
        }
        if booking.booking_status == BookingStatus::Cancelled {
            return Err(BookingError::AlreadyCancelled);
        }
        if booking.booking_status != BookingStatus::Paid {
            return Err(BookingError::NotCancellable(booking.booking_status));
        }
        if !self
            .otps
            .require_verified(booking.booking_id, VerificationType::ETicketVerificationGet)
            .await?
        {
            return Err(BookingError::NoVerification);
        }

        Ok(trip)
    }

    /// Onboarding: the conductor scans the ticket.
    pub async fn mark_used(&self, e_ticket: &str) -> Result<Booking, BookingError> {
        let booking = self
            .bookings
            .find_by_e_ticket(e_ticket)
            .await
            .map_err(BookingError::Storage)?
            .filter(|b| b.booking_status == BookingStatus::Paid)
            .ok_or(BookingError::TicketNotFound)?;

        if booking.ticket_status == TicketStatus::Used {
            return Err(BookingError::TicketAlreadyUsed);
        }

        let used = match self
            .bookings
            .mark_ticket_used(booking.booking_id, Utc::now())
            .await
            .map_err(BookingError::Storage)?
        {
            Some(b) => b,
            None => {
                let current = self.find(booking.booking_id).await?;
                return Err(if current.ticket_status == TicketStatus::Used {
                    BookingError::TicketAlreadyUsed
                } else {
                    BookingError::TicketNotFound
                });
            }
        };

        if let Some(commuter) = self.commuter_of(&used).await {
            self.effects
                .notify(Notification::new(
                    commuter.email(),
                    NotificationTemplate::Onboarded,
                    json!({
                        "firstName": commuter.name.first_name,
                        "bookingId": used.booking_id,
                        "tripId": used.trip_id(),
                        "seatNumber": used.seat_number,
                    }),
                ))
                .await;
        }

        info!("Ticket for booking {} used", used.booking_id);
        Ok(used)
    }

    pub async fn get(&self, booking_id: i64) -> Result<Option<BookingView>, BookingError> {
        self.bookings.get_view(booking_id).await.map_err(BookingError::Storage)
    }

    pub async fn list(&self) -> Result<Vec<BookingView>, BookingError> {
        self.bookings.list_views().await.map_err(BookingError::Storage)
    }

    pub async fn list_by_trip(&self, trip_id: i64) -> Result<Vec<BookingView>, BookingError> {
        self.bookings.list_views_by_trip(trip_id).await.map_err(BookingError::Storage)
    }

    pub async fn occupied_seats(&self, trip_id: i64) -> Result<Vec<i32>, BookingError> {
        Ok(self.seats.occupied(trip_id).await?)
    }

    async fn find(&self, booking_id: i64) -> Result<Booking, BookingError> {
        self.bookings
            .get(booking_id)
            .await
            .map_err(BookingError::Storage)?
            .ok_or(BookingError::NotFound)
    }

    async fn commuter_of(&self, booking: &Booking) -> Option<Commuter> {
        match self.commuters.get_commuter(booking.commuter_id).await {
            Ok(Some(c)) => Some(c),
            Ok(None) => {
                warn!("Commuter {} of booking {} is gone", booking.commuter_id, booking.booking_id);
                None
            }
            Err(e) => {
                error!("Failed to load commuter {}: {}", booking.commuter_id, e);
                None
            }
        }
    }

    /// Release the seat of a booking whose setup could not finish.
    async fn abandon(&self, booking_id: i64) {
        match self
            .bookings
            .transition(booking_id, &[BookingStatus::Creating], BookingStatus::Expired, Utc::now())
            .await
        {
            Ok(_) => warn!("Booking {} abandoned during setup", booking_id),
            Err(e) => error!("Failed to release seat of booking {}: {}", booking_id, e),
        }
    }

    async fn send_otp(
        &self,
        commuter: &Commuter,
        verification: &OtpVerification,
        template: NotificationTemplate,
        ttl: chrono::Duration,
    ) {
        self.effects
            .notify(Notification::new(
                commuter.email(),
                template,
                json!({
                    "firstName": commuter.name.first_name,
                    "otp": verification.otp,
                    "validMinutes": ttl.num_minutes(),
                }),
            ))
            .await;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("trip does not exist in the database")]
    TripNotFound,

    #[error("commuter does not exist in the database")]
    CommuterNotFound,

    #[error("booking is not enabled for this trip")]
    BookingDisabled,

    #[error(transparent)]
    Seat(#[from] SeatError),

    #[error("resource not found")]
    NotFound,

    #[error("no booking found for this ticket")]
    TicketNotFound,

    #[error("trip is no longer available")]
    TripUnavailable,

    #[error("ticket is already used")]
    TicketAlreadyUsed,

    #[error("booking is already cancelled")]
    AlreadyCancelled,

    #[error("booking is {0}, only PAID bookings can be cancelled")]
    NotCancellable(BookingStatus),

    #[error("bookingStatus must be CANCELLED, got {0}")]
    UnsupportedStatus(BookingStatus),

    #[error("e-ticket verification is required before cancelling")]
    NoVerification,

    #[error(transparent)]
    Otp(#[from] OtpError),

    #[error("failed to schedule booking expiry: {0}")]
    Scheduling(BoxError),

    #[error("booking storage failure: {0}")]
    Storage(BoxError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryHarness;
    use async_trait::async_trait;
    use coachline_core::memory::InMemoryStore;
    use coachline_core::repository::OtpRepository;
    use prometheus::Registry;

    const TRIP: i64 = 501;
    const COMMUTER: i64 = 9001;

    async fn harness() -> InMemoryHarness {
        let harness = InMemoryHarness::new(BookingSettings::default(), &Registry::new()).unwrap();
        harness.seed_trip(TRIP, 50, 150_000).await;
        harness.seed_commuter(COMMUTER).await;
        harness
    }

    /// Drives a booking to PAID through the same repository calls the
    /// payment flow uses.
    async fn paid_booking(h: &InMemoryHarness, seat: i32) -> Booking {
        let created = h.services.manager.create(COMMUTER, TRIP, seat).await.unwrap();
        let id = created.booking.booking.booking_id;
        h.verify_latest(id, VerificationType::CommuterVerification).await.unwrap();
        h.services.manager.mark_paid(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_create_holds_seat_and_starts_verification() {
        let h = harness().await;
        let before = Utc::now();

        let created = h.services.manager.create(COMMUTER, TRIP, 10).await.unwrap();
        let booking = &created.booking.booking;

        assert_eq!(booking.booking_status, BookingStatus::Creating);
        assert_eq!(booking.ticket_status, TicketStatus::NotUsed);
        assert_eq!(booking.price, 150_000);
        assert!(booking.expiry_at >= before + chrono::Duration::minutes(10));
        assert!(created.booking.commuter.is_some());

        let scheduled = h.store.scheduled().await;
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].name, format!("booking-expiration-{}", booking.booking_id));
        assert_eq!(scheduled[0].fire_at, booking.expiry_at);

        assert_eq!(h.events.count("EVN_BOOKING_CREATED").await, 1);
        let sent = h.notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "OTP for Commuter Verification");
        assert_eq!(sent[0].to, "rider9001@example.com");
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_trip_commuter_and_disabled_trip() {
        let h = harness().await;

        assert!(matches!(h.services.manager.create(COMMUTER, 999, 1).await, Err(BookingError::TripNotFound)));
        assert!(matches!(h.services.manager.create(1, TRIP, 1).await, Err(BookingError::CommuterNotFound)));

        h.store
            .put_trip(TripInfo {
                trip_id: 600,
                capacity: 10,
                booking_enabled: false,
                price: 100,
                cancellation_policy: None,
                schedule: None,
            })
            .await;
        assert!(matches!(h.services.manager.create(COMMUTER, 600, 1).await, Err(BookingError::BookingDisabled)));
    }

    #[tokio::test]
    async fn test_create_maps_seat_errors() {
        let h = harness().await;
        h.services.manager.create(COMMUTER, TRIP, 10).await.unwrap();

        let taken = h.services.manager.create(COMMUTER, TRIP, 10).await.unwrap_err();
        assert_eq!(taken.to_string(), "seat already used");

        let outside = h.services.manager.create(COMMUTER, TRIP, 51).await.unwrap_err();
        assert_eq!(outside.to_string(), "seat is outside of the expected capacity");
    }

    struct BrokenScheduler;

    #[async_trait]
    impl SchedulePort for BrokenScheduler {
        async fn schedule_once(
            &self,
            _name: &str,
            _when: chrono::DateTime<Utc>,
            _target: &str,
            _payload: &serde_json::Value,
        ) -> Result<(), BoxError> {
            Err("scheduler unavailable".into())
        }
    }

    #[tokio::test]
    async fn test_failed_expiry_scheduling_releases_seat() {
        let store = Arc::new(InMemoryStore::new());
        let h = InMemoryHarness::with_store(store.clone(), BookingSettings::default(), &Registry::new()).unwrap();
        h.seed_trip(TRIP, 50, 1000).await;
        h.seed_commuter(COMMUTER).await;

        let manager = BookingManager::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(BrokenScheduler),
            OtpVerificationStore::new(store.clone()),
            h.effects.clone(),
            BookingSettings::default(),
        );

        let result = manager.create(COMMUTER, TRIP, 7).await;
        assert!(matches!(result, Err(BookingError::Scheduling(_))));
        assert!(store.occupied_seats(TRIP).await.unwrap().is_empty());
        assert!(h.notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_commuter_otp_moves_booking_to_pending() {
        let h = harness().await;
        let created = h.services.manager.create(COMMUTER, TRIP, 4).await.unwrap();
        let id = created.booking.booking.booking_id;

        let otp = h.store.latest_live(id, VerificationType::CommuterVerification, Utc::now()).await.unwrap().unwrap();
        let record = h.services.manager.submit_otp(created.verification_id, &otp.otp).await.unwrap();

        assert!(record.is_verified());
        assert_eq!(h.store.get(id).await.unwrap().unwrap().booking_status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn test_expire_applies_once() {
        let h = harness().await;
        let created = h.services.manager.create(COMMUTER, TRIP, 12).await.unwrap();
        let id = created.booking.booking.booking_id;

        assert!(matches!(h.services.manager.expire(id).await.unwrap(), ExpireOutcome::Expired(_)));
        assert_eq!(
            h.services.manager.expire(id).await.unwrap(),
            ExpireOutcome::Unchanged(BookingStatus::Expired)
        );
        assert!(matches!(h.services.manager.expire(42).await, Err(BookingError::NotFound)));

        // seat is free again
        assert!(h.services.manager.create(COMMUTER, TRIP, 12).await.is_ok());
    }

    #[tokio::test]
    async fn test_expire_never_touches_paid_booking() {
        let h = harness().await;
        let paid = paid_booking(&h, 20).await;

        assert_eq!(
            h.services.manager.expire(paid.booking_id).await.unwrap(),
            ExpireOutcome::Unchanged(BookingStatus::Paid)
        );
    }

    #[tokio::test]
    async fn test_cancel_requires_e_ticket_verification() {
        let h = harness().await;
        let paid = paid_booking(&h, 3).await;

        let denied = h.services.manager.cancel(paid.booking_id, BookingStatus::Cancelled).await;
        assert!(matches!(denied, Err(BookingError::NoVerification)));

        let challenge = h
            .services
            .otps
            .issue(paid.booking_id, VerificationType::ETicketVerificationGet, chrono::Duration::minutes(4))
            .await
            .unwrap();
        h.services.otps.check(challenge.verification_id, &challenge.otp).await.unwrap();

        let cancelled = h.services.manager.cancel(paid.booking_id, BookingStatus::Cancelled).await.unwrap();
        assert_eq!(cancelled.booking_status, BookingStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());
        assert_eq!(h.events.count("EVN_BOOKING_CANCELLED").await, 1);

        let again = h.services.manager.cancel(paid.booking_id, BookingStatus::Cancelled).await;
        assert!(matches!(again, Err(BookingError::AlreadyCancelled)));
    }

    #[tokio::test]
    async fn test_cancel_preconditions_in_order() {
        let h = harness().await;

        assert!(matches!(
            h.services.manager.cancel(12345678, BookingStatus::Cancelled).await,
            Err(BookingError::NotFound)
        ));

        let created = h.services.manager.create(COMMUTER, TRIP, 30).await.unwrap();
        let id = created.booking.booking.booking_id;
        let unpaid = h.services.manager.cancel(id, BookingStatus::Cancelled).await.unwrap_err();
        assert!(matches!(unpaid, BookingError::NotCancellable(BookingStatus::Creating)));
        assert_eq!(unpaid.to_string(), "booking is CREATING, only PAID bookings can be cancelled");

        let paid = paid_booking(&h, 31).await;
        h.services.manager.mark_used("missing").await.unwrap_err();
        h.store
            .attach_ticket(paid.booking_id, "ticket-31", "{}", Utc::now())
            .await
            .unwrap();
        h.services.manager.mark_used("ticket-31").await.unwrap();
        assert!(matches!(
            h.services.manager.cancel(paid.booking_id, BookingStatus::Cancelled).await,
            Err(BookingError::TicketAlreadyUsed)
        ));

        h.store.remove_trip(TRIP).await;
        assert!(matches!(
            h.services.manager.cancel(paid.booking_id, BookingStatus::Cancelled).await,
            Err(BookingError::TripUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_cancel_blocked_when_trip_booking_disabled() {
        let h = harness().await;
        let paid = paid_booking(&h, 8).await;
        h.store
            .put_trip(TripInfo {
                trip_id: TRIP,
                capacity: 50,
                booking_enabled: false,
                price: 150_000,
                cancellation_policy: None,
                schedule: None,
            })
            .await;

        assert!(matches!(
            h.services.manager.cancel(paid.booking_id, BookingStatus::Cancelled).await,
            Err(BookingError::BookingDisabled)
        ));
    }

    #[tokio::test]
    async fn test_mark_used_only_once() {
        let h = harness().await;
        let paid = paid_booking(&h, 15).await;
        h.store.attach_ticket(paid.booking_id, "ticket-15", "{}", Utc::now()).await.unwrap();

        let used = h.services.manager.mark_used("ticket-15").await.unwrap();
        assert_eq!(used.ticket_status, TicketStatus::Used);
        assert!(matches!(h.services.manager.mark_used("ticket-15").await, Err(BookingError::TicketAlreadyUsed)));
        assert!(matches!(h.services.manager.mark_used("nope").await, Err(BookingError::TicketNotFound)));

        let subjects: Vec<String> = h.notifier.sent().await.into_iter().map(|n| n.subject).collect();
        assert!(subjects.contains(&"Welcome Aboard".to_string()));
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_booking() {
        let h = harness().await;
        h.notifier.set_failing(true);

        let created = h.services.manager.create(COMMUTER, TRIP, 44).await;

        assert!(created.is_ok());
        assert_eq!(h.effects.metrics().side_effect_failures("notification"), 1);
    }
}
