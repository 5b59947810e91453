//! In-process adapters for every repository and port.
//!
//! Each table sits behind its own `RwLock`; conditional writes take the write
//! lock for both the guard check and the mutation so they behave like the
//! single-statement updates of the Postgres adapters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::booking::{Booking, BookingStatus, BookingView, Commuter, TicketStatus, TripInfo};
use crate::otp::{OtpVerification, VerificationStatus, VerificationType};
use crate::parcel::LostParcel;
use crate::payment::{BookingPayment, PaymentCallback, PaymentRequest, PaymentStatus};
use crate::ports::{
    EventPort, Notification, NotificationPort, ObjectStoragePort, RateLimiter, ScheduleSource, SchedulePort,
    ScheduledCallback, TripInfoPort,
};
use crate::repository::{
    BookingRepository, CommuterRepository, LostParcelRepository, OtpRepository, PaymentRepository,
};
use crate::BoxError;

#[derive(Default)]
pub struct InMemoryStore {
    trips: RwLock<HashMap<i64, TripInfo>>,
    commuters: RwLock<HashMap<i64, Commuter>>,
    bookings: RwLock<HashMap<i64, Booking>>,
    otps: RwLock<Vec<OtpVerification>>,
    payments: RwLock<HashMap<i64, BookingPayment>>,
    requests: RwLock<Vec<PaymentRequest>>,
    callbacks: RwLock<Vec<PaymentCallback>>,
    parcels: RwLock<Vec<LostParcel>>,
    /// Pending entries only; claiming removes them.
    schedule: RwLock<Vec<ScheduledCallback>>,
    failing_transitions: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_trip(&self, trip: TripInfo) {
        self.trips.write().await.insert(trip.trip_id, trip);
    }

    pub async fn remove_trip(&self, trip_id: i64) {
        self.trips.write().await.remove(&trip_id);
    }

    pub async fn put_commuter(&self, commuter: Commuter) {
        self.commuters.write().await.insert(commuter.commuter_id, commuter);
    }

    pub async fn callbacks(&self) -> Vec<PaymentCallback> {
        self.callbacks.read().await.clone()
    }

    pub async fn payment_requests(&self) -> Vec<PaymentRequest> {
        self.requests.read().await.clone()
    }

    pub async fn scheduled(&self) -> Vec<ScheduledCallback> {
        self.schedule.read().await.clone()
    }

    /// The next `count` status transitions fail as if the database dropped out.
    pub fn fail_next_transitions(&self, count: usize) {
        self.failing_transitions.store(count, Ordering::SeqCst);
    }

    async fn hydrate(&self, booking: Booking) -> BookingView {
        let commuter = self.commuters.read().await.get(&booking.commuter_id).cloned();
        BookingView { booking, commuter }
    }

    async fn hydrate_all(&self, mut bookings: Vec<Booking>) -> Vec<BookingView> {
        bookings.sort_by_key(|b| b.created_at);
        let commuters = self.commuters.read().await;
        bookings
            .into_iter()
            .map(|booking| {
                let commuter = commuters.get(&booking.commuter_id).cloned();
                BookingView { booking, commuter }
            })
            .collect()
    }
}

#[async_trait]
impl TripInfoPort for InMemoryStore {
    async fn get_trip(&self, trip_id: i64) -> Result<Option<TripInfo>, BoxError> {
        Ok(self.trips.read().await.get(&trip_id).cloned())
    }
}

#[async_trait]
impl CommuterRepository for InMemoryStore {
    async fn get_commuter(&self, commuter_id: i64) -> Result<Option<Commuter>, BoxError> {
        Ok(self.commuters.read().await.get(&commuter_id).cloned())
    }
}

#[async_trait]
impl BookingRepository for InMemoryStore {
    async fn insert_if_seat_free(&self, booking: &Booking) -> Result<bool, BoxError> {
        let mut bookings = self.bookings.write().await;
        let taken = bookings.values().any(|b| {
            b.trip_id() == booking.trip_id()
                && b.seat_number == booking.seat_number
                && b.booking_status.is_active()
        });
        if taken {
            return Ok(false);
        }
        if bookings.contains_key(&booking.booking_id) {
            return Err(format!("duplicate booking id {}", booking.booking_id).into());
        }
        bookings.insert(booking.booking_id, booking.clone());
        Ok(true)
    }

    async fn occupied_seats(&self, trip_id: i64) -> Result<Vec<i32>, BoxError> {
        let mut seats: Vec<i32> = self
            .bookings
            .read()
            .await
            .values()
            .filter(|b| b.trip_id() == trip_id && b.booking_status.is_active())
            .map(|b| b.seat_number)
            .collect();
        seats.sort_unstable();
        Ok(seats)
    }

    async fn get(&self, booking_id: i64) -> Result<Option<Booking>, BoxError> {
        Ok(self.bookings.read().await.get(&booking_id).cloned())
    }

    async fn get_view(&self, booking_id: i64) -> Result<Option<BookingView>, BoxError> {
        let booking = self.bookings.read().await.get(&booking_id).cloned();
        match booking {
            Some(b) => Ok(Some(self.hydrate(b).await)),
            None => Ok(None),
        }
    }

    async fn list_views(&self) -> Result<Vec<BookingView>, BoxError> {
        let bookings: Vec<Booking> = self.bookings.read().await.values().cloned().collect();
        Ok(self.hydrate_all(bookings).await)
    }

    async fn list_views_by_trip(&self, trip_id: i64) -> Result<Vec<BookingView>, BoxError> {
        let bookings: Vec<Booking> = self
            .bookings
            .read()
            .await
            .values()
            .filter(|b| b.trip_id() == trip_id)
            .cloned()
            .collect();
        Ok(self.hydrate_all(bookings).await)
    }

    async fn find_by_e_ticket(&self, e_ticket: &str) -> Result<Option<Booking>, BoxError> {
        Ok(self
            .bookings
            .read()
            .await
            .values()
            .find(|b| b.e_ticket.as_deref() == Some(e_ticket))
            .cloned())
    }

    async fn transition(
        &self,
        booking_id: i64,
        from: &[BookingStatus],
        to: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Booking>, BoxError> {
        let pending_failures = self.failing_transitions.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.failing_transitions.store(pending_failures - 1, Ordering::SeqCst);
            return Err("connection reset by peer".into());
        }

        let mut bookings = self.bookings.write().await;
        match bookings.get_mut(&booking_id) {
            Some(b) if from.contains(&b.booking_status) => {
                b.booking_status = to;
                b.updated_at = at;
                if to == BookingStatus::Cancelled {
                    b.cancelled_at = Some(at);
                }
                Ok(Some(b.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn cancel_paid(&self, booking_id: i64, at: DateTime<Utc>) -> Result<Option<Booking>, BoxError> {
        let mut bookings = self.bookings.write().await;
        match bookings.get_mut(&booking_id) {
            Some(b) if b.booking_status == BookingStatus::Paid && b.ticket_status == TicketStatus::NotUsed => {
                b.booking_status = BookingStatus::Cancelled;
                b.cancelled_at = Some(at);
                b.updated_at = at;
                Ok(Some(b.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_ticket_used(&self, booking_id: i64, at: DateTime<Utc>) -> Result<Option<Booking>, BoxError> {
        let mut bookings = self.bookings.write().await;
        match bookings.get_mut(&booking_id) {
            Some(b) if b.booking_status == BookingStatus::Paid && b.ticket_status == TicketStatus::NotUsed => {
                b.ticket_status = TicketStatus::Used;
                b.updated_at = at;
                Ok(Some(b.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn attach_ticket(
        &self,
        booking_id: i64,
        e_ticket: &str,
        qr_validation_token: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Booking>, BoxError> {
        let mut bookings = self.bookings.write().await;
        match bookings.get_mut(&booking_id) {
            Some(b) if b.booking_status == BookingStatus::Paid && b.e_ticket.is_none() => {
                b.e_ticket = Some(e_ticket.to_string());
                b.qr_validation_token = Some(qr_validation_token.to_string());
                b.updated_at = at;
                Ok(Some(b.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl OtpRepository for InMemoryStore {
    async fn insert(&self, verification: &OtpVerification) -> Result<(), BoxError> {
        self.otps.write().await.push(verification.clone());
        Ok(())
    }

    async fn find_live(&self, verification_id: i64, now: DateTime<Utc>) -> Result<Option<OtpVerification>, BoxError> {
        Ok(self
            .otps
            .read()
            .await
            .iter()
            .find(|v| v.verification_id == verification_id && v.is_live(now))
            .cloned())
    }

    async fn mark_verified(&self, verification_id: i64, now: DateTime<Utc>) -> Result<Option<OtpVerification>, BoxError> {
        let mut otps = self.otps.write().await;
        match otps.iter_mut().find(|v| v.verification_id == verification_id) {
            Some(v) if v.is_live(now) && v.status == VerificationStatus::NotVerified => {
                v.status = VerificationStatus::Verified;
                Ok(Some(v.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn latest_live(
        &self,
        booking_id: i64,
        verification_type: VerificationType,
        now: DateTime<Utc>,
    ) -> Result<Option<OtpVerification>, BoxError> {
        Ok(self
            .otps
            .read()
            .await
            .iter()
            .rev()
            .find(|v| v.booking_id == booking_id && v.verification_type == verification_type && v.is_live(now))
            .cloned())
    }

    async fn find_verified(
        &self,
        booking_id: i64,
        verification_type: VerificationType,
        now: DateTime<Utc>,
    ) -> Result<Option<OtpVerification>, BoxError> {
        Ok(self
            .otps
            .read()
            .await
            .iter()
            .rev()
            .find(|v| {
                v.booking_id == booking_id
                    && v.verification_type == verification_type
                    && v.is_verified()
                    && v.is_live(now)
            })
            .cloned())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, BoxError> {
        let mut otps = self.otps.write().await;
        let before = otps.len();
        otps.retain(|v| v.is_live(now));
        Ok((before - otps.len()) as u64)
    }
}

#[async_trait]
impl PaymentRepository for InMemoryStore {
    async fn insert_initiated(&self, payment: &BookingPayment, request: &PaymentRequest) -> Result<(), BoxError> {
        let mut payments = self.payments.write().await;
        let mut requests = self.requests.write().await;
        payments.insert(payment.payment_id, payment.clone());
        requests.push(request.clone());
        Ok(())
    }

    async fn get_payment(&self, payment_id: i64) -> Result<Option<BookingPayment>, BoxError> {
        Ok(self.payments.read().await.get(&payment_id).cloned())
    }

    async fn list_payments(&self) -> Result<Vec<BookingPayment>, BoxError> {
        let mut payments: Vec<BookingPayment> = self.payments.read().await.values().cloned().collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn list_payments_by_booking(&self, booking_id: i64) -> Result<Vec<BookingPayment>, BoxError> {
        let mut payments: Vec<BookingPayment> = self
            .payments
            .read()
            .await
            .values()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn find_request(
        &self,
        system_transaction_id: &str,
        gateway_transaction_id: &str,
    ) -> Result<Option<PaymentRequest>, BoxError> {
        Ok(self
            .requests
            .read()
            .await
            .iter()
            .find(|r| {
                r.system_transaction_id == system_transaction_id && r.gateway_transaction_id == gateway_transaction_id
            })
            .cloned())
    }

    async fn record_callback(&self, callback: &PaymentCallback) -> Result<(), BoxError> {
        self.callbacks.write().await.push(callback.clone());
        Ok(())
    }

    async fn settle(
        &self,
        payment_id: i64,
        status: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<BookingPayment>, BoxError> {
        let mut payments = self.payments.write().await;
        match payments.get_mut(&payment_id) {
            Some(p) if p.status == PaymentStatus::Pending => {
                p.status = status;
                p.updated_at = at;
                if status == PaymentStatus::Success {
                    p.payment_at = Some(at);
                }
                Ok(Some(p.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl LostParcelRepository for InMemoryStore {
    async fn insert_if_absent(&self, parcel: &LostParcel) -> Result<bool, BoxError> {
        let mut parcels = self.parcels.write().await;
        if parcels.iter().any(|p| p.e_ticket == parcel.e_ticket) {
            return Ok(false);
        }
        parcels.push(parcel.clone());
        Ok(true)
    }

    async fn find_by_e_ticket(&self, e_ticket: &str) -> Result<Option<LostParcel>, BoxError> {
        Ok(self.parcels.read().await.iter().find(|p| p.e_ticket == e_ticket).cloned())
    }

    async fn find_by_reference(&self, reference_id: &str) -> Result<Option<LostParcel>, BoxError> {
        Ok(self.parcels.read().await.iter().find(|p| p.reference_id == reference_id).cloned())
    }

    async fn get_parcel(&self, parcel_id: i64) -> Result<Option<LostParcel>, BoxError> {
        Ok(self.parcels.read().await.iter().find(|p| p.parcel_id == parcel_id).cloned())
    }

    async fn list_parcels(&self) -> Result<Vec<LostParcel>, BoxError> {
        Ok(self.parcels.read().await.clone())
    }
}

#[async_trait]
impl SchedulePort for InMemoryStore {
    async fn schedule_once(&self, name: &str, when: DateTime<Utc>, target: &str, payload: &Value) -> Result<(), BoxError> {
        let entry = ScheduledCallback {
            name: name.to_string(),
            target: target.to_string(),
            payload: payload.clone(),
            fire_at: when,
        };
        let mut schedule = self.schedule.write().await;
        schedule.retain(|existing| existing.name != name);
        schedule.push(entry);
        Ok(())
    }
}

#[async_trait]
impl ScheduleSource for InMemoryStore {
    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledCallback>, BoxError> {
        let mut schedule = self.schedule.write().await;
        schedule.sort_by_key(|entry| entry.fire_at);

        let due = schedule
            .iter()
            .take_while(|entry| entry.fire_at <= now)
            .count()
            .min(usize::try_from(limit).unwrap_or(0));
        Ok(schedule.drain(..due).collect())
    }

    async fn release(&self, callback: &ScheduledCallback, retry_at: DateTime<Utc>) -> Result<(), BoxError> {
        let mut schedule = self.schedule.write().await;
        // a newer schedule_once under the same name wins
        if schedule.iter().any(|existing| existing.name == callback.name) {
            return Ok(());
        }
        schedule.push(ScheduledCallback {
            fire_at: retry_at,
            ..callback.clone()
        });
        Ok(())
    }
}

/// Keeps every notification it is asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: RwLock<Vec<Notification>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl NotificationPort for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), BoxError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err("smtp relay unavailable".into());
        }
        self.sent.write().await.push(notification.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub topic: String,
    pub event_type: String,
    pub payload: Value,
}

#[derive(Default)]
pub struct RecordingEventBus {
    published: RwLock<Vec<PublishedEvent>>,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<PublishedEvent> {
        self.published.read().await.clone()
    }

    pub async fn count(&self, event_type: &str) -> usize {
        self.published.read().await.iter().filter(|e| e.event_type == event_type).count()
    }
}

#[async_trait]
impl EventPort for RecordingEventBus {
    async fn publish(&self, topic: &str, event_type: &str, payload: &Value) -> Result<(), BoxError> {
        self.published.write().await.push(PublishedEvent {
            topic: topic.to_string(),
            event_type: event_type.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryObjectStorage {
    objects: RwLock<Vec<(String, Vec<u8>)>>,
}

impl InMemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }
}

#[async_trait]
impl ObjectStoragePort for InMemoryObjectStorage {
    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, BoxError> {
        let key = format!("{}.{}", uuid::Uuid::new_v4(), extension_for(content_type));
        self.objects.write().await.push((key.clone(), bytes));
        Ok(format!("memory://objects/{}", key))
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/svg+xml" => "svg",
        "image/png" => "png",
        _ => "bin",
    }
}

/// Fixed-window counter; windows never roll over, which is enough for tests.
#[derive(Default)]
pub struct InMemoryRateLimiter {
    hits: RwLock<HashMap<String, i64>>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, key: &str, limit: i64, _window_seconds: i64) -> Result<bool, BoxError> {
        let mut hits = self.hits.write().await;
        let count = hits.entry(key.to_string()).or_insert(0);
        *count += 1;
        Ok(*count <= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::NewBooking;
    use chrono::Duration;

    fn trip() -> TripInfo {
        TripInfo {
            trip_id: 1,
            capacity: 10,
            booking_enabled: true,
            price: 1000,
            cancellation_policy: None,
            schedule: None,
        }
    }

    fn booking(id: i64, seat: i32) -> Booking {
        let now = Utc::now();
        NewBooking {
            booking_id: id,
            trip: trip(),
            commuter_id: 5,
            seat_number: seat,
            expiry_at: now + Duration::minutes(10),
        }
        .into_booking(now)
    }

    #[tokio::test]
    async fn test_seat_insert_is_exclusive_while_active() {
        let store = InMemoryStore::new();
        assert!(store.insert_if_seat_free(&booking(10000001, 4)).await.unwrap());
        assert!(!store.insert_if_seat_free(&booking(10000002, 4)).await.unwrap());

        store
            .transition(10000001, &BookingStatus::EXPIRABLE, BookingStatus::Expired, Utc::now())
            .await
            .unwrap();
        assert!(store.insert_if_seat_free(&booking(10000003, 4)).await.unwrap());
        assert_eq!(store.occupied_seats(1).await.unwrap(), vec![4]);
    }

    #[tokio::test]
    async fn test_transition_is_guarded() {
        let store = InMemoryStore::new();
        store.insert_if_seat_free(&booking(10000001, 1)).await.unwrap();

        let paid = store
            .transition(10000001, &[BookingStatus::Paid], BookingStatus::Cancelled, Utc::now())
            .await
            .unwrap();
        assert!(paid.is_none());
        assert_eq!(store.get(10000001).await.unwrap().unwrap().booking_status, BookingStatus::Creating);
    }

    #[tokio::test]
    async fn test_claimed_schedule_entries_fire_once() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .schedule_once("booking-expiration-1", now, "booking-expiry", &serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(store.claim_due(now, 10).await.unwrap().len(), 1);
        assert!(store.claim_due(now, 10).await.unwrap().is_empty());
        assert!(store.scheduled().await.is_empty());
    }

    #[tokio::test]
    async fn test_released_entry_is_claimable_at_retry_time() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .schedule_once("booking-expiration-2", now, "booking-expiry", &serde_json::json!({"bookingId": 2}))
            .await
            .unwrap();

        let claimed = store.claim_due(now, 10).await.unwrap();
        let retry_at = now + Duration::seconds(30);
        store.release(&claimed[0], retry_at).await.unwrap();

        assert!(store.claim_due(now, 10).await.unwrap().is_empty());
        let again = store.claim_due(retry_at, 10).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].payload["bookingId"], 2);
    }

    #[tokio::test]
    async fn test_claim_respects_limit_and_order() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        for (name, offset) in [("late", 2), ("early", 1), ("future", -5)] {
            store
                .schedule_once(name, now - Duration::seconds(offset), "booking-expiry", &serde_json::json!({}))
                .await
                .unwrap();
        }

        let first = store.claim_due(now, 1).await.unwrap();
        assert_eq!(first[0].name, "late");
        let rest = store.claim_due(now, 10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].name, "early");
        assert_eq!(store.scheduled().await.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_otps_are_invisible_and_purged() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let mut otp = OtpVerification::issue(1, VerificationType::CommuterVerification, Duration::minutes(1), now);
        otp.expiry_at = now - Duration::seconds(1);
        store.insert(&otp).await.unwrap();

        assert!(store.find_live(otp.verification_id, now).await.unwrap().is_none());
        assert!(store.mark_verified(otp.verification_id, now).await.unwrap().is_none());
        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
    }
}
