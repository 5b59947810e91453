use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::booking::{Booking, BookingStatus, BookingView, Commuter};
use crate::otp::{OtpVerification, VerificationType};
use crate::parcel::LostParcel;
use crate::payment::{BookingPayment, PaymentCallback, PaymentRequest, PaymentStatus};
use crate::BoxError;

/// Booking persistence. Every mutating method is a conditional write that
/// returns `None` when the guard no longer holds, so concurrent callers
/// resolve to a single winner.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Insert `booking` unless another active booking holds its
    /// (trip, seat). Returns `false` when the seat is taken.
    async fn insert_if_seat_free(&self, booking: &Booking) -> Result<bool, BoxError>;

    async fn occupied_seats(&self, trip_id: i64) -> Result<Vec<i32>, BoxError>;

    async fn get(&self, booking_id: i64) -> Result<Option<Booking>, BoxError>;

    async fn get_view(&self, booking_id: i64) -> Result<Option<BookingView>, BoxError>;

    async fn list_views(&self) -> Result<Vec<BookingView>, BoxError>;

    async fn list_views_by_trip(&self, trip_id: i64) -> Result<Vec<BookingView>, BoxError>;

    async fn find_by_e_ticket(&self, e_ticket: &str) -> Result<Option<Booking>, BoxError>;

    /// Move to `to` only while the current status is one of `from`.
    async fn transition(
        &self,
        booking_id: i64,
        from: &[BookingStatus],
        to: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Booking>, BoxError>;

    /// `PAID` with an unused ticket becomes `CANCELLED`, stamping `cancelled_at`.
    async fn cancel_paid(&self, booking_id: i64, at: DateTime<Utc>) -> Result<Option<Booking>, BoxError>;

    /// `NOT_USED` becomes `USED` while the booking is `PAID`.
    async fn mark_ticket_used(&self, booking_id: i64, at: DateTime<Utc>) -> Result<Option<Booking>, BoxError>;

    /// Store the e-ticket and QR token on a `PAID` booking that has none yet.
    async fn attach_ticket(
        &self,
        booking_id: i64,
        e_ticket: &str,
        qr_validation_token: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Booking>, BoxError>;
}

#[async_trait]
pub trait OtpRepository: Send + Sync {
    async fn insert(&self, verification: &OtpVerification) -> Result<(), BoxError>;

    /// Unexpired record by id.
    async fn find_live(&self, verification_id: i64, now: DateTime<Utc>) -> Result<Option<OtpVerification>, BoxError>;

    /// Flip `NOT_VERIFIED` to `VERIFIED` while the record is still live.
    /// `None` means another caller won or the record lapsed.
    async fn mark_verified(&self, verification_id: i64, now: DateTime<Utc>) -> Result<Option<OtpVerification>, BoxError>;

    /// Most recently issued unexpired record for (booking, purpose).
    async fn latest_live(
        &self,
        booking_id: i64,
        verification_type: VerificationType,
        now: DateTime<Utc>,
    ) -> Result<Option<OtpVerification>, BoxError>;

    async fn find_verified(
        &self,
        booking_id: i64,
        verification_type: VerificationType,
        now: DateTime<Utc>,
    ) -> Result<Option<OtpVerification>, BoxError>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, BoxError>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Persist the payment and its gateway request together.
    async fn insert_initiated(&self, payment: &BookingPayment, request: &PaymentRequest) -> Result<(), BoxError>;

    async fn get_payment(&self, payment_id: i64) -> Result<Option<BookingPayment>, BoxError>;

    async fn list_payments(&self) -> Result<Vec<BookingPayment>, BoxError>;

    async fn list_payments_by_booking(&self, booking_id: i64) -> Result<Vec<BookingPayment>, BoxError>;

    async fn find_request(
        &self,
        system_transaction_id: &str,
        gateway_transaction_id: &str,
    ) -> Result<Option<PaymentRequest>, BoxError>;

    async fn record_callback(&self, callback: &PaymentCallback) -> Result<(), BoxError>;

    /// Settle a `PENDING` payment. Only the first caller gets `Some`.
    async fn settle(
        &self,
        payment_id: i64,
        status: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<BookingPayment>, BoxError>;
}

#[async_trait]
pub trait CommuterRepository: Send + Sync {
    async fn get_commuter(&self, commuter_id: i64) -> Result<Option<Commuter>, BoxError>;
}

#[async_trait]
pub trait LostParcelRepository: Send + Sync {
    /// Insert unless a report already exists for the same e-ticket.
    async fn insert_if_absent(&self, parcel: &LostParcel) -> Result<bool, BoxError>;

    async fn find_by_e_ticket(&self, e_ticket: &str) -> Result<Option<LostParcel>, BoxError>;

    async fn find_by_reference(&self, reference_id: &str) -> Result<Option<LostParcel>, BoxError>;

    async fn get_parcel(&self, parcel_id: i64) -> Result<Option<LostParcel>, BoxError>;

    async fn list_parcels(&self) -> Result<Vec<LostParcel>, BoxError>;
}
