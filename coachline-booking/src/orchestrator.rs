use chrono::Utc;
use coachline_core::booking::{Booking, BookingStatus};
use coachline_core::ids;
use coachline_core::otp::VerificationType;
use coachline_core::payment::{
    BookingPayment, GatewayInitiation, PaymentCallback, PaymentGatewayPort, PaymentMethod, PaymentRequest,
    PaymentStatus, PaymentType, CURRENCY,
};
use coachline_core::repository::{BookingRepository, PaymentRepository};
use coachline_core::BoxError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::fulfillment::{TicketError, TicketIssuer};
use crate::manager::{BookingError, BookingManager};
use crate::otp::{OtpError, OtpVerificationStore};
use crate::settings::BookingSettings;

/// What the caller needs to send the commuter to the hosted payment page.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitiated {
    pub payment_id: i64,
    pub request_id: i64,
    pub booking_id: i64,
    pub amount: i64,
    pub currency: String,
    pub system_transaction_id: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone)]
pub struct CallbackInput {
    pub transaction_id: String,
    pub system_transaction_id: String,
    pub status: String,
    pub details: Option<String>,
}

impl CallbackInput {
    fn is_success(&self) -> bool {
        self.status.trim() == PaymentStatus::Success.as_str()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallbackReceipt {
    pub callback_id: i64,
    pub request_id: i64,
    pub payment_id: i64,
    pub payment_status: PaymentStatus,
    /// `false` when the payment had already been settled by an earlier callback.
    pub applied: bool,
}

pub struct PaymentOrchestrator {
    bookings: Arc<dyn BookingRepository>,
    payments: Arc<dyn PaymentRepository>,
    otps: OtpVerificationStore,
    gateway: Arc<dyn PaymentGatewayPort>,
    manager: Arc<BookingManager>,
    tickets: Arc<TicketIssuer>,
    settings: BookingSettings,
}

impl PaymentOrchestrator {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        payments: Arc<dyn PaymentRepository>,
        otps: OtpVerificationStore,
        gateway: Arc<dyn PaymentGatewayPort>,
        manager: Arc<BookingManager>,
        tickets: Arc<TicketIssuer>,
        settings: BookingSettings,
    ) -> Self {
        Self {
            bookings,
            payments,
            otps,
            gateway,
            manager,
            tickets,
            settings,
        }
    }

    /// Open a gateway session for a verified, unpaid booking. Nothing is
    /// written unless the gateway answers in time.
    pub async fn initiate(&self, booking_id: i64, requested_amount: Option<i64>) -> Result<PaymentInitiated, PaymentError> {
        // 1. Eligibility
        let booking = self.eligible_booking(booking_id).await?;
        let amount = if booking.price > 0 {
            booking.price
        } else {
            requested_amount.filter(|a| *a > 0).ok_or(PaymentError::MissingAmount)?
        };

        // 2. Single gateway attempt under a fixed timeout
        let initiation = GatewayInitiation {
            amount,
            currency: CURRENCY.to_string(),
            system_transaction_id: Uuid::new_v4().to_string(),
            callback_url: self.settings.callback_url.clone(),
        };
        let session = match tokio::time::timeout(self.settings.gateway_timeout, self.gateway.initiate(&initiation)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                error!("Payment gateway rejected booking {}: {}", booking_id, e);
                return Err(PaymentError::Gateway(e));
            }
            Err(_) => {
                error!(
                    "Payment gateway timed out after {:?} for booking {}",
                    self.settings.gateway_timeout, booking_id
                );
                return Err(PaymentError::GatewayTimeout);
            }
        };

        // 3. Persist payment + request together
        let now = Utc::now();
        let payment = BookingPayment {
            payment_id: ids::short_id(),
            booking_id,
            amount,
            currency: CURRENCY.to_string(),
            method: PaymentMethod::Card,
            payment_type: PaymentType::Booking,
            status: PaymentStatus::Pending,
            payment_at: None,
            created_at: now,
            updated_at: now,
        };
        let request = PaymentRequest {
            request_id: ids::short_id(),
            payment_id: payment.payment_id,
            booking_id,
            system_transaction_id: initiation.system_transaction_id.clone(),
            gateway_transaction_id: session.gateway_transaction_id,
            redirect_url: session.redirect_url.clone(),
            callback_url: initiation.callback_url,
            created_at: now,
        };
        self.payments
            .insert_initiated(&payment, &request)
            .await
            .map_err(PaymentError::Storage)?;

        info!(
            "Payment {} initiated for booking {} ({} {})",
            payment.payment_id, booking_id, amount, CURRENCY
        );

        Ok(PaymentInitiated {
            payment_id: payment.payment_id,
            request_id: request.request_id,
            booking_id,
            amount,
            currency: payment.currency,
            system_transaction_id: request.system_transaction_id,
            redirect_url: session.redirect_url,
        })
    }

    async fn eligible_booking(&self, booking_id: i64) -> Result<Booking, PaymentError> {
        let booking = self
            .bookings
            .get(booking_id)
            .await
            .map_err(PaymentError::Storage)?
            .ok_or(PaymentError::BookingNotFound)?;

        match booking.booking_status {
            BookingStatus::Creating => return Err(PaymentError::StillCreating),
            BookingStatus::Cancelled => return Err(PaymentError::Cancelled),
            BookingStatus::Expired => return Err(PaymentError::Expired),
            BookingStatus::Paid => return Err(PaymentError::AlreadyPaid),
            BookingStatus::Pending => {}
        }
        if booking.expiry_at <= Utc::now() {
            return Err(PaymentError::WindowClosed);
        }
        match self
            .otps
            .latest(booking_id, VerificationType::CommuterVerification)
            .await?
        {
            None => Err(PaymentError::WindowClosed),
            Some(otp) if !otp.is_verified() => Err(PaymentError::CommuterNotVerified),
            Some(_) => Ok(booking),
        }
    }

    /// Apply a gateway notification. The callback is always recorded; the
    /// payment settles at most once and only that first settlement moves
    /// the booking.
    pub async fn handle_callback(&self, input: CallbackInput) -> Result<CallbackReceipt, PaymentError> {
        let request = self
            .payments
            .find_request(&input.system_transaction_id, &input.transaction_id)
            .await
            .map_err(PaymentError::Storage)?
            .ok_or(PaymentError::RequestNotFound)?;

        let now = Utc::now();
        let callback = PaymentCallback {
            callback_id: ids::short_id(),
            request_id: request.request_id,
            status: input.status.clone(),
            details: input.details.clone(),
            created_at: now,
        };
        self.payments
            .record_callback(&callback)
            .await
            .map_err(PaymentError::Storage)?;

        let outcome = if input.is_success() {
            PaymentStatus::Success
        } else {
            PaymentStatus::Failed
        };
        let settled = self
            .payments
            .settle(request.payment_id, outcome, now)
            .await
            .map_err(PaymentError::Storage)?;
        let applied = settled.is_some();

        let payment = match settled {
            Some(p) => p,
            None => {
                info!("Payment {} already settled, callback {} recorded only", request.payment_id, callback.callback_id);
                self.payments
                    .get_payment(request.payment_id)
                    .await
                    .map_err(PaymentError::Storage)?
                    .ok_or(PaymentError::NotFound)?
            }
        };

        if payment.status == PaymentStatus::Success && payment.payment_type == PaymentType::Booking {
            self.complete_booking(payment.booking_id, applied).await?;
        } else if applied {
            // seat stays held until the booking expires
            warn!("Payment {} for booking {} failed: {}", payment.payment_id, payment.booking_id, input.status);
        }

        Ok(CallbackReceipt {
            callback_id: callback.callback_id,
            request_id: request.request_id,
            payment_id: payment.payment_id,
            payment_status: payment.status,
            applied,
        })
    }

    /// Mark the booking paid and issue its ticket. Safe to repeat: a ticket
    /// is attached at most once, and a retried callback finishes an
    /// issuance that failed half way.
    async fn complete_booking(&self, booking_id: i64, first_settlement: bool) -> Result<(), PaymentError> {
        if let Some(paid) = self.manager.mark_paid(booking_id).await? {
            self.tickets.on_payment_success(&paid).await?;
            return Ok(());
        }

        let current = self
            .bookings
            .get(booking_id)
            .await
            .map_err(PaymentError::Storage)?
            .ok_or(PaymentError::BookingNotFound)?;

        match current.booking_status {
            BookingStatus::Paid if current.e_ticket.is_none() => {
                self.tickets.on_payment_success(&current).await?;
            }
            BookingStatus::Paid if first_settlement => {
                // another payment session already paid for this booking
                warn!(
                    "Second payment succeeded for booking {}, ticket {} already issued, refund required",
                    booking_id,
                    current.e_ticket.as_deref().unwrap_or_default()
                );
            }
            BookingStatus::Paid => {}
            status if first_settlement => {
                warn!(
                    "Payment succeeded for booking {} in status {}, refund required",
                    booking_id, status
                );
            }
            _ => {}
        }
        Ok(())
    }

    pub async fn get(&self, payment_id: i64) -> Result<Option<BookingPayment>, PaymentError> {
        self.payments.get_payment(payment_id).await.map_err(PaymentError::Storage)
    }

    pub async fn list(&self) -> Result<Vec<BookingPayment>, PaymentError> {
        self.payments.list_payments().await.map_err(PaymentError::Storage)
    }

    pub async fn list_by_booking(&self, booking_id: i64) -> Result<Vec<BookingPayment>, PaymentError> {
        self.payments
            .list_payments_by_booking(booking_id)
            .await
            .map_err(PaymentError::Storage)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("booking does not exist in the database")]
    BookingNotFound,

    #[error("this booking is still creating, please pay later")]
    StillCreating,

    #[error("this booking is cancelled.")]
    Cancelled,

    #[error("this booking is already expired")]
    Expired,

    #[error("you have already paid for this booking")]
    AlreadyPaid,

    #[error("booking process is already expired.")]
    WindowClosed,

    #[error("this commuter is not verified")]
    CommuterNotVerified,

    #[error("amount is required for this booking")]
    MissingAmount,

    #[error("payment gateway error: {0}")]
    Gateway(BoxError),

    #[error("payment gateway did not respond in time")]
    GatewayTimeout,

    #[error("no payment request matches this callback")]
    RequestNotFound,

    #[error("resource not found")]
    NotFound,

    #[error(transparent)]
    Otp(#[from] OtpError),

    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error(transparent)]
    Ticket(#[from] TicketError),

    #[error("payment storage failure: {0}")]
    Storage(BoxError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryHarness;
    use coachline_core::payment::MockPaymentGateway;
    use coachline_core::repository::OtpRepository;
    use prometheus::Registry;
    use std::time::Duration;

    const TRIP: i64 = 77;
    const COMMUTER: i64 = 700;

    async fn harness_with(gateway: MockPaymentGateway, settings: BookingSettings) -> InMemoryHarness {
        let h = InMemoryHarness::with_gateway(Arc::new(gateway), settings, &Registry::new()).unwrap();
        h.seed_trip(TRIP, 30, 125_000).await;
        h.seed_commuter(COMMUTER).await;
        h
    }

    async fn verified_booking(h: &InMemoryHarness, seat: i32) -> i64 {
        let created = h.services.manager.create(COMMUTER, TRIP, seat).await.unwrap();
        let id = created.booking.booking.booking_id;
        h.verify_latest(id, VerificationType::CommuterVerification).await.unwrap();
        id
    }

    fn success_for(started: &PaymentInitiated) -> CallbackInput {
        CallbackInput {
            transaction_id: format!("gw-{}", started.system_transaction_id),
            system_transaction_id: started.system_transaction_id.clone(),
            status: "SUCCESS".to_string(),
            details: Some("approved".to_string()),
        }
    }

    #[tokio::test]
    async fn test_initiate_persists_pending_payment() {
        let h = harness_with(MockPaymentGateway::new(), BookingSettings::default()).await;
        let id = verified_booking(&h, 1).await;

        let started = h.services.payments.initiate(id, None).await.unwrap();

        assert_eq!(started.amount, 125_000);
        assert_eq!(started.currency, "LKR");
        assert!(started.redirect_url.ends_with(&started.system_transaction_id));
        let payment = h.services.payments.get(started.payment_id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(h.store.payment_requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_eligibility_errors() {
        let h = harness_with(MockPaymentGateway::new(), BookingSettings::default()).await;

        let missing = h.services.payments.initiate(11111111, None).await.unwrap_err();
        assert_eq!(missing.to_string(), "booking does not exist in the database");

        let created = h.services.manager.create(COMMUTER, TRIP, 2).await.unwrap();
        let creating = h.services.payments.initiate(created.booking.booking.booking_id, None).await.unwrap_err();
        assert_eq!(creating.to_string(), "this booking is still creating, please pay later");

        let id = verified_booking(&h, 3).await;
        h.services.manager.expire(id).await.unwrap();
        let expired = h.services.payments.initiate(id, None).await.unwrap_err();
        assert_eq!(expired.to_string(), "this booking is already expired");

        let id = verified_booking(&h, 4).await;
        h.services.manager.mark_paid(id).await.unwrap();
        let paid = h.services.payments.initiate(id, None).await.unwrap_err();
        assert_eq!(paid.to_string(), "you have already paid for this booking");
    }

    #[tokio::test]
    async fn test_lapsed_window_blocks_payment() {
        let settings = BookingSettings {
            booking_waiting: chrono::Duration::zero(),
            ..BookingSettings::default()
        };
        let h = harness_with(MockPaymentGateway::new(), settings).await;
        let id = verified_booking(&h, 5).await;

        let lapsed = h.services.payments.initiate(id, None).await.unwrap_err();
        assert!(matches!(lapsed, PaymentError::WindowClosed));
    }

    #[tokio::test]
    async fn test_gateway_failure_writes_nothing() {
        let h = harness_with(MockPaymentGateway::failing(), BookingSettings::default()).await;
        let id = verified_booking(&h, 6).await;

        assert!(matches!(h.services.payments.initiate(id, None).await, Err(PaymentError::Gateway(_))));
        assert!(h.services.payments.list().await.unwrap().is_empty());
        assert!(h.store.payment_requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_gateway_timeout_writes_nothing() {
        let settings = BookingSettings {
            gateway_timeout: Duration::from_millis(50),
            ..BookingSettings::default()
        };
        let h = harness_with(MockPaymentGateway::slow(Duration::from_secs(1)), settings).await;
        let id = verified_booking(&h, 7).await;

        assert!(matches!(h.services.payments.initiate(id, None).await, Err(PaymentError::GatewayTimeout)));
        assert!(h.services.payments.list_by_booking(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unmatched_callback_changes_nothing() {
        let h = harness_with(MockPaymentGateway::new(), BookingSettings::default()).await;
        let id = verified_booking(&h, 8).await;
        let started = h.services.payments.initiate(id, None).await.unwrap();

        let spoofed = CallbackInput {
            transaction_id: "gw-someone-else".to_string(),
            ..success_for(&started)
        };
        assert!(matches!(
            h.services.payments.handle_callback(spoofed).await,
            Err(PaymentError::RequestNotFound)
        ));
        assert!(h.store.callbacks().await.is_empty());
        assert_eq!(h.store.get(id).await.unwrap().unwrap().booking_status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn test_duplicate_success_issues_one_ticket() {
        let h = harness_with(MockPaymentGateway::new(), BookingSettings::default()).await;
        let id = verified_booking(&h, 9).await;
        let started = h.services.payments.initiate(id, None).await.unwrap();

        let first = h.services.payments.handle_callback(success_for(&started)).await.unwrap();
        let ticket = h.store.get(id).await.unwrap().unwrap().e_ticket;
        let second = h.services.payments.handle_callback(success_for(&started)).await.unwrap();

        assert!(first.applied);
        assert!(!second.applied);
        assert_eq!(second.payment_status, PaymentStatus::Success);

        let booking = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(booking.booking_status, BookingStatus::Paid);
        assert!(ticket.is_some());
        assert_eq!(booking.e_ticket, ticket);
        assert_eq!(h.events.count("EVN_BOOKING_PAYMENT_SUCCESS").await, 1);
        assert_eq!(h.store.callbacks().await.len(), 2);

        let payment = h.services.payments.get(started.payment_id).await.unwrap().unwrap();
        assert!(payment.payment_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_callback_keeps_seat_held() {
        let h = harness_with(MockPaymentGateway::new(), BookingSettings::default()).await;
        let id = verified_booking(&h, 10).await;
        let started = h.services.payments.initiate(id, None).await.unwrap();

        let receipt = h
            .services
            .payments
            .handle_callback(CallbackInput {
                status: "FAILED".to_string(),
                ..success_for(&started)
            })
            .await
            .unwrap();

        assert_eq!(receipt.payment_status, PaymentStatus::Failed);
        let booking = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(booking.booking_status, BookingStatus::Pending);
        assert!(booking.e_ticket.is_none());

        // a late success for a failed payment changes nothing
        let late = h.services.payments.handle_callback(success_for(&started)).await.unwrap();
        assert!(!late.applied);
        assert_eq!(h.store.get(id).await.unwrap().unwrap().booking_status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn test_missing_commuter_otp_reads_as_lapsed_process() {
        let h = harness_with(MockPaymentGateway::new(), BookingSettings::default()).await;
        let id = verified_booking(&h, 12).await;
        h.store
            .purge_expired(Utc::now() + chrono::Duration::days(1))
            .await
            .unwrap();

        let err = h.services.payments.initiate(id, None).await.unwrap_err();
        assert!(matches!(err, PaymentError::WindowClosed));
        assert_eq!(err.to_string(), "booking process is already expired.");
    }

    #[tokio::test]
    async fn test_second_session_success_keeps_first_ticket() {
        let h = harness_with(MockPaymentGateway::new(), BookingSettings::default()).await;
        let id = verified_booking(&h, 13).await;
        let first = h.services.payments.initiate(id, None).await.unwrap();
        let second = h.services.payments.initiate(id, None).await.unwrap();
        assert_ne!(first.payment_id, second.payment_id);

        h.services.payments.handle_callback(success_for(&first)).await.unwrap();
        let ticket = h.store.get(id).await.unwrap().unwrap().e_ticket;

        let late = h.services.payments.handle_callback(success_for(&second)).await.unwrap();
        assert!(late.applied);
        assert_eq!(late.payment_status, PaymentStatus::Success);

        let booking = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(booking.booking_status, BookingStatus::Paid);
        assert_eq!(booking.e_ticket, ticket);
        assert_eq!(h.events.count("EVN_BOOKING_PAYMENT_SUCCESS").await, 1);
    }

    #[tokio::test]
    async fn test_success_after_expiry_leaves_booking_expired() {
        let h = harness_with(MockPaymentGateway::new(), BookingSettings::default()).await;
        let id = verified_booking(&h, 11).await;
        let started = h.services.payments.initiate(id, None).await.unwrap();
        h.services.manager.expire(id).await.unwrap();

        let receipt = h.services.payments.handle_callback(success_for(&started)).await.unwrap();

        assert_eq!(receipt.payment_status, PaymentStatus::Success);
        let booking = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(booking.booking_status, BookingStatus::Expired);
        assert!(booking.e_ticket.is_none());
    }
}
