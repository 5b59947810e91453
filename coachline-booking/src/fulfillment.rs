use chrono::Utc;
use coachline_core::booking::{Booking, BookingStatus, BookingView, Commuter};
use coachline_core::otp::VerificationType;
use coachline_core::ports::{Notification, NotificationTemplate};
use coachline_core::repository::{BookingRepository, CommuterRepository};
use coachline_core::BoxError;
use coachline_shared::models::events::BookingEvent;
use qrcode::render::svg;
use qrcode::QrCode;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::effects::Effects;
use crate::otp::{GatedAccess, OtpError, OtpVerificationStore};
use crate::settings::BookingSettings;

/// Issues e-tickets after payment and guards their retrieval behind an OTP.
pub struct TicketIssuer {
    bookings: Arc<dyn BookingRepository>,
    commuters: Arc<dyn CommuterRepository>,
    otps: OtpVerificationStore,
    effects: Effects,
    settings: BookingSettings,
}

impl TicketIssuer {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        commuters: Arc<dyn CommuterRepository>,
        otps: OtpVerificationStore,
        effects: Effects,
        settings: BookingSettings,
    ) -> Self {
        Self {
            bookings,
            commuters,
            otps,
            effects,
            settings,
        }
    }

    /// Two-step retrieval: the first call issues a challenge, the same call
    /// after the challenge is verified returns the ticket.
    pub async fn get_by_e_ticket(&self, e_ticket: &str) -> Result<GatedAccess<BookingView>, TicketError> {
        let booking = self
            .bookings
            .find_by_e_ticket(e_ticket)
            .await
            .map_err(TicketError::Storage)?
            .filter(|b| b.booking_status == BookingStatus::Paid)
            .ok_or(TicketError::NotFound)?;
        let commuter = self.commuter_of(&booking).await?;

        if self
            .otps
            .require_verified(booking.booking_id, VerificationType::ETicketVerificationGet)
            .await?
        {
            self.deliver_ticket(&booking, &commuter).await;
            return Ok(GatedAccess::Granted(BookingView {
                booking,
                commuter: Some(commuter),
            }));
        }

        let ttl = self.settings.e_ticket_otp_waiting;
        let challenge = self
            .otps
            .issue(booking.booking_id, VerificationType::ETicketVerificationGet, ttl)
            .await?;
        self.effects
            .notify(Notification::new(
                commuter.email(),
                NotificationTemplate::ETicketVerificationOtp,
                json!({
                    "firstName": commuter.name.first_name,
                    "otp": challenge.otp,
                    "validMinutes": ttl.num_minutes(),
                }),
            ))
            .await;

        Ok(GatedAccess::Challenge {
            verification_id: challenge.verification_id,
        })
    }

    /// Attach a ticket to a booking that just became `PAID`. Only the call
    /// that actually attaches the ticket runs the downstream effects, so a
    /// repeated success leaves the first ticket in place.
    pub async fn on_payment_success(&self, booking: &Booking) -> Result<Option<Booking>, TicketError> {
        let e_ticket = Uuid::new_v4().to_string();
        let qr_token = json!({ "eTicket": e_ticket }).to_string();

        let attached = self
            .bookings
            .attach_ticket(booking.booking_id, &e_ticket, &qr_token, Utc::now())
            .await
            .map_err(TicketError::Storage)?;

        let ticketed = match attached {
            Some(b) => b,
            None => {
                warn!("Booking {} already carries a ticket, skipping issuance", booking.booking_id);
                return Ok(None);
            }
        };
        info!("Issued e-ticket for booking {}", ticketed.booking_id);

        self.effects
            .publish(&BookingEvent::PaymentSuccess {
                booking_id: ticketed.booking_id,
                trip_id: ticketed.trip_id(),
                seat_number: ticketed.seat_number,
            })
            .await;

        match self.commuter_of(&ticketed).await {
            Ok(commuter) => {
                self.effects
                    .notify(Notification::new(
                        commuter.email(),
                        NotificationTemplate::PaymentSuccess,
                        json!({
                            "firstName": commuter.name.first_name,
                            "bookingId": ticketed.booking_id,
                            "tripId": ticketed.trip_id(),
                            "seatNumber": ticketed.seat_number,
                            "price": ticketed.price,
                        }),
                    ))
                    .await;
                self.deliver_ticket(&ticketed, &commuter).await;
            }
            Err(e) => error!("Ticket issued for booking {} but commuter lookup failed: {}", ticketed.booking_id, e),
        }

        Ok(Some(ticketed))
    }

    /// Email the e-ticket. The QR image is attached by URL when it could be
    /// rendered and uploaded; otherwise the mail goes out without it.
    async fn deliver_ticket(&self, booking: &Booking, commuter: &Commuter) {
        let qr_image_url = match booking.qr_validation_token.as_deref().map(render_qr_svg) {
            Some(Ok(svg)) => self.effects.store_object(svg.into_bytes(), "image/svg+xml").await,
            Some(Err(e)) => {
                error!("Failed to render QR for booking {}: {}", booking.booking_id, e);
                None
            }
            None => None,
        };

        self.effects
            .notify(Notification::new(
                commuter.email(),
                NotificationTemplate::ETicket,
                json!({
                    "firstName": commuter.name.first_name,
                    "fullName": commuter.full_name(),
                    "bookingId": booking.booking_id,
                    "eTicket": booking.e_ticket,
                    "tripId": booking.trip_id(),
                    "schedule": booking.trip.schedule,
                    "seatNumber": booking.seat_number,
                    "price": booking.price,
                    "qrImageUrl": qr_image_url,
                }),
            ))
            .await;
    }

    async fn commuter_of(&self, booking: &Booking) -> Result<Commuter, TicketError> {
        self.commuters
            .get_commuter(booking.commuter_id)
            .await
            .map_err(TicketError::Storage)?
            .ok_or_else(|| TicketError::Storage(format!("commuter {} missing", booking.commuter_id).into()))
    }
}

/// Render the QR payload as an SVG document.
pub fn render_qr_svg(token: &str) -> Result<String, qrcode::types::QrError> {
    let code = QrCode::new(token.as_bytes())?;
    Ok(code.render::<svg::Color>().min_dimensions(200, 200).build())
}

#[derive(Debug, thiserror::Error)]
pub enum TicketError {
    #[error("no booking found for this ticket")]
    NotFound,

    #[error(transparent)]
    Otp(#[from] OtpError),

    #[error("ticket storage failure: {0}")]
    Storage(BoxError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryHarness;
    use prometheus::Registry;

    async fn paid(h: &InMemoryHarness) -> Booking {
        h.seed_trip(7, 40, 2500).await;
        h.seed_commuter(70).await;
        let created = h.services.manager.create(70, 7, 1).await.unwrap();
        let id = created.booking.booking.booking_id;
        h.verify_latest(id, VerificationType::CommuterVerification).await.unwrap();
        h.services.manager.mark_paid(id).await.unwrap().unwrap()
    }

    #[test]
    fn test_qr_svg_renders() {
        let svg = render_qr_svg(r#"{"eTicket":"abc"}"#).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[tokio::test]
    async fn test_ticket_attached_once() {
        let h = InMemoryHarness::new(BookingSettings::default(), &Registry::new()).unwrap();
        let booking = paid(&h).await;

        let first = h.services.tickets.on_payment_success(&booking).await.unwrap().unwrap();
        let second = h.services.tickets.on_payment_success(&booking).await.unwrap();

        assert!(second.is_none());
        let stored = h.store.get(booking.booking_id).await.unwrap().unwrap();
        assert_eq!(stored.e_ticket, first.e_ticket);
        assert_eq!(h.events.count("EVN_BOOKING_PAYMENT_SUCCESS").await, 1);
        assert_eq!(h.storage.object_count().await, 1);

        let token: serde_json::Value = serde_json::from_str(stored.qr_validation_token.as_deref().unwrap()).unwrap();
        assert_eq!(token["eTicket"].as_str(), stored.e_ticket.as_deref());
    }

    #[tokio::test]
    async fn test_unpaid_booking_gets_no_ticket() {
        let h = InMemoryHarness::new(BookingSettings::default(), &Registry::new()).unwrap();
        h.seed_trip(7, 40, 2500).await;
        h.seed_commuter(70).await;
        let created = h.services.manager.create(70, 7, 2).await.unwrap();

        let issued = h.services.tickets.on_payment_success(&created.booking.booking).await.unwrap();
        assert!(issued.is_none());
    }

    #[tokio::test]
    async fn test_e_ticket_retrieval_is_gated() {
        let h = InMemoryHarness::new(BookingSettings::default(), &Registry::new()).unwrap();
        let booking = paid(&h).await;
        let ticketed = h.services.tickets.on_payment_success(&booking).await.unwrap().unwrap();
        let e_ticket = ticketed.e_ticket.clone().unwrap();

        let first = h.services.tickets.get_by_e_ticket(&e_ticket).await.unwrap();
        let verification_id = match first {
            GatedAccess::Challenge { verification_id } => verification_id,
            GatedAccess::Granted(_) => panic!("ticket returned without verification"),
        };

        let challenge = h
            .services
            .otps
            .latest(booking.booking_id, VerificationType::ETicketVerificationGet)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(challenge.verification_id, verification_id);
        h.services.otps.check(verification_id, &challenge.otp).await.unwrap();

        match h.services.tickets.get_by_e_ticket(&e_ticket).await.unwrap() {
            GatedAccess::Granted(view) => {
                assert_eq!(view.booking.e_ticket.as_deref(), Some(e_ticket.as_str()));
                assert!(view.commuter.is_some());
            }
            GatedAccess::Challenge { .. } => panic!("verified request was challenged again"),
        }
    }

    #[tokio::test]
    async fn test_unknown_ticket_is_not_found() {
        let h = InMemoryHarness::new(BookingSettings::default(), &Registry::new()).unwrap();
        assert!(matches!(
            h.services.tickets.get_by_e_ticket("unknown").await,
            Err(TicketError::NotFound)
        ));
    }
}
