use chrono::Utc;
use coachline_core::booking::Commuter;
use coachline_core::ids;
use coachline_core::otp::VerificationType;
use coachline_core::parcel::{LostParcel, ParcelStatus};
use coachline_core::ports::{Notification, NotificationTemplate};
use coachline_core::repository::{BookingRepository, CommuterRepository, LostParcelRepository};
use coachline_core::BoxError;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::effects::Effects;
use crate::otp::{GatedAccess, OtpError, OtpVerificationStore};
use crate::settings::BookingSettings;

#[derive(Debug, Clone)]
pub struct ParcelReport {
    pub e_ticket: String,
    pub parcel_type: String,
    pub name: String,
    pub description: Option<String>,
}

/// Lost-item reports filed against a ticket.
pub struct LostParcelDesk {
    parcels: Arc<dyn LostParcelRepository>,
    bookings: Arc<dyn BookingRepository>,
    commuters: Arc<dyn CommuterRepository>,
    otps: OtpVerificationStore,
    effects: Effects,
    settings: BookingSettings,
}

impl LostParcelDesk {
    pub fn new(
        parcels: Arc<dyn LostParcelRepository>,
        bookings: Arc<dyn BookingRepository>,
        commuters: Arc<dyn CommuterRepository>,
        otps: OtpVerificationStore,
        effects: Effects,
        settings: BookingSettings,
    ) -> Self {
        Self {
            parcels,
            bookings,
            commuters,
            otps,
            effects,
            settings,
        }
    }

    /// File a report. A ticket carries at most one report.
    pub async fn report(&self, report: ParcelReport) -> Result<LostParcel, ParcelError> {
        if self
            .parcels
            .find_by_e_ticket(&report.e_ticket)
            .await
            .map_err(ParcelError::Storage)?
            .is_some()
        {
            return Err(ParcelError::AlreadyReported);
        }

        let booking = self
            .bookings
            .find_by_e_ticket(&report.e_ticket)
            .await
            .map_err(ParcelError::Storage)?
            .ok_or(ParcelError::NoBookingFound)?;
        let commuter = self
            .commuters
            .get_commuter(booking.commuter_id)
            .await
            .map_err(ParcelError::Storage)?;

        let now = Utc::now();
        let parcel = LostParcel {
            parcel_id: ids::short_id(),
            reference_id: Uuid::new_v4().to_string(),
            e_ticket: report.e_ticket,
            booking_id: booking.booking_id,
            parcel_type: report.parcel_type,
            name: report.name,
            description: report.description,
            status: ParcelStatus::Requested,
            commuter,
            created_at: now,
            updated_at: now,
        };

        // the unique e-ticket constraint settles concurrent reports
        if !self.parcels.insert_if_absent(&parcel).await.map_err(ParcelError::Storage)? {
            return Err(ParcelError::AlreadyReported);
        }
        info!("Lost parcel {} reported for booking {}", parcel.reference_id, parcel.booking_id);

        if let Some(commuter) = &parcel.commuter {
            self.notify_status(commuter, &parcel, NotificationTemplate::LostParcelRequested)
                .await;
        }
        Ok(parcel)
    }

    /// OTP-gated status lookup, same two-step protocol as e-ticket retrieval.
    pub async fn status_by_reference(&self, reference_id: &str) -> Result<GatedAccess<LostParcel>, ParcelError> {
        let parcel = self
            .parcels
            .find_by_reference(reference_id)
            .await
            .map_err(ParcelError::Storage)?
            .ok_or(ParcelError::NotFound)?;

        let Some(commuter) = parcel.commuter.clone() else {
            warn!("Lost parcel {} has no commuter to verify against", parcel.reference_id);
            return Err(ParcelError::NotFound);
        };

        if self
            .otps
            .require_verified(parcel.booking_id, VerificationType::LostParcelVerificationGet)
            .await?
        {
            self.notify_status(&commuter, &parcel, NotificationTemplate::LostParcelStatus)
                .await;
            return Ok(GatedAccess::Granted(parcel));
        }

        let ttl = self.settings.e_ticket_otp_waiting;
        let challenge = self
            .otps
            .issue(parcel.booking_id, VerificationType::LostParcelVerificationGet, ttl)
            .await?;
        self.effects
            .notify(Notification::new(
                commuter.email(),
                NotificationTemplate::LostParcelVerificationOtp,
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

    pub async fn get(&self, parcel_id: i64) -> Result<Option<LostParcel>, ParcelError> {
        self.parcels.get_parcel(parcel_id).await.map_err(ParcelError::Storage)
    }

    pub async fn list(&self) -> Result<Vec<LostParcel>, ParcelError> {
        self.parcels.list_parcels().await.map_err(ParcelError::Storage)
    }

    async fn notify_status(&self, commuter: &Commuter, parcel: &LostParcel, template: NotificationTemplate) {
        self.effects
            .notify(Notification::new(
                commuter.email(),
                template,
                json!({
                    "firstName": commuter.name.first_name,
                    "referenceId": parcel.reference_id,
                    "eTicket": parcel.e_ticket,
                    "type": parcel.parcel_type,
                    "name": parcel.name,
                    "status": parcel.status,
                }),
            ))
            .await;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParcelError {
    #[error("already created a complain for this ticket")]
    AlreadyReported,

    #[error("no relevant booking found for this ticket.")]
    NoBookingFound,

    #[error("no parcel found for this reference id")]
    NotFound,

    #[error(transparent)]
    Otp(#[from] OtpError),

    #[error("lost parcel storage failure: {0}")]
    Storage(BoxError),
}
