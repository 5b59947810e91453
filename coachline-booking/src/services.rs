use coachline_core::booking::{Commuter, CommuterContact, CommuterName, TripInfo};
use coachline_core::memory::{InMemoryObjectStorage, InMemoryStore, RecordingEventBus, RecordingNotifier};
use coachline_core::otp::{OtpVerification, VerificationType};
use coachline_core::payment::{MockPaymentGateway, PaymentGatewayPort};
use coachline_core::ports::{EventPort, NotificationPort, ObjectStoragePort, ScheduleSource, SchedulePort, TripInfoPort};
use coachline_core::repository::{
    BookingRepository, CommuterRepository, LostParcelRepository, OtpRepository, PaymentRepository,
};
use coachline_shared::pii::Masked;
use prometheus::Registry;
use std::sync::Arc;

use crate::effects::Effects;
use crate::expiry::ExpiryRunner;
use crate::fulfillment::TicketIssuer;
use crate::lost_parcel::LostParcelDesk;
use crate::manager::{BookingError, BookingManager};
use crate::metrics::BookingMetrics;
use crate::orchestrator::PaymentOrchestrator;
use crate::otp::{OtpError, OtpVerificationStore};
use crate::settings::BookingSettings;

/// Storage-backed ports.
#[derive(Clone)]
pub struct Repositories {
    pub bookings: Arc<dyn BookingRepository>,
    pub otps: Arc<dyn OtpRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub commuters: Arc<dyn CommuterRepository>,
    pub parcels: Arc<dyn LostParcelRepository>,
    pub trips: Arc<dyn TripInfoPort>,
    pub scheduler: Arc<dyn SchedulePort>,
    pub schedule_source: Arc<dyn ScheduleSource>,
}

/// Outbound services.
#[derive(Clone)]
pub struct Collaborators {
    pub notifier: Arc<dyn NotificationPort>,
    pub events: Arc<dyn EventPort>,
    pub storage: Arc<dyn ObjectStoragePort>,
    pub gateway: Arc<dyn PaymentGatewayPort>,
}

/// Every booking flow, wired to one set of adapters.
#[derive(Clone)]
pub struct BookingServices {
    pub manager: Arc<BookingManager>,
    pub tickets: Arc<TicketIssuer>,
    pub payments: Arc<PaymentOrchestrator>,
    pub parcels: Arc<LostParcelDesk>,
    pub otps: OtpVerificationStore,
    pub expiry: Arc<ExpiryRunner>,
    pub effects: Effects,
}

impl BookingServices {
    pub fn build(
        repos: Repositories,
        collaborators: Collaborators,
        settings: BookingSettings,
        registry: &Registry,
    ) -> Result<Self, prometheus::Error> {
        let metrics = Arc::new(BookingMetrics::new(registry)?);
        let effects = Effects::new(
            collaborators.notifier,
            collaborators.events,
            collaborators.storage,
            metrics,
            settings.event_topic.clone(),
        );
        let otps = OtpVerificationStore::new(repos.otps.clone());

        let manager = Arc::new(BookingManager::new(
            repos.bookings.clone(),
            repos.commuters.clone(),
            repos.trips.clone(),
            repos.scheduler.clone(),
            otps.clone(),
            effects.clone(),
            settings.clone(),
        ));
        let tickets = Arc::new(TicketIssuer::new(
            repos.bookings.clone(),
            repos.commuters.clone(),
            otps.clone(),
            effects.clone(),
            settings.clone(),
        ));
        let payments = Arc::new(PaymentOrchestrator::new(
            repos.bookings.clone(),
            repos.payments.clone(),
            otps.clone(),
            collaborators.gateway,
            manager.clone(),
            tickets.clone(),
            settings.clone(),
        ));
        let parcels = Arc::new(LostParcelDesk::new(
            repos.parcels.clone(),
            repos.bookings.clone(),
            repos.commuters.clone(),
            otps.clone(),
            effects.clone(),
            settings,
        ));
        let expiry = Arc::new(ExpiryRunner::new(repos.schedule_source.clone(), manager.clone()));

        Ok(Self {
            manager,
            tickets,
            payments,
            parcels,
            otps,
            expiry,
            effects,
        })
    }
}

/// Booking services over the in-memory adapters, with handles on the
/// recording doubles so callers can inspect what went out.
pub struct InMemoryHarness {
    pub store: Arc<InMemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub events: Arc<RecordingEventBus>,
    pub storage: Arc<InMemoryObjectStorage>,
    pub effects: Effects,
    pub services: BookingServices,
}

impl InMemoryHarness {
    pub fn new(settings: BookingSettings, registry: &Registry) -> Result<Self, prometheus::Error> {
        Self::assemble(Arc::new(InMemoryStore::new()), Arc::new(MockPaymentGateway::new()), settings, registry)
    }

    pub fn with_store(
        store: Arc<InMemoryStore>,
        settings: BookingSettings,
        registry: &Registry,
    ) -> Result<Self, prometheus::Error> {
        Self::assemble(store, Arc::new(MockPaymentGateway::new()), settings, registry)
    }

    pub fn with_gateway(
        gateway: Arc<dyn PaymentGatewayPort>,
        settings: BookingSettings,
        registry: &Registry,
    ) -> Result<Self, prometheus::Error> {
        Self::assemble(Arc::new(InMemoryStore::new()), gateway, settings, registry)
    }

    fn assemble(
        store: Arc<InMemoryStore>,
        gateway: Arc<dyn PaymentGatewayPort>,
        settings: BookingSettings,
        registry: &Registry,
    ) -> Result<Self, prometheus::Error> {
        let notifier = Arc::new(RecordingNotifier::new());
        let events = Arc::new(RecordingEventBus::new());
        let storage = Arc::new(InMemoryObjectStorage::new());

        let repos = Repositories {
            bookings: store.clone(),
            otps: store.clone(),
            payments: store.clone(),
            commuters: store.clone(),
            parcels: store.clone(),
            trips: store.clone(),
            scheduler: store.clone(),
            schedule_source: store.clone(),
        };
        let collaborators = Collaborators {
            notifier: notifier.clone(),
            events: events.clone(),
            storage: storage.clone(),
            gateway,
        };
        let services = BookingServices::build(repos, collaborators, settings, registry)?;

        Ok(Self {
            store,
            notifier,
            events,
            storage,
            effects: services.effects.clone(),
            services,
        })
    }

    pub async fn seed_trip(&self, trip_id: i64, capacity: i32, price: i64) {
        self.store
            .put_trip(TripInfo {
                trip_id,
                capacity,
                booking_enabled: true,
                price,
                cancellation_policy: Some("Full refund up to 24 hours before departure".to_string()),
                schedule: None,
            })
            .await;
    }

    pub async fn seed_commuter(&self, commuter_id: i64) {
        self.store
            .put_commuter(Commuter {
                commuter_id,
                name: CommuterName {
                    first_name: "Nimal".to_string(),
                    last_name: "Perera".to_string(),
                },
                nic: Masked::new(format!("{}V", 900_000_000 + commuter_id)),
                contact: CommuterContact {
                    mobile: "0771234567".to_string(),
                    email: Masked::new(format!("rider{}@example.com", commuter_id)),
                },
            })
            .await;
    }

    /// Submit the code of the newest live OTP of `verification_type`, as a
    /// commuter reading it from their inbox would.
    pub async fn verify_latest(
        &self,
        booking_id: i64,
        verification_type: VerificationType,
    ) -> Result<OtpVerification, BookingError> {
        let latest = self
            .services
            .otps
            .latest(booking_id, verification_type)
            .await?
            .ok_or(OtpError::NotFoundOrExpired)?;
        self.services.manager.submit_otp(latest.verification_id, &latest.otp).await
    }
}
