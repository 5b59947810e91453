pub mod effects;
pub mod expiry;
pub mod fulfillment;
pub mod lost_parcel;
pub mod manager;
pub mod metrics;
pub mod orchestrator;
pub mod otp;
pub mod seats;
pub mod services;
pub mod settings;

pub use expiry::{ExpiryReport, ExpiryRunner};
pub use fulfillment::{TicketError, TicketIssuer};
pub use lost_parcel::{LostParcelDesk, ParcelError, ParcelReport};
pub use manager::{BookingError, BookingManager, CreatedBooking, ExpireOutcome};
pub use orchestrator::{CallbackInput, CallbackReceipt, PaymentError, PaymentInitiated, PaymentOrchestrator};
pub use otp::{GatedAccess, OtpCheck, OtpError, OtpVerificationStore};
pub use seats::{SeatError, SeatLedger};
pub use services::{BookingServices, Collaborators, InMemoryHarness, Repositories};
pub use settings::BookingSettings;
