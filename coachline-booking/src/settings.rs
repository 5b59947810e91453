use chrono::Duration;
use coachline_shared::models::events::TRIP_SUPPORT_TOPIC;

/// Waiting windows and outbound addresses the booking flows depend on.
#[derive(Debug, Clone)]
pub struct BookingSettings {
    /// How long a booking may stay unpaid before it expires.
    pub booking_waiting: Duration,
    /// Lifetime of the commuter verification OTP sent at booking time.
    pub otp_waiting: Duration,
    /// Lifetime of e-ticket and lost-parcel OTPs.
    pub e_ticket_otp_waiting: Duration,
    pub gateway_timeout: std::time::Duration,
    /// Where the payment gateway posts its result.
    pub callback_url: String,
    pub event_topic: String,
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            booking_waiting: Duration::minutes(10),
            otp_waiting: Duration::minutes(10),
            e_ticket_otp_waiting: Duration::minutes(4),
            gateway_timeout: std::time::Duration::from_secs(20),
            callback_url: "http://localhost:8080/booking-service/v1/payment-callbacks".to_string(),
            event_topic: TRIP_SUPPORT_TOPIC.to_string(),
        }
    }
}
