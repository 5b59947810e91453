use coachline_booking::BookingServices;
use coachline_core::ports::RateLimiter;
use prometheus::Registry;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RateLimits {
    pub requests_per_minute: i64,
    pub otp_attempts_per_window: i64,
    pub otp_window_seconds: i64,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            requests_per_minute: 100,
            otp_attempts_per_window: 5,
            otp_window_seconds: 300,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub services: BookingServices,
    pub limiter: Arc<dyn RateLimiter>,
    pub limits: RateLimits,
    pub registry: Registry,
    /// `/{service}/{version}`
    pub api_prefix: String,
}
