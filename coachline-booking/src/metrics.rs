use coachline_core::booking::BookingStatus;
use prometheus::{IntCounterVec, Opts, Registry};

pub struct BookingMetrics {
    side_effect_failures: IntCounterVec,
    transitions: IntCounterVec,
}

impl BookingMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let side_effect_failures = IntCounterVec::new(
            Opts::new(
                "coachline_side_effect_failures_total",
                "Notifications, events and uploads that failed after the state change committed",
            ),
            &["effect"],
        )?;
        let transitions = IntCounterVec::new(
            Opts::new("coachline_booking_transitions_total", "Booking status transitions applied"),
            &["to"],
        )?;

        registry.register(Box::new(side_effect_failures.clone()))?;
        registry.register(Box::new(transitions.clone()))?;

        Ok(Self {
            side_effect_failures,
            transitions,
        })
    }

    pub fn side_effect_failed(&self, effect: &str) {
        self.side_effect_failures.with_label_values(&[effect]).inc();
    }

    pub fn transitioned(&self, to: BookingStatus) {
        self.transitions.with_label_values(&[to.as_str()]).inc();
    }

    pub fn side_effect_failures(&self, effect: &str) -> u64 {
        self.side_effect_failures.with_label_values(&[effect]).get()
    }

    pub fn transitions(&self, to: BookingStatus) -> u64 {
        self.transitions.with_label_values(&[to.as_str()]).get()
    }
}
