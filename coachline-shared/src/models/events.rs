use serde::{Deserialize, Serialize};

/// Event bus topic the trip support service consumes booking events from.
pub const TRIP_SUPPORT_TOPIC: &str = "busriya.trip-support";

/// Name this service stamps as the event source.
pub const EVENT_SOURCE: &str = "booking-service";

/// Events a booking emits over its lifetime. The tag doubles as the
/// downstream `internalEventType` discriminator.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "internalEventType")]
pub enum BookingEvent {
    #[serde(rename = "EVN_BOOKING_CREATED", rename_all = "camelCase")]
    Created {
        booking_id: i64,
        trip_id: i64,
        seat_number: i32,
    },
    #[serde(rename = "EVN_BOOKING_CANCELLED", rename_all = "camelCase")]
    Cancelled {
        booking_id: i64,
        trip_id: i64,
        seat_number: i32,
    },
    #[serde(rename = "EVN_BOOKING_PAYMENT_SUCCESS", rename_all = "camelCase")]
    PaymentSuccess {
        booking_id: i64,
        trip_id: i64,
        seat_number: i32,
    },
}

impl BookingEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            BookingEvent::Created { .. } => "EVN_BOOKING_CREATED",
            BookingEvent::Cancelled { .. } => "EVN_BOOKING_CANCELLED",
            BookingEvent::PaymentSuccess { .. } => "EVN_BOOKING_PAYMENT_SUCCESS",
        }
    }

    pub fn booking_id(&self) -> i64 {
        match self {
            BookingEvent::Created { booking_id, .. }
            | BookingEvent::Cancelled { booking_id, .. }
            | BookingEvent::PaymentSuccess { booking_id, .. } => *booking_id,
        }
    }
}

/// Payload carried by a delayed expiry check for a freshly created booking.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BookingExpiryCheck {
    pub internal_event_type: String,
    pub booking_id: i64,
    pub trip_id: i64,
    pub seat_number: i32,
}

impl BookingExpiryCheck {
    pub const EVENT_TYPE: &'static str = "EVN_BOOKING_CREATED_FOR_DELAYED_BOOKING_CHECKING";

    pub fn new(booking_id: i64, trip_id: i64, seat_number: i32) -> Self {
        Self {
            internal_event_type: Self::EVENT_TYPE.to_string(),
            booking_id,
            trip_id,
            seat_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_carries_internal_type_tag() {
        let event = BookingEvent::Created { booking_id: 12345678, trip_id: 42, seat_number: 10 };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["internalEventType"], "EVN_BOOKING_CREATED");
        assert_eq!(json["bookingId"], 12345678);
        assert_eq!(json["seatNumber"], 10);
        assert_eq!(event.event_type(), "EVN_BOOKING_CREATED");
    }

    #[test]
    fn test_expiry_check_payload_shape() {
        let payload = BookingExpiryCheck::new(1, 2, 3);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["internalEventType"], BookingExpiryCheck::EVENT_TYPE);
        assert_eq!(json["tripId"], 2);
    }
}
