use chrono::{DateTime, Utc};
use coachline_shared::pii::Masked;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Creating,
    Pending,
    Paid,
    Cancelled,
    Expired,
}

wire_enum!(BookingStatus, "bookingStatus", {
    Creating => "CREATING",
    Pending => "PENDING",
    Paid => "PAID",
    Cancelled => "CANCELLED",
    Expired => "EXPIRED",
});

impl BookingStatus {
    /// Statuses that hold a seat.
    pub const ACTIVE: [BookingStatus; 3] = [
        BookingStatus::Creating,
        BookingStatus::Pending,
        BookingStatus::Paid,
    ];

    /// Statuses an expiry callback may still move to `Expired`.
    pub const EXPIRABLE: [BookingStatus; 2] = [BookingStatus::Creating, BookingStatus::Pending];

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Expired)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    NotUsed,
    Used,
}

wire_enum!(TicketStatus, "ticketStatus", {
    NotUsed => "NOT_USED",
    Used => "USED",
});

/// Capacity and sale state of a trip as published by the trip service.
/// A copy is stored on every booking for display and cancellation-policy text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TripInfo {
    pub trip_id: i64,
    pub capacity: i32,
    pub booking_enabled: bool,
    /// Minor currency units.
    pub price: i64,
    pub cancellation_policy: Option<String>,
    pub schedule: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommuterName {
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommuterContact {
    pub mobile: String,
    pub email: Masked<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Commuter {
    pub commuter_id: i64,
    pub name: CommuterName,
    pub nic: Masked<String>,
    pub contact: CommuterContact,
}

impl Commuter {
    pub fn email(&self) -> &str {
        self.contact.email.expose()
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.name.first_name, self.name.last_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub booking_id: i64,
    pub trip: TripInfo,
    pub commuter_id: i64,
    pub seat_number: i32,
    pub booking_status: BookingStatus,
    pub ticket_status: TicketStatus,
    pub e_ticket: Option<String>,
    pub qr_validation_token: Option<String>,
    pub price: i64,
    pub expiry_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn trip_id(&self) -> i64 {
        self.trip.trip_id
    }
}

/// A seat claim that has passed trip and commuter checks but is not stored yet.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub booking_id: i64,
    pub trip: TripInfo,
    pub commuter_id: i64,
    pub seat_number: i32,
    pub expiry_at: DateTime<Utc>,
}

impl NewBooking {
    pub fn into_booking(self, now: DateTime<Utc>) -> Booking {
        Booking {
            booking_id: self.booking_id,
            price: self.trip.price,
            trip: self.trip,
            commuter_id: self.commuter_id,
            seat_number: self.seat_number,
            booking_status: BookingStatus::Creating,
            ticket_status: TicketStatus::NotUsed,
            e_ticket: None,
            qr_validation_token: None,
            expiry_at: self.expiry_at,
            created_at: now,
            updated_at: now,
            cancelled_at: None,
        }
    }
}

/// Booking joined with its commuter, as returned by the read endpoints.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BookingView {
    #[serde(flatten)]
    pub booking: Booking,
    pub commuter: Option<Commuter>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn trip() -> TripInfo {
        TripInfo {
            trip_id: 7,
            capacity: 40,
            booking_enabled: true,
            price: 150_000,
            cancellation_policy: Some("Full refund up to 24 hours before departure".into()),
            schedule: None,
        }
    }

    #[test]
    fn test_new_booking_starts_creating_with_trip_price() {
        let now = Utc::now();
        let booking = NewBooking {
            booking_id: 12345678,
            trip: trip(),
            commuter_id: 99,
            seat_number: 3,
            expiry_at: now + chrono::Duration::minutes(10),
        }
        .into_booking(now);

        assert_eq!(booking.booking_status, BookingStatus::Creating);
        assert_eq!(booking.ticket_status, TicketStatus::NotUsed);
        assert_eq!(booking.price, 150_000);
        assert!(booking.e_ticket.is_none());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(BookingStatus::from_str("PAID").unwrap(), BookingStatus::Paid);
        assert_eq!(TicketStatus::NotUsed.as_str(), "NOT_USED");
        assert!(BookingStatus::from_str("paid").is_err());
        assert!(BookingStatus::Pending.is_active());
        assert!(BookingStatus::Expired.is_terminal());
    }

    #[test]
    fn test_booking_json_uses_e_ticket_casing() {
        let now = Utc::now();
        let mut booking = NewBooking {
            booking_id: 1,
            trip: trip(),
            commuter_id: 2,
            seat_number: 1,
            expiry_at: now,
        }
        .into_booking(now);
        booking.e_ticket = Some("abc".into());

        let json = serde_json::to_value(&booking).unwrap();
        assert_eq!(json["eTicket"], "abc");
        assert_eq!(json["bookingStatus"], "CREATING");
        assert_eq!(json["trip"]["tripId"], 7);
    }
}
