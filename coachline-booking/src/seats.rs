use chrono::{DateTime, Utc};
use coachline_core::booking::{Booking, NewBooking};
use coachline_core::repository::BookingRepository;
use coachline_core::BoxError;
use std::sync::Arc;
use tracing::{info, warn};

/// Decides whether a seat request may proceed and claims the seat when it can.
#[derive(Clone)]
pub struct SeatLedger {
    bookings: Arc<dyn BookingRepository>,
}

impl SeatLedger {
    pub fn new(bookings: Arc<dyn BookingRepository>) -> Self {
        Self { bookings }
    }

    /// Range check, then one conditional insert. Two callers racing for the
    /// same seat cannot both get `Ok`.
    pub async fn reserve(&self, request: NewBooking, now: DateTime<Utc>) -> Result<Booking, SeatError> {
        let capacity = request.trip.capacity;
        if request.seat_number < 1 || request.seat_number > capacity {
            return Err(SeatError::OutOfRange {
                seat_number: request.seat_number,
                capacity,
            });
        }

        let booking = request.into_booking(now);
        let inserted = self
            .bookings
            .insert_if_seat_free(&booking)
            .await
            .map_err(SeatError::Storage)?;

        if !inserted {
            warn!("Seat {} on trip {} is already held", booking.seat_number, booking.trip_id());
            return Err(SeatError::AlreadyUsed {
                trip_id: booking.trip_id(),
                seat_number: booking.seat_number,
            });
        }

        info!("Seat {} on trip {} held by booking {}", booking.seat_number, booking.trip_id(), booking.booking_id);
        Ok(booking)
    }

    pub async fn occupied(&self, trip_id: i64) -> Result<Vec<i32>, SeatError> {
        self.bookings.occupied_seats(trip_id).await.map_err(SeatError::Storage)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SeatError {
    #[error("seat is outside of the expected capacity")]
    OutOfRange { seat_number: i32, capacity: i32 },

    #[error("seat already used")]
    AlreadyUsed { trip_id: i64, seat_number: i32 },

    #[error("seat ledger storage failure: {0}")]
    Storage(BoxError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use coachline_core::booking::TripInfo;
    use coachline_core::memory::InMemoryStore;

    fn request(booking_id: i64, seat_number: i32, capacity: i32) -> NewBooking {
        NewBooking {
            booking_id,
            trip: TripInfo {
                trip_id: 77,
                capacity,
                booking_enabled: true,
                price: 2500,
                cancellation_policy: None,
                schedule: None,
            },
            commuter_id: 1,
            seat_number,
            expiry_at: Utc::now() + Duration::minutes(10),
        }
    }

    #[tokio::test]
    async fn test_seat_outside_capacity_is_rejected() {
        let ledger = SeatLedger::new(Arc::new(InMemoryStore::new()));

        for (seat, capacity) in [(0i32, 50), (51, 50), (-3, 50), (1, 0), (0, 0)] {
            let result = ledger.reserve(request(10000000 + seat.abs() as i64, seat, capacity), Utc::now()).await;
            assert!(matches!(result, Err(SeatError::OutOfRange { .. })), "seat {} capacity {}", seat, capacity);
        }

        assert!(ledger.reserve(request(10000001, 1, 1), Utc::now()).await.is_ok());
        assert!(ledger.reserve(request(10000002, 50, 50), Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn test_second_reservation_for_same_seat_fails() {
        let ledger = SeatLedger::new(Arc::new(InMemoryStore::new()));

        ledger.reserve(request(10000001, 10, 50), Utc::now()).await.unwrap();
        let second = ledger.reserve(request(10000002, 10, 50), Utc::now()).await;

        assert!(matches!(second, Err(SeatError::AlreadyUsed { seat_number: 10, .. })));
        assert_eq!(ledger.occupied(77).await.unwrap(), vec![10]);
    }

    #[tokio::test]
    async fn test_concurrent_reservations_have_one_winner() {
        let ledger = SeatLedger::new(Arc::new(InMemoryStore::new()));

        let mut handles = Vec::new();
        for i in 0..25 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.reserve(request(20000000 + i, 10, 50), Utc::now()).await
            }));
        }

        let mut won = 0;
        let mut lost = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => won += 1,
                Err(SeatError::AlreadyUsed { .. }) => lost += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(won, 1);
        assert_eq!(lost, 24);
    }
}
