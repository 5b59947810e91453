use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coachline_core::booking::{Booking, BookingStatus, BookingView, Commuter, TicketStatus, TripInfo};
use coachline_core::repository::BookingRepository;
use coachline_core::BoxError;
use serde_json::Value;
use sqlx::PgPool;

use crate::commuter_repo::CommuterRow;

pub struct StoreBookingRepository {
    pool: PgPool,
}

impl StoreBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const BOOKING_COLUMNS: &str = "b.booking_id, b.trip_snapshot, b.commuter_id, b.seat_number, b.booking_status, \
     b.ticket_status, b.e_ticket, b.qr_validation_token, b.price, b.expiry_at, b.created_at, b.updated_at, \
     b.cancelled_at";

const VIEW_SELECT: &str = "SELECT b.booking_id, b.trip_snapshot, b.commuter_id, b.seat_number, b.booking_status, \
     b.ticket_status, b.e_ticket, b.qr_validation_token, b.price, b.expiry_at, b.created_at, b.updated_at, \
     b.cancelled_at, c.commuter_id AS c_commuter_id, c.first_name, c.last_name, c.nic, c.mobile, c.email \
     FROM bookings b LEFT JOIN commuters c ON c.commuter_id = b.commuter_id";

#[derive(sqlx::FromRow)]
struct BookingRow {
    booking_id: i64,
    trip_snapshot: Value,
    commuter_id: i64,
    seat_number: i32,
    booking_status: String,
    ticket_status: String,
    e_ticket: Option<String>,
    qr_validation_token: Option<String>,
    price: i64,
    expiry_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = BoxError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            booking_id: row.booking_id,
            trip: serde_json::from_value::<TripInfo>(row.trip_snapshot)?,
            commuter_id: row.commuter_id,
            seat_number: row.seat_number,
            booking_status: row.booking_status.parse::<BookingStatus>()?,
            ticket_status: row.ticket_status.parse::<TicketStatus>()?,
            e_ticket: row.e_ticket,
            qr_validation_token: row.qr_validation_token,
            price: row.price,
            expiry_at: row.expiry_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            cancelled_at: row.cancelled_at,
        })
    }
}

/// Booking joined with its commuter, when the commuter still exists.
#[derive(sqlx::FromRow)]
struct BookingViewRow {
    #[sqlx(flatten)]
    booking: BookingRow,
    c_commuter_id: Option<i64>,
    first_name: Option<String>,
    last_name: Option<String>,
    nic: Option<String>,
    mobile: Option<String>,
    email: Option<String>,
}

impl TryFrom<BookingViewRow> for BookingView {
    type Error = BoxError;

    fn try_from(row: BookingViewRow) -> Result<Self, Self::Error> {
        let commuter = match (row.c_commuter_id, row.first_name, row.last_name, row.nic, row.mobile, row.email) {
            (Some(commuter_id), Some(first_name), Some(last_name), Some(nic), Some(mobile), Some(email)) => {
                Some(Commuter::from(CommuterRow {
                    commuter_id,
                    first_name,
                    last_name,
                    nic,
                    mobile,
                    email,
                }))
            }
            _ => None,
        };

        Ok(BookingView {
            booking: Booking::try_from(row.booking)?,
            commuter,
        })
    }
}

fn into_bookings(rows: Vec<BookingViewRow>) -> Result<Vec<BookingView>, BoxError> {
    rows.into_iter().map(BookingView::try_from).collect()
}

impl StoreBookingRepository {
    async fn fetch_one(&self, sql: &str, booking_id: i64) -> Result<Option<Booking>, BoxError> {
        let row = sqlx::query_as::<_, BookingRow>(sql)
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Booking::try_from).transpose()
    }
}

#[async_trait]
impl BookingRepository for StoreBookingRepository {
    async fn insert_if_seat_free(&self, booking: &Booking) -> Result<bool, BoxError> {
        // The partial unique index on active seats arbitrates concurrent claims.
        let result = sqlx::query(
            r#"
            INSERT INTO bookings (
                booking_id, trip_id, trip_snapshot, commuter_id, seat_number, booking_status,
                ticket_status, e_ticket, qr_validation_token, price, expiry_at, created_at, updated_at, cancelled_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (trip_id, seat_number) WHERE booking_status IN ('CREATING', 'PENDING', 'PAID')
            DO NOTHING
            "#,
        )
        .bind(booking.booking_id)
        .bind(booking.trip_id())
        .bind(serde_json::to_value(&booking.trip)?)
        .bind(booking.commuter_id)
        .bind(booking.seat_number)
        .bind(booking.booking_status.as_str())
        .bind(booking.ticket_status.as_str())
        .bind(&booking.e_ticket)
        .bind(&booking.qr_validation_token)
        .bind(booking.price)
        .bind(booking.expiry_at)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .bind(booking.cancelled_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn occupied_seats(&self, trip_id: i64) -> Result<Vec<i32>, BoxError> {
        let seats: Vec<i32> = sqlx::query_scalar(
            r#"
            SELECT seat_number FROM bookings
            WHERE trip_id = $1 AND booking_status IN ('CREATING', 'PENDING', 'PAID')
            ORDER BY seat_number
            "#,
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(seats)
    }

    async fn get(&self, booking_id: i64) -> Result<Option<Booking>, BoxError> {
        let sql = format!("SELECT {} FROM bookings b WHERE b.booking_id = $1", BOOKING_COLUMNS);
        self.fetch_one(&sql, booking_id).await
    }

    async fn get_view(&self, booking_id: i64) -> Result<Option<BookingView>, BoxError> {
        let sql = format!("{} WHERE b.booking_id = $1", VIEW_SELECT);
        let row = sqlx::query_as::<_, BookingViewRow>(&sql)
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(BookingView::try_from).transpose()
    }

    async fn list_views(&self) -> Result<Vec<BookingView>, BoxError> {
        let sql = format!("{} ORDER BY b.created_at", VIEW_SELECT);
        let rows = sqlx::query_as::<_, BookingViewRow>(&sql).fetch_all(&self.pool).await?;
        into_bookings(rows)
    }

    async fn list_views_by_trip(&self, trip_id: i64) -> Result<Vec<BookingView>, BoxError> {
        let sql = format!("{} WHERE b.trip_id = $1 ORDER BY b.created_at", VIEW_SELECT);
        let rows = sqlx::query_as::<_, BookingViewRow>(&sql)
            .bind(trip_id)
            .fetch_all(&self.pool)
            .await?;
        into_bookings(rows)
    }

    async fn find_by_e_ticket(&self, e_ticket: &str) -> Result<Option<Booking>, BoxError> {
        let sql = format!("SELECT {} FROM bookings b WHERE b.e_ticket = $1", BOOKING_COLUMNS);
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(e_ticket)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Booking::try_from).transpose()
    }

    async fn transition(
        &self,
        booking_id: i64,
        from: &[BookingStatus],
        to: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Booking>, BoxError> {
        let expected: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let sql = format!(
            r#"
            UPDATE bookings b
            SET booking_status = $3,
                updated_at = $4,
                cancelled_at = CASE WHEN $3 = 'CANCELLED' THEN $4 ELSE b.cancelled_at END
            WHERE b.booking_id = $1 AND b.booking_status = ANY($2)
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        );

        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(booking_id)
            .bind(&expected)
            .bind(to.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Booking::try_from).transpose()
    }

    async fn cancel_paid(&self, booking_id: i64, at: DateTime<Utc>) -> Result<Option<Booking>, BoxError> {
        let sql = format!(
            r#"
            UPDATE bookings b
            SET booking_status = 'CANCELLED', cancelled_at = $2, updated_at = $2
            WHERE b.booking_id = $1 AND b.booking_status = 'PAID' AND b.ticket_status = 'NOT_USED'
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        );

        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(booking_id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Booking::try_from).transpose()
    }

    async fn mark_ticket_used(&self, booking_id: i64, at: DateTime<Utc>) -> Result<Option<Booking>, BoxError> {
        let sql = format!(
            r#"
            UPDATE bookings b
            SET ticket_status = 'USED', updated_at = $2
            WHERE b.booking_id = $1 AND b.booking_status = 'PAID' AND b.ticket_status = 'NOT_USED'
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        );

        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(booking_id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Booking::try_from).transpose()
    }

    async fn attach_ticket(
        &self,
        booking_id: i64,
        e_ticket: &str,
        qr_validation_token: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Booking>, BoxError> {
        let sql = format!(
            r#"
            UPDATE bookings b
            SET e_ticket = $2, qr_validation_token = $3, updated_at = $4
            WHERE b.booking_id = $1 AND b.booking_status = 'PAID' AND b.e_ticket IS NULL
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        );

        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(booking_id)
            .bind(e_ticket)
            .bind(qr_validation_token)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Booking::try_from).transpose()
    }
}
