use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coachline_core::payment::{
    BookingPayment, PaymentCallback, PaymentMethod, PaymentRequest, PaymentStatus, PaymentType,
};
use coachline_core::repository::PaymentRepository;
use coachline_core::BoxError;
use sqlx::PgPool;

pub struct StorePaymentRepository {
    pool: PgPool,
}

impl StorePaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const PAYMENT_COLUMNS: &str =
    "payment_id, booking_id, amount, currency, method, payment_type, status, payment_at, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct PaymentRow {
    payment_id: i64,
    booking_id: i64,
    amount: i64,
    currency: String,
    method: String,
    payment_type: String,
    status: String,
    payment_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for BookingPayment {
    type Error = BoxError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(BookingPayment {
            payment_id: row.payment_id,
            booking_id: row.booking_id,
            amount: row.amount,
            currency: row.currency,
            method: row.method.parse::<PaymentMethod>()?,
            payment_type: row.payment_type.parse::<PaymentType>()?,
            status: row.status.parse::<PaymentStatus>()?,
            payment_at: row.payment_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RequestRow {
    request_id: i64,
    payment_id: i64,
    booking_id: i64,
    system_transaction_id: String,
    gateway_transaction_id: String,
    redirect_url: String,
    callback_url: String,
    created_at: DateTime<Utc>,
}

impl From<RequestRow> for PaymentRequest {
    fn from(row: RequestRow) -> Self {
        PaymentRequest {
            request_id: row.request_id,
            payment_id: row.payment_id,
            booking_id: row.booking_id,
            system_transaction_id: row.system_transaction_id,
            gateway_transaction_id: row.gateway_transaction_id,
            redirect_url: row.redirect_url,
            callback_url: row.callback_url,
            created_at: row.created_at,
        }
    }
}

fn into_payments(rows: Vec<PaymentRow>) -> Result<Vec<BookingPayment>, BoxError> {
    rows.into_iter().map(BookingPayment::try_from).collect()
}

#[async_trait]
impl PaymentRepository for StorePaymentRepository {
    async fn insert_initiated(&self, payment: &BookingPayment, request: &PaymentRequest) -> Result<(), BoxError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO booking_payments (
                payment_id, booking_id, amount, currency, method, payment_type, status, payment_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(payment.payment_id)
        .bind(payment.booking_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.method.as_str())
        .bind(payment.payment_type.as_str())
        .bind(payment.status.as_str())
        .bind(payment.payment_at)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO payment_requests (
                request_id, payment_id, booking_id, system_transaction_id, gateway_transaction_id,
                redirect_url, callback_url, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(request.request_id)
        .bind(request.payment_id)
        .bind(request.booking_id)
        .bind(&request.system_transaction_id)
        .bind(&request.gateway_transaction_id)
        .bind(&request.redirect_url)
        .bind(&request.callback_url)
        .bind(request.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_payment(&self, payment_id: i64) -> Result<Option<BookingPayment>, BoxError> {
        let sql = format!("SELECT {} FROM booking_payments WHERE payment_id = $1", PAYMENT_COLUMNS);
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(BookingPayment::try_from).transpose()
    }

    async fn list_payments(&self) -> Result<Vec<BookingPayment>, BoxError> {
        let sql = format!("SELECT {} FROM booking_payments ORDER BY created_at", PAYMENT_COLUMNS);
        let rows = sqlx::query_as::<_, PaymentRow>(&sql).fetch_all(&self.pool).await?;
        into_payments(rows)
    }

    async fn list_payments_by_booking(&self, booking_id: i64) -> Result<Vec<BookingPayment>, BoxError> {
        let sql = format!(
            "SELECT {} FROM booking_payments WHERE booking_id = $1 ORDER BY created_at",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(booking_id)
            .fetch_all(&self.pool)
            .await?;
        into_payments(rows)
    }

    async fn find_request(
        &self,
        system_transaction_id: &str,
        gateway_transaction_id: &str,
    ) -> Result<Option<PaymentRequest>, BoxError> {
        let row = sqlx::query_as::<_, RequestRow>(
            r#"
            SELECT request_id, payment_id, booking_id, system_transaction_id, gateway_transaction_id,
                   redirect_url, callback_url, created_at
            FROM payment_requests
            WHERE system_transaction_id = $1 AND gateway_transaction_id = $2
            "#,
        )
        .bind(system_transaction_id)
        .bind(gateway_transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(PaymentRequest::from))
    }

    async fn record_callback(&self, callback: &PaymentCallback) -> Result<(), BoxError> {
        sqlx::query(
            r#"
            INSERT INTO payment_callbacks (callback_id, request_id, status, details, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(callback.callback_id)
        .bind(callback.request_id)
        .bind(&callback.status)
        .bind(&callback.details)
        .bind(callback.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn settle(
        &self,
        payment_id: i64,
        status: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<BookingPayment>, BoxError> {
        let sql = format!(
            r#"
            UPDATE booking_payments
            SET status = $2,
                updated_at = $3,
                payment_at = CASE WHEN $2 = 'SUCCESS' THEN $3 ELSE payment_at END
            WHERE payment_id = $1 AND status = 'PENDING'
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment_id)
            .bind(status.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;
        row.map(BookingPayment::try_from).transpose()
    }
}
