use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coachline_core::otp::{OtpVerification, VerificationStatus, VerificationType};
use coachline_core::repository::OtpRepository;
use coachline_core::BoxError;
use sqlx::PgPool;

pub struct StoreOtpRepository {
    pool: PgPool,
}

impl StoreOtpRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const OTP_COLUMNS: &str = "verification_id, otp, expiry_at, booking_id, verification_type, status, created_at";

#[derive(sqlx::FromRow)]
struct OtpRow {
    verification_id: i64,
    otp: String,
    expiry_at: DateTime<Utc>,
    booking_id: i64,
    verification_type: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<OtpRow> for OtpVerification {
    type Error = BoxError;

    fn try_from(row: OtpRow) -> Result<Self, Self::Error> {
        Ok(OtpVerification {
            verification_id: row.verification_id,
            otp: row.otp,
            expiry_at: row.expiry_at,
            booking_id: row.booking_id,
            verification_type: row.verification_type.parse::<VerificationType>()?,
            status: row.status.parse::<VerificationStatus>()?,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl OtpRepository for StoreOtpRepository {
    async fn insert(&self, verification: &OtpVerification) -> Result<(), BoxError> {
        sqlx::query(
            r#"
            INSERT INTO otp_verifications (verification_id, otp, expiry_at, booking_id, verification_type, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(verification.verification_id)
        .bind(&verification.otp)
        .bind(verification.expiry_at)
        .bind(verification.booking_id)
        .bind(verification.verification_type.as_str())
        .bind(verification.status.as_str())
        .bind(verification.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_live(&self, verification_id: i64, now: DateTime<Utc>) -> Result<Option<OtpVerification>, BoxError> {
        let sql = format!(
            "SELECT {} FROM otp_verifications WHERE verification_id = $1 AND expiry_at > $2",
            OTP_COLUMNS
        );
        let row = sqlx::query_as::<_, OtpRow>(&sql)
            .bind(verification_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        row.map(OtpVerification::try_from).transpose()
    }

    async fn mark_verified(&self, verification_id: i64, now: DateTime<Utc>) -> Result<Option<OtpVerification>, BoxError> {
        let sql = format!(
            r#"
            UPDATE otp_verifications
            SET status = 'VERIFIED'
            WHERE verification_id = $1 AND status = 'NOT_VERIFIED' AND expiry_at > $2
            RETURNING {}
            "#,
            OTP_COLUMNS
        );
        let row = sqlx::query_as::<_, OtpRow>(&sql)
            .bind(verification_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        row.map(OtpVerification::try_from).transpose()
    }

    async fn latest_live(
        &self,
        booking_id: i64,
        verification_type: VerificationType,
        now: DateTime<Utc>,
    ) -> Result<Option<OtpVerification>, BoxError> {
        let sql = format!(
            r#"
            SELECT {} FROM otp_verifications
            WHERE booking_id = $1 AND verification_type = $2 AND expiry_at > $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            OTP_COLUMNS
        );
        let row = sqlx::query_as::<_, OtpRow>(&sql)
            .bind(booking_id)
            .bind(verification_type.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        row.map(OtpVerification::try_from).transpose()
    }

    async fn find_verified(
        &self,
        booking_id: i64,
        verification_type: VerificationType,
        now: DateTime<Utc>,
    ) -> Result<Option<OtpVerification>, BoxError> {
        let sql = format!(
            r#"
            SELECT {} FROM otp_verifications
            WHERE booking_id = $1 AND verification_type = $2 AND status = 'VERIFIED' AND expiry_at > $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            OTP_COLUMNS
        );
        let row = sqlx::query_as::<_, OtpRow>(&sql)
            .bind(booking_id)
            .bind(verification_type.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        row.map(OtpVerification::try_from).transpose()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, BoxError> {
        let result = sqlx::query("DELETE FROM otp_verifications WHERE expiry_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
