use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coachline_core::booking::Commuter;
use coachline_core::parcel::{LostParcel, ParcelStatus};
use coachline_core::repository::LostParcelRepository;
use coachline_core::BoxError;
use serde_json::Value;
use sqlx::PgPool;

pub struct StoreParcelRepository {
    pool: PgPool,
}

impl StoreParcelRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, filter: &str, value: &str) -> Result<Option<LostParcel>, BoxError> {
        let sql = format!("SELECT {} FROM lost_parcels WHERE {} = $1", PARCEL_COLUMNS, filter);
        let row = sqlx::query_as::<_, ParcelRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(LostParcel::try_from).transpose()
    }
}

const PARCEL_COLUMNS: &str = "parcel_id, reference_id, e_ticket, booking_id, parcel_type, name, description, \
     status, commuter, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct ParcelRow {
    parcel_id: i64,
    reference_id: String,
    e_ticket: String,
    booking_id: i64,
    parcel_type: String,
    name: String,
    description: Option<String>,
    status: String,
    commuter: Option<Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ParcelRow> for LostParcel {
    type Error = BoxError;

    fn try_from(row: ParcelRow) -> Result<Self, Self::Error> {
        let commuter = row.commuter.map(serde_json::from_value::<Commuter>).transpose()?;

        Ok(LostParcel {
            parcel_id: row.parcel_id,
            reference_id: row.reference_id,
            e_ticket: row.e_ticket,
            booking_id: row.booking_id,
            parcel_type: row.parcel_type,
            name: row.name,
            description: row.description,
            status: row.status.parse::<ParcelStatus>()?,
            commuter,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl LostParcelRepository for StoreParcelRepository {
    async fn insert_if_absent(&self, parcel: &LostParcel) -> Result<bool, BoxError> {
        let commuter = parcel.commuter.as_ref().map(serde_json::to_value).transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO lost_parcels (
                parcel_id, reference_id, e_ticket, booking_id, parcel_type, name, description,
                status, commuter, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (e_ticket) DO NOTHING
            "#,
        )
        .bind(parcel.parcel_id)
        .bind(&parcel.reference_id)
        .bind(&parcel.e_ticket)
        .bind(parcel.booking_id)
        .bind(&parcel.parcel_type)
        .bind(&parcel.name)
        .bind(&parcel.description)
        .bind(parcel.status.as_str())
        .bind(commuter)
        .bind(parcel.created_at)
        .bind(parcel.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_by_e_ticket(&self, e_ticket: &str) -> Result<Option<LostParcel>, BoxError> {
        self.find_one("e_ticket", e_ticket).await
    }

    async fn find_by_reference(&self, reference_id: &str) -> Result<Option<LostParcel>, BoxError> {
        self.find_one("reference_id", reference_id).await
    }

    async fn get_parcel(&self, parcel_id: i64) -> Result<Option<LostParcel>, BoxError> {
        let sql = format!("SELECT {} FROM lost_parcels WHERE parcel_id = $1", PARCEL_COLUMNS);
        let row = sqlx::query_as::<_, ParcelRow>(&sql)
            .bind(parcel_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(LostParcel::try_from).transpose()
    }

    async fn list_parcels(&self) -> Result<Vec<LostParcel>, BoxError> {
        let sql = format!("SELECT {} FROM lost_parcels ORDER BY created_at", PARCEL_COLUMNS);
        let rows = sqlx::query_as::<_, ParcelRow>(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(LostParcel::try_from).collect()
    }
}
