use async_trait::async_trait;
use coachline_core::booking::{Commuter, CommuterContact, CommuterName, TripInfo};
use coachline_core::ports::TripInfoPort;
use coachline_core::repository::CommuterRepository;
use coachline_core::BoxError;
use coachline_shared::pii::Masked;
use serde_json::Value;
use sqlx::PgPool;

/// Read side of the commuter registry and the trip capacity mirror.
pub struct StoreDirectory {
    pool: PgPool,
}

impl StoreDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct CommuterRow {
    pub commuter_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub nic: String,
    pub mobile: String,
    pub email: String,
}

impl From<CommuterRow> for Commuter {
    fn from(row: CommuterRow) -> Self {
        Commuter {
            commuter_id: row.commuter_id,
            name: CommuterName {
                first_name: row.first_name,
                last_name: row.last_name,
            },
            nic: Masked::new(row.nic),
            contact: CommuterContact {
                mobile: row.mobile,
                email: Masked::new(row.email.trim().to_string()),
            },
        }
    }
}

#[derive(sqlx::FromRow)]
struct TripRow {
    trip_id: i64,
    capacity: i32,
    booking_enabled: bool,
    price: i64,
    cancellation_policy: Option<String>,
    schedule: Option<Value>,
}

#[async_trait]
impl CommuterRepository for StoreDirectory {
    async fn get_commuter(&self, commuter_id: i64) -> Result<Option<Commuter>, BoxError> {
        let row = sqlx::query_as::<_, CommuterRow>(
            "SELECT commuter_id, first_name, last_name, nic, mobile, email FROM commuters WHERE commuter_id = $1",
        )
        .bind(commuter_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Commuter::from))
    }
}

#[async_trait]
impl TripInfoPort for StoreDirectory {
    async fn get_trip(&self, trip_id: i64) -> Result<Option<TripInfo>, BoxError> {
        let row = sqlx::query_as::<_, TripRow>(
            r#"
            SELECT trip_id, capacity, booking_enabled, price, cancellation_policy, schedule
            FROM trip_capacities
            WHERE trip_id = $1
            "#,
        )
        .bind(trip_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| TripInfo {
            trip_id: r.trip_id,
            capacity: r.capacity,
            booking_enabled: r.booking_enabled,
            price: r.price,
            cancellation_policy: r.cancellation_policy,
            schedule: r.schedule,
        }))
    }
}
