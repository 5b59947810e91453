use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coachline_core::ports::{ScheduleSource, SchedulePort, ScheduledCallback};
use coachline_core::BoxError;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{info, warn};

/// One-shot callbacks queued in Postgres. Workers on any instance claim due
/// rows with `SKIP LOCKED`, so each entry goes to one worker at a time.
pub struct StoreScheduleQueue {
    pool: PgPool,
}

impl StoreScheduleQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ScheduledRow {
    name: String,
    target: String,
    payload: Value,
    fire_at: DateTime<Utc>,
}

#[async_trait]
impl SchedulePort for StoreScheduleQueue {
    async fn schedule_once(&self, name: &str, when: DateTime<Utc>, target: &str, payload: &Value) -> Result<(), BoxError> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_callbacks (name, target, payload, fire_at, fired_at)
            VALUES ($1, $2, $3, $4, NULL)
            ON CONFLICT (name) DO UPDATE
            SET target = EXCLUDED.target, payload = EXCLUDED.payload, fire_at = EXCLUDED.fire_at, fired_at = NULL
            "#,
        )
        .bind(name)
        .bind(target)
        .bind(payload)
        .bind(when)
        .execute(&self.pool)
        .await?;

        info!("Scheduled {} for {} at {}", name, target, when);
        Ok(())
    }
}

#[async_trait]
impl ScheduleSource for StoreScheduleQueue {
    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledCallback>, BoxError> {
        let rows = sqlx::query_as::<_, ScheduledRow>(
            r#"
            UPDATE scheduled_callbacks
            SET fired_at = $1
            WHERE name IN (
                SELECT name FROM scheduled_callbacks
                WHERE fired_at IS NULL AND fire_at <= $1
                ORDER BY fire_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING name, target, payload, fire_at
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ScheduledCallback {
                name: r.name,
                target: r.target,
                payload: r.payload,
                fire_at: r.fire_at,
            })
            .collect())
    }

    async fn release(&self, callback: &ScheduledCallback, retry_at: DateTime<Utc>) -> Result<(), BoxError> {
        // rows re-armed by schedule_once since the claim already have fired_at cleared
        let result = sqlx::query(
            r#"
            UPDATE scheduled_callbacks
            SET fired_at = NULL, fire_at = $2
            WHERE name = $1 AND fired_at IS NOT NULL
            "#,
        )
        .bind(&callback.name)
        .bind(retry_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            warn!("Released {} for retry at {}", callback.name, retry_at);
        }
        Ok(())
    }
}
