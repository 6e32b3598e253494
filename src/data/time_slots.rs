//! Bookable court time slots.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::booking::interval::Interval;
use crate::data::models::TimeSlot;

/// Slots for a court starting inside `window`, ordered by start time.
pub async fn list_for_court(pool: &PgPool, court_id: Uuid, window: &Interval) -> Result<Vec<TimeSlot>> {
    sqlx::query_as::<_, TimeSlot>(
        r#"
        SELECT * FROM time_slots
        WHERE court_id = $1 AND start_time >= $2 AND start_time < $3
        ORDER BY start_time
        "#,
    )
    .bind(court_id)
    .bind(window.start)
    .bind(window.end)
    .fetch_all(pool)
    .await
    .context("failed to list time slots")
}

pub async fn get_many(conn: &mut PgConnection, ids: &[Uuid]) -> Result<Vec<TimeSlot>, sqlx::Error> {
    sqlx::query_as::<_, TimeSlot>("SELECT * FROM time_slots WHERE id = ANY($1) ORDER BY start_time")
        .bind(ids)
        .fetch_all(conn)
        .await
}

/// Insert slots for `intervals`, skipping any whose start already exists for the court.
/// Returns the number of slots created.
pub async fn create_many(pool: &PgPool, court_id: Uuid, intervals: &[Interval]) -> Result<u64> {
    if intervals.is_empty() {
        return Ok(0);
    }
    let ids: Vec<Uuid> = intervals.iter().map(|_| Uuid::new_v4()).collect();
    let starts: Vec<DateTime<Utc>> = intervals.iter().map(|i| i.start).collect();
    let ends: Vec<DateTime<Utc>> = intervals.iter().map(|i| i.end).collect();

    let result = sqlx::query(
        r#"
        INSERT INTO time_slots (id, court_id, start_time, end_time)
        SELECT id, $2, start_time, end_time
        FROM UNNEST($1::uuid[], $3::timestamptz[], $4::timestamptz[]) AS data(id, start_time, end_time)
        ON CONFLICT (court_id, start_time) DO NOTHING
        "#,
    )
    .bind(&ids)
    .bind(court_id)
    .bind(&starts)
    .bind(&ends)
    .execute(pool)
    .await
    .context("failed to create time slots")?;

    Ok(result.rows_affected())
}

pub async fn update(
    pool: &PgPool,
    id: Uuid,
    is_available: Option<bool>,
    price_cents: Option<Option<i32>>,
) -> Result<Option<TimeSlot>> {
    sqlx::query_as::<_, TimeSlot>(
        r#"
        UPDATE time_slots SET
            is_available = COALESCE($2, is_available),
            price_cents = CASE WHEN $3 THEN $4 ELSE price_cents END
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(is_available)
    .bind(price_cents.is_some())
    .bind(price_cents.flatten())
    .fetch_optional(pool)
    .await
    .context("failed to update time slot")
}
