//! Group session (open play, clinics, leagues) queries.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgExecutor, PgPool};
use ts_rs::TS;
use uuid::Uuid;

use crate::data::models::{Session, SessionKind};

/// A session with its current seat usage.
#[derive(Debug, Clone, Serialize, FromRow, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SessionWithCounts {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub session: Session,
    /// Pending plus registered entries.
    #[ts(type = "number")]
    pub occupied: i64,
    #[ts(type = "number")]
    pub waitlisted: i64,
}

const SESSION_WITH_COUNTS: &str = r#"
    SELECT s.*,
        (SELECT COUNT(*) FROM session_registrations r
            WHERE r.session_id = s.id AND r.status IN ('pending', 'registered')) AS occupied,
        (SELECT COUNT(*) FROM session_registrations r
            WHERE r.session_id = s.id AND r.status = 'waitlisted') AS waitlisted
    FROM sessions s
"#;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub kind: Option<SessionKind>,
    #[serde(default)]
    pub include_cancelled: bool,
}

pub async fn list(pool: &PgPool, filter: &SessionFilter) -> Result<Vec<SessionWithCounts>> {
    sqlx::query_as::<_, SessionWithCounts>(&format!(
        r#"{SESSION_WITH_COUNTS}
        WHERE s.start_time >= COALESCE($1, now())
          AND ($2::timestamptz IS NULL OR s.start_time < $2)
          AND ($3::session_kind IS NULL OR s.kind = $3)
          AND ($4 OR NOT s.is_cancelled)
        ORDER BY s.start_time
        LIMIT 200
        "#
    ))
    .bind(filter.from)
    .bind(filter.to)
    .bind(filter.kind)
    .bind(filter.include_cancelled)
    .fetch_all(pool)
    .await
    .context("failed to list sessions")
}

pub async fn get_with_counts(pool: &PgPool, id: Uuid) -> Result<Option<SessionWithCounts>> {
    sqlx::query_as::<_, SessionWithCounts>(&format!("{SESSION_WITH_COUNTS} WHERE s.id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch session")
}

/// Fetch a session and lock its row until the transaction ends.
///
/// Registration, cancellation and promotion all take this lock first so
/// capacity counts cannot change underneath them.
pub async fn lock(conn: &mut PgConnection, id: Uuid) -> Result<Option<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(conn)
        .await
}

#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct NewSession {
    pub title: String,
    pub description: Option<String>,
    pub kind: SessionKind,
    pub skill_level: Option<String>,
    pub instructor: Option<String>,
    pub court_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub capacity: i32,
    #[serde(default)]
    pub price_cents: i32,
}

/// Insert a session. Callers creating a court-bound session run this inside
/// the transaction holding the court lock.
pub async fn create<'e, E>(executor: E, new: &NewSession) -> Result<Session>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as::<_, Session>(
        r#"
        INSERT INTO sessions (
            id, title, description, kind, skill_level, instructor, court_id,
            start_time, end_time, capacity, price_cents
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.title.trim())
    .bind(new.description.as_deref())
    .bind(new.kind)
    .bind(new.skill_level.as_deref())
    .bind(new.instructor.as_deref())
    .bind(new.court_id)
    .bind(new.start_time)
    .bind(new.end_time)
    .bind(new.capacity)
    .bind(new.price_cents)
    .fetch_one(executor)
    .await
    .context("failed to create session")
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SessionUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub skill_level: Option<String>,
    pub instructor: Option<String>,
    pub capacity: Option<i32>,
    pub price_cents: Option<i32>,
}

/// Update descriptive fields and capacity. Callers promote waitlisted
/// entries afterwards when capacity grows.
pub async fn update(conn: &mut PgConnection, id: Uuid, update: &SessionUpdate) -> Result<Option<Session>, sqlx::Error> {
    sqlx::query_as::<_, Session>(
        r#"
        UPDATE sessions SET
            title = COALESCE($2, title),
            description = COALESCE($3, description),
            skill_level = COALESCE($4, skill_level),
            instructor = COALESCE($5, instructor),
            capacity = COALESCE($6, capacity),
            price_cents = COALESCE($7, price_cents)
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(update.title.as_deref().map(str::trim))
    .bind(update.description.as_deref())
    .bind(update.skill_level.as_deref())
    .bind(update.instructor.as_deref())
    .bind(update.capacity)
    .bind(update.price_cents)
    .fetch_optional(conn)
    .await
}

pub async fn mark_cancelled(conn: &mut PgConnection, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE sessions SET is_cancelled = true WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn count_upcoming(pool: &PgPool) -> Result<i64> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM sessions WHERE NOT is_cancelled AND start_time > now()",
    )
    .fetch_one(pool)
    .await
    .context("failed to count sessions")
}
