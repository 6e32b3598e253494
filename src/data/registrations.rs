//! Session registration and waitlist queries.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use ts_rs::TS;
use uuid::Uuid;

use crate::booking::interval::Interval;
use crate::data::models::{PaymentStatus, RegistrationStatus, SessionRegistration};

pub async fn for_session(
    conn: &mut PgConnection,
    session_id: Uuid,
) -> Result<Vec<SessionRegistration>, sqlx::Error> {
    sqlx::query_as::<_, SessionRegistration>(
        "SELECT * FROM session_registrations WHERE session_id = $1 ORDER BY created_at",
    )
    .bind(session_id)
    .fetch_all(conn)
    .await
}

pub async fn find_active(
    conn: &mut PgConnection,
    session_id: Uuid,
    user_id: Uuid,
) -> Result<Option<SessionRegistration>, sqlx::Error> {
    sqlx::query_as::<_, SessionRegistration>(
        r#"
        SELECT * FROM session_registrations
        WHERE session_id = $1 AND user_id = $2
          AND status IN ('pending', 'registered', 'waitlisted')
        "#,
    )
    .bind(session_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await
}

/// Free sessions a member has claimed for sessions starting inside `week`.
pub async fn count_free_used(
    conn: &mut PgConnection,
    user_id: Uuid,
    week: &Interval,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM session_registrations r
        JOIN sessions s ON s.id = r.session_id
        WHERE r.user_id = $1
          AND r.used_free_session
          AND r.status IN ('pending', 'registered')
          AND s.start_time >= $2 AND s.start_time < $3
        "#,
    )
    .bind(user_id)
    .bind(week.start)
    .bind(week.end)
    .fetch_one(conn)
    .await
}

pub struct NewRegistration {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub status: RegistrationStatus,
    pub waitlist_position: Option<i32>,
    pub payment_status: PaymentStatus,
    pub price_cents: i32,
    pub discount_cents: i32,
    pub used_free_session: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn insert(
    conn: &mut PgConnection,
    new: &NewRegistration,
) -> Result<SessionRegistration, sqlx::Error> {
    sqlx::query_as::<_, SessionRegistration>(
        r#"
        INSERT INTO session_registrations (
            id, session_id, user_id, status, waitlist_position, payment_status,
            price_cents, discount_cents, used_free_session, expires_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.session_id)
    .bind(new.user_id)
    .bind(new.status)
    .bind(new.waitlist_position)
    .bind(new.payment_status)
    .bind(new.price_cents)
    .bind(new.discount_cents)
    .bind(new.used_free_session)
    .bind(new.expires_at)
    .fetch_one(conn)
    .await
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<SessionRegistration>> {
    sqlx::query_as::<_, SessionRegistration>("SELECT * FROM session_registrations WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch registration")
}

/// Fetch a registration and lock its row. Take the session lock first.
pub async fn lock(conn: &mut PgConnection, id: Uuid) -> Result<Option<SessionRegistration>, sqlx::Error> {
    sqlx::query_as::<_, SessionRegistration>(
        "SELECT * FROM session_registrations WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(conn)
    .await
}

/// Transition a registration. Leaving the waitlist clears its position;
/// leaving `pending` clears the hold.
pub async fn set_status(
    conn: &mut PgConnection,
    id: Uuid,
    status: RegistrationStatus,
    payment_status: PaymentStatus,
) -> Result<SessionRegistration, sqlx::Error> {
    sqlx::query_as::<_, SessionRegistration>(
        r#"
        UPDATE session_registrations SET
            status = $2,
            payment_status = $3,
            waitlist_position = CASE WHEN $2 = 'waitlisted'::registration_status
                THEN waitlist_position ELSE NULL END,
            expires_at = CASE WHEN $2 = 'pending'::registration_status
                THEN expires_at ELSE NULL END,
            cancelled_at = CASE WHEN $2 = 'cancelled'::registration_status
                THEN now() ELSE cancelled_at END
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(payment_status)
    .fetch_one(conn)
    .await
}

/// Move a waitlisted entry into a seat with a freshly computed price.
pub async fn apply_promotion(
    conn: &mut PgConnection,
    id: Uuid,
    payment_status: PaymentStatus,
    price_cents: i32,
    discount_cents: i32,
    used_free_session: bool,
) -> Result<SessionRegistration, sqlx::Error> {
    sqlx::query_as::<_, SessionRegistration>(
        r#"
        UPDATE session_registrations SET
            status = 'registered',
            waitlist_position = NULL,
            payment_status = $2,
            price_cents = $3,
            discount_cents = $4,
            used_free_session = $5
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(payment_status)
    .bind(price_cents)
    .bind(discount_cents)
    .bind(used_free_session)
    .fetch_one(conn)
    .await
}

pub async fn set_checkout_session(pool: &PgPool, id: Uuid, checkout_session_id: &str) -> Result<()> {
    sqlx::query("UPDATE session_registrations SET checkout_session_id = $2 WHERE id = $1")
        .bind(id)
        .bind(checkout_session_id)
        .execute(pool)
        .await
        .context("failed to store checkout session on registration")?;
    Ok(())
}

/// Registrations expired by one pass of [`expire_pending`].
#[derive(Debug, Default)]
pub struct Expired {
    pub count: u64,
    /// Sessions that gained free seats, deduplicated.
    pub session_ids: Vec<Uuid>,
}

/// Expire pending registrations whose hold has passed.
pub async fn expire_pending(pool: &PgPool, now: DateTime<Utc>) -> Result<Expired> {
    let mut session_ids = sqlx::query_scalar::<_, Uuid>(
        r#"
        UPDATE session_registrations SET status = 'expired', expires_at = NULL
        WHERE status = 'pending' AND expires_at <= $1
        RETURNING session_id
        "#,
    )
    .bind(now)
    .fetch_all(pool)
    .await
    .context("failed to expire pending registrations")?;

    let count = session_ids.len() as u64;
    session_ids.sort_unstable();
    session_ids.dedup();
    Ok(Expired { count, session_ids })
}

pub async fn cancel_all_for_session(conn: &mut PgConnection, session_id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE session_registrations SET
            status = 'cancelled', waitlist_position = NULL, expires_at = NULL, cancelled_at = now()
        WHERE session_id = $1 AND status IN ('pending', 'registered', 'waitlisted')
        "#,
    )
    .bind(session_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// A member's registration together with the session it is for.
#[derive(Debug, Clone, Serialize, FromRow, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RegistrationWithSession {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub registration: SessionRegistration,
    pub session_title: String,
    pub session_start: DateTime<Utc>,
    pub session_end: DateTime<Utc>,
}

pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<RegistrationWithSession>> {
    sqlx::query_as::<_, RegistrationWithSession>(
        r#"
        SELECT r.*, s.title AS session_title, s.start_time AS session_start, s.end_time AS session_end
        FROM session_registrations r
        JOIN sessions s ON s.id = r.session_id
        WHERE r.user_id = $1
        ORDER BY s.start_time DESC
        LIMIT 200
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("failed to list registrations for user")
}

/// Roster row for staff views.
#[derive(Debug, Clone, Serialize, FromRow, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RosterEntry {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub registration: SessionRegistration,
    pub email: String,
    pub full_name: Option<String>,
}

pub async fn roster(pool: &PgPool, session_id: Uuid) -> Result<Vec<RosterEntry>> {
    sqlx::query_as::<_, RosterEntry>(
        r#"
        SELECT r.*, p.email, p.full_name
        FROM session_registrations r
        JOIN profiles p ON p.id = r.user_id
        WHERE r.session_id = $1
        ORDER BY r.status, r.waitlist_position NULLS FIRST, r.created_at
        "#,
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
    .context("failed to fetch session roster")
}
