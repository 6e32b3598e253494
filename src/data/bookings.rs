//! Court booking queries.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::booking::interval::Interval;
use crate::data::models::{Booking, BookingStatus, PaymentStatus};

/// Intervals on a court that are unavailable inside `window`: live bookings
/// (confirmed, or pending with an unexpired hold) and non-cancelled sessions
/// scheduled on the court.
pub async fn occupied<'e, E>(
    executor: E,
    court_id: Uuid,
    window: &Interval,
    now: DateTime<Utc>,
    exclude_booking: Option<Uuid>,
) -> Result<Vec<Interval>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let rows: Vec<(DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
        r#"
        SELECT start_time, end_time FROM bookings
        WHERE court_id = $1
          AND start_time < $3 AND end_time > $2
          AND (status = 'confirmed' OR (status = 'pending' AND expires_at > $4))
          AND ($5::uuid IS NULL OR id <> $5)
        UNION ALL
        SELECT start_time, end_time FROM sessions
        WHERE court_id = $1
          AND NOT is_cancelled
          AND start_time < $3 AND end_time > $2
        "#,
    )
    .bind(court_id)
    .bind(window.start)
    .bind(window.end)
    .bind(now)
    .bind(exclude_booking)
    .fetch_all(executor)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(start, end)| Interval { start, end })
        .collect())
}

pub struct NewBooking<'a> {
    pub user_id: Uuid,
    pub court_id: Uuid,
    pub interval: Interval,
    pub slot_ids: &'a [Uuid],
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub subtotal_cents: i32,
    pub discount_cents: i32,
    pub total_cents: i32,
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn insert(conn: &mut PgConnection, new: &NewBooking<'_>) -> Result<Booking, sqlx::Error> {
    let booking = sqlx::query_as::<_, Booking>(
        r#"
        INSERT INTO bookings (
            id, user_id, court_id, start_time, end_time, status, payment_status,
            subtotal_cents, discount_cents, total_cents, expires_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.user_id)
    .bind(new.court_id)
    .bind(new.interval.start)
    .bind(new.interval.end)
    .bind(new.status)
    .bind(new.payment_status)
    .bind(new.subtotal_cents)
    .bind(new.discount_cents)
    .bind(new.total_cents)
    .bind(new.expires_at)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query(
        "INSERT INTO booking_slots (booking_id, time_slot_id) SELECT $1, UNNEST($2::uuid[])",
    )
    .bind(booking.id)
    .bind(new.slot_ids)
    .execute(&mut *conn)
    .await?;

    Ok(booking)
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Booking>> {
    sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch booking")
}

/// Fetch a booking and lock its row. Take the court lock first.
pub async fn lock(conn: &mut PgConnection, id: Uuid) -> Result<Option<Booking>, sqlx::Error> {
    sqlx::query_as::<_, Booking>("SELECT * FROM bookings WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(conn)
        .await
}

pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Booking>> {
    sqlx::query_as::<_, Booking>(
        "SELECT * FROM bookings WHERE user_id = $1 ORDER BY start_time DESC LIMIT 200",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("failed to list bookings for user")
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub status: Option<BookingStatus>,
    pub court_id: Option<Uuid>,
}

pub async fn list(pool: &PgPool, filter: &BookingFilter) -> Result<Vec<Booking>> {
    sqlx::query_as::<_, Booking>(
        r#"
        SELECT * FROM bookings
        WHERE ($1::timestamptz IS NULL OR end_time > $1)
          AND ($2::timestamptz IS NULL OR start_time < $2)
          AND ($3::booking_status IS NULL OR status = $3)
          AND ($4::uuid IS NULL OR court_id = $4)
        ORDER BY start_time
        LIMIT 500
        "#,
    )
    .bind(filter.from)
    .bind(filter.to)
    .bind(filter.status)
    .bind(filter.court_id)
    .fetch_all(pool)
    .await
    .context("failed to list bookings")
}

pub async fn set_status(
    conn: &mut PgConnection,
    id: Uuid,
    status: BookingStatus,
    payment_status: PaymentStatus,
) -> Result<Booking, sqlx::Error> {
    sqlx::query_as::<_, Booking>(
        r#"
        UPDATE bookings SET
            status = $2,
            payment_status = $3,
            expires_at = CASE WHEN $2 = 'pending'::booking_status THEN expires_at ELSE NULL END,
            cancelled_at = CASE WHEN $2 = 'cancelled'::booking_status THEN now() ELSE cancelled_at END
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

pub async fn set_checkout_session(pool: &PgPool, id: Uuid, checkout_session_id: &str) -> Result<()> {
    sqlx::query("UPDATE bookings SET checkout_session_id = $2 WHERE id = $1")
        .bind(id)
        .bind(checkout_session_id)
        .execute(pool)
        .await
        .context("failed to store checkout session on booking")?;
    Ok(())
}

/// Move pending bookings whose hold has passed to `expired`. Returns how many changed.
pub async fn expire_pending(pool: &PgPool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE bookings SET status = 'expired', expires_at = NULL
        WHERE status = 'pending' AND expires_at <= $1
        "#,
    )
    .bind(now)
    .execute(pool)
    .await
    .context("failed to expire pending bookings")?;
    Ok(result.rows_affected())
}

pub async fn count_upcoming(pool: &PgPool) -> Result<i64> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM bookings WHERE status = 'confirmed' AND start_time > now()",
    )
    .fetch_one(pool)
    .await
    .context("failed to count bookings")
}
