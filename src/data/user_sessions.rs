//! Login session persistence (`user_sessions`).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

pub async fn create(
    pool: &PgPool,
    token: &str,
    user_id: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("INSERT INTO user_sessions (token, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .execute(pool)
        .await
        .context("failed to create session")?;
    Ok(())
}

/// Resolve a token to its user if the session has not expired.
pub async fn lookup(pool: &PgPool, token: &str) -> Result<Option<(Uuid, DateTime<Utc>)>> {
    sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
        "SELECT user_id, expires_at FROM user_sessions WHERE token = $1 AND expires_at > now()",
    )
    .bind(token)
    .fetch_optional(pool)
    .await
    .context("failed to look up session")
}

pub async fn delete(pool: &PgPool, token: &str) -> Result<()> {
    sqlx::query("DELETE FROM user_sessions WHERE token = $1")
        .bind(token)
        .execute(pool)
        .await
        .context("failed to delete session")?;
    Ok(())
}

pub async fn count_active(pool: &PgPool) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM user_sessions WHERE expires_at > now()")
        .fetch_one(pool)
        .await
        .context("failed to count sessions")
}

pub async fn purge_expired(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at <= now()")
        .execute(pool)
        .await
        .context("failed to purge expired sessions")?;
    Ok(result.rows_affected())
}
