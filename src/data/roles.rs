//! Role assignments (`user_roles`).

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::data::models::AppRole;

pub async fn for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<AppRole>> {
    sqlx::query_scalar::<_, AppRole>("SELECT role FROM user_roles WHERE user_id = $1")
        .bind(user_id)
        .fetch_all(pool)
        .await
        .context("failed to fetch user roles")
}

pub async fn grant(pool: &PgPool, user_id: Uuid, role: AppRole) -> Result<()> {
    sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2) ON CONFLICT DO NOTHING")
        .bind(user_id)
        .bind(role)
        .execute(pool)
        .await
        .context("failed to grant role")?;
    Ok(())
}

pub async fn revoke(pool: &PgPool, user_id: Uuid, role: AppRole) -> Result<bool> {
    let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role = $2")
        .bind(user_id)
        .bind(role)
        .execute(pool)
        .await
        .context("failed to revoke role")?;
    Ok(result.rows_affected() > 0)
}

/// Grant `admin` to the account with `email`, if it exists. Returns the account id.
pub async fn ensure_admin_by_email(pool: &PgPool, email: &str) -> Result<Option<Uuid>> {
    let id: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM accounts WHERE lower(email) = lower($1)")
            .bind(email)
            .fetch_optional(pool)
            .await
            .context("failed to look up seed admin")?;
    if let Some(id) = id {
        grant(pool, id, AppRole::Admin).await?;
    }
    Ok(id)
}
