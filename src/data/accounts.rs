//! Credential storage. Each account owns exactly one profile.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::data::models::{Account, AppRole};

#[derive(Debug, thiserror::Error)]
pub enum CreateAccountError {
    #[error("an account with this email already exists")]
    EmailTaken,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Create an account with its profile and the `member` role in one transaction.
pub async fn create(
    pool: &PgPool,
    email: &str,
    password_hash: &str,
    full_name: Option<&str>,
) -> Result<Account, CreateAccountError> {
    let mut tx = pool.begin().await?;
    let id = Uuid::new_v4();

    let inserted = sqlx::query_as::<_, Account>(
        r#"
        INSERT INTO accounts (id, email, password_hash)
        VALUES ($1, $2, $3)
        ON CONFLICT DO NOTHING
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(email)
    .bind(password_hash)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(account) = inserted else {
        return Err(CreateAccountError::EmailTaken);
    };

    sqlx::query("INSERT INTO profiles (id, email, full_name) VALUES ($1, $2, $3)")
        .bind(account.id)
        .bind(email)
        .bind(full_name)
        .execute(&mut *tx)
        .await?;

    sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, $2)")
        .bind(account.id)
        .bind(AppRole::Member)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(account)
}

pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Account>> {
    sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE lower(email) = lower($1)")
        .bind(email)
        .fetch_optional(pool)
        .await
        .context("failed to look up account by email")
}

pub async fn count(pool: &PgPool) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
        .fetch_one(pool)
        .await
        .context("failed to count accounts")
}
