//! Court catalogue queries.

use anyhow::{Context, Result};
use serde::Deserialize;
use sqlx::{PgConnection, PgPool};
use ts_rs::TS;
use uuid::Uuid;

use crate::data::models::{Court, CourtSurface};

pub async fn list(pool: &PgPool, include_inactive: bool) -> Result<Vec<Court>> {
    sqlx::query_as::<_, Court>(
        "SELECT * FROM courts WHERE ($1 OR is_active) ORDER BY name",
    )
    .bind(include_inactive)
    .fetch_all(pool)
    .await
    .context("failed to list courts")
}

pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Court>> {
    sqlx::query_as::<_, Court>("SELECT * FROM courts WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch court")
}

/// Fetch a court and lock its row until the transaction ends.
///
/// Every booking write for a court goes through this lock, which serializes
/// overlap checks against concurrent reservations.
pub async fn lock(conn: &mut PgConnection, id: Uuid) -> Result<Option<Court>, sqlx::Error> {
    sqlx::query_as::<_, Court>("SELECT * FROM courts WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(conn)
        .await
}

#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct NewCourt {
    pub name: String,
    pub description: Option<String>,
    pub surface: CourtSurface,
    pub hourly_rate_cents: i32,
}

pub async fn create(pool: &PgPool, court: &NewCourt) -> Result<Court> {
    sqlx::query_as::<_, Court>(
        r#"
        INSERT INTO courts (id, name, description, surface, hourly_rate_cents)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(court.name.trim())
    .bind(court.description.as_deref())
    .bind(court.surface)
    .bind(court.hourly_rate_cents)
    .fetch_one(pool)
    .await
    .context("failed to create court")
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CourtUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub surface: Option<CourtSurface>,
    pub hourly_rate_cents: Option<i32>,
    pub is_active: Option<bool>,
}

pub async fn update(pool: &PgPool, id: Uuid, update: &CourtUpdate) -> Result<Option<Court>> {
    sqlx::query_as::<_, Court>(
        r#"
        UPDATE courts SET
            name = COALESCE($2, name),
            description = COALESCE($3, description),
            surface = COALESCE($4, surface),
            hourly_rate_cents = COALESCE($5, hourly_rate_cents),
            is_active = COALESCE($6, is_active)
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(update.name.as_deref().map(str::trim))
    .bind(update.description.as_deref())
    .bind(update.surface)
    .bind(update.hourly_rate_cents)
    .bind(update.is_active)
    .fetch_optional(pool)
    .await
    .context("failed to update court")
}
