//! Member profile queries, including subscription state synced from Stripe.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool};
use ts_rs::TS;
use uuid::Uuid;

use crate::data::models::{AppRole, MembershipTier, Profile};

pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Profile>> {
    sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch profile")
}

/// Fetch a profile inside an open transaction.
pub async fn get_in(conn: &mut PgConnection, id: Uuid) -> Result<Option<Profile>, sqlx::Error> {
    sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = $1")
        .bind(id)
        .fetch_optional(conn)
        .await
}

/// Lock a member's profile row for the rest of the transaction.
///
/// Callers that also lock a session must take the session lock first.
pub async fn lock(conn: &mut PgConnection, id: Uuid) -> Result<Option<Profile>, sqlx::Error> {
    sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(conn)
        .await
}

pub async fn find_by_customer(pool: &PgPool, customer_id: &str) -> Result<Option<Profile>> {
    sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE stripe_customer_id = $1")
        .bind(customer_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch profile by customer")
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub skill_level: Option<String>,
}

/// Update member-editable fields. `None` leaves a field unchanged.
pub async fn update(pool: &PgPool, id: Uuid, update: &ProfileUpdate) -> Result<Option<Profile>> {
    sqlx::query_as::<_, Profile>(
        r#"
        UPDATE profiles SET
            full_name = COALESCE($2, full_name),
            phone = COALESCE($3, phone),
            skill_level = COALESCE($4, skill_level),
            updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(update.full_name.as_deref())
    .bind(update.phone.as_deref())
    .bind(update.skill_level.as_deref())
    .fetch_optional(pool)
    .await
    .context("failed to update profile")
}

pub async fn set_customer(pool: &PgPool, id: Uuid, customer_id: &str) -> Result<()> {
    sqlx::query("UPDATE profiles SET stripe_customer_id = $2, updated_at = now() WHERE id = $1")
        .bind(id)
        .bind(customer_id)
        .execute(pool)
        .await
        .context("failed to store stripe customer id")?;
    Ok(())
}

/// Subscription state as last observed at the payment provider.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionState {
    pub tier: MembershipTier,
    pub status: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
}

pub async fn set_subscription(
    pool: &PgPool,
    id: Uuid,
    state: &SubscriptionState,
) -> Result<Profile> {
    sqlx::query_as::<_, Profile>(
        r#"
        UPDATE profiles SET
            membership_tier = $2,
            subscription_status = $3,
            subscription_end = $4,
            updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(state.tier)
    .bind(state.status.as_deref())
    .bind(state.current_period_end)
    .fetch_one(pool)
    .await
    .context("failed to store subscription state")
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileListParams {
    pub search: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// A profile together with its granted roles.
#[derive(Debug, Clone, Serialize, FromRow, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProfileWithRoles {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub profile: Profile,
    pub roles: Vec<AppRole>,
}

pub async fn list_with_roles(
    pool: &PgPool,
    params: &ProfileListParams,
) -> Result<Vec<ProfileWithRoles>> {
    let pattern = params
        .search
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| format!("%{}%", s.trim()));
    sqlx::query_as::<_, ProfileWithRoles>(
        r#"
        SELECT p.*,
            COALESCE(
                (SELECT array_agg(r.role ORDER BY r.role) FROM user_roles r WHERE r.user_id = p.id),
                '{}'
            ) AS roles
        FROM profiles p
        WHERE ($1::text IS NULL OR p.email ILIKE $1 OR p.full_name ILIKE $1)
        ORDER BY p.created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(pattern)
    .bind(params.limit.clamp(1, 200))
    .bind(params.offset.max(0))
    .fetch_all(pool)
    .await
    .context("failed to list profiles")
}
