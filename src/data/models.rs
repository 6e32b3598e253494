//! Row types and enumerations shared by the data layer and the web API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, TS)]
#[sqlx(type_name = "court_surface", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum CourtSurface {
    Indoor,
    Outdoor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, TS)]
#[sqlx(type_name = "booking_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum BookingStatus {
    /// Awaiting payment; holds the court until `expires_at`.
    Pending,
    Confirmed,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, TS)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    /// Nothing to pay (zero total, free session).
    Waived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, TS)]
#[sqlx(type_name = "session_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum SessionKind {
    OpenPlay,
    Clinic,
    League,
    Tournament,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, TS)]
#[sqlx(type_name = "registration_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum RegistrationStatus {
    /// Holds a seat while payment completes.
    Pending,
    Registered,
    Waitlisted,
    Cancelled,
    Expired,
}

impl RegistrationStatus {
    /// Whether this registration counts against session capacity.
    pub fn holds_seat(self) -> bool {
        matches!(self, Self::Pending | Self::Registered)
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Registered | Self::Waitlisted)
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, TS,
)]
#[sqlx(type_name = "membership_tier", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum MembershipTier {
    #[default]
    None,
    Basic,
    Premium,
    Elite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, TS)]
#[sqlx(type_name = "app_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum AppRole {
    Admin,
    Staff,
    Member,
}

#[derive(Debug, Clone, Serialize, FromRow, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Court {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub surface: CourtSurface,
    pub hourly_rate_cents: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TimeSlot {
    pub id: Uuid,
    pub court_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Overrides the court's hourly rate for this slot.
    pub price_cents: Option<i32>,
    /// Cleared by staff to block a slot (maintenance, private events).
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub court_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub subtotal_cents: i32,
    pub discount_cents: i32,
    pub total_cents: i32,
    pub checkout_session_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Session {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub kind: SessionKind,
    pub skill_level: Option<String>,
    pub instructor: Option<String>,
    pub court_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub capacity: i32,
    pub price_cents: i32,
    pub is_cancelled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SessionRegistration {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub status: RegistrationStatus,
    pub waitlist_position: Option<i32>,
    pub payment_status: PaymentStatus,
    pub price_cents: i32,
    pub discount_cents: i32,
    pub used_free_session: bool,
    pub checkout_session_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, FromRow, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub skill_level: Option<String>,
    pub membership_tier: MembershipTier,
    #[serde(skip_serializing)]
    #[ts(skip)]
    pub stripe_customer_id: Option<String>,
    pub subscription_status: Option<String>,
    pub subscription_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Login credentials. Never serialized.
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}
