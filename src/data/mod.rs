//! Database models and queries.

pub mod accounts;
pub mod bookings;
pub mod courts;
pub mod health;
pub mod kv;
pub mod models;
pub mod profiles;
pub mod registrations;
pub mod roles;
pub mod sessions;
pub mod time_slots;
pub mod user_sessions;
pub mod webhook_events;
