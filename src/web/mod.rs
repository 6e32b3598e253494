//! HTTP surface: JSON API, Stripe webhook and embedded pages.

pub mod admin;
pub mod auth;
pub mod bookings;
pub mod checkout;
pub mod courts;
pub mod error;
pub mod memberships;
pub mod middleware;
pub mod pages;
pub mod profile;
pub mod registrations;
pub mod routes;
pub mod sessions;
pub mod status;
pub mod webhook;

pub use routes::*;
