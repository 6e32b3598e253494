//! Court reservation and group-session registration logic.
//!
//! The pure parts ([`interval`], [`pricing`], [`waitlist`], [`week`]) decide
//! availability, prices and seat placement from rows already loaded. The
//! transactional parts ([`reservations`], [`registrations`]) load those rows
//! under a row lock on the contended parent (court or session) so concurrent
//! requests for the same resource serialize.

pub mod interval;
pub mod pricing;
pub mod registrations;
pub mod reservations;
pub mod waitlist;
pub mod week;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Maximum number of consecutive slots in a single court booking.
pub const MAX_SLOTS_PER_BOOKING: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("end time must be after start time")]
    InvalidInterval,
    #[error("no time slots selected")]
    NoSlots,
    #[error("at most {max} consecutive slots can be booked at once")]
    TooManySlots { max: usize },
    #[error("selected slots belong to different courts")]
    MixedCourts,
    #[error("selected slots are not consecutive")]
    NotContiguous,
    #[error("time slot {0} not found")]
    SlotNotFound(Uuid),
    #[error("time slot {0} is not open for booking")]
    SlotBlocked(Uuid),
    #[error("the court is already taken at {start}")]
    SlotTaken { start: DateTime<Utc> },
    #[error("cannot book a time in the past")]
    InPast,
    #[error("court not found")]
    CourtNotFound,
    #[error("court is not accepting bookings")]
    CourtInactive,
    #[error("booking not found")]
    BookingNotFound,
    #[error("session not found")]
    SessionNotFound,
    #[error("session has been cancelled")]
    SessionCancelled,
    #[error("session has already started")]
    SessionStarted,
    #[error("already registered for this session")]
    AlreadyRegistered,
    #[error("registration not found")]
    RegistrationNotFound,
    #[error("cannot cancel a {0} entry")]
    NotCancellable(&'static str),
    #[error("nothing to pay")]
    NothingToPay,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Result of applying a payment confirmation to a booking or registration.
#[derive(Debug, Clone)]
pub enum Confirmation<T> {
    /// The record transitioned to confirmed/registered and paid.
    Confirmed(T),
    /// The record was already paid; nothing changed.
    AlreadyConfirmed(T),
    /// Payment arrived but the record could not be honored (cancelled, or
    /// the resource was taken after the hold lapsed). Needs manual follow-up.
    Rejected { record: T, reason: &'static str },
}

impl<T> Confirmation<T> {
    pub fn record(&self) -> &T {
        match self {
            Confirmation::Confirmed(r) | Confirmation::AlreadyConfirmed(r) => r,
            Confirmation::Rejected { record, .. } => record,
        }
    }

    pub fn into_record(self) -> T {
        match self {
            Confirmation::Confirmed(r) | Confirmation::AlreadyConfirmed(r) => r,
            Confirmation::Rejected { record, .. } => record,
        }
    }
}

/// Narrow a computed cent amount to the `INTEGER` column type.
pub(crate) fn to_db_cents(cents: i64) -> i32 {
    i32::try_from(cents.max(0)).unwrap_or(i32::MAX)
}
