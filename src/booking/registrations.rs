//! Group session registration, waitlisting and promotion.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info, warn};
use ts_rs::TS;
use uuid::Uuid;

use super::interval::Interval;
use super::pricing::{self, SessionQuote};
use super::waitlist::{self, Placement};
use super::{BookingError, Confirmation, to_db_cents, week};
use crate::data::models::{
    MembershipTier, PaymentStatus, RegistrationStatus, Session, SessionRegistration,
};
use crate::data::{bookings, courts, profiles, registrations, sessions};

/// Reads the member's tier under a profile row lock. The weekly free-session
/// count spans sessions, so it is only stable while the profile is locked.
async fn tier_for(
    conn: &mut PgConnection,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<MembershipTier, sqlx::Error> {
    Ok(profiles::lock(conn, user_id)
        .await?
        .map_or(MembershipTier::None, |p| pricing::effective_tier(&p, now)))
}

/// Price a seat in `session` for `user_id`, counting free sessions already
/// claimed in the session's facility week.
///
/// Must run after the session lock is held.
async fn quote_for(
    conn: &mut PgConnection,
    session: &Session,
    user_id: Uuid,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<SessionQuote, sqlx::Error> {
    let tier = tier_for(&mut *conn, user_id, now).await?;
    let free_used = if tier.weekly_free_sessions() > 0 {
        let week = week::week_bounds(session.start_time, tz);
        registrations::count_free_used(&mut *conn, user_id, &week).await?
    } else {
        0
    };
    Ok(pricing::quote_session(
        i64::from(session.price_cents),
        tier,
        free_used,
    ))
}

fn occupied(regs: &[SessionRegistration]) -> i64 {
    regs.iter().filter(|r| r.status.holds_seat()).count() as i64
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RegistrationOutcome {
    pub registration: SessionRegistration,
    pub quote: SessionQuote,
    /// 1-based place in line when waitlisted.
    #[ts(type = "number | null")]
    pub waitlist_rank: Option<usize>,
}

/// Register a member for a session, taking a seat when one is free and
/// joining the waitlist otherwise.
pub async fn register(
    pool: &PgPool,
    user_id: Uuid,
    session_id: Uuid,
    hold: Duration,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<RegistrationOutcome, BookingError> {
    let mut tx = pool.begin().await?;
    let session = sessions::lock(&mut tx, session_id)
        .await?
        .ok_or(BookingError::SessionNotFound)?;
    if session.is_cancelled {
        return Err(BookingError::SessionCancelled);
    }
    if session.start_time <= now {
        return Err(BookingError::SessionStarted);
    }
    if registrations::find_active(&mut tx, session_id, user_id)
        .await?
        .is_some()
    {
        return Err(BookingError::AlreadyRegistered);
    }

    let regs = registrations::for_session(&mut tx, session_id).await?;
    let max_position = regs.iter().filter_map(|r| r.waitlist_position).max();
    let placement = waitlist::decide(occupied(&regs), session.capacity, max_position);
    let quote = quote_for(&mut tx, &session, user_id, tz, now).await?;

    let new = match placement {
        Placement::Seat if quote.total_cents == 0 => registrations::NewRegistration {
            session_id,
            user_id,
            status: RegistrationStatus::Registered,
            waitlist_position: None,
            payment_status: PaymentStatus::Waived,
            price_cents: to_db_cents(quote.total_cents),
            discount_cents: to_db_cents(quote.discount_cents),
            used_free_session: quote.uses_free_session,
            expires_at: None,
        },
        Placement::Seat => registrations::NewRegistration {
            session_id,
            user_id,
            status: RegistrationStatus::Pending,
            waitlist_position: None,
            payment_status: PaymentStatus::Unpaid,
            price_cents: to_db_cents(quote.total_cents),
            discount_cents: to_db_cents(quote.discount_cents),
            used_free_session: false,
            expires_at: Some(now + hold),
        },
        // Waitlisted entries are priced again on promotion.
        Placement::Waitlist { position } => registrations::NewRegistration {
            session_id,
            user_id,
            status: RegistrationStatus::Waitlisted,
            waitlist_position: Some(position),
            payment_status: PaymentStatus::Unpaid,
            price_cents: to_db_cents(quote.total_cents),
            discount_cents: to_db_cents(quote.discount_cents),
            used_free_session: false,
            expires_at: None,
        },
    };

    let registration = registrations::insert(&mut tx, &new).await?;
    tx.commit().await?;

    let waitlist_rank = match placement {
        Placement::Seat => None,
        Placement::Waitlist { .. } => {
            let mut all = regs;
            all.push(registration.clone());
            waitlist::waitlist_rank(registration.id, &all)
        }
    };

    info!(
        registration_id = %registration.id,
        session = %session.title,
        status = ?registration.status,
        free = registration.used_free_session,
        "Session registration created"
    );

    Ok(RegistrationOutcome {
        registration,
        quote,
        waitlist_rank,
    })
}

/// Promote waitlisted entries into any free seats of a locked session.
///
/// Promoted entries are re-priced for their current tier and become
/// `registered`: `waived` when nothing is owed, `unpaid` otherwise.
pub async fn promote(
    conn: &mut PgConnection,
    session: &Session,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<Vec<SessionRegistration>, BookingError> {
    if session.is_cancelled || session.start_time <= now {
        return Ok(Vec::new());
    }

    let regs = registrations::for_session(&mut *conn, session.id).await?;
    let to_promote: Vec<(Uuid, Uuid)> =
        waitlist::promotions(occupied(&regs), session.capacity, &regs)
            .into_iter()
            .map(|r| (r.id, r.user_id))
            .collect();

    // Lock order: session, then profiles by id.
    let mut members: Vec<Uuid> = to_promote.iter().map(|(_, user_id)| *user_id).collect();
    members.sort_unstable();
    members.dedup();
    for user_id in &members {
        profiles::lock(&mut *conn, *user_id).await?;
    }

    let mut promoted = Vec::with_capacity(to_promote.len());
    for (id, user_id) in to_promote {
        let quote = quote_for(&mut *conn, session, user_id, tz, now).await?;
        let payment = if quote.total_cents == 0 {
            PaymentStatus::Waived
        } else {
            PaymentStatus::Unpaid
        };
        let registration = registrations::apply_promotion(
            &mut *conn,
            id,
            payment,
            to_db_cents(quote.total_cents),
            to_db_cents(quote.discount_cents),
            quote.uses_free_session,
        )
        .await?;
        info!(
            registration_id = %registration.id,
            session_id = %session.id,
            payment = ?registration.payment_status,
            "Promoted from waitlist"
        );
        promoted.push(registration);
    }
    Ok(promoted)
}

/// Lock a session and fill its free seats from the waitlist.
pub async fn promote_session(
    pool: &PgPool,
    session_id: Uuid,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<Vec<SessionRegistration>, BookingError> {
    let mut tx = pool.begin().await?;
    let Some(session) = sessions::lock(&mut tx, session_id).await? else {
        return Ok(Vec::new());
    };
    let promoted = promote(&mut tx, &session, tz, now).await?;
    tx.commit().await?;
    Ok(promoted)
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Cancellation {
    pub registration: SessionRegistration,
    pub promoted: Vec<SessionRegistration>,
}

/// Cancel an active registration. A freed seat goes to the head of the
/// waitlist in the same transaction.
pub async fn cancel(
    pool: &PgPool,
    actor: Uuid,
    is_staff: bool,
    registration_id: Uuid,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<Cancellation, BookingError> {
    let session_id = registrations::get(pool, registration_id)
        .await?
        .filter(|r| is_staff || r.user_id == actor)
        .ok_or(BookingError::RegistrationNotFound)?
        .session_id;

    let mut tx = pool.begin().await?;
    let session = sessions::lock(&mut tx, session_id)
        .await?
        .ok_or(BookingError::SessionNotFound)?;
    let current = registrations::lock(&mut tx, registration_id)
        .await?
        .ok_or(BookingError::RegistrationNotFound)?;

    match current.status {
        RegistrationStatus::Cancelled => return Err(BookingError::NotCancellable("cancelled")),
        RegistrationStatus::Expired => return Err(BookingError::NotCancellable("expired")),
        _ => {}
    }
    if !is_staff && session.start_time <= now {
        return Err(BookingError::SessionStarted);
    }

    let registration = registrations::set_status(
        &mut tx,
        current.id,
        RegistrationStatus::Cancelled,
        current.payment_status,
    )
    .await?;
    let promoted = if current.status.holds_seat() {
        promote(&mut tx, &session, tz, now).await?
    } else {
        Vec::new()
    };
    tx.commit().await?;

    info!(
        registration_id = %registration.id,
        promoted = promoted.len(),
        "Registration cancelled"
    );
    Ok(Cancellation {
        registration,
        promoted,
    })
}

/// Apply a completed payment to a registration. Safe to call repeatedly.
pub async fn confirm_paid(
    pool: &PgPool,
    registration_id: Uuid,
    checkout_session_id: Option<&str>,
) -> Result<Confirmation<SessionRegistration>, BookingError> {
    let session_id = registrations::get(pool, registration_id)
        .await?
        .ok_or(BookingError::RegistrationNotFound)?
        .session_id;

    let mut tx = pool.begin().await?;
    let session = sessions::lock(&mut tx, session_id)
        .await?
        .ok_or(BookingError::SessionNotFound)?;
    let current = registrations::lock(&mut tx, registration_id)
        .await?
        .ok_or(BookingError::RegistrationNotFound)?;

    let outcome = match current.status {
        RegistrationStatus::Registered if current.payment_status != PaymentStatus::Unpaid => {
            Confirmation::AlreadyConfirmed(current)
        }
        RegistrationStatus::Registered | RegistrationStatus::Pending => {
            let updated = registrations::set_status(
                &mut tx,
                current.id,
                RegistrationStatus::Registered,
                PaymentStatus::Paid,
            )
            .await?;
            Confirmation::Confirmed(updated)
        }
        RegistrationStatus::Expired => {
            let regs = registrations::for_session(&mut tx, session_id).await?;
            let has_seat = !session.is_cancelled
                && waitlist::seats_left(occupied(&regs), session.capacity) > 0;
            let status = if has_seat {
                RegistrationStatus::Registered
            } else {
                RegistrationStatus::Expired
            };
            let updated =
                registrations::set_status(&mut tx, current.id, status, PaymentStatus::Paid).await?;
            if has_seat {
                Confirmation::Confirmed(updated)
            } else {
                Confirmation::Rejected {
                    record: updated,
                    reason: "seat was taken after the hold expired",
                }
            }
        }
        RegistrationStatus::Waitlisted | RegistrationStatus::Cancelled => {
            let updated = registrations::set_status(
                &mut tx,
                current.id,
                current.status,
                PaymentStatus::Paid,
            )
            .await?;
            Confirmation::Rejected {
                record: updated,
                reason: "registration does not hold a seat",
            }
        }
    };
    tx.commit().await?;

    if let Some(checkout) = checkout_session_id
        && outcome.record().checkout_session_id.as_deref() != Some(checkout)
    {
        registrations::set_checkout_session(pool, registration_id, checkout).await?;
    }

    match &outcome {
        Confirmation::Confirmed(r) => info!(registration_id = %r.id, "Registration payment confirmed"),
        Confirmation::AlreadyConfirmed(r) => {
            debug!(registration_id = %r.id, "Registration already paid")
        }
        Confirmation::Rejected { record, reason } => {
            warn!(registration_id = %record.id, reason, "Paid registration could not be honored; refund required")
        }
    }
    Ok(outcome)
}

/// Schedule a new session. A session bound to a court locks the court and
/// must not overlap live bookings or other sessions there.
pub async fn create_session(
    pool: &PgPool,
    new: &sessions::NewSession,
    now: DateTime<Utc>,
) -> Result<Session, BookingError> {
    let span = Interval::new(new.start_time, new.end_time)?;
    if span.start <= now {
        return Err(BookingError::InPast);
    }

    let mut tx = pool.begin().await?;
    if let Some(court_id) = new.court_id {
        let court = courts::lock(&mut tx, court_id)
            .await?
            .ok_or(BookingError::CourtNotFound)?;
        if !court.is_active {
            return Err(BookingError::CourtInactive);
        }
        let taken = bookings::occupied(&mut *tx, court_id, &span, now, None).await?;
        if let Some(conflict) = taken.iter().find(|t| span.overlaps(t)) {
            return Err(BookingError::SlotTaken {
                start: conflict.start.max(span.start),
            });
        }
    }
    let session = sessions::create(&mut *tx, new).await?;
    tx.commit().await?;

    info!(session_id = %session.id, title = %session.title, kind = ?session.kind, "Session scheduled");
    Ok(session)
}

/// Apply staff edits to a session; raised capacity pulls from the waitlist.
pub async fn update_session(
    pool: &PgPool,
    session_id: Uuid,
    update: &sessions::SessionUpdate,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<(Session, Vec<SessionRegistration>), BookingError> {
    let mut tx = pool.begin().await?;
    sessions::lock(&mut tx, session_id)
        .await?
        .ok_or(BookingError::SessionNotFound)?;
    let session = sessions::update(&mut tx, session_id, update)
        .await?
        .ok_or(BookingError::SessionNotFound)?;
    let promoted = promote(&mut tx, &session, tz, now).await?;
    tx.commit().await?;
    Ok((session, promoted))
}

/// Cancel a session and every active registration for it.
pub async fn cancel_session(pool: &PgPool, session_id: Uuid) -> Result<u64, BookingError> {
    let mut tx = pool.begin().await?;
    let session = sessions::lock(&mut tx, session_id)
        .await?
        .ok_or(BookingError::SessionNotFound)?;
    if session.is_cancelled {
        return Err(BookingError::SessionCancelled);
    }
    sessions::mark_cancelled(&mut tx, session_id).await?;
    let affected = registrations::cancel_all_for_session(&mut tx, session_id).await?;
    tx.commit().await?;

    info!(session_id = %session_id, title = %session.title, registrations = affected, "Session cancelled");
    Ok(affected)
}

/// Whether a registration can be sent to checkout.
pub fn payable(registration: &SessionRegistration) -> Result<(), BookingError> {
    match (registration.status, registration.payment_status) {
        (RegistrationStatus::Pending | RegistrationStatus::Registered, PaymentStatus::Unpaid)
            if registration.price_cents > 0 =>
        {
            Ok(())
        }
        _ => Err(BookingError::NothingToPay),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reg(status: RegistrationStatus, payment: PaymentStatus, price: i32) -> SessionRegistration {
        let at = Utc.with_ymd_and_hms(2026, 5, 4, 15, 0, 0).unwrap();
        SessionRegistration {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            status,
            waitlist_position: None,
            payment_status: payment,
            price_cents: price,
            discount_cents: 0,
            used_free_session: false,
            checkout_session_id: None,
            expires_at: None,
            created_at: at,
            cancelled_at: None,
        }
    }

    #[test]
    fn occupied_counts_pending_and_registered() {
        let regs = vec![
            reg(RegistrationStatus::Pending, PaymentStatus::Unpaid, 1500),
            reg(RegistrationStatus::Registered, PaymentStatus::Paid, 1500),
            reg(RegistrationStatus::Waitlisted, PaymentStatus::Unpaid, 1500),
            reg(RegistrationStatus::Cancelled, PaymentStatus::Paid, 1500),
            reg(RegistrationStatus::Expired, PaymentStatus::Unpaid, 1500),
        ];
        assert_eq!(occupied(&regs), 2);
    }

    #[test]
    fn only_unpaid_seats_with_a_price_are_payable() {
        assert!(payable(&reg(RegistrationStatus::Pending, PaymentStatus::Unpaid, 1500)).is_ok());
        assert!(payable(&reg(RegistrationStatus::Registered, PaymentStatus::Unpaid, 900)).is_ok());
        assert!(payable(&reg(RegistrationStatus::Registered, PaymentStatus::Paid, 900)).is_err());
        assert!(payable(&reg(RegistrationStatus::Registered, PaymentStatus::Waived, 0)).is_err());
        assert!(payable(&reg(RegistrationStatus::Waitlisted, PaymentStatus::Unpaid, 900)).is_err());
        assert!(payable(&reg(RegistrationStatus::Pending, PaymentStatus::Unpaid, 0)).is_err());
    }
}
