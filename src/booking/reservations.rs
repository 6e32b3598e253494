//! Court reservations: quoting, holding, confirming and cancelling bookings.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use ts_rs::TS;
use uuid::Uuid;

use super::interval::{self, Interval};
use super::pricing::{self, Quote};
use super::{BookingError, Confirmation, MAX_SLOTS_PER_BOOKING, to_db_cents, week};
use crate::data::models::{Booking, BookingStatus, Court, MembershipTier, PaymentStatus, TimeSlot};
use crate::data::{bookings, courts, profiles, time_slots};

/// Slots validated for booking, with the court row locked.
struct Selection {
    court: Court,
    slots: Vec<TimeSlot>,
    interval: Interval,
}

/// Load the requested slots, lock their court and check that the block can
/// be booked right now.
async fn select_slots(
    conn: &mut PgConnection,
    slot_ids: &[Uuid],
    now: DateTime<Utc>,
) -> Result<Selection, BookingError> {
    let mut ids = slot_ids.to_vec();
    ids.sort();
    ids.dedup();
    if ids.is_empty() {
        return Err(BookingError::NoSlots);
    }
    if ids.len() > MAX_SLOTS_PER_BOOKING {
        return Err(BookingError::TooManySlots {
            max: MAX_SLOTS_PER_BOOKING,
        });
    }

    let slots = time_slots::get_many(&mut *conn, &ids).await?;
    if let Some(missing) = ids.iter().find(|id| !slots.iter().any(|s| s.id == **id)) {
        return Err(BookingError::SlotNotFound(*missing));
    }

    let (court_id, covered) = interval::merge_contiguous(&slots)?;

    let court = courts::lock(&mut *conn, court_id)
        .await?
        .ok_or(BookingError::CourtNotFound)?;
    if !court.is_active {
        return Err(BookingError::CourtInactive);
    }
    if covered.start <= now {
        return Err(BookingError::InPast);
    }
    if let Some(blocked) = slots.iter().find(|s| !s.is_available) {
        return Err(BookingError::SlotBlocked(blocked.id));
    }

    let taken = bookings::occupied(&mut *conn, court_id, &covered, now, None).await?;
    if let Some(conflict) = taken.iter().find(|t| covered.overlaps(t)) {
        return Err(BookingError::SlotTaken {
            start: conflict.start.max(covered.start),
        });
    }

    Ok(Selection {
        court,
        slots,
        interval: covered,
    })
}

async fn tier_for(
    conn: &mut PgConnection,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<MembershipTier, sqlx::Error> {
    Ok(profiles::get_in(conn, user_id)
        .await?
        .map_or(MembershipTier::None, |p| pricing::effective_tier(&p, now)))
}

/// Price a prospective booking without writing anything.
pub async fn quote(
    pool: &PgPool,
    user_id: Uuid,
    slot_ids: &[Uuid],
    now: DateTime<Utc>,
) -> Result<Quote, BookingError> {
    let mut tx = pool.begin().await?;
    let selection = select_slots(&mut tx, slot_ids, now).await?;
    let tier = tier_for(&mut tx, user_id, now).await?;
    tx.rollback().await?;
    Ok(pricing::quote_booking(&selection.slots, &selection.court, tier))
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Reservation {
    pub booking: Booking,
    pub quote: Quote,
}

/// Reserve a block of consecutive slots.
///
/// Free bookings are confirmed immediately. Paid bookings are held as
/// `pending` until `now + hold`; payment confirmation or the maintenance
/// sweep resolves them.
pub async fn reserve(
    pool: &PgPool,
    user_id: Uuid,
    slot_ids: &[Uuid],
    hold: Duration,
    now: DateTime<Utc>,
) -> Result<Reservation, BookingError> {
    let mut tx = pool.begin().await?;
    let selection = select_slots(&mut tx, slot_ids, now).await?;
    let tier = tier_for(&mut tx, user_id, now).await?;
    let quote = pricing::quote_booking(&selection.slots, &selection.court, tier);

    let (status, payment_status, expires_at) = if quote.total_cents == 0 {
        (BookingStatus::Confirmed, PaymentStatus::Waived, None)
    } else {
        (BookingStatus::Pending, PaymentStatus::Unpaid, Some(now + hold))
    };

    let slot_ids: Vec<Uuid> = selection.slots.iter().map(|s| s.id).collect();
    let booking = bookings::insert(
        &mut tx,
        &bookings::NewBooking {
            user_id,
            court_id: selection.court.id,
            interval: selection.interval,
            slot_ids: &slot_ids,
            status,
            payment_status,
            subtotal_cents: to_db_cents(quote.subtotal_cents),
            discount_cents: to_db_cents(quote.discount_cents),
            total_cents: to_db_cents(quote.total_cents),
            expires_at,
        },
    )
    .await?;
    tx.commit().await?;

    info!(
        booking_id = %booking.id,
        court = %selection.court.name,
        start = %booking.start_time,
        total_cents = booking.total_cents,
        status = ?booking.status,
        "Court reserved"
    );

    Ok(Reservation { booking, quote })
}

/// Cancel a pending or confirmed booking.
///
/// Members may cancel their own bookings before the start time; staff may
/// cancel any booking at any time.
pub async fn cancel(
    pool: &PgPool,
    actor: Uuid,
    is_staff: bool,
    booking_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Booking, BookingError> {
    let court_id = bookings::get(pool, booking_id)
        .await?
        .ok_or(BookingError::BookingNotFound)?
        .court_id;

    let mut tx = pool.begin().await?;
    courts::lock(&mut tx, court_id).await?;
    let booking = bookings::lock(&mut tx, booking_id)
        .await?
        .filter(|b| is_staff || b.user_id == actor)
        .ok_or(BookingError::BookingNotFound)?;

    match booking.status {
        BookingStatus::Pending | BookingStatus::Confirmed => {}
        BookingStatus::Cancelled => return Err(BookingError::NotCancellable("cancelled")),
        BookingStatus::Expired => return Err(BookingError::NotCancellable("expired")),
    }
    if !is_staff && booking.start_time <= now {
        return Err(BookingError::NotCancellable("past"));
    }

    let cancelled = bookings::set_status(
        &mut tx,
        booking.id,
        BookingStatus::Cancelled,
        booking.payment_status,
    )
    .await?;
    tx.commit().await?;

    info!(booking_id = %cancelled.id, by_staff = is_staff, "Booking cancelled");
    Ok(cancelled)
}

/// Apply a completed payment to a booking. Safe to call repeatedly.
pub async fn confirm_paid(
    pool: &PgPool,
    booking_id: Uuid,
    checkout_session_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Confirmation<Booking>, BookingError> {
    let court_id = bookings::get(pool, booking_id)
        .await?
        .ok_or(BookingError::BookingNotFound)?
        .court_id;

    let mut tx = pool.begin().await?;
    courts::lock(&mut tx, court_id).await?;
    let booking = bookings::lock(&mut tx, booking_id)
        .await?
        .ok_or(BookingError::BookingNotFound)?;

    let outcome = match booking.status {
        BookingStatus::Confirmed if booking.payment_status != PaymentStatus::Unpaid => {
            Confirmation::AlreadyConfirmed(booking)
        }
        BookingStatus::Confirmed | BookingStatus::Pending => {
            let updated =
                bookings::set_status(&mut tx, booking.id, BookingStatus::Confirmed, PaymentStatus::Paid)
                    .await?;
            Confirmation::Confirmed(updated)
        }
        BookingStatus::Expired => {
            let interval = Interval {
                start: booking.start_time,
                end: booking.end_time,
            };
            let taken =
                bookings::occupied(&mut *tx, court_id, &interval, now, Some(booking.id)).await?;
            if interval::is_free(&interval, &taken) {
                let updated = bookings::set_status(
                    &mut tx,
                    booking.id,
                    BookingStatus::Confirmed,
                    PaymentStatus::Paid,
                )
                .await?;
                Confirmation::Confirmed(updated)
            } else {
                let updated =
                    bookings::set_status(&mut tx, booking.id, BookingStatus::Expired, PaymentStatus::Paid)
                        .await?;
                Confirmation::Rejected {
                    record: updated,
                    reason: "court was rebooked after the hold expired",
                }
            }
        }
        BookingStatus::Cancelled => {
            let updated =
                bookings::set_status(&mut tx, booking.id, BookingStatus::Cancelled, PaymentStatus::Paid)
                    .await?;
            Confirmation::Rejected {
                record: updated,
                reason: "booking was cancelled before payment completed",
            }
        }
    };
    tx.commit().await?;

    if let Some(checkout) = checkout_session_id
        && outcome.record().checkout_session_id.as_deref() != Some(checkout)
    {
        bookings::set_checkout_session(pool, booking_id, checkout)
            .await?;
    }

    match &outcome {
        Confirmation::Confirmed(b) => info!(booking_id = %b.id, "Booking payment confirmed"),
        Confirmation::AlreadyConfirmed(b) => {
            info!(booking_id = %b.id, "Booking already confirmed, ignoring duplicate payment notice")
        }
        Confirmation::Rejected { record, reason } => {
            warn!(booking_id = %record.id, reason, "Paid booking could not be honored; refund required")
        }
    }
    Ok(outcome)
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SlotAvailability {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[ts(type = "number")]
    pub price_cents: i64,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CourtAvailability {
    pub court: Court,
    pub date: NaiveDate,
    pub slots: Vec<SlotAvailability>,
}

/// Mark each slot of a court's local day as available or not.
pub fn mark_availability(
    court: &Court,
    slots: &[TimeSlot],
    taken: &[Interval],
    now: DateTime<Utc>,
) -> Vec<SlotAvailability> {
    slots
        .iter()
        .map(|slot| {
            let span = Interval::from(slot);
            SlotAvailability {
                id: slot.id,
                start_time: slot.start_time,
                end_time: slot.end_time,
                price_cents: pricing::slot_price_cents(slot, court),
                available: court.is_active
                    && slot.is_available
                    && slot.start_time > now
                    && interval::is_free(&span, taken),
            }
        })
        .collect()
}

pub async fn availability(
    pool: &PgPool,
    court_id: Uuid,
    date: NaiveDate,
    tz: Tz,
    now: DateTime<Utc>,
) -> Result<CourtAvailability, BookingError> {
    let court = courts::get(pool, court_id)
        .await?
        .ok_or(BookingError::CourtNotFound)?;
    let day = week::day_bounds(date, tz);
    let slots = time_slots::list_for_court(pool, court_id, &day)
        .await?;
    let taken = bookings::occupied(pool, court_id, &day, now, None).await?;

    Ok(CourtAvailability {
        slots: mark_availability(&court, &slots, &taken, now),
        court,
        date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::CourtSurface;
    use chrono::TimeZone;

    fn court(active: bool) -> Court {
        Court {
            id: Uuid::new_v4(),
            name: "Center".into(),
            description: None,
            surface: CourtSurface::Outdoor,
            hourly_rate_cents: 2000,
            is_active: active,
            created_at: Utc::now(),
        }
    }

    fn slot(court: &Court, hour: u32, open: bool) -> TimeSlot {
        let start = Utc.with_ymd_and_hms(2026, 8, 1, hour, 0, 0).unwrap();
        TimeSlot {
            id: Uuid::new_v4(),
            court_id: court.id,
            start_time: start,
            end_time: start + Duration::hours(1),
            price_cents: None,
            is_available: open,
            created_at: start,
        }
    }

    #[test]
    fn availability_combines_block_flag_past_and_overlap() {
        let c = court(true);
        let slots = vec![
            slot(&c, 13, true),
            slot(&c, 14, true),
            slot(&c, 15, false),
            slot(&c, 16, true),
        ];
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 13, 30, 0).unwrap();
        let taken = vec![Interval {
            start: Utc.with_ymd_and_hms(2026, 8, 1, 16, 30, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 8, 1, 17, 30, 0).unwrap(),
        }];

        let marked = mark_availability(&c, &slots, &taken, now);
        let flags: Vec<bool> = marked.iter().map(|s| s.available).collect();
        assert_eq!(flags, vec![false, true, false, false]);
        assert!(marked.iter().all(|s| s.price_cents == 2000));
    }

    #[test]
    fn inactive_court_has_no_availability() {
        let c = court(false);
        let slots = vec![slot(&c, 18, true)];
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap();
        assert!(!mark_availability(&c, &slots, &[], now)[0].available);
    }
}
