//! Seat placement and waitlist ordering for capacity-limited sessions.

use uuid::Uuid;

use crate::data::models::{RegistrationStatus, SessionRegistration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Seat,
    Waitlist { position: i32 },
}

pub fn seats_left(occupied: i64, capacity: i32) -> i64 {
    (i64::from(capacity) - occupied).max(0)
}

pub fn next_waitlist_position(current_max: Option<i32>) -> i32 {
    current_max.map_or(1, |max| max.max(0) + 1)
}

/// A new registrant gets a seat iff fewer than `capacity` seats are occupied.
pub fn decide(occupied: i64, capacity: i32, current_max_position: Option<i32>) -> Placement {
    if seats_left(occupied, capacity) > 0 {
        Placement::Seat
    } else {
        Placement::Waitlist {
            position: next_waitlist_position(current_max_position),
        }
    }
}

/// Waitlisted entries in the order they should be promoted.
pub fn promotion_order(registrations: &[SessionRegistration]) -> Vec<&SessionRegistration> {
    let mut waitlisted: Vec<&SessionRegistration> = registrations
        .iter()
        .filter(|r| r.status == RegistrationStatus::Waitlisted)
        .collect();
    waitlisted.sort_by_key(|r| (r.waitlist_position.unwrap_or(i32::MAX), r.created_at));
    waitlisted
}

/// Entries to promote so that free seats are filled from the head of the waitlist.
pub fn promotions(
    occupied: i64,
    capacity: i32,
    registrations: &[SessionRegistration],
) -> Vec<&SessionRegistration> {
    let free = usize::try_from(seats_left(occupied, capacity)).unwrap_or(0);
    promotion_order(registrations).into_iter().take(free).collect()
}

/// 1-based position of `id` among the waitlisted entries, if it is waitlisted.
pub fn waitlist_rank(id: Uuid, registrations: &[SessionRegistration]) -> Option<usize> {
    promotion_order(registrations)
        .iter()
        .position(|r| r.id == id)
        .map(|idx| idx + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::PaymentStatus;
    use chrono::{Duration, TimeZone, Utc};

    fn reg(status: RegistrationStatus, position: Option<i32>, age_minutes: i64) -> SessionRegistration {
        let base = Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap();
        SessionRegistration {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            user_id: Uuid::new_v4(),
            status,
            waitlist_position: position,
            payment_status: PaymentStatus::Unpaid,
            price_cents: 1500,
            discount_cents: 0,
            used_free_session: false,
            checkout_session_id: None,
            expires_at: None,
            created_at: base + Duration::minutes(age_minutes),
            cancelled_at: None,
        }
    }

    #[test]
    fn seat_until_capacity_then_waitlist() {
        assert_eq!(decide(0, 4, None), Placement::Seat);
        assert_eq!(decide(3, 4, None), Placement::Seat);
        assert_eq!(decide(4, 4, None), Placement::Waitlist { position: 1 });
        assert_eq!(decide(4, 4, Some(2)), Placement::Waitlist { position: 3 });
        // Over-capacity (e.g. capacity lowered by staff) still waitlists.
        assert_eq!(decide(6, 4, Some(1)), Placement::Waitlist { position: 2 });
    }

    #[test]
    fn zero_capacity_always_waitlists() {
        assert_eq!(decide(0, 0, None), Placement::Waitlist { position: 1 });
        assert_eq!(seats_left(0, 0), 0);
    }

    #[test]
    fn promotion_follows_position_then_creation() {
        let regs = vec![
            reg(RegistrationStatus::Registered, None, 0),
            reg(RegistrationStatus::Waitlisted, Some(2), 1),
            reg(RegistrationStatus::Waitlisted, Some(1), 5),
            reg(RegistrationStatus::Cancelled, Some(1), 0),
            reg(RegistrationStatus::Waitlisted, Some(2), 0),
        ];
        let order: Vec<Uuid> = promotion_order(&regs).iter().map(|r| r.id).collect();
        assert_eq!(order, vec![regs[2].id, regs[4].id, regs[1].id]);
    }

    #[test]
    fn promotions_fill_only_free_seats() {
        let regs = vec![
            reg(RegistrationStatus::Waitlisted, Some(1), 0),
            reg(RegistrationStatus::Waitlisted, Some(2), 1),
            reg(RegistrationStatus::Waitlisted, Some(3), 2),
        ];
        assert_eq!(promotions(8, 10, &regs).len(), 2);
        assert_eq!(promotions(10, 10, &regs).len(), 0);
        let all = promotions(0, 10, &regs);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, regs[0].id);
    }

    #[test]
    fn rank_is_one_based_and_ignores_non_waitlisted() {
        let regs = vec![
            reg(RegistrationStatus::Waitlisted, Some(4), 0),
            reg(RegistrationStatus::Registered, None, 0),
            reg(RegistrationStatus::Waitlisted, Some(7), 0),
        ];
        assert_eq!(waitlist_rank(regs[0].id, &regs), Some(1));
        assert_eq!(waitlist_rank(regs[2].id, &regs), Some(2));
        assert_eq!(waitlist_rank(regs[1].id, &regs), None);
    }
}
