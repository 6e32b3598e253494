//! Membership discounts and price quotes.
//!
//! All amounts are integer cents. Discounts round half up and never exceed
//! the subtotal.

use chrono::{DateTime, Utc};
use serde::Serialize;
use ts_rs::TS;

use crate::data::models::{Court, MembershipTier, Profile, TimeSlot};

/// Free group-session registrations an elite member gets per facility week.
pub const ELITE_FREE_SESSIONS_PER_WEEK: i64 = 3;

/// Subscription states that keep member benefits active.
const ACTIVE_SUBSCRIPTION_STATES: &[&str] = &["active", "trialing"];

impl MembershipTier {
    pub const ALL: [MembershipTier; 4] = [
        MembershipTier::None,
        MembershipTier::Basic,
        MembershipTier::Premium,
        MembershipTier::Elite,
    ];

    pub fn court_discount_pct(self) -> i64 {
        match self {
            MembershipTier::None => 0,
            MembershipTier::Basic => 10,
            MembershipTier::Premium => 20,
            MembershipTier::Elite => 30,
        }
    }

    pub fn session_discount_pct(self) -> i64 {
        match self {
            MembershipTier::None => 0,
            MembershipTier::Basic => 10,
            MembershipTier::Premium => 20,
            MembershipTier::Elite => 30,
        }
    }

    pub fn weekly_free_sessions(self) -> i64 {
        match self {
            MembershipTier::Elite => ELITE_FREE_SESSIONS_PER_WEEK,
            _ => 0,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            MembershipTier::None => "Drop-in",
            MembershipTier::Basic => "Basic",
            MembershipTier::Premium => "Premium",
            MembershipTier::Elite => "Elite",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MembershipTier::None => "none",
            MembershipTier::Basic => "basic",
            MembershipTier::Premium => "premium",
            MembershipTier::Elite => "elite",
        }
    }

    pub fn from_str_opt(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

/// The tier whose benefits apply right now.
///
/// A stored tier only counts while the subscription is active (or trialing)
/// and has not passed its end date.
pub fn effective_tier(profile: &Profile, now: DateTime<Utc>) -> MembershipTier {
    let active = profile
        .subscription_status
        .as_deref()
        .is_some_and(|s| ACTIVE_SUBSCRIPTION_STATES.contains(&s));
    let unexpired = profile.subscription_end.is_none_or(|end| end > now);

    if active && unexpired {
        profile.membership_tier
    } else {
        MembershipTier::None
    }
}

/// `amount * pct / 100`, rounded half up, clamped to `[0, amount]`.
pub fn discount_cents(amount: i64, pct: i64) -> i64 {
    if amount <= 0 || pct <= 0 {
        return 0;
    }
    ((amount * pct.min(100) + 50) / 100).min(amount)
}

/// Price of one slot: the slot's override, or the court's hourly rate prorated
/// by the slot length.
pub fn slot_price_cents(slot: &TimeSlot, court: &Court) -> i64 {
    if let Some(price) = slot.price_cents {
        return i64::from(price.max(0));
    }
    let minutes = (slot.end_time - slot.start_time).num_minutes().max(0);
    (i64::from(court.hourly_rate_cents) * minutes + 30) / 60
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Quote {
    pub tier: MembershipTier,
    #[ts(type = "number")]
    pub subtotal_cents: i64,
    #[ts(type = "number")]
    pub discount_cents: i64,
    #[ts(type = "number")]
    pub total_cents: i64,
}

pub fn quote_booking(slots: &[TimeSlot], court: &Court, tier: MembershipTier) -> Quote {
    let subtotal: i64 = slots.iter().map(|s| slot_price_cents(s, court)).sum();
    let discount = discount_cents(subtotal, tier.court_discount_pct());
    Quote {
        tier,
        subtotal_cents: subtotal,
        discount_cents: discount,
        total_cents: subtotal - discount,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SessionQuote {
    pub tier: MembershipTier,
    #[ts(type = "number")]
    pub subtotal_cents: i64,
    #[ts(type = "number")]
    pub discount_cents: i64,
    #[ts(type = "number")]
    pub total_cents: i64,
    pub uses_free_session: bool,
    /// Free sessions still available this week after this registration.
    #[ts(type = "number")]
    pub free_sessions_left: i64,
}

/// Price a session registration for a member who has already used
/// `free_used_this_week` free sessions in the session's facility week.
pub fn quote_session(
    price_cents: i64,
    tier: MembershipTier,
    free_used_this_week: i64,
) -> SessionQuote {
    let allowance = tier.weekly_free_sessions();
    let remaining = (allowance - free_used_this_week).max(0);

    if price_cents > 0 && remaining > 0 {
        return SessionQuote {
            tier,
            subtotal_cents: price_cents,
            discount_cents: price_cents,
            total_cents: 0,
            uses_free_session: true,
            free_sessions_left: remaining - 1,
        };
    }

    let discount = discount_cents(price_cents, tier.session_discount_pct());
    SessionQuote {
        tier,
        subtotal_cents: price_cents.max(0),
        discount_cents: discount,
        total_cents: price_cents.max(0) - discount,
        uses_free_session: false,
        free_sessions_left: remaining,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::CourtSurface;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn court(rate: i32) -> Court {
        Court {
            id: Uuid::new_v4(),
            name: "Court 1".into(),
            description: None,
            surface: CourtSurface::Indoor,
            hourly_rate_cents: rate,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn slot(court: &Court, minutes: i64, price: Option<i32>) -> TimeSlot {
        let start = Utc.with_ymd_and_hms(2026, 5, 2, 15, 0, 0).unwrap();
        TimeSlot {
            id: Uuid::new_v4(),
            court_id: court.id,
            start_time: start,
            end_time: start + Duration::minutes(minutes),
            price_cents: price,
            is_available: true,
            created_at: start,
        }
    }

    fn profile(tier: MembershipTier, status: Option<&str>, end: Option<DateTime<Utc>>) -> Profile {
        Profile {
            id: Uuid::new_v4(),
            email: "player@example.com".into(),
            full_name: None,
            phone: None,
            skill_level: None,
            membership_tier: tier,
            stripe_customer_id: None,
            subscription_status: status.map(String::from),
            subscription_end: end,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn discount_rounds_half_up_and_never_exceeds_amount() {
        assert_eq!(discount_cents(1000, 10), 100);
        assert_eq!(discount_cents(1005, 10), 101);
        assert_eq!(discount_cents(1004, 10), 100);
        assert_eq!(discount_cents(500, 150), 500);
        assert_eq!(discount_cents(0, 30), 0);
        assert_eq!(discount_cents(-200, 30), 0);
    }

    #[test]
    fn slot_price_prorates_hourly_rate() {
        let c = court(3000);
        assert_eq!(slot_price_cents(&slot(&c, 60, None), &c), 3000);
        assert_eq!(slot_price_cents(&slot(&c, 30, None), &c), 1500);
        assert_eq!(slot_price_cents(&slot(&c, 90, None), &c), 4500);
        assert_eq!(slot_price_cents(&slot(&c, 60, Some(4200)), &c), 4200);
    }

    #[test]
    fn booking_quote_applies_court_discount() {
        let c = court(2500);
        let slots = vec![slot(&c, 60, None), slot(&c, 60, None)];
        let quote = quote_booking(&slots, &c, MembershipTier::Premium);
        assert_eq!(quote.subtotal_cents, 5000);
        assert_eq!(quote.discount_cents, 1000);
        assert_eq!(quote.total_cents, 4000);

        let drop_in = quote_booking(&slots, &c, MembershipTier::None);
        assert_eq!(drop_in.total_cents, 5000);
    }

    #[test]
    fn inactive_subscription_gets_no_benefits() {
        let now = Utc::now();
        let active = profile(MembershipTier::Elite, Some("active"), None);
        let lapsed = profile(MembershipTier::Elite, Some("past_due"), None);
        let expired = profile(
            MembershipTier::Premium,
            Some("active"),
            Some(now - Duration::days(1)),
        );
        let missing = profile(MembershipTier::Basic, None, None);

        assert_eq!(effective_tier(&active, now), MembershipTier::Elite);
        assert_eq!(effective_tier(&lapsed, now), MembershipTier::None);
        assert_eq!(effective_tier(&expired, now), MembershipTier::None);
        assert_eq!(effective_tier(&missing, now), MembershipTier::None);
    }

    #[test]
    fn elite_gets_weekly_free_sessions_then_discount() {
        for used in 0..ELITE_FREE_SESSIONS_PER_WEEK {
            let q = quote_session(2000, MembershipTier::Elite, used);
            assert!(q.uses_free_session);
            assert_eq!(q.total_cents, 0);
            assert_eq!(q.free_sessions_left, ELITE_FREE_SESSIONS_PER_WEEK - used - 1);
        }

        let q = quote_session(2000, MembershipTier::Elite, ELITE_FREE_SESSIONS_PER_WEEK);
        assert!(!q.uses_free_session);
        assert_eq!(q.discount_cents, 600);
        assert_eq!(q.total_cents, 1400);
        assert_eq!(q.free_sessions_left, 0);
    }

    #[test]
    fn other_tiers_never_get_free_sessions() {
        for tier in [
            MembershipTier::None,
            MembershipTier::Basic,
            MembershipTier::Premium,
        ] {
            let q = quote_session(2000, tier, 0);
            assert!(!q.uses_free_session);
            assert_eq!(q.total_cents, 2000 - discount_cents(2000, tier.session_discount_pct()));
        }
    }

    #[test]
    fn free_priced_session_does_not_consume_allowance() {
        let q = quote_session(0, MembershipTier::Elite, 0);
        assert!(!q.uses_free_session);
        assert_eq!(q.total_cents, 0);
        assert_eq!(q.free_sessions_left, ELITE_FREE_SESSIONS_PER_WEEK);
    }

    #[test]
    fn tier_names_round_trip() {
        for tier in MembershipTier::ALL {
            assert_eq!(MembershipTier::from_str_opt(tier.as_str()), Some(tier));
        }
        assert_eq!(MembershipTier::from_str_opt("platinum"), None);
    }
}
