//! Membership tier catalogue.

use axum::extract::State;
use axum::response::Response;
use serde::Serialize;
use ts_rs::TS;

use crate::data::models::MembershipTier;
use crate::state::AppState;
use crate::stripe::PriceTable;
use crate::web::routes::{cache, with_cache_control};

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TierInfo {
    pub tier: MembershipTier,
    pub name: &'static str,
    #[ts(type = "number")]
    pub court_discount_pct: i64,
    #[ts(type = "number")]
    pub session_discount_pct: i64,
    #[ts(type = "number")]
    pub weekly_free_sessions: i64,
    /// Whether the tier can be purchased online right now.
    pub purchasable: bool,
}

pub fn tiers(prices: &PriceTable, payments_enabled: bool) -> Vec<TierInfo> {
    MembershipTier::ALL
        .into_iter()
        .map(|tier| TierInfo {
            tier,
            name: tier.display_name(),
            court_discount_pct: tier.court_discount_pct(),
            session_discount_pct: tier.session_discount_pct(),
            weekly_free_sessions: tier.weekly_free_sessions(),
            purchasable: payments_enabled && prices.price_for(tier).is_some(),
        })
        .collect()
}

/// `GET /api/memberships`
pub async fn list_memberships(State(state): State<AppState>) -> Response {
    with_cache_control(
        tiers(&state.prices, state.stripe.is_some()),
        cache::REFERENCE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_every_tier_with_benefits() {
        let prices = PriceTable {
            basic: Some("price_basic".into()),
            premium: None,
            elite: Some("price_elite".into()),
        };
        let tiers = tiers(&prices, true);
        assert_eq!(tiers.len(), 4);

        let elite = tiers.iter().find(|t| t.tier == MembershipTier::Elite).unwrap();
        assert_eq!(elite.court_discount_pct, 30);
        assert_eq!(elite.weekly_free_sessions, 3);
        assert!(elite.purchasable);

        let premium = tiers.iter().find(|t| t.tier == MembershipTier::Premium).unwrap();
        assert!(!premium.purchasable);
        assert!(!tiers[0].purchasable);
    }

    #[test]
    fn nothing_is_purchasable_without_payments() {
        let prices = PriceTable {
            basic: Some("price_basic".into()),
            ..Default::default()
        };
        assert!(tiers(&prices, false).iter().all(|t| !t.purchasable));
    }
}
