//! Stripe integration over the REST API.
//!
//! Requests are form-encoded with the secret key as basic-auth username.
//! Only the handful of fields the application reads are deserialized.

pub mod webhook;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::data::models::MembershipTier;
use crate::data::profiles::SubscriptionState;

/// Metadata key identifying what a checkout session pays for.
pub const META_KIND: &str = "kind";
pub const META_BOOKING_ID: &str = "booking_id";
pub const META_REGISTRATION_ID: &str = "registration_id";
pub const META_USER_ID: &str = "user_id";
pub const META_TIER: &str = "tier";

#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    #[error("request to Stripe failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Stripe returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("unexpected Stripe response: {0}")]
    Malformed(String),
}

/// What a checkout session pays for, as recorded in its metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutPurpose {
    Booking(Uuid),
    Registration(Uuid),
    Membership { user_id: Uuid },
}

impl CheckoutPurpose {
    fn metadata(&self) -> Vec<(String, String)> {
        let (kind, key, id) = match self {
            CheckoutPurpose::Booking(id) => ("booking", META_BOOKING_ID, id),
            CheckoutPurpose::Registration(id) => ("registration", META_REGISTRATION_ID, id),
            CheckoutPurpose::Membership { user_id } => ("membership", META_USER_ID, user_id),
        };
        vec![
            (format!("metadata[{META_KIND}]"), kind.to_string()),
            (format!("metadata[{key}]"), id.to_string()),
        ]
    }

    pub fn from_metadata(metadata: &HashMap<String, String>) -> Option<Self> {
        let id = |key: &str| metadata.get(key).and_then(|v| Uuid::parse_str(v).ok());
        match metadata.get(META_KIND).map(String::as_str)? {
            "booking" => id(META_BOOKING_ID).map(CheckoutPurpose::Booking),
            "registration" => id(META_REGISTRATION_ID).map(CheckoutPurpose::Registration),
            "membership" => id(META_USER_ID).map(|user_id| CheckoutPurpose::Membership { user_id }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub mode: String,
    /// `paid`, `unpaid` or `no_payment_required`.
    pub payment_status: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        matches!(self.payment_status.as_str(), "paid" | "no_payment_required")
    }

    pub fn purpose(&self) -> Option<CheckoutPurpose> {
        CheckoutPurpose::from_metadata(&self.metadata)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub status: String,
    pub customer: String,
    pub created: i64,
    /// Older API versions carry the period end on the subscription itself.
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub items: SubscriptionItems,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub price: Price,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct List<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PortalSession {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

impl Subscription {
    pub fn is_live(&self) -> bool {
        matches!(self.status.as_str(), "active" | "trialing")
    }

    pub fn period_end(&self) -> Option<DateTime<Utc>> {
        self.current_period_end
            .or_else(|| self.items.data.iter().filter_map(|i| i.current_period_end).max())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    pub fn price_ids(&self) -> impl Iterator<Item = &str> {
        self.items.data.iter().map(|i| i.price.id.as_str())
    }
}

/// Subscription price ids configured per paid tier.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    pub basic: Option<String>,
    pub premium: Option<String>,
    pub elite: Option<String>,
}

impl PriceTable {
    pub fn price_for(&self, tier: MembershipTier) -> Option<&str> {
        match tier {
            MembershipTier::None => None,
            MembershipTier::Basic => self.basic.as_deref(),
            MembershipTier::Premium => self.premium.as_deref(),
            MembershipTier::Elite => self.elite.as_deref(),
        }
    }

    pub fn tier_for(&self, price_id: &str) -> Option<MembershipTier> {
        [
            MembershipTier::Basic,
            MembershipTier::Premium,
            MembershipTier::Elite,
        ]
        .into_iter()
        .find(|tier| self.price_for(*tier) == Some(price_id))
    }

    /// Tier granted by a subscription: the configured price first, then the
    /// `tier` metadata written at checkout.
    pub fn tier_of(&self, subscription: &Subscription) -> MembershipTier {
        subscription
            .price_ids()
            .find_map(|id| self.tier_for(id))
            .or_else(|| {
                subscription
                    .metadata
                    .get(META_TIER)
                    .and_then(|t| MembershipTier::from_str_opt(t))
            })
            .unwrap_or(MembershipTier::None)
    }

    /// Reduce a customer's subscriptions to the state stored on their profile.
    ///
    /// The newest live subscription wins. Without one, the newest subscription
    /// still reports its status but grants no tier.
    pub fn summarize(&self, subscriptions: &[Subscription]) -> SubscriptionState {
        let newest_live = subscriptions
            .iter()
            .filter(|s| s.is_live())
            .max_by_key(|s| s.created);
        if let Some(sub) = newest_live {
            return SubscriptionState {
                tier: self.tier_of(sub),
                status: Some(sub.status.clone()),
                current_period_end: sub.period_end(),
            };
        }
        let newest = subscriptions.iter().max_by_key(|s| s.created);
        SubscriptionState {
            tier: MembershipTier::None,
            status: newest.map(|s| s.status.clone()),
            current_period_end: newest.and_then(Subscription::period_end),
        }
    }
}

/// One-off payment checkout for a booking or session registration.
#[derive(Debug, Clone)]
pub struct PaymentCheckout<'a> {
    pub purpose: CheckoutPurpose,
    pub customer_email: &'a str,
    pub description: &'a str,
    pub amount_cents: i64,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
    /// Expire the Stripe session together with the local hold.
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl StripeClient {
    pub fn new(secret_key: String, base_url: &str) -> Result<Self, StripeError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self {
            http,
            secret_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn read<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, StripeError> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or(body);
            warn!(status = status.as_u16(), message, "Stripe request rejected");
            return Err(StripeError::Api {
                status: status.as_u16(),
                message,
            });
        }
        serde_json::from_str(&body).map_err(|e| StripeError::Malformed(e.to_string()))
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T, StripeError> {
        debug!(path, "Stripe POST");
        let resp = self
            .http
            .post(format!("{}{path}", self.base_url))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form)
            .send()
            .await?;
        Self::read(resp).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, StripeError> {
        debug!(path, "Stripe GET");
        let resp = self
            .http
            .get(format!("{}{path}", self.base_url))
            .basic_auth(&self.secret_key, None::<&str>)
            .query(query)
            .send()
            .await?;
        Self::read(resp).await
    }

    pub async fn create_customer(&self, email: &str, user_id: Uuid) -> Result<String, StripeError> {
        let form = vec![
            ("email".to_string(), email.to_string()),
            (format!("metadata[{META_USER_ID}]"), user_id.to_string()),
        ];
        let created: Created = self.post("/v1/customers", &form).await?;
        Ok(created.id)
    }

    pub async fn create_payment_checkout(
        &self,
        checkout: &PaymentCheckout<'_>,
    ) -> Result<CheckoutSession, StripeError> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("customer_email".to_string(), checkout.customer_email.to_string()),
            ("success_url".to_string(), checkout.success_url.to_string()),
            ("cancel_url".to_string(), checkout.cancel_url.to_string()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                "usd".to_string(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                checkout.amount_cents.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                checkout.description.to_string(),
            ),
        ];
        form.extend(checkout.purpose.metadata());
        if let Some(expires_at) = checkout.expires_at {
            form.push(("expires_at".to_string(), expires_at.timestamp().to_string()));
        }
        self.post("/v1/checkout/sessions", &form).await
    }

    pub async fn create_subscription_checkout(
        &self,
        customer_id: &str,
        price_id: &str,
        tier: MembershipTier,
        user_id: Uuid,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CheckoutSession, StripeError> {
        let mut form = vec![
            ("mode".to_string(), "subscription".to_string()),
            ("customer".to_string(), customer_id.to_string()),
            ("client_reference_id".to_string(), user_id.to_string()),
            ("line_items[0][price]".to_string(), price_id.to_string()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("success_url".to_string(), success_url.to_string()),
            ("cancel_url".to_string(), cancel_url.to_string()),
            (
                format!("subscription_data[metadata][{META_TIER}]"),
                tier.as_str().to_string(),
            ),
            (
                format!("subscription_data[metadata][{META_USER_ID}]"),
                user_id.to_string(),
            ),
            (format!("metadata[{META_TIER}]"), tier.as_str().to_string()),
        ];
        form.extend(CheckoutPurpose::Membership { user_id }.metadata());
        self.post("/v1/checkout/sessions", &form).await
    }

    pub async fn retrieve_checkout_session(&self, id: &str) -> Result<CheckoutSession, StripeError> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StripeError::Malformed(format!("invalid checkout session id {id:?}")));
        }
        self.get(&format!("/v1/checkout/sessions/{id}"), &[]).await
    }

    /// All of a customer's subscriptions, newest first.
    pub async fn list_subscriptions(&self, customer_id: &str) -> Result<Vec<Subscription>, StripeError> {
        let list: List<Subscription> = self
            .get(
                "/v1/subscriptions",
                &[("customer", customer_id), ("status", "all"), ("limit", "10")],
            )
            .await?;
        let mut subs = list.data;
        subs.sort_by_key(|s| std::cmp::Reverse(s.created));
        Ok(subs)
    }

    pub async fn create_billing_portal_session(
        &self,
        customer_id: &str,
        return_url: &str,
    ) -> Result<String, StripeError> {
        let form = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("return_url".to_string(), return_url.to_string()),
        ];
        let portal: PortalSession = self.post("/v1/billing_portal/sessions", &form).await?;
        Ok(portal.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices() -> PriceTable {
        PriceTable {
            basic: Some("price_basic".into()),
            premium: Some("price_premium".into()),
            elite: Some("price_elite".into()),
        }
    }

    fn sub(status: &str, created: i64, price: &str, end: i64) -> Subscription {
        Subscription {
            id: format!("sub_{created}"),
            status: status.into(),
            customer: "cus_1".into(),
            created,
            current_period_end: None,
            items: SubscriptionItems {
                data: vec![SubscriptionItem {
                    price: Price { id: price.into() },
                    current_period_end: Some(end),
                }],
            },
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn price_table_maps_both_ways() {
        let table = prices();
        assert_eq!(table.price_for(MembershipTier::Premium), Some("price_premium"));
        assert_eq!(table.price_for(MembershipTier::None), None);
        assert_eq!(table.tier_for("price_elite"), Some(MembershipTier::Elite));
        assert_eq!(table.tier_for("price_unknown"), None);
    }

    #[test]
    fn newest_live_subscription_wins() {
        let subs = vec![
            sub("active", 100, "price_basic", 1_800_000_000),
            sub("trialing", 200, "price_elite", 1_900_000_000),
            sub("canceled", 300, "price_premium", 1_700_000_000),
        ];
        let state = prices().summarize(&subs);
        assert_eq!(state.tier, MembershipTier::Elite);
        assert_eq!(state.status.as_deref(), Some("trialing"));
        assert_eq!(
            state.current_period_end,
            DateTime::from_timestamp(1_900_000_000, 0)
        );
    }

    #[test]
    fn lapsed_subscription_grants_no_tier() {
        let subs = vec![sub("past_due", 100, "price_premium", 1_800_000_000)];
        let state = prices().summarize(&subs);
        assert_eq!(state.tier, MembershipTier::None);
        assert_eq!(state.status.as_deref(), Some("past_due"));

        let none = prices().summarize(&[]);
        assert_eq!(none.status, None);
        assert_eq!(none.current_period_end, None);
    }

    #[test]
    fn tier_falls_back_to_metadata() {
        let mut s = sub("active", 1, "price_legacy", 1_800_000_000);
        s.metadata.insert(META_TIER.into(), "premium".into());
        assert_eq!(prices().tier_of(&s), MembershipTier::Premium);
    }

    #[test]
    fn checkout_purpose_survives_metadata() {
        let id = Uuid::new_v4();
        for purpose in [
            CheckoutPurpose::Booking(id),
            CheckoutPurpose::Registration(id),
            CheckoutPurpose::Membership { user_id: id },
        ] {
            let metadata: HashMap<String, String> = purpose
                .metadata()
                .into_iter()
                .map(|(k, v)| {
                    let key = k.trim_start_matches("metadata[").trim_end_matches(']');
                    (key.to_string(), v)
                })
                .collect();
            assert_eq!(CheckoutPurpose::from_metadata(&metadata), Some(purpose));
        }
        assert_eq!(CheckoutPurpose::from_metadata(&HashMap::new()), None);
    }

    #[test]
    fn paid_statuses() {
        let mut session = CheckoutSession {
            id: "cs_test_1".into(),
            url: None,
            mode: "payment".into(),
            payment_status: "unpaid".into(),
            customer: None,
            subscription: None,
            client_reference_id: None,
            metadata: HashMap::new(),
        };
        assert!(!session.is_paid());
        session.payment_status = "paid".into();
        assert!(session.is_paid());
        session.payment_status = "no_payment_required".into();
        assert!(session.is_paid());
    }
}
