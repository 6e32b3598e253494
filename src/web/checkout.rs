//! Payment checkout, confirmation and membership subscription handlers.
//!
//! Payments for bookings and session registrations use one-off checkout
//! sessions; memberships use subscription checkout. Both the return-page
//! confirmation and the webhook funnel completed sessions through
//! [`apply_checkout`], which is idempotent.

use axum::extract::State;
use axum::response::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use ts_rs::TS;
use uuid::Uuid;

use crate::booking::registrations as session_registrations;
use crate::booking::{Confirmation, pricing, reservations};
use crate::data::models::{Booking, MembershipTier, Profile, SessionRegistration};
use crate::data::{bookings, courts, profiles, registrations, sessions};
use crate::state::AppState;
use crate::stripe::{CheckoutPurpose, CheckoutSession, PaymentCheckout, StripeClient};
use crate::utils::fmt_cents;
use crate::web::auth::extractors::AuthUser;
use crate::web::auth::session::SessionUser;
use crate::web::error::{ApiError, ApiErrorCode, OptionNotFoundExt, db_error};

/// Stripe refuses checkout sessions that expire sooner than 30 minutes out.
const MIN_CHECKOUT_LIFETIME_MINUTES: i64 = 31;

const SUCCESS_PATH: &str = "/checkout/success?session_id={CHECKOUT_SESSION_ID}";
const CANCEL_PATH: &str = "/checkout/cancelled";

pub fn hold_duration(state: &AppState) -> Duration {
    Duration::from_std(state.config.booking_hold).unwrap_or_else(|_| Duration::minutes(15))
}

fn stripe(state: &AppState) -> Result<&StripeClient, ApiError> {
    state.stripe().ok_or_else(ApiError::payments_unavailable)
}

async fn profile_of(state: &AppState, user_id: Uuid) -> Result<Profile, ApiError> {
    profiles::get(&state.db_pool, user_id)
        .await
        .map_err(|e| db_error("Profile lookup", e))?
        .or_not_found("Profile", user_id)
}

/// Expiry for a payment checkout: the local hold, pushed out to the
/// provider's minimum. A payment after the local hold lapses is still
/// honored when the resource is free.
fn checkout_expiry(hold_expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    let minimum = now + Duration::minutes(MIN_CHECKOUT_LIFETIME_MINUTES);
    hold_expires_at.map_or(minimum, |hold| hold.max(minimum))
}

fn checkout_url(session: CheckoutSession) -> Result<String, ApiError> {
    session.url.ok_or_else(|| {
        warn!(checkout_session_id = %session.id, "Checkout session has no redirect URL");
        ApiError::new(
            ApiErrorCode::PaymentProviderError,
            "Payment provider did not return a checkout page",
        )
    })
}

fn local_label(state: &AppState, start: DateTime<Utc>) -> String {
    start
        .with_timezone(&state.config.facility_timezone)
        .format("%a %b %-d, %-I:%M %p")
        .to_string()
}

/// Open a payment checkout for a pending booking and remember its id.
pub async fn booking_checkout(
    state: &AppState,
    user: &SessionUser,
    booking: &Booking,
) -> Result<String, ApiError> {
    let stripe = stripe(state)?;
    let profile = profile_of(state, user.id).await?;
    let court_name = courts::get(&state.db_pool, booking.court_id)
        .await
        .map_err(|e| db_error("Court lookup", e))?
        .map_or_else(|| "Court".to_owned(), |c| c.name);
    let amount = i64::from(booking.total_cents);
    let description = format!(
        "{court_name} booking, {} ({})",
        local_label(state, booking.start_time),
        fmt_cents(amount)
    );

    let success_url = state.public_url(SUCCESS_PATH);
    let cancel_url = state.public_url(CANCEL_PATH);
    let session = stripe
        .create_payment_checkout(&PaymentCheckout {
            purpose: CheckoutPurpose::Booking(booking.id),
            customer_email: &profile.email,
            description: &description,
            amount_cents: amount,
            success_url: &success_url,
            cancel_url: &cancel_url,
            expires_at: Some(checkout_expiry(booking.expires_at, Utc::now())),
        })
        .await?;

    bookings::set_checkout_session(&state.db_pool, booking.id, &session.id)
        .await
        .map_err(|e| db_error("Checkout session store", e))?;
    info!(booking_id = %booking.id, checkout_session_id = %session.id, "Booking checkout opened");
    checkout_url(session)
}

/// Open a payment checkout for a registration that owes money.
pub async fn registration_checkout(
    state: &AppState,
    user: &SessionUser,
    registration: &SessionRegistration,
) -> Result<String, ApiError> {
    let stripe = stripe(state)?;
    let profile = profile_of(state, user.id).await?;
    let title = sessions::get_with_counts(&state.db_pool, registration.session_id)
        .await
        .map_err(|e| db_error("Session lookup", e))?
        .map(|s| (s.session.title, s.session.start_time));
    let amount = i64::from(registration.price_cents);
    let description = match title {
        Some((title, start)) => format!(
            "{title}, {} ({})",
            local_label(state, start),
            fmt_cents(amount)
        ),
        None => format!("Session registration ({})", fmt_cents(amount)),
    };

    let success_url = state.public_url(SUCCESS_PATH);
    let cancel_url = state.public_url(CANCEL_PATH);
    let session = stripe
        .create_payment_checkout(&PaymentCheckout {
            purpose: CheckoutPurpose::Registration(registration.id),
            customer_email: &profile.email,
            description: &description,
            amount_cents: amount,
            success_url: &success_url,
            cancel_url: &cancel_url,
            expires_at: Some(checkout_expiry(registration.expires_at, Utc::now())),
        })
        .await?;

    registrations::set_checkout_session(&state.db_pool, registration.id, &session.id)
        .await
        .map_err(|e| db_error("Checkout session store", e))?;
    info!(
        registration_id = %registration.id,
        checkout_session_id = %session.id,
        "Registration checkout opened"
    );
    checkout_url(session)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ConfirmStatus {
    Confirmed,
    AlreadyConfirmed,
    /// Paid, but the slot or seat could not be honored. Needs a refund.
    Rejected,
    /// The checkout session has not been paid (yet).
    Unpaid,
}

impl<T> From<&Confirmation<T>> for ConfirmStatus {
    fn from(c: &Confirmation<T>) -> Self {
        match c {
            Confirmation::Confirmed(_) => ConfirmStatus::Confirmed,
            Confirmation::AlreadyConfirmed(_) => ConfirmStatus::AlreadyConfirmed,
            Confirmation::Rejected { .. } => ConfirmStatus::Rejected,
        }
    }
}

/// What a completed checkout did.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export)]
pub enum CheckoutResult {
    Booking {
        status: ConfirmStatus,
        booking: Booking,
    },
    Registration {
        status: ConfirmStatus,
        registration: SessionRegistration,
    },
    Membership {
        status: ConfirmStatus,
        tier: MembershipTier,
    },
    /// Not created by this application.
    Unknown,
}

/// Apply a paid checkout session to whatever it paid for.
pub async fn apply_checkout(
    state: &AppState,
    session: &CheckoutSession,
) -> Result<CheckoutResult, ApiError> {
    let now = Utc::now();
    match session.purpose() {
        Some(CheckoutPurpose::Booking(id)) => {
            let outcome =
                reservations::confirm_paid(&state.db_pool, id, Some(&session.id), now).await?;
            Ok(CheckoutResult::Booking {
                status: ConfirmStatus::from(&outcome),
                booking: outcome.into_record(),
            })
        }
        Some(CheckoutPurpose::Registration(id)) => {
            let outcome =
                session_registrations::confirm_paid(&state.db_pool, id, Some(&session.id)).await?;
            Ok(CheckoutResult::Registration {
                status: ConfirmStatus::from(&outcome),
                registration: outcome.into_record(),
            })
        }
        Some(CheckoutPurpose::Membership { user_id }) => {
            let Some(customer) = session.customer.as_deref() else {
                warn!(checkout_session_id = %session.id, "Membership checkout without a customer");
                return Ok(CheckoutResult::Unknown);
            };
            let before = profile_of(state, user_id).await?;
            if before.stripe_customer_id.as_deref() != Some(customer) {
                profiles::set_customer(&state.db_pool, user_id, customer)
                    .await
                    .map_err(|e| db_error("Customer link", e))?;
            }
            let profile = sync_subscription(state, user_id, customer).await?;
            let tier = pricing::effective_tier(&profile, now);
            // The subscription may not be live yet when the return page races the provider.
            let status = if tier == MembershipTier::None {
                ConfirmStatus::Unpaid
            } else {
                ConfirmStatus::Confirmed
            };
            Ok(CheckoutResult::Membership { status, tier })
        }
        None => {
            warn!(checkout_session_id = %session.id, "Checkout session without recognizable metadata");
            Ok(CheckoutResult::Unknown)
        }
    }
}

/// Re-read a customer's subscriptions and store the summary on the profile.
pub async fn sync_subscription(
    state: &AppState,
    user_id: Uuid,
    customer_id: &str,
) -> Result<Profile, ApiError> {
    let subscriptions = stripe(state)?.list_subscriptions(customer_id).await?;
    let summary = state.prices.summarize(&subscriptions);
    let profile = profiles::set_subscription(&state.db_pool, user_id, &summary)
        .await
        .map_err(|e| db_error("Subscription store", e))?;
    info!(
        user_id = %user_id,
        tier = summary.tier.as_str(),
        status = ?summary.status,
        "Subscription synced"
    );
    Ok(profile)
}

/// Find (or create) the payment-provider customer for a profile.
async fn ensure_customer(state: &AppState, profile: &Profile) -> Result<String, ApiError> {
    if let Some(id) = profile.stripe_customer_id.as_deref() {
        return Ok(id.to_owned());
    }
    let customer = stripe(state)?
        .create_customer(&profile.email, profile.id)
        .await?;
    profiles::set_customer(&state.db_pool, profile.id, &customer)
        .await
        .map_err(|e| db_error("Customer link", e))?;
    info!(user_id = %profile.id, "Payment customer created");
    Ok(customer)
}

#[derive(Debug, Deserialize, TS)]
#[ts(export)]
pub struct MembershipCheckoutRequest {
    pub tier: MembershipTier,
}

#[derive(Debug, Serialize, TS)]
#[ts(export)]
pub struct RedirectResponse {
    pub url: String,
}

/// `POST /api/checkout/membership`
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn membership_checkout(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<MembershipCheckoutRequest>,
) -> Result<Json<RedirectResponse>, ApiError> {
    if body.tier == MembershipTier::None {
        return Err(ApiError::bad_request("Choose a paid membership tier"));
    }
    let stripe = stripe(&state)?;
    let price_id = state
        .prices
        .price_for(body.tier)
        .ok_or_else(|| {
            ApiError::bad_request(format!(
                "{} membership is not offered",
                body.tier.display_name()
            ))
        })?
        .to_owned();

    let profile = profile_of(&state, user.id).await?;
    if pricing::effective_tier(&profile, Utc::now()) != MembershipTier::None {
        return Err(ApiError::conflict(
            "You already have an active membership; manage it from the billing portal",
        ));
    }
    let customer = ensure_customer(&state, &profile).await?;

    let session = stripe
        .create_subscription_checkout(
            &customer,
            &price_id,
            body.tier,
            user.id,
            &state.public_url(SUCCESS_PATH),
            &state.public_url("/pricing"),
        )
        .await?;
    info!(tier = body.tier.as_str(), checkout_session_id = %session.id, "Membership checkout opened");
    Ok(Json(RedirectResponse {
        url: checkout_url(session)?,
    }))
}

#[derive(Debug, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ConfirmRequest {
    pub session_id: String,
}

/// Whether `user` is the one a checkout session pays for.
async fn owns_purpose(
    state: &AppState,
    user: &SessionUser,
    purpose: CheckoutPurpose,
) -> Result<bool, ApiError> {
    Ok(match purpose {
        CheckoutPurpose::Booking(id) => bookings::get(&state.db_pool, id)
            .await
            .map_err(|e| db_error("Booking lookup", e))?
            .is_some_and(|b| b.user_id == user.id),
        CheckoutPurpose::Registration(id) => registrations::get(&state.db_pool, id)
            .await
            .map_err(|e| db_error("Registration lookup", e))?
            .is_some_and(|r| r.user_id == user.id),
        CheckoutPurpose::Membership { user_id } => user_id == user.id,
    })
}

/// `POST /api/checkout/confirm`
///
/// Called from the checkout return page so members see the result without
/// waiting for the webhook.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn confirm_checkout(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<ConfirmRequest>,
) -> Result<Json<CheckoutResult>, ApiError> {
    let session = stripe(&state)?
        .retrieve_checkout_session(body.session_id.trim())
        .await?;
    let purpose = session
        .purpose()
        .ok_or_else(|| ApiError::not_found("Checkout session", &session.id))?;
    if !owns_purpose(&state, &user, purpose).await? {
        return Err(ApiError::not_found("Checkout session", &session.id));
    }

    if !session.is_paid() {
        let result = match purpose {
            CheckoutPurpose::Booking(id) => CheckoutResult::Booking {
                status: ConfirmStatus::Unpaid,
                booking: bookings::get(&state.db_pool, id)
                    .await
                    .map_err(|e| db_error("Booking lookup", e))?
                    .or_not_found("Booking", id)?,
            },
            CheckoutPurpose::Registration(id) => CheckoutResult::Registration {
                status: ConfirmStatus::Unpaid,
                registration: registrations::get(&state.db_pool, id)
                    .await
                    .map_err(|e| db_error("Registration lookup", e))?
                    .or_not_found("Registration", id)?,
            },
            CheckoutPurpose::Membership { user_id } => CheckoutResult::Membership {
                status: ConfirmStatus::Unpaid,
                tier: pricing::effective_tier(&profile_of(&state, user_id).await?, Utc::now()),
            },
        };
        return Ok(Json(result));
    }

    Ok(Json(apply_checkout(&state, &session).await?))
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SubscriptionResponse {
    pub tier: MembershipTier,
    pub effective_tier: MembershipTier,
    pub status: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
}

impl From<&Profile> for SubscriptionResponse {
    fn from(profile: &Profile) -> Self {
        Self {
            tier: profile.membership_tier,
            effective_tier: pricing::effective_tier(profile, Utc::now()),
            status: profile.subscription_status.clone(),
            current_period_end: profile.subscription_end,
        }
    }
}

/// `GET /api/subscription`
///
/// Syncs the stored tier with the payment provider when the member has a
/// customer record; otherwise reports what is stored.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn subscription_status(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<SubscriptionResponse>, ApiError> {
    let profile = profile_of(&state, user.id).await?;
    let profile = match (state.stripe(), profile.stripe_customer_id.clone()) {
        (Some(_), Some(customer)) => sync_subscription(&state, user.id, &customer).await?,
        _ => profile,
    };
    Ok(Json(SubscriptionResponse::from(&profile)))
}

/// `POST /api/billing-portal`
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn billing_portal(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<RedirectResponse>, ApiError> {
    let stripe = stripe(&state)?;
    let profile = profile_of(&state, user.id).await?;
    let customer = profile
        .stripe_customer_id
        .as_deref()
        .ok_or_else(|| ApiError::conflict("No billing account yet; start a membership first"))?;
    let url = stripe
        .create_billing_portal_session(customer, &state.public_url("/pricing"))
        .await?;
    Ok(Json(RedirectResponse { url }))
}
