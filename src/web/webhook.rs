//! Stripe webhook receiver.
//!
//! The raw body is verified against `Stripe-Signature` before parsing. Each
//! event id is recorded before it is handled, so redeliveries are no-ops;
//! a failed handler forgets the id again so the provider's retry can succeed.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::data::{profiles, webhook_events};
use crate::state::AppState;
use crate::stripe::webhook::{self, Event};
use crate::stripe::{CheckoutSession, META_USER_ID, Subscription};
use crate::web::checkout::{self, CheckoutResult};
use crate::web::error::{ApiError, ApiErrorCode, db_error};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// `POST /api/stripe/webhook`
#[instrument(skip_all)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let Some(secret) = state.config.stripe_webhook_secret.as_deref() else {
        warn!("Webhook received but STRIPE_WEBHOOK_SECRET is not set");
        return Err(ApiError::payments_unavailable());
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ApiError::new(ApiErrorCode::InvalidSignature, "Missing Stripe-Signature header")
        })?;
    webhook::verify_signature(&body, signature, secret, Utc::now()).map_err(|e| {
        warn!(error = %e, "Rejected webhook");
        ApiError::new(ApiErrorCode::InvalidSignature, e.to_string())
    })?;

    let event: Event = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Malformed event: {e}")))?;

    let first_delivery = webhook_events::record(&state.db_pool, &event.id, &event.event_type)
        .await
        .map_err(|e| db_error("Webhook event record", e.into()))?;
    if !first_delivery {
        debug!(event_id = %event.id, "Duplicate webhook delivery ignored");
        return Ok(StatusCode::OK);
    }

    if let Err(e) = handle_event(&state, &event).await {
        warn!(event_id = %event.id, event_type = %event.event_type, "Webhook handling failed, will accept a retry");
        if let Err(forget_err) = webhook_events::forget(&state.db_pool, &event.id).await {
            warn!(error = ?forget_err, event_id = %event.id, "Failed to forget webhook event");
        }
        return Err(e);
    }
    Ok(StatusCode::OK)
}

async fn handle_event(state: &AppState, event: &Event) -> Result<(), ApiError> {
    match event.event_type.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            let session: CheckoutSession = decode(event)?;
            if !session.is_paid() {
                debug!(checkout_session_id = %session.id, "Checkout completed without payment yet");
                return Ok(());
            }
            let result = checkout::apply_checkout(state, &session).await?;
            if let CheckoutResult::Unknown = result {
                debug!(checkout_session_id = %session.id, "Checkout not created by this application");
            }
            Ok(())
        }
        "customer.subscription.created"
        | "customer.subscription.updated"
        | "customer.subscription.deleted" => {
            let subscription: Subscription = decode(event)?;
            sync_from_subscription(state, &subscription).await
        }
        other => {
            debug!(event_type = other, "Ignoring webhook event");
            Ok(())
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(event: &Event) -> Result<T, ApiError> {
    event.object().map_err(|e| {
        warn!(event_id = %event.id, error = %e, "Webhook object did not match its event type");
        ApiError::bad_request("Unexpected event payload")
    })
}

/// Resolve the member a subscription belongs to and refresh their tier.
async fn sync_from_subscription(state: &AppState, subscription: &Subscription) -> Result<(), ApiError> {
    let profile = profiles::find_by_customer(&state.db_pool, &subscription.customer)
        .await
        .map_err(|e| db_error("Profile lookup by customer", e))?;
    let user_id = match profile {
        Some(profile) => profile.id,
        None => {
            // Subscription events can beat checkout.session.completed; fall
            // back to the user id written into subscription metadata.
            let Some(user_id) = subscription
                .metadata
                .get(META_USER_ID)
                .and_then(|v| Uuid::parse_str(v).ok())
            else {
                warn!(customer = %subscription.customer, "Subscription for an unknown customer");
                return Ok(());
            };
            let known = profiles::get(&state.db_pool, user_id)
                .await
                .map_err(|e| db_error("Profile lookup", e))?
                .is_some();
            if !known {
                warn!(user_id = %user_id, "Subscription metadata names an unknown member");
                return Ok(());
            }
            profiles::set_customer(&state.db_pool, user_id, &subscription.customer)
                .await
                .map_err(|e| db_error("Customer link", e))?;
            user_id
        }
    };

    let profile = checkout::sync_subscription(state, user_id, &subscription.customer).await?;
    info!(
        user_id = %user_id,
        subscription_id = %subscription.id,
        tier = profile.membership_tier.as_str(),
        "Membership updated from webhook"
    );
    Ok(())
}
