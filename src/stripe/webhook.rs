//! Webhook signature verification and event envelope.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

/// Maximum age of a signed webhook timestamp, in seconds.
pub const TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("malformed Stripe-Signature header")]
    MalformedHeader,
    #[error("signature does not match payload")]
    Mismatch,
    #[error("signature timestamp outside tolerance")]
    Expired,
}

/// Verify a `Stripe-Signature` header (`t=...,v1=...[,v1=...]`) against the
/// raw request body. Any `v1` entry may match; stale timestamps are refused.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(SignatureError::MalformedHeader);
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::Mismatch)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures.iter().any(|sig| {
        hex::decode(sig)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if !matched {
        return Err(SignatureError::Mismatch);
    }

    if (now.timestamp() - ts).abs() > TOLERANCE_SECS {
        return Err(SignatureError::Expired);
    }
    Ok(())
}

/// Typed webhook envelope. `data.object` is decoded by the handler once the
/// event type is known.
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl Event {
    pub fn object<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data.object)
    }
}

/// Build a `Stripe-Signature` header for `payload`. Used by tests and local tooling.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stripe::Subscription;
    use chrono::TimeZone;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{}}}"#;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn accepts_fresh_signature() {
        let header = sign(BODY, SECRET, now().timestamp() - 30);
        assert_eq!(verify_signature(BODY, &header, SECRET, now()), Ok(()));
    }

    #[test]
    fn any_v1_entry_may_match() {
        let ts = now().timestamp();
        let good = sign(BODY, SECRET, ts);
        let good_sig = good.split_once("v1=").unwrap().1;
        let header = format!("t={ts},v1={},v1={good_sig},v0=ignored", "00".repeat(32));
        assert_eq!(verify_signature(BODY, &header, SECRET, now()), Ok(()));
    }

    #[test]
    fn rejects_wrong_secret_or_body() {
        let header = sign(BODY, "whsec_other", now().timestamp());
        assert_eq!(
            verify_signature(BODY, &header, SECRET, now()),
            Err(SignatureError::Mismatch)
        );
        let header = sign(BODY, SECRET, now().timestamp());
        assert_eq!(
            verify_signature(b"{}", &header, SECRET, now()),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_stale_and_future_timestamps() {
        let old = sign(BODY, SECRET, now().timestamp() - TOLERANCE_SECS - 1);
        assert_eq!(
            verify_signature(BODY, &old, SECRET, now()),
            Err(SignatureError::Expired)
        );
        let future = sign(BODY, SECRET, now().timestamp() + TOLERANCE_SECS + 1);
        assert_eq!(
            verify_signature(BODY, &future, SECRET, now()),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn rejects_malformed_headers() {
        for header in ["", "v1=abcd", "t=abc,v1=abcd", "t=1700000000"] {
            assert_eq!(
                verify_signature(BODY, header, SECRET, now()),
                Err(SignatureError::MalformedHeader),
                "header {header:?}"
            );
        }
    }

    #[test]
    fn decodes_event_object() {
        let raw = r#"{
            "id": "evt_2",
            "type": "customer.subscription.updated",
            "data": {"object": {
                "id": "sub_1", "status": "active", "customer": "cus_9", "created": 1700000000,
                "items": {"data": [{"price": {"id": "price_elite"}, "current_period_end": 1800000000}]}
            }}
        }"#;
        let event: Event = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event_type, "customer.subscription.updated");
        let sub: Subscription = event.object().unwrap();
        assert_eq!(sub.customer, "cus_9");
        assert_eq!(sub.price_ids().collect::<Vec<_>>(), vec!["price_elite"]);
    }
}
