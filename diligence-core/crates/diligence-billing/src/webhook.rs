//! Payments webhook verification and reconciliation
//!
//! The provider signs each delivery with a `t=<unix>,v1=<hex>` header where
//! the signature is `hmac_sha256(secret, "{t}.{body}")`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use diligence_tenant::{cycle, OrgId, Organization, PlanTier};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the delivery signature
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Maximum accepted clock skew between signing and delivery
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("malformed signature header")]
    MalformedHeader,
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("webhook timestamp outside tolerance")]
    TimestampOutsideTolerance,
    #[error("malformed event payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Verify a delivery against the endpoint secret
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> Result<(), WebhookError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
    let ts: i64 = timestamp.parse().map_err(|_| WebhookError::MalformedHeader)?;
    if candidates.is_empty() {
        return Err(WebhookError::MalformedHeader);
    }
    if (now.timestamp() - ts).abs() > tolerance_secs {
        return Err(WebhookError::TimestampOutsideTolerance);
    }

    let mac = signed_mac(timestamp, payload, secret)?;
    let matched = candidates.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });

    if matched {
        Ok(())
    } else {
        Err(WebhookError::InvalidSignature)
    }
}

/// Header value for `payload` signed at `timestamp`
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, WebhookError> {
    let timestamp = timestamp.to_string();
    let mac = signed_mac(&timestamp, payload, secret)?;
    Ok(format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes())))
}

fn signed_mac(timestamp: &str, payload: &[u8], secret: &str) -> Result<HmacSha256, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// How an event identifies its organization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrgRef {
    pub org_id: Option<OrgId>,
    pub customer_id: Option<String>,
}

/// Subscription-relevant webhook events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    CheckoutCompleted {
        org: OrgRef,
        tier: Option<PlanTier>,
        subscription_id: Option<String>,
    },
    SubscriptionUpdated {
        org: OrgRef,
        subscription_id: String,
        status: String,
        tier: Option<PlanTier>,
    },
    SubscriptionDeleted {
        org: OrgRef,
        subscription_id: String,
    },
    /// Acknowledged without action
    Ignored { event_type: String },
}

/// Verified delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    /// Provider event id; redeliveries carry the same one
    pub id: Option<String>,
    pub event: BillingEvent,
}

impl BillingEvent {
    pub fn org_ref(&self) -> Option<&OrgRef> {
        match self {
            Self::CheckoutCompleted { org, .. }
            | Self::SubscriptionUpdated { org, .. }
            | Self::SubscriptionDeleted { org, .. } => Some(org),
            Self::Ignored { .. } => None,
        }
    }
}

#[derive(Deserialize)]
struct RawEvent {
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    data: RawData,
}

#[derive(Deserialize)]
struct RawData {
    object: serde_json::Value,
}

#[derive(Deserialize)]
struct CheckoutObject {
    customer: Option<String>,
    subscription: Option<String>,
    client_reference_id: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Deserialize)]
struct SubscriptionObject {
    id: String,
    customer: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

fn metadata_org(metadata: &HashMap<String, String>) -> Option<OrgId> {
    metadata.get("org_id").and_then(|id| Uuid::parse_str(id).ok())
}

fn metadata_tier(metadata: &HashMap<String, String>) -> Option<PlanTier> {
    metadata.get("tier").and_then(|tier| tier.parse().ok())
}

/// Decode a verified payload
pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent, WebhookError> {
    let raw: RawEvent = serde_json::from_slice(payload)?;

    let event = match raw.event_type.as_str() {
        "checkout.session.completed" => {
            let session: CheckoutObject = serde_json::from_value(raw.data.object)?;
            let org_id = metadata_org(&session.metadata)
                .or_else(|| session.client_reference_id.as_deref().and_then(|id| Uuid::parse_str(id).ok()));
            BillingEvent::CheckoutCompleted {
                org: OrgRef {
                    org_id,
                    customer_id: session.customer,
                },
                tier: metadata_tier(&session.metadata),
                subscription_id: session.subscription,
            }
        }
        "customer.subscription.updated" => {
            let sub: SubscriptionObject = serde_json::from_value(raw.data.object)?;
            BillingEvent::SubscriptionUpdated {
                org: OrgRef {
                    org_id: metadata_org(&sub.metadata),
                    customer_id: sub.customer,
                },
                tier: metadata_tier(&sub.metadata),
                subscription_id: sub.id,
                status: sub.status,
            }
        }
        "customer.subscription.deleted" => {
            let sub: SubscriptionObject = serde_json::from_value(raw.data.object)?;
            BillingEvent::SubscriptionDeleted {
                org: OrgRef {
                    org_id: metadata_org(&sub.metadata),
                    customer_id: sub.customer,
                },
                subscription_id: sub.id,
            }
        }
        _ => BillingEvent::Ignored {
            event_type: raw.event_type,
        },
    };

    Ok(WebhookEvent { id: raw.id, event })
}

/// Apply an event to its organization; `true` when anything changed.
///
/// Applying the same checkout twice leaves the cycle and counter alone.
pub fn apply(event: &BillingEvent, org: &mut Organization, now: DateTime<Utc>) -> bool {
    match event {
        BillingEvent::CheckoutCompleted {
            org: org_ref,
            tier,
            subscription_id,
        } => {
            let mut changed = false;
            if let Some(customer_id) = &org_ref.customer_id {
                if org.stripe_customer_id.as_ref() != Some(customer_id) {
                    org.stripe_customer_id = Some(customer_id.clone());
                    changed = true;
                }
            }

            let new_subscription = subscription_id.is_some() && org.stripe_subscription_id != *subscription_id;
            if new_subscription {
                org.stripe_subscription_id = subscription_id.clone();
                changed = true;
            }
            if let Some(tier) = tier {
                if new_subscription || org.plan != *tier {
                    org.plan = *tier;
                    cycle::restart(org, now);
                    changed = true;
                }
            }
            changed
        }
        BillingEvent::SubscriptionUpdated { status, tier, subscription_id, .. } => {
            let live = matches!(status.as_str(), "active" | "trialing");
            match tier {
                Some(tier) if live => {
                    let changed = org.plan != *tier;
                    org.plan = *tier;
                    org.stripe_subscription_id = Some(subscription_id.clone());
                    changed
                }
                _ => false,
            }
        }
        BillingEvent::SubscriptionDeleted { subscription_id, .. } => {
            let current = org.stripe_subscription_id.as_deref();
            if current.is_some() && current != Some(subscription_id.as_str()) {
                // an older subscription ended after a newer one started
                return false;
            }
            org.plan = PlanTier::Free;
            org.stripe_subscription_id = None;
            true
        }
        BillingEvent::Ignored { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    #[test]
    fn test_signature_roundtrip() {
        let now = Utc::now();
        let body = br#"{"type":"ping"}"#;
        let header = sign(body, SECRET, now.timestamp()).unwrap();
        assert!(verify_signature(body, &header, SECRET, DEFAULT_TOLERANCE_SECS, now).is_ok());
    }

    #[test]
    fn test_signature_rejections() {
        let now = Utc::now();
        let body = br#"{"type":"ping"}"#;
        let header = sign(body, SECRET, now.timestamp()).unwrap();

        let tampered = verify_signature(br#"{"type":"pong"}"#, &header, SECRET, 300, now);
        assert!(matches!(tampered, Err(WebhookError::InvalidSignature)));

        let wrong_secret = verify_signature(body, &header, "whsec_other", 300, now);
        assert!(matches!(wrong_secret, Err(WebhookError::InvalidSignature)));

        let stale = sign(body, SECRET, now.timestamp() - 301).unwrap();
        assert!(matches!(
            verify_signature(body, &stale, SECRET, 300, now),
            Err(WebhookError::TimestampOutsideTolerance)
        ));

        assert!(matches!(
            verify_signature(body, "v1=abcd", SECRET, 300, now),
            Err(WebhookError::MalformedHeader)
        ));
    }

    #[test]
    fn test_any_v1_candidate_matches() {
        let now = Utc::now();
        let body = b"{}";
        let good = sign(body, SECRET, now.timestamp()).unwrap();
        let v1 = good.split(",v1=").nth(1).unwrap();
        let header = format!("t={},v1=deadbeef,v1={v1}", now.timestamp());
        assert!(verify_signature(body, &header, SECRET, 300, now).is_ok());
    }

    #[test]
    fn test_checkout_completed_upgrades() {
        let mut org = Organization::new("Fund", "fund");
        org.assessments_used_this_month = 3;
        let payload = json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {"object": {
                "customer": "cus_1",
                "subscription": "sub_1",
                "client_reference_id": org.id.to_string(),
                "metadata": {"tier": "pro"}
            }}
        });

        let parsed = parse_event(payload.to_string().as_bytes()).unwrap();
        assert_eq!(parsed.id.as_deref(), Some("evt_1"));
        let event = parsed.event;
        assert_eq!(event.org_ref().unwrap().org_id, Some(org.id));

        let now = Utc::now();
        assert!(apply(&event, &mut org, now));
        assert_eq!(org.plan, PlanTier::Pro);
        assert_eq!(org.stripe_customer_id.as_deref(), Some("cus_1"));
        assert_eq!(org.stripe_subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(org.assessments_used_this_month, 0);
        assert_eq!(org.billing_cycle_start, now);
    }

    #[test]
    fn test_repeated_checkout_keeps_cycle() {
        let mut org = Organization::new("Fund", "fund");
        let event = BillingEvent::CheckoutCompleted {
            org: OrgRef {
                org_id: Some(org.id),
                customer_id: Some("cus_1".into()),
            },
            tier: Some(PlanTier::Angel),
            subscription_id: Some("sub_1".into()),
        };

        let first = Utc::now();
        assert!(apply(&event, &mut org, first));
        org.assessments_used_this_month = 15;

        assert!(!apply(&event, &mut org, first + chrono::Duration::minutes(5)));
        assert_eq!(org.assessments_used_this_month, 15);
        assert_eq!(org.billing_cycle_start, first);

        let upgrade = BillingEvent::CheckoutCompleted {
            org: OrgRef::default(),
            tier: Some(PlanTier::Pro),
            subscription_id: Some("sub_2".into()),
        };
        assert!(apply(&upgrade, &mut org, first + chrono::Duration::days(1)));
        assert_eq!(org.assessments_used_this_month, 0);
        assert_eq!(org.plan, PlanTier::Pro);
    }

    #[test]
    fn test_subscription_updated_requires_live_status() {
        let mut org = Organization::new("Fund", "fund").with_plan(PlanTier::Angel);
        let event = |status: &str| {
            let payload = json!({
                "type": "customer.subscription.updated",
                "data": {"object": {"id": "sub_1", "customer": "cus_1", "status": status, "metadata": {"tier": "enterprise"}}}
            });
            parse_event(payload.to_string().as_bytes()).unwrap().event
        };

        assert!(!apply(&event("past_due"), &mut org, Utc::now()));
        assert_eq!(org.plan, PlanTier::Angel);
        assert!(apply(&event("trialing"), &mut org, Utc::now()));
        assert_eq!(org.plan, PlanTier::Enterprise);
    }

    #[test]
    fn test_subscription_deleted_downgrades() {
        let mut org = Organization::new("Fund", "fund").with_plan(PlanTier::Pro);
        org.stripe_subscription_id = Some("sub_1".into());
        let payload = json!({
            "type": "customer.subscription.deleted",
            "data": {"object": {"id": "sub_1", "customer": "cus_1", "status": "canceled"}}
        });

        let event = parse_event(payload.to_string().as_bytes()).unwrap().event;
        assert_eq!(event.org_ref().unwrap().customer_id.as_deref(), Some("cus_1"));
        assert!(apply(&event, &mut org, Utc::now()));
        assert_eq!(org.plan, PlanTier::Free);
        assert!(org.stripe_subscription_id.is_none());
    }

    #[test]
    fn test_unknown_event_ignored() {
        let payload = json!({"type": "invoice.paid", "data": {"object": {}}});
        let parsed = parse_event(payload.to_string().as_bytes()).unwrap();
        assert!(parsed.id.is_none());
        let event = parsed.event;
        assert_eq!(event, BillingEvent::Ignored { event_type: "invoice.paid".into() });
        assert!(event.org_ref().is_none());
    }
}
