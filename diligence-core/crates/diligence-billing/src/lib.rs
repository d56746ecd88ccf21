//! Subscription Billing
//!
//! Checkout and portal sessions against the payments provider, plus the
//! signed webhook that brings organizations in line with their subscription.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      SUBSCRIPTION BILLING                     │
//! │                                                               │
//! │   API ──► PaymentsProvider ──► StripeClient ──► payments API  │
//! │              customer | checkout session | portal session     │
//! │                                                               │
//! │   payments API ──► webhook::verify_signature                  │
//! │                       └─► webhook::parse_event                │
//! │                             └─► webhook::apply (Organization) │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod stripe;
pub mod webhook;

use async_trait::async_trait;
use diligence_tenant::{OrgId, PlanTier};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use stripe::{StripeClient, StripeConfig};
pub use webhook::{BillingEvent, WebhookError, WebhookEvent};

/// Payments error types
#[derive(Debug, Error)]
pub enum PaymentsError {
    /// Non-2xx answer from the provider
    #[error("payments API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PaymentsError>;

/// New provider-side customer for an organization
#[derive(Debug, Clone)]
pub struct CustomerRequest {
    pub org_id: OrgId,
    pub email: String,
    pub name: String,
}

/// Subscription checkout for one paid tier
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub org_id: OrgId,
    pub tier: PlanTier,
    pub customer_id: String,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// Hosted checkout page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// Hosted billing-portal page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalSession {
    pub url: String,
}

/// Payments provider operations used by the API
#[async_trait]
pub trait PaymentsProvider: Send + Sync {
    /// Returns the provider customer id
    async fn create_customer(&self, request: &CustomerRequest) -> Result<String>;

    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession>;

    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<PortalSession>;
}
