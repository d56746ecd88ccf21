//! Stripe REST client
//!
//! Form-encoded requests authenticated with the account secret key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use serde::{de::DeserializeOwned, Deserialize};
use url::Url;

use crate::{CheckoutRequest, CheckoutSession, CustomerRequest, PaymentsError, PaymentsProvider, PortalSession, Result};

/// Default API base URL
pub const DEFAULT_API_BASE: &str = "https://api.stripe.com/v1";

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client configuration
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub api_base: String,
    pub secret_key: String,
    pub timeout: Duration,
}

impl StripeConfig {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            secret_key: secret_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

/// Stripe API client
#[derive(Clone)]
pub struct StripeClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: StripeConfig,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Result<Self> {
        if config.secret_key.trim().is_empty() {
            return Err(PaymentsError::Config("secret key is empty".into()));
        }

        let mut headers = header::HeaderMap::new();
        let auth = header::HeaderValue::from_str(&format!("Bearer {}", config.secret_key))
            .map_err(|_| PaymentsError::Config("secret key is not a valid header value".into()))?;
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(ClientInner { config, http }),
        })
    }

    async fn post_form<T: DeserializeOwned>(&self, path: &str, form: &[(&str, String)]) -> Result<T> {
        let base = self.inner.config.api_base.trim_end_matches('/');
        let url = Url::parse(&format!("{base}{path}"))?;

        let response = self.inner.http.post(url).form(form).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if status.is_success() {
            return Ok(serde_json::from_slice(&body)?);
        }

        let message = serde_json::from_slice::<ErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            });
        tracing::warn!(path, status = status.as_u16(), %message, "payments API request failed");

        Err(PaymentsError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Form fields for a subscription checkout session
pub(crate) fn checkout_form(request: &CheckoutRequest) -> Vec<(&'static str, String)> {
    let org_id = request.org_id.to_string();
    let tier = request.tier.as_str().to_string();
    vec![
        ("mode", "subscription".to_string()),
        ("customer", request.customer_id.clone()),
        ("line_items[0][price]", request.price_id.clone()),
        ("line_items[0][quantity]", "1".to_string()),
        ("success_url", request.success_url.clone()),
        ("cancel_url", request.cancel_url.clone()),
        ("client_reference_id", org_id.clone()),
        ("metadata[org_id]", org_id.clone()),
        ("metadata[tier]", tier.clone()),
        ("subscription_data[metadata][org_id]", org_id),
        ("subscription_data[metadata][tier]", tier),
    ]
}

#[async_trait]
impl PaymentsProvider for StripeClient {
    async fn create_customer(&self, request: &CustomerRequest) -> Result<String> {
        let form = [
            ("email", request.email.clone()),
            ("name", request.name.clone()),
            ("metadata[org_id]", request.org_id.to_string()),
        ];
        let customer: IdResponse = self.post_form("/customers", &form).await?;
        tracing::info!(org_id = %request.org_id, customer_id = %customer.id, "payments customer created");
        Ok(customer.id)
    }

    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let session: CheckoutSession = self
            .post_form("/checkout/sessions", &checkout_form(request))
            .await?;
        tracing::info!(
            org_id = %request.org_id,
            tier = %request.tier,
            session_id = %session.id,
            "checkout session created"
        );
        Ok(session)
    }

    async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<PortalSession> {
        let form = [
            ("customer", customer_id.to_string()),
            ("return_url", return_url.to_string()),
        ];
        self.post_form("/billing_portal/sessions", &form).await
    }
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.inner.config.api_base)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diligence_tenant::PlanTier;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> StripeClient {
        StripeClient::new(StripeConfig::new("sk_test_123").with_api_base(format!("{}/v1", server.uri()))).unwrap()
    }

    #[tokio::test]
    async fn test_create_customer() {
        let server = MockServer::start().await;
        let org_id = Uuid::new_v4();

        Mock::given(method("POST"))
            .and(path("/v1/customers"))
            .and(header("authorization", "Bearer sk_test_123"))
            .and(body_string_contains(format!("metadata%5Borg_id%5D={org_id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "cus_abc", "object": "customer"})))
            .expect(1)
            .mount(&server)
            .await;

        let id = client(&server)
            .await
            .create_customer(&CustomerRequest {
                org_id,
                email: "gp@fund.vc".into(),
                name: "Fund".into(),
            })
            .await
            .unwrap();
        assert_eq!(id, "cus_abc");
    }

    #[tokio::test]
    async fn test_checkout_session() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(body_string_contains("mode=subscription"))
            .and(body_string_contains("line_items%5B0%5D%5Bprice%5D=price_pro"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cs_test_1",
                "object": "checkout.session",
                "url": "https://checkout.stripe.com/c/pay/cs_test_1"
            })))
            .mount(&server)
            .await;

        let session = client(&server)
            .await
            .create_checkout_session(&CheckoutRequest {
                org_id: Uuid::new_v4(),
                tier: PlanTier::Pro,
                customer_id: "cus_abc".into(),
                price_id: "price_pro".into(),
                success_url: "https://app.test/billing?success=1".into(),
                cancel_url: "https://app.test/billing".into(),
            })
            .await
            .unwrap();
        assert_eq!(session.id, "cs_test_1");
        assert!(session.url.contains("cs_test_1"));
    }

    #[tokio::test]
    async fn test_api_error_message() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/billing_portal/sessions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"type": "invalid_request_error", "message": "No such customer: 'cus_missing'"}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .await
            .create_portal_session("cus_missing", "https://app.test/billing")
            .await
            .unwrap_err();
        match err {
            PaymentsError::Api { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("cus_missing"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_checkout_form_carries_metadata() {
        let org_id = Uuid::new_v4();
        let form = checkout_form(&CheckoutRequest {
            org_id,
            tier: PlanTier::Angel,
            customer_id: "cus_1".into(),
            price_id: "price_angel".into(),
            success_url: "s".into(),
            cancel_url: "c".into(),
        });
        let get = |k: &str| form.iter().find(|(key, _)| *key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("client_reference_id"), Some(org_id.to_string().as_str()));
        assert_eq!(get("subscription_data[metadata][tier]"), Some("angel"));
        assert_eq!(get("line_items[0][quantity]"), Some("1"));
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(StripeClient::new(StripeConfig::new("  ")), Err(PaymentsError::Config(_))));
    }
}
