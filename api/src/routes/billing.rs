//! Plans, checkout, usage and the payments webhook

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use diligence_billing::webhook::{self, DEFAULT_TOLERANCE_SECS, SIGNATURE_HEADER};
use diligence_billing::{BillingEvent, CheckoutRequest, CustomerRequest, WebhookEvent};
use diligence_tenant::{catalog, usage, OrgId, PlanDefinition, PlanTier, UsageSummary};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ApiError, ApiJson, ApiResult};
use crate::middleware::{OrgContext, Permission};
use crate::ApiState;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/plans", get(list_plans))
        .route("/checkout", post(create_checkout))
        .route("/portal", post(create_portal))
        .route("/usage", get(get_usage))
        .route("/webhook", post(handle_webhook))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PlanView {
    pub tier: PlanTier,
    pub name: String,
    /// `-1` when unlimited
    pub monthly_assessments: i64,
    pub features: Vec<String>,
}

impl From<&PlanDefinition> for PlanView {
    fn from(plan: &PlanDefinition) -> Self {
        Self {
            tier: plan.tier,
            name: plan.name.to_string(),
            monthly_assessments: plan.monthly_assessments.as_i64(),
            features: plan.features.iter().map(|f| f.to_string()).collect(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckoutBody {
    pub tier: PlanTier,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutResponse {
    pub url: String,
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PortalResponse {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UsageResponse {
    pub plan: PlanTier,
    pub billing_cycle_start: DateTime<Utc>,
    #[serde(flatten)]
    pub usage: UsageSummary,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
}

#[utoipa::path(
    get,
    path = "/billing/plans",
    responses((status = 200, description = "Plan catalog, cheapest first", body = [PlanView])),
    tag = "billing"
)]
pub async fn list_plans() -> Json<Vec<PlanView>> {
    Json(catalog().iter().map(PlanView::from).collect())
}

#[utoipa::path(
    post,
    path = "/billing/checkout",
    request_body = CheckoutBody,
    responses(
        (status = 200, description = "Hosted checkout session", body = CheckoutResponse),
        (status = 400, description = "Not a paid tier", body = ErrorResponse),
        (status = 403, description = "Admin role required", body = ErrorResponse),
        (status = 503, description = "Payments not configured", body = ErrorResponse)
    ),
    tag = "billing"
)]
pub async fn create_checkout(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    ApiJson(body): ApiJson<CheckoutBody>,
) -> ApiResult<Json<CheckoutResponse>> {
    ctx.require(Permission::BillingManage)?;
    if !body.tier.is_paid() {
        return Err(ApiError::bad_request("Checkout is only available for paid plans"));
    }

    let payments = state.payments()?;
    let price_id = state
        .config
        .billing
        .as_ref()
        .and_then(|b| b.prices.for_tier(body.tier))
        .ok_or_else(|| ApiError::unavailable(format!("Price for the {} plan", body.tier)))?
        .to_string();

    let org_id = ctx.org_id();
    let customer_id = match ctx.org.stripe_customer_id.clone() {
        Some(id) => id,
        None => {
            let created = payments
                .create_customer(&CustomerRequest {
                    org_id,
                    email: ctx.user.email.clone(),
                    name: ctx.org.name.clone(),
                })
                .await?;
            let candidate = created.clone();
            let (org, stored) = state
                .store
                .edit_organization(
                    org_id,
                    Box::new(move |org| {
                        if org.stripe_customer_id.is_some() {
                            return Ok(false);
                        }
                        org.stripe_customer_id = Some(candidate);
                        Ok(true)
                    }),
                )
                .await?;
            if stored {
                tracing::info!(%org_id, customer_id = %created, "payments customer created");
            } else {
                tracing::warn!(%org_id, unused = %created, "concurrent checkout already created a customer");
            }
            org.stripe_customer_id.unwrap_or(created)
        }
    };

    let session = payments
        .create_checkout_session(&CheckoutRequest {
            org_id,
            tier: body.tier,
            customer_id,
            price_id,
            success_url: state.config.success_url(),
            cancel_url: state.config.cancel_url(),
        })
        .await?;

    tracing::info!(%org_id, tier = %body.tier, session_id = %session.id, "checkout started");
    Ok(Json(CheckoutResponse {
        url: session.url,
        session_id: session.id,
    }))
}

#[utoipa::path(
    post,
    path = "/billing/portal",
    responses(
        (status = 200, description = "Hosted billing portal", body = PortalResponse),
        (status = 400, description = "No billing account yet", body = ErrorResponse),
        (status = 503, description = "Payments not configured", body = ErrorResponse)
    ),
    tag = "billing"
)]
pub async fn create_portal(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
) -> ApiResult<Json<PortalResponse>> {
    ctx.require(Permission::BillingManage)?;
    let payments = state.payments()?;
    let customer_id = ctx
        .org
        .stripe_customer_id
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("No billing account for this organization"))?;

    let session = payments
        .create_portal_session(customer_id, &state.config.portal_return_url())
        .await?;
    Ok(Json(PortalResponse { url: session.url }))
}

#[utoipa::path(
    get,
    path = "/billing/usage",
    responses(
        (status = 200, description = "Usage in the current billing cycle", body = UsageResponse),
        (status = 401, description = "No session", body = ErrorResponse)
    ),
    tag = "billing"
)]
pub async fn get_usage(State(state): State<Arc<ApiState>>, ctx: OrgContext) -> ApiResult<Json<UsageResponse>> {
    let org = &ctx.org;
    let records = state.store.usage_since(org.id, org.billing_cycle_start).await?;
    let summary = usage::summarize(&records, org.plan, org.assessments_used_this_month);

    Ok(Json(UsageResponse {
        plan: org.plan,
        billing_cycle_start: org.billing_cycle_start,
        usage: summary,
    }))
}

async fn resolve_org(state: &ApiState, event: &BillingEvent) -> ApiResult<Option<OrgId>> {
    let Some(reference) = event.org_ref() else {
        return Ok(None);
    };
    if let Some(org_id) = reference.org_id {
        if state.store.get_organization(org_id).await?.is_some() {
            return Ok(Some(org_id));
        }
    }
    match &reference.customer_id {
        Some(customer_id) => Ok(state
            .store
            .find_organization_by_customer(customer_id)
            .await?
            .map(|org| org.id)),
        None => Ok(None),
    }
}

/// Signed subscription events from the payments provider
#[utoipa::path(
    post,
    path = "/billing/webhook",
    request_body(content = String, description = "Raw event payload"),
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookAck),
        (status = 400, description = "Bad signature or payload", body = ErrorResponse),
        (status = 503, description = "Webhook secret not configured", body = ErrorResponse)
    ),
    tag = "billing"
)]
pub async fn handle_webhook(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let secret = state
        .config
        .billing
        .as_ref()
        .map(|b| b.webhook_secret.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::unavailable("Webhook secret"))?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("Missing signature header"))?;

    let now = Utc::now();
    webhook::verify_signature(&body, signature, secret, DEFAULT_TOLERANCE_SECS, now).map_err(|e| {
        tracing::warn!(error = %e, "webhook rejected");
        ApiError::from(e)
    })?;
    let WebhookEvent { id: event_id, event } = webhook::parse_event(&body)?;

    if let BillingEvent::Ignored { event_type } = &event {
        tracing::debug!(%event_type, "webhook event ignored");
        return Ok(Json(WebhookAck { received: true }));
    }

    let Some(org_id) = resolve_org(&state, &event).await? else {
        tracing::warn!(event = ?event, "webhook event for unknown organization");
        return Ok(Json(WebhookAck { received: true }));
    };

    if let Some(event_id) = &event_id {
        if !state.store.mark_event_processed(event_id).await? {
            tracing::debug!(%event_id, "webhook event redelivered");
            return Ok(Json(WebhookAck { received: true }));
        }
    }

    let mut previous = None;
    let (org, changed) = state
        .store
        .edit_organization(
            org_id,
            Box::new(|org| {
                previous = Some(org.plan);
                Ok(webhook::apply(&event, org, now))
            }),
        )
        .await?;
    if changed {
        tracing::info!(
            %org_id,
            event_id = ?event_id,
            from = ?previous,
            to = %org.plan,
            subscription_id = ?org.stripe_subscription_id,
            "subscription reconciled"
        );
    }

    Ok(Json(WebhookAck { received: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_view() {
        let plans: Vec<PlanView> = catalog().iter().map(PlanView::from).collect();
        assert_eq!(plans.len(), 4);
        assert_eq!(plans[0].monthly_assessments, 3);
        assert_eq!(plans[3].tier, PlanTier::Enterprise);
        assert_eq!(plans[3].monthly_assessments, -1);
    }

    #[test]
    fn test_usage_response_flattens_summary() {
        let records: Vec<diligence_tenant::UsageRecord> = Vec::new();
        let summary = usage::summarize(&records, PlanTier::Free, 2);
        let body = serde_json::to_value(UsageResponse {
            plan: PlanTier::Free,
            billing_cycle_start: Utc::now(),
            usage: summary,
        })
        .unwrap();
        assert_eq!(body["plan"], "free");
        assert_eq!(body["assessments_used"], 2);
        assert_eq!(body["assessment_limit"], 3);
        assert_eq!(body["percentage"], 67);
    }
}
