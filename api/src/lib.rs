//! Diligence Platform API
//!
//! Multi-tenant REST backend for venture due diligence: deal pipeline,
//! documents, metered assessments, chat threads, public intake and
//! subscription billing.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          DILIGENCE API                           │
//! │                                                                  │
//! │   /health  /docs  /billing/plans  /submissions (POST)  /intake   │
//! │                        public, rate limited intake               │
//! │                                                                  │
//! │   session JWT ──► CurrentUser ──► OrgContext (X-Org-Id, role)    │
//! │        │                                                         │
//! │        ▼                                                         │
//! │   /companies  /documents  /assessments  /chat  /submissions      │
//! │   /team  /user  /billing                                         │
//! │        │                                                         │
//! │        ▼                                                         │
//! │   TenantStore      ObjectStorage      PaymentsProvider           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod middleware;
pub mod pages;
pub mod routes;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use diligence_billing::PaymentsProvider;
use diligence_storage::ObjectStorage;
use diligence_tenant::{OrgMembership, OrgRole, Organization, StoreResult, TenantStore, User};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{ApiConfig, BootstrapOrg};
use crate::error::{ApiError, ApiResult};
use crate::middleware::rate_limit::{RateLimitConfig, RateLimiter};

const DEFAULT_SIGNED_URL_TTL_SECS: u64 = 3600;
/// Multipart framing allowance on top of the file limit
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared request state
pub struct ApiState {
    pub config: ApiConfig,
    pub store: Arc<dyn TenantStore>,
    pub storage: Arc<dyn ObjectStorage>,
    payments: Option<Arc<dyn PaymentsProvider>>,
    pub intake_limiter: RateLimiter,
}

impl ApiState {
    pub fn new(config: ApiConfig, store: Arc<dyn TenantStore>, storage: Arc<dyn ObjectStorage>) -> Self {
        let intake_limiter = RateLimiter::new(RateLimitConfig {
            per_minute: config.intake.per_minute,
            burst: config.intake.burst,
        });
        Self {
            config,
            store,
            storage,
            payments: None,
            intake_limiter,
        }
    }

    pub fn with_payments(mut self, payments: Arc<dyn PaymentsProvider>) -> Self {
        self.payments = Some(payments);
        self
    }

    /// 503 when no payments provider is configured
    pub fn payments(&self) -> ApiResult<&Arc<dyn PaymentsProvider>> {
        self.payments.as_ref().ok_or_else(|| ApiError::unavailable("Payments"))
    }

    pub fn signed_url_ttl(&self) -> u64 {
        self.config
            .storage
            .as_ref()
            .map(|s| s.signed_url_ttl_secs)
            .unwrap_or(DEFAULT_SIGNED_URL_TTL_SECS)
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Diligence API",
        version = "0.1.0",
        description = "Multi-tenant venture due-diligence platform API",
        license(name = "Apache-2.0")
    ),
    paths(
        routes::health::health_check,
        routes::companies::list_companies,
        routes::companies::create_company,
        routes::companies::get_company,
        routes::companies::update_company,
        routes::companies::delete_company,
        routes::documents::list_documents,
        routes::documents::upload_document,
        routes::documents::get_document,
        routes::documents::update_document,
        routes::documents::delete_document,
        routes::assessments::list_assessments,
        routes::assessments::create_assessment,
        routes::assessments::get_assessment,
        routes::assessments::update_assessment,
        routes::assessments::delete_assessment,
        routes::chat::get_chat,
        routes::chat::post_message,
        routes::billing::list_plans,
        routes::billing::create_checkout,
        routes::billing::create_portal,
        routes::billing::get_usage,
        routes::billing::handle_webhook,
        routes::submissions::list_submissions,
        routes::submissions::create_submission,
        routes::submissions::review_submission,
        routes::submissions::accept_submission,
        routes::team::list_team,
        routes::team::add_member,
        routes::team::remove_member,
        routes::user::get_profile,
        routes::user::update_profile,
        routes::user::get_notifications,
        routes::user::update_notifications,
        routes::user::list_sessions,
        routes::user::revoke_session,
    ),
    components(
        schemas(
            error::ErrorResponse,
            routes::health::HealthResponse,
            diligence_tenant::PlanTier,
            diligence_tenant::Organization,
            diligence_tenant::OrgRole,
            diligence_tenant::OrgMembership,
            diligence_tenant::Invitation,
            diligence_tenant::User,
            diligence_tenant::NotificationPreferences,
            diligence_tenant::UserSession,
            diligence_tenant::Company,
            diligence_tenant::CompanyStage,
            diligence_tenant::CompanyStatus,
            diligence_tenant::Document,
            diligence_tenant::DocumentClass,
            diligence_tenant::Assessment,
            diligence_tenant::AssessmentKind,
            diligence_tenant::AssessmentStatus,
            diligence_tenant::ChatRole,
            diligence_tenant::ChatThread,
            diligence_tenant::ChatMessage,
            diligence_tenant::SubmissionStatus,
            diligence_tenant::DealSubmission,
            diligence_tenant::usage::UsageSummary,
            routes::companies::CompanyCreate,
            routes::companies::CompanyUpdate,
            routes::documents::DocumentView,
            routes::documents::DocumentUpload,
            routes::documents::DocumentUpdate,
            routes::assessments::AssessmentCreate,
            routes::assessments::AssessmentUpdate,
            routes::chat::ThreadView,
            routes::chat::ChatPost,
            routes::chat::ChatPosted,
            routes::billing::PlanView,
            routes::billing::CheckoutBody,
            routes::billing::CheckoutResponse,
            routes::billing::PortalResponse,
            routes::billing::UsageResponse,
            routes::billing::WebhookAck,
            routes::submissions::IntakeForm,
            routes::submissions::SubmissionReceipt,
            routes::submissions::SubmissionReview,
            routes::submissions::AcceptedSubmission,
            routes::team::MemberView,
            routes::team::TeamView,
            routes::team::TeamAdd,
            routes::team::TeamAdded,
            routes::user::MembershipSummary,
            routes::user::ProfileView,
            routes::user::ProfileUpdate,
            routes::user::NotificationUpdate,
            routes::user::SessionView,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "companies", description = "Deal pipeline"),
        (name = "documents", description = "Company documents"),
        (name = "assessments", description = "Metered due-diligence assessments"),
        (name = "chat", description = "Chat threads"),
        (name = "billing", description = "Plans, subscription and usage"),
        (name = "submissions", description = "Founder intake"),
        (name = "team", description = "Organization members"),
        (name = "user", description = "Caller profile and sessions")
    )
)]
pub struct ApiDoc;

/// Build the API router
pub fn build_router(state: Arc<ApiState>) -> Router {
    let body_limit = state.config.server.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(routes::health::health_check))
        .nest("/companies", routes::companies::router())
        .nest("/documents", routes::documents::router())
        .nest("/assessments", routes::assessments::router())
        .nest("/chat", routes::chat::router())
        .nest("/billing", routes::billing::router())
        .nest("/submissions", routes::submissions::router())
        .nest("/team", routes::team::router())
        .nest("/user", routes::user::router())
        .nest("/intake", pages::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Seed organizations and their owners; existing slugs are left alone
pub async fn bootstrap(store: &dyn TenantStore, orgs: &[BootstrapOrg]) -> StoreResult<usize> {
    let mut created = 0;
    for seed in orgs {
        if store.find_organization_by_slug(&seed.slug).await?.is_some() {
            tracing::debug!(slug = %seed.slug, "bootstrap organization exists");
            continue;
        }

        let org = store
            .create_organization(Organization::new(&seed.name, &seed.slug).with_plan(seed.plan))
            .await?;
        let owner = store.upsert_user(User::new(seed.owner_id, &seed.owner_email)).await?;
        store
            .add_membership(OrgMembership {
                org_id: org.id,
                user_id: owner.id,
                role: OrgRole::Owner,
                joined_at: Utc::now(),
            })
            .await?;

        tracing::info!(org_id = %org.id, slug = %org.slug, plan = %org.plan, owner = %owner.email, "organization seeded");
        created += 1;
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use diligence_tenant::{MembershipRepository, MemoryStore, OrgRepository, PlanTier};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let store = MemoryStore::new();
        let seeds = vec![BootstrapOrg {
            name: "Acme Ventures".into(),
            slug: "acme".into(),
            plan: PlanTier::Pro,
            owner_id: Uuid::new_v4(),
            owner_email: "gp@acme.vc".into(),
        }];

        assert_eq!(bootstrap(&store, &seeds).await.unwrap(), 1);
        assert_eq!(bootstrap(&store, &seeds).await.unwrap(), 0);

        let org = store.find_organization_by_slug("acme").await.unwrap().unwrap();
        assert_eq!(org.plan, PlanTier::Pro);
        let members = store.list_members(org.id).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].0.role, OrgRole::Owner);
    }

    #[test]
    fn test_openapi_lists_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/companies/{id}/assessments"));
        assert!(doc.paths.paths.contains_key("/billing/webhook"));
        let schemas = &doc.components.as_ref().unwrap().schemas;
        assert!(schemas.contains_key("DocumentUpload"));
    }
}
