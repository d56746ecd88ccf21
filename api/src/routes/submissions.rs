//! Deal intake submissions
//!
//! Founders submit through the public endpoint (or the HTML form in
//! [`crate::pages`]); reviewers triage and accept them into the pipeline.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use diligence_tenant::{Company, CompanyStage, DealSubmission, SubmissionStatus};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{normalize_email, optional_text, optional_url, required_text};
use crate::error::{ApiError, ApiJson, ApiResult, OrNotFound};
use crate::middleware::rate_limit::{ClientKey, RateLimitResult};
use crate::middleware::{OrgContext, Permission};
use crate::ApiState;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/", get(list_submissions).post(create_submission))
        .route("/:id", patch(review_submission))
        .route("/:id/accept", post(accept_submission))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SubmissionFilter {
    pub status: Option<SubmissionStatus>,
}

/// Public intake payload
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct IntakeForm {
    /// Organization receiving the submission
    #[serde(default)]
    pub org_slug: String,
    pub company_name: String,
    pub founder_name: String,
    pub founder_email: String,
    pub website: Option<String>,
    pub pitch: Option<String>,
    pub stage: Option<CompanyStage>,
}

/// What the founder gets back
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmissionReceipt {
    pub id: Uuid,
    pub company_name: String,
    pub status: SubmissionStatus,
    pub submitted_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct SubmissionReview {
    pub status: Option<SubmissionStatus>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AcceptedSubmission {
    pub submission: DealSubmission,
    pub company: Company,
}

/// Validate and store an intake submission for the organization at `slug`
pub(crate) async fn submit(state: &ApiState, client: &str, slug: &str, form: IntakeForm) -> ApiResult<DealSubmission> {
    if let RateLimitResult::Limited { retry_after } = state.intake_limiter.check(client) {
        tracing::warn!(%client, retry_after_secs = retry_after.as_secs(), "intake rate limited");
        return Err(ApiError::RateLimited);
    }

    let org = state
        .store
        .find_organization_by_slug(slug.trim())
        .await?
        .or_not_found()?;

    let submission = DealSubmission {
        id: Uuid::new_v4(),
        org_id: org.id,
        company_name: required_text("company_name", &form.company_name, 200)?,
        founder_name: required_text("founder_name", &form.founder_name, 200)?,
        founder_email: normalize_email(&form.founder_email)?,
        website: optional_url("website", form.website)?,
        pitch: optional_text("pitch", form.pitch, 5000)?,
        stage: form.stage,
        status: SubmissionStatus::Pending,
        company_id: None,
        notes: None,
        reviewed_by: None,
        reviewed_at: None,
        submitted_at: Utc::now(),
    };

    let submission = state.store.insert_submission(submission).await?;
    tracing::info!(org_id = %org.id, submission_id = %submission.id, "deal submitted");
    Ok(submission)
}

#[utoipa::path(
    get,
    path = "/submissions",
    params(SubmissionFilter),
    responses(
        (status = 200, description = "Submissions, newest first", body = [DealSubmission]),
        (status = 401, description = "No session", body = ErrorResponse)
    ),
    tag = "submissions"
)]
pub async fn list_submissions(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    Query(filter): Query<SubmissionFilter>,
) -> ApiResult<Json<Vec<DealSubmission>>> {
    let mut submissions = state.store.list_submissions(ctx.org_id()).await?;
    if let Some(status) = filter.status {
        submissions.retain(|s| s.status == status);
    }
    Ok(Json(submissions))
}

/// Public intake; no session required
#[utoipa::path(
    post,
    path = "/submissions",
    request_body = IntakeForm,
    responses(
        (status = 201, description = "Submission received", body = SubmissionReceipt),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 404, description = "Unknown organization", body = ErrorResponse),
        (status = 429, description = "Too many submissions", body = ErrorResponse)
    ),
    tag = "submissions"
)]
pub async fn create_submission(
    State(state): State<Arc<ApiState>>,
    ClientKey(client): ClientKey,
    ApiJson(form): ApiJson<IntakeForm>,
) -> ApiResult<(StatusCode, Json<SubmissionReceipt>)> {
    let slug = form.org_slug.clone();
    let submission = submit(&state, &client, &slug, form).await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmissionReceipt {
            id: submission.id,
            company_name: submission.company_name,
            status: submission.status,
            submitted_at: submission.submitted_at,
        }),
    ))
}

#[utoipa::path(
    patch,
    path = "/submissions/{id}",
    params(("id" = Uuid, Path, description = "Submission ID")),
    request_body = SubmissionReview,
    responses(
        (status = 200, description = "Submission updated", body = DealSubmission),
        (status = 400, description = "Invalid status change", body = ErrorResponse),
        (status = 403, description = "Admin role required", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "submissions"
)]
pub async fn review_submission(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    Path(id): Path<Uuid>,
    ApiJson(input): ApiJson<SubmissionReview>,
) -> ApiResult<Json<DealSubmission>> {
    ctx.require(Permission::SubmissionsReview)?;
    if input.status == Some(SubmissionStatus::Accepted) {
        return Err(ApiError::bad_request("Use the accept endpoint to accept a submission"));
    }
    let notes = input
        .notes
        .map(|notes| optional_text("notes", Some(notes), 5000))
        .transpose()?;
    let reviewer = ctx.user.id;
    let now = Utc::now();

    let submission = state
        .store
        .review_submission(
            ctx.org_id(),
            id,
            Box::new(move |submission| {
                if let Some(status) = input.status {
                    submission.status = status;
                }
                if let Some(notes) = notes {
                    submission.notes = notes;
                }
                submission.reviewed_by = Some(reviewer);
                submission.reviewed_at = Some(now);
                Ok(true)
            }),
        )
        .await?;
    Ok(Json(submission))
}

/// Creates the pipeline company and marks the submission accepted
#[utoipa::path(
    post,
    path = "/submissions/{id}/accept",
    params(("id" = Uuid, Path, description = "Submission ID")),
    responses(
        (status = 200, description = "Submission accepted", body = AcceptedSubmission),
        (status = 400, description = "Already accepted or rejected", body = ErrorResponse),
        (status = 403, description = "Admin role required", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "submissions"
)]
pub async fn accept_submission(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AcceptedSubmission>> {
    ctx.require(Permission::SubmissionsReview)?;
    let (submission, company) = state
        .store
        .accept_submission(ctx.org_id(), id, ctx.user.id, Utc::now())
        .await?;

    tracing::info!(
        org_id = %ctx.org_id(),
        submission_id = %submission.id,
        company_id = %company.id,
        "submission accepted"
    );
    Ok(Json(AcceptedSubmission { submission, company }))
}
