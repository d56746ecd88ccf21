//! Assessment endpoints
//!
//! Creation is metered against the organization's plan. The external
//! processor reports progress through `PATCH /assessments/{id}`; completing
//! an assessment appends its usage record.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use diligence_tenant::{Assessment, AssessmentKind, AssessmentStatus};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::optional_text;
use crate::error::{ApiError, ApiJson, ApiResult, OrNotFound};
use crate::middleware::{OrgContext, Permission};
use crate::ApiState;

const MAX_SCORE: u8 = 100;
const MAX_SUMMARY: usize = 100_000;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new().route(
        "/:id",
        get(get_assessment).patch(update_assessment).delete(delete_assessment),
    )
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssessmentCreate {
    pub kind: AssessmentKind,
}

/// Processor report
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct AssessmentUpdate {
    pub status: Option<AssessmentStatus>,
    pub summary: Option<String>,
    pub score: Option<u8>,
    pub tokens_used: Option<u64>,
}

/// Validated processor report
#[derive(Debug, Default)]
struct Report {
    status: Option<AssessmentStatus>,
    /// `Some(None)` clears the summary
    summary: Option<Option<String>>,
    score: Option<u8>,
    tokens_used: Option<u64>,
}

impl Report {
    fn parse(input: AssessmentUpdate) -> ApiResult<Self> {
        if input.score.is_some_and(|score| score > MAX_SCORE) {
            return Err(ApiError::bad_request(format!("score must be between 0 and {MAX_SCORE}")));
        }
        let summary = match input.summary {
            Some(text) => Some(optional_text("summary", Some(text), MAX_SUMMARY)?),
            None => None,
        };
        Ok(Self {
            status: input.status,
            summary,
            score: input.score,
            tokens_used: input.tokens_used,
        })
    }

    /// Write the report into `assessment`; `true` when any field changed.
    /// Transition rules are enforced by the store.
    fn apply(self, assessment: &mut Assessment, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        if let Some(next) = self.status.filter(|next| *next != assessment.status) {
            assessment.status = next;
            if next.is_terminal() {
                assessment.completed_at = Some(now);
            }
            changed = true;
        }
        if let Some(score) = self.score.filter(|score| assessment.score != Some(*score)) {
            assessment.score = Some(score);
            changed = true;
        }
        if let Some(summary) = self.summary.filter(|summary| *summary != assessment.summary) {
            assessment.summary = summary;
            changed = true;
        }
        if let Some(tokens) = self.tokens_used.filter(|tokens| *tokens != assessment.tokens_used) {
            assessment.tokens_used = tokens;
            changed = true;
        }
        changed
    }
}

#[utoipa::path(
    get,
    path = "/companies/{id}/assessments",
    params(("id" = Uuid, Path, description = "Company ID")),
    responses(
        (status = 200, description = "Assessments, newest first", body = [Assessment]),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "assessments"
)]
pub async fn list_assessments(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    Path(company_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Assessment>>> {
    state.store.get_company(ctx.org_id(), company_id).await?.or_not_found()?;
    Ok(Json(state.store.list_assessments(ctx.org_id(), company_id).await?))
}

#[utoipa::path(
    post,
    path = "/companies/{id}/assessments",
    params(("id" = Uuid, Path, description = "Company ID")),
    request_body = AssessmentCreate,
    responses(
        (status = 201, description = "Assessment queued", body = Assessment),
        (status = 403, description = "Monthly quota exhausted", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "assessments"
)]
pub async fn create_assessment(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    Path(company_id): Path<Uuid>,
    ApiJson(input): ApiJson<AssessmentCreate>,
) -> ApiResult<(StatusCode, Json<Assessment>)> {
    ctx.require(Permission::DealsWrite)?;
    state.store.get_company(ctx.org_id(), company_id).await?.or_not_found()?;

    let pending = Assessment::pending(ctx.org_id(), company_id, input.kind, ctx.user.id);
    let assessment = state
        .store
        .create_metered_assessment(pending, Utc::now())
        .await
        .map_err(|e| {
            tracing::info!(org_id = %ctx.org_id(), plan = %ctx.org.plan, error = %e, "assessment refused");
            ApiError::from(e)
        })?;

    tracing::info!(
        org_id = %ctx.org_id(),
        assessment_id = %assessment.id,
        kind = ?assessment.kind,
        "assessment queued"
    );
    Ok((StatusCode::CREATED, Json(assessment)))
}

#[utoipa::path(
    get,
    path = "/assessments/{id}",
    params(("id" = Uuid, Path, description = "Assessment ID")),
    responses(
        (status = 200, description = "Assessment", body = Assessment),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "assessments"
)]
pub async fn get_assessment(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Assessment>> {
    Ok(Json(state.store.get_assessment(ctx.org_id(), id).await?.or_not_found()?))
}

#[utoipa::path(
    patch,
    path = "/assessments/{id}",
    params(("id" = Uuid, Path, description = "Assessment ID")),
    request_body = AssessmentUpdate,
    responses(
        (status = 200, description = "Assessment updated", body = Assessment),
        (status = 400, description = "Invalid transition or score", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "assessments"
)]
pub async fn update_assessment(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    Path(id): Path<Uuid>,
    ApiJson(input): ApiJson<AssessmentUpdate>,
) -> ApiResult<Json<Assessment>> {
    ctx.require(Permission::DealsWrite)?;
    let report = Report::parse(input)?;
    let now = Utc::now();

    let (assessment, completed) = state
        .store
        .transition_assessment(ctx.org_id(), id, Box::new(move |a| Ok(report.apply(a, now))))
        .await?;

    if completed {
        tracing::info!(
            org_id = %ctx.org_id(),
            assessment_id = %assessment.id,
            tokens = assessment.tokens_used,
            "assessment completed"
        );
    }
    Ok(Json(assessment))
}

#[utoipa::path(
    delete,
    path = "/assessments/{id}",
    params(("id" = Uuid, Path, description = "Assessment ID")),
    responses(
        (status = 204, description = "Assessment deleted"),
        (status = 403, description = "Admin role required", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "assessments"
)]
pub async fn delete_assessment(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    ctx.require(Permission::DealsDelete)?;
    state.store.delete_assessment(ctx.org_id(), id).await?.or_not_found()?;
    Ok(StatusCode::NO_CONTENT)
}
