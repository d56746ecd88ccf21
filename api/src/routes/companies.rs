//! Company pipeline endpoints

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use diligence_tenant::{Company, CompanyStage, CompanyStatus};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{assessments, documents, optional_text, optional_url, patch_text, required_text};
use crate::error::{ApiJson, ApiResult, OrNotFound};
use crate::middleware::{OrgContext, Permission};
use crate::ApiState;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/", get(list_companies).post(create_company))
        .route("/:id", get(get_company).patch(update_company).delete(delete_company))
        .route("/:id/documents", get(documents::list_documents).post(documents::upload_document))
        .route(
            "/:id/assessments",
            get(assessments::list_assessments).post(assessments::create_assessment),
        )
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CompanyFilter {
    pub status: Option<CompanyStatus>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CompanyCreate {
    pub name: String,
    pub website: Option<String>,
    pub description: Option<String>,
    pub sector: Option<String>,
    pub stage: Option<CompanyStage>,
}

/// Absent fields are left unchanged; blank text clears
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CompanyUpdate {
    pub name: Option<String>,
    pub website: Option<String>,
    pub description: Option<String>,
    pub sector: Option<String>,
    pub stage: Option<CompanyStage>,
    pub status: Option<CompanyStatus>,
}

#[utoipa::path(
    get,
    path = "/companies",
    params(CompanyFilter),
    responses(
        (status = 200, description = "Companies in the pipeline", body = [Company]),
        (status = 401, description = "No session", body = ErrorResponse)
    ),
    tag = "companies"
)]
pub async fn list_companies(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    Query(filter): Query<CompanyFilter>,
) -> ApiResult<Json<Vec<Company>>> {
    let mut companies = state.store.list_companies(ctx.org_id()).await?;
    if let Some(status) = filter.status {
        companies.retain(|c| c.status == status);
    }
    Ok(Json(companies))
}

#[utoipa::path(
    post,
    path = "/companies",
    request_body = CompanyCreate,
    responses(
        (status = 201, description = "Company created", body = Company),
        (status = 400, description = "Invalid input", body = ErrorResponse)
    ),
    tag = "companies"
)]
pub async fn create_company(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    ApiJson(input): ApiJson<CompanyCreate>,
) -> ApiResult<(StatusCode, Json<Company>)> {
    ctx.require(Permission::DealsWrite)?;

    let mut company = Company::new(ctx.org_id(), &required_text("name", &input.name, 200)?);
    company.website = optional_url("website", input.website)?;
    company.description = optional_text("description", input.description, 5000)?;
    company.sector = optional_text("sector", input.sector, 100)?;
    company.stage = input.stage;
    company.created_by = Some(ctx.user.id);

    let company = state.store.insert_company(company).await?;
    tracing::info!(org_id = %ctx.org_id(), company_id = %company.id, "company created");
    Ok((StatusCode::CREATED, Json(company)))
}

#[utoipa::path(
    get,
    path = "/companies/{id}",
    params(("id" = Uuid, Path, description = "Company ID")),
    responses(
        (status = 200, description = "Company", body = Company),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "companies"
)]
pub async fn get_company(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Company>> {
    let company = state.store.get_company(ctx.org_id(), id).await?.or_not_found()?;
    Ok(Json(company))
}

#[utoipa::path(
    patch,
    path = "/companies/{id}",
    params(("id" = Uuid, Path, description = "Company ID")),
    request_body = CompanyUpdate,
    responses(
        (status = 200, description = "Company updated", body = Company),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "companies"
)]
pub async fn update_company(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    Path(id): Path<Uuid>,
    ApiJson(input): ApiJson<CompanyUpdate>,
) -> ApiResult<Json<Company>> {
    ctx.require(Permission::DealsWrite)?;
    let mut company = state.store.get_company(ctx.org_id(), id).await?.or_not_found()?;

    if let Some(name) = input.name {
        company.name = required_text("name", &name, 200)?;
    }
    if input.website.is_some() {
        company.website = optional_url("website", input.website)?;
    }
    patch_text(&mut company.description, "description", input.description, 5000)?;
    patch_text(&mut company.sector, "sector", input.sector, 100)?;
    if input.stage.is_some() {
        company.stage = input.stage;
    }
    if let Some(status) = input.status {
        company.status = status;
    }
    company.updated_at = Utc::now();

    Ok(Json(state.store.update_company(company).await?))
}

/// Deletes the company with its documents, assessments and chat threads
#[utoipa::path(
    delete,
    path = "/companies/{id}",
    params(("id" = Uuid, Path, description = "Company ID")),
    responses(
        (status = 204, description = "Company deleted"),
        (status = 403, description = "Admin role required", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "companies"
)]
pub async fn delete_company(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    ctx.require(Permission::DealsDelete)?;
    let removal = state.store.delete_company(ctx.org_id(), id).await?.or_not_found()?;

    for document in &removal.documents {
        if let Err(e) = state.storage.delete(&document.storage_path).await {
            tracing::warn!(key = %document.storage_path, error = %e, "orphaned document object");
        }
    }

    tracing::info!(
        org_id = %ctx.org_id(),
        company_id = %id,
        documents = removal.documents.len(),
        "company deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}
