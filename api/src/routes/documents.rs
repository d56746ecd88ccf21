//! Document upload and retrieval

use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use diligence_storage::object_key;
use diligence_tenant::{Document, DocumentClass};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::patch_text;
use crate::error::{ApiError, ApiJson, ApiResult, OrNotFound};
use crate::middleware::{OrgContext, Permission};
use crate::ApiState;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub fn router() -> Router<Arc<ApiState>> {
    Router::new().route("/:id", get(get_document).patch(update_document).delete(delete_document))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DocumentView {
    pub document: Document,
    /// Short-lived signed download link
    pub download_url: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct DocumentUpdate {
    pub classification: Option<DocumentClass>,
    pub extracted_text: Option<String>,
}

/// `multipart/form-data` upload form
#[derive(ToSchema)]
pub struct DocumentUpload {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
    pub classification: Option<DocumentClass>,
}

struct Upload {
    file_name: String,
    content_type: String,
    body: Vec<u8>,
}

fn parse_classification(raw: &str) -> ApiResult<DocumentClass> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_string()))
        .map_err(|_| ApiError::bad_request(format!("Unknown document classification: {raw}")))
}

#[utoipa::path(
    get,
    path = "/companies/{id}/documents",
    params(("id" = Uuid, Path, description = "Company ID")),
    responses(
        (status = 200, description = "Documents of the company", body = [Document]),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "documents"
)]
pub async fn list_documents(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    Path(company_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Document>>> {
    state.store.get_company(ctx.org_id(), company_id).await?.or_not_found()?;
    Ok(Json(state.store.list_documents(ctx.org_id(), company_id).await?))
}

/// Multipart upload: `file` plus optional `classification`
#[utoipa::path(
    post,
    path = "/companies/{id}/documents",
    params(("id" = Uuid, Path, description = "Company ID")),
    request_body(content = DocumentUpload, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Document stored", body = Document),
        (status = 400, description = "Missing or oversized file", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "documents"
)]
pub async fn upload_document(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    Path(company_id): Path<Uuid>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Document>)> {
    ctx.require(Permission::DealsWrite)?;
    state.store.get_company(ctx.org_id(), company_id).await?.or_not_found()?;

    let max_bytes = state.config.server.max_upload_bytes;
    let mut upload = None;
    let mut classification = DocumentClass::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().unwrap_or(DEFAULT_CONTENT_TYPE).to_string();
                let body = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.body_text()))?;
                upload = Some(Upload {
                    file_name,
                    content_type,
                    body: body.to_vec(),
                });
            }
            "classification" => {
                let raw = field.text().await.map_err(|e| ApiError::bad_request(e.body_text()))?;
                if !raw.trim().is_empty() {
                    classification = parse_classification(&raw)?;
                }
            }
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| ApiError::bad_request("A file part is required"))?;
    if upload.body.is_empty() {
        return Err(ApiError::bad_request("Uploaded file is empty"));
    }
    if upload.body.len() > max_bytes {
        return Err(ApiError::bad_request(format!("File exceeds the {max_bytes} byte upload limit")));
    }

    let id = Uuid::new_v4();
    let key = object_key(ctx.org_id(), company_id, id, &upload.file_name);
    let size_bytes = upload.body.len() as u64;
    state.storage.put(&key, upload.body, &upload.content_type).await?;

    let document = Document {
        id,
        org_id: ctx.org_id(),
        company_id,
        file_name: upload.file_name,
        storage_path: key.clone(),
        content_type: upload.content_type,
        size_bytes,
        classification,
        extracted_text: None,
        uploaded_by: ctx.user.id,
        created_at: Utc::now(),
    };

    let document = match state.store.insert_document(document).await {
        Ok(document) => document,
        Err(e) => {
            if let Err(cleanup) = state.storage.delete(&key).await {
                tracing::warn!(%key, error = %cleanup, "orphaned document object");
            }
            return Err(e.into());
        }
    };

    tracing::info!(
        org_id = %ctx.org_id(),
        document_id = %document.id,
        size_bytes,
        "document uploaded"
    );
    Ok((StatusCode::CREATED, Json(document)))
}

#[utoipa::path(
    get,
    path = "/documents/{id}",
    params(("id" = Uuid, Path, description = "Document ID")),
    responses(
        (status = 200, description = "Document with download link", body = DocumentView),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "documents"
)]
pub async fn get_document(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DocumentView>> {
    let document = state.store.get_document(ctx.org_id(), id).await?.or_not_found()?;
    let download_url = state
        .storage
        .signed_url(&document.storage_path, state.signed_url_ttl())
        .await?;
    Ok(Json(DocumentView { document, download_url }))
}

/// Classification changes and extracted text from the processing step
#[utoipa::path(
    patch,
    path = "/documents/{id}",
    params(("id" = Uuid, Path, description = "Document ID")),
    request_body = DocumentUpdate,
    responses(
        (status = 200, description = "Document updated", body = Document),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "documents"
)]
pub async fn update_document(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    Path(id): Path<Uuid>,
    ApiJson(input): ApiJson<DocumentUpdate>,
) -> ApiResult<Json<Document>> {
    ctx.require(Permission::DealsWrite)?;
    let mut document = state.store.get_document(ctx.org_id(), id).await?.or_not_found()?;

    if let Some(classification) = input.classification {
        document.classification = classification;
    }
    patch_text(&mut document.extracted_text, "extracted_text", input.extracted_text, 2_000_000)?;

    Ok(Json(state.store.update_document(document).await?))
}

/// Admins, or the member who uploaded it
#[utoipa::path(
    delete,
    path = "/documents/{id}",
    params(("id" = Uuid, Path, description = "Document ID")),
    responses(
        (status = 204, description = "Document deleted"),
        (status = 403, description = "Not the uploader or an admin", body = ErrorResponse),
        (status = 404, description = "Not found", body = ErrorResponse)
    ),
    tag = "documents"
)]
pub async fn delete_document(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let document = state.store.get_document(ctx.org_id(), id).await?.or_not_found()?;
    if document.uploaded_by != ctx.user.id {
        ctx.require(Permission::DealsDelete)?;
    }

    state.storage.delete(&document.storage_path).await?;
    state.store.delete_document(ctx.org_id(), id).await?;
    tracing::info!(org_id = %ctx.org_id(), document_id = %id, "document deleted");
    Ok(StatusCode::NO_CONTENT)
}
