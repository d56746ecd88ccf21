//! Caller profile, notification settings and sessions

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use chrono::Utc;
use diligence_tenant::{NotificationPreferences, OrgId, OrgRole, PlanTier, User, UserSession};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{optional_url, patch_text};
use crate::error::{ApiError, ApiJson, ApiResult};
use crate::middleware::CurrentUser;
use crate::ApiState;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/profile", get(get_profile).patch(update_profile))
        .route("/notifications", get(get_notifications).patch(update_notifications))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:id", delete(revoke_session))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MembershipSummary {
    pub org_id: OrgId,
    pub org_name: String,
    pub org_slug: String,
    pub plan: PlanTier,
    pub role: OrgRole,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProfileView {
    pub user: User,
    pub memberships: Vec<MembershipSummary>,
}

/// Absent fields are left unchanged; blank text clears
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub title: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct NotificationUpdate {
    pub assessment_completed: Option<bool>,
    pub new_submission: Option<bool>,
    pub weekly_digest: Option<bool>,
    pub product_updates: Option<bool>,
}

impl NotificationUpdate {
    fn merge_into(self, prefs: &mut NotificationPreferences) {
        if let Some(v) = self.assessment_completed {
            prefs.assessment_completed = v;
        }
        if let Some(v) = self.new_submission {
            prefs.new_submission = v;
        }
        if let Some(v) = self.weekly_digest {
            prefs.weekly_digest = v;
        }
        if let Some(v) = self.product_updates {
            prefs.product_updates = v;
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: UserSession,
    /// Session making this request
    pub current: bool,
}

async fn profile_view(state: &ApiState, user: User) -> ApiResult<ProfileView> {
    let mut memberships = Vec::new();
    for membership in state.store.memberships_for_user(user.id).await? {
        // Memberships of a deleted org are skipped
        if let Some(org) = state.store.get_organization(membership.org_id).await? {
            memberships.push(MembershipSummary {
                org_id: org.id,
                org_name: org.name,
                org_slug: org.slug,
                plan: org.plan,
                role: membership.role,
            });
        }
    }
    Ok(ProfileView { user, memberships })
}

#[utoipa::path(
    get,
    path = "/user/profile",
    responses(
        (status = 200, description = "Caller profile and memberships", body = ProfileView),
        (status = 401, description = "No session", body = ErrorResponse)
    ),
    tag = "user"
)]
pub async fn get_profile(State(state): State<Arc<ApiState>>, current: CurrentUser) -> ApiResult<Json<ProfileView>> {
    Ok(Json(profile_view(&state, current.user).await?))
}

#[utoipa::path(
    patch,
    path = "/user/profile",
    request_body = ProfileUpdate,
    responses(
        (status = 200, description = "Profile updated", body = ProfileView),
        (status = 400, description = "Invalid input", body = ErrorResponse)
    ),
    tag = "user"
)]
pub async fn update_profile(
    State(state): State<Arc<ApiState>>,
    current: CurrentUser,
    ApiJson(input): ApiJson<ProfileUpdate>,
) -> ApiResult<Json<ProfileView>> {
    let mut user = current.user;
    patch_text(&mut user.full_name, "full_name", input.full_name, 200)?;
    patch_text(&mut user.title, "title", input.title, 200)?;
    if input.avatar_url.is_some() {
        user.avatar_url = optional_url("avatar_url", input.avatar_url)?;
    }

    let user = state.store.update_user(user).await?;
    Ok(Json(profile_view(&state, user).await?))
}

#[utoipa::path(
    get,
    path = "/user/notifications",
    responses((status = 200, description = "Notification preferences", body = NotificationPreferences)),
    tag = "user"
)]
pub async fn get_notifications(
    State(state): State<Arc<ApiState>>,
    current: CurrentUser,
) -> ApiResult<Json<NotificationPreferences>> {
    Ok(Json(state.store.notification_preferences(current.user.id).await?))
}

#[utoipa::path(
    patch,
    path = "/user/notifications",
    request_body = NotificationUpdate,
    responses((status = 200, description = "Preferences updated", body = NotificationPreferences)),
    tag = "user"
)]
pub async fn update_notifications(
    State(state): State<Arc<ApiState>>,
    current: CurrentUser,
    ApiJson(input): ApiJson<NotificationUpdate>,
) -> ApiResult<Json<NotificationPreferences>> {
    let mut prefs = state.store.notification_preferences(current.user.id).await?;
    input.merge_into(&mut prefs);
    Ok(Json(state.store.put_notification_preferences(current.user.id, prefs).await?))
}

#[utoipa::path(
    get,
    path = "/user/sessions",
    responses((status = 200, description = "Caller sessions", body = [SessionView])),
    tag = "user"
)]
pub async fn list_sessions(
    State(state): State<Arc<ApiState>>,
    current: CurrentUser,
) -> ApiResult<Json<Vec<SessionView>>> {
    let sessions = state
        .store
        .list_sessions(current.user.id)
        .await?
        .into_iter()
        .map(|session| SessionView {
            current: session.id == current.session_id,
            session,
        })
        .collect();
    Ok(Json(sessions))
}

#[utoipa::path(
    delete,
    path = "/user/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 204, description = "Session revoked"),
        (status = 404, description = "Not one of the caller's sessions", body = ErrorResponse)
    ),
    tag = "user"
)]
pub async fn revoke_session(
    State(state): State<Arc<ApiState>>,
    current: CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !state.store.revoke_session(current.user.id, id, Utc::now()).await? {
        return Err(ApiError::NotFound);
    }
    tracing::info!(user_id = %current.user.id, session_id = %id, "session revoked");
    Ok(StatusCode::NO_CONTENT)
}
