//! Team membership and invitations

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use diligence_tenant::{Invitation, OrgMembership, OrgRole, User};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::normalize_email;
use crate::error::{ApiError, ApiJson, ApiResult, OrNotFound};
use crate::middleware::{OrgContext, Permission};
use crate::ApiState;

pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/", get(list_team).post(add_member))
        .route("/:user_id", delete(remove_member))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MemberView {
    pub user: User,
    pub role: OrgRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TeamView {
    pub members: Vec<MemberView>,
    pub invitations: Vec<Invitation>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TeamAdd {
    pub email: String,
    #[serde(default = "default_role")]
    pub role: OrgRole,
}

fn default_role() -> OrgRole {
    OrgRole::Member
}

/// Existing users join right away; anyone else gets an invitation
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TeamAdded {
    pub membership: Option<OrgMembership>,
    pub invitation: Option<Invitation>,
}

/// Who may remove `target` from the organization; the store keeps the last owner
fn check_removal(ctx: &OrgContext, target: &OrgMembership) -> ApiResult<()> {
    if target.user_id != ctx.user.id {
        ctx.require(Permission::TeamManage)?;
        if target.role == OrgRole::Owner && !ctx.can(Permission::OwnersManage) {
            return Err(ApiError::forbidden("Only owners can remove an owner"));
        }
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/team",
    responses(
        (status = 200, description = "Members and pending invitations", body = TeamView),
        (status = 401, description = "No session", body = ErrorResponse)
    ),
    tag = "team"
)]
pub async fn list_team(State(state): State<Arc<ApiState>>, ctx: OrgContext) -> ApiResult<Json<TeamView>> {
    let members = state
        .store
        .list_members(ctx.org_id())
        .await?
        .into_iter()
        .map(|(membership, user)| MemberView {
            user,
            role: membership.role,
            joined_at: membership.joined_at,
        })
        .collect();
    let invitations = state.store.pending_invitations(ctx.org_id()).await?;
    Ok(Json(TeamView { members, invitations }))
}

#[utoipa::path(
    post,
    path = "/team",
    request_body = TeamAdd,
    responses(
        (status = 201, description = "Member added or invitation recorded", body = TeamAdded),
        (status = 403, description = "Admin role required", body = ErrorResponse),
        (status = 409, description = "Already a member or already invited", body = ErrorResponse)
    ),
    tag = "team"
)]
pub async fn add_member(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    ApiJson(input): ApiJson<TeamAdd>,
) -> ApiResult<(StatusCode, Json<TeamAdded>)> {
    ctx.require(Permission::TeamManage)?;
    if input.role == OrgRole::Owner {
        ctx.require(Permission::OwnersManage)?;
    }
    let email = normalize_email(&input.email)?;
    let now = Utc::now();

    if let Some(user) = state.store.find_user_by_email(&email).await? {
        if state.store.get_membership(ctx.org_id(), user.id).await?.is_some() {
            return Err(ApiError::Conflict(format!("{email} is already a member")));
        }
        let membership = state
            .store
            .add_membership(OrgMembership {
                org_id: ctx.org_id(),
                user_id: user.id,
                role: input.role,
                joined_at: now,
            })
            .await?;
        tracing::info!(org_id = %ctx.org_id(), user_id = %user.id, role = ?input.role, "member added");
        return Ok((
            StatusCode::CREATED,
            Json(TeamAdded {
                membership: Some(membership),
                invitation: None,
            }),
        ));
    }

    let invitation = state
        .store
        .create_invitation(Invitation {
            id: Uuid::new_v4(),
            org_id: ctx.org_id(),
            email,
            role: input.role,
            invited_by: ctx.user.id,
            created_at: now,
            accepted_at: None,
        })
        .await?;
    tracing::info!(org_id = %ctx.org_id(), invitation_id = %invitation.id, "invitation recorded");
    Ok((
        StatusCode::CREATED,
        Json(TeamAdded {
            membership: None,
            invitation: Some(invitation),
        }),
    ))
}

/// Members may always leave; the last owner may not
#[utoipa::path(
    delete,
    path = "/team/{user_id}",
    params(("user_id" = Uuid, Path, description = "Member user ID")),
    responses(
        (status = 204, description = "Member removed"),
        (status = 400, description = "Last owner", body = ErrorResponse),
        (status = 403, description = "Not allowed to remove this member", body = ErrorResponse),
        (status = 404, description = "Not a member", body = ErrorResponse)
    ),
    tag = "team"
)]
pub async fn remove_member(
    State(state): State<Arc<ApiState>>,
    ctx: OrgContext,
    Path(user_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let target = state.store.get_membership(ctx.org_id(), user_id).await?.or_not_found()?;
    check_removal(&ctx, &target)?;

    if !state.store.remove_membership(ctx.org_id(), user_id).await? {
        return Err(ApiError::NotFound);
    }
    tracing::info!(org_id = %ctx.org_id(), %user_id, removed_by = %ctx.user.id, "member removed");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use diligence_tenant::Organization;

    fn ctx(role: OrgRole) -> OrgContext {
        OrgContext {
            user: User::new(Uuid::new_v4(), "me@fund.vc"),
            session_id: Uuid::new_v4(),
            org: Organization::new("Fund", "fund"),
            role,
        }
    }

    fn membership(ctx: &OrgContext, user_id: Uuid, role: OrgRole) -> OrgMembership {
        OrgMembership {
            org_id: ctx.org_id(),
            user_id,
            role,
            joined_at: Utc::now(),
        }
    }

    #[test]
    fn test_removal_rules() {
        let admin = ctx(OrgRole::Admin);
        let owner = membership(&admin, Uuid::new_v4(), OrgRole::Owner);
        let member = membership(&admin, Uuid::new_v4(), OrgRole::Member);
        assert!(check_removal(&admin, &member).is_ok());
        assert_eq!(check_removal(&admin, &owner).unwrap_err().status(), StatusCode::FORBIDDEN);

        let member_ctx = ctx(OrgRole::Member);
        let other = membership(&member_ctx, Uuid::new_v4(), OrgRole::Member);
        assert!(check_removal(&member_ctx, &other).is_err());
        let me = membership(&member_ctx, member_ctx.user.id, OrgRole::Member);
        assert!(check_removal(&member_ctx, &me).is_ok());

        let owner_ctx = ctx(OrgRole::Owner);
        assert!(check_removal(&owner_ctx, &owner).is_ok());
    }
}
