//! Session authentication
//!
//! The identity provider issues HS256 session tokens carrying the user id,
//! email and a session id. Tokens arrive as `Authorization: Bearer` or the
//! session cookie. Each request is recorded against the session ledger so
//! users can list and revoke their sessions.

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::{Duration, Utc};
use diligence_tenant::{OrgRole, Organization, StoreError, User};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::permissions::{has_permission, Permission};
use crate::error::{ApiError, ApiResult};
use crate::ApiState;

/// Header selecting the active organization
pub const ORG_HEADER: &str = "x-org-id";

/// Session token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    /// Session id
    pub sid: Uuid,
    pub exp: usize,
}

pub fn issue_token(
    secret: &str,
    user_id: Uuid,
    email: &str,
    session_id: Uuid,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let exp = (Utc::now() + ttl).timestamp().max(0) as usize;
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        sid: session_id,
        exp,
    };
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )?;
    Ok(data.claims)
}

/// Bearer header first, then the session cookie
fn extract_token(parts: &Parts, cookie_name: &str) -> Option<String> {
    if let Some(token) = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        let token = token.trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }

    let cookies = parts.headers.get(header::COOKIE)?.to_str().ok()?;
    cookies
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Authenticated user
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub session_id: Uuid,
}

#[axum::async_trait]
impl FromRequestParts<Arc<ApiState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<ApiState>) -> Result<Self, Self::Rejection> {
        let token = extract_token(parts, &state.config.auth.cookie_name).ok_or(ApiError::Unauthorized)?;
        let claims = verify_token(&state.config.auth.jwt_secret, &token).map_err(|e| {
            tracing::debug!(error = %e, "session token rejected");
            ApiError::Unauthorized
        })?;

        let now = Utc::now();
        let user = state
            .store
            .upsert_user(User::new(claims.sub, &claims.email))
            .await
            .map_err(|e| match e {
                StoreError::Conflict(msg) => {
                    tracing::warn!(user_id = %claims.sub, %msg, "token email collides with another user");
                    ApiError::Unauthorized
                }
                other => other.into(),
            })?;

        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let (session, first_seen) = state
            .store
            .observe_session(claims.sid, user.id, user_agent, now)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => ApiError::Unauthorized,
                other => other.into(),
            })?;
        if session.is_revoked() {
            return Err(ApiError::Unauthorized);
        }

        if first_seen {
            let claimed = state.store.claim_invitations(&user, now).await?;
            for membership in &claimed {
                tracing::info!(
                    user_id = %user.id,
                    org_id = %membership.org_id,
                    role = ?membership.role,
                    "invitation accepted"
                );
            }
        }

        Ok(Self {
            user,
            session_id: session.id,
        })
    }
}

/// Authenticated user acting inside one organization
#[derive(Debug, Clone)]
pub struct OrgContext {
    pub user: User,
    pub session_id: Uuid,
    /// Billing cycle already rolled forward to now
    pub org: Organization,
    pub role: OrgRole,
}

impl OrgContext {
    pub fn org_id(&self) -> Uuid {
        self.org.id
    }

    pub fn can(&self, required: Permission) -> bool {
        has_permission(&Permission::for_role(self.role), required)
    }

    pub fn require(&self, required: Permission) -> ApiResult<()> {
        if self.can(required) {
            Ok(())
        } else {
            Err(ApiError::forbidden("Insufficient permissions"))
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<ApiState>> for OrgContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<ApiState>) -> Result<Self, Self::Rejection> {
        let CurrentUser { user, session_id } = CurrentUser::from_request_parts(parts, state).await?;

        let requested = match parts.headers.get(ORG_HEADER) {
            Some(value) => {
                let raw = value.to_str().map_err(|_| ApiError::bad_request("Invalid X-Org-Id header"))?;
                Some(Uuid::parse_str(raw.trim()).map_err(|_| ApiError::bad_request("Invalid X-Org-Id header"))?)
            }
            None => None,
        };

        let membership = match requested {
            Some(org_id) => state
                .store
                .get_membership(org_id, user.id)
                .await?
                .ok_or_else(|| ApiError::forbidden("Not a member of this organization"))?,
            None => state
                .store
                .memberships_for_user(user.id)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| ApiError::forbidden("No organization membership"))?,
        };

        let org = state
            .store
            .current_organization(membership.org_id, Utc::now())
            .await?
            .ok_or_else(|| ApiError::internal(format!("membership references missing org {}", membership.org_id)))?;

        Ok(Self {
            user,
            session_id,
            org,
            role: membership.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    const SECRET: &str = "test-secret-test-secret-test-secret";

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_token_roundtrip() {
        let (user, sid) = (Uuid::new_v4(), Uuid::new_v4());
        let token = issue_token(SECRET, user, "gp@fund.vc", sid, Duration::hours(1)).unwrap();
        let claims = verify_token(SECRET, &token).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.sid, sid);
        assert!(verify_token("another-secret-another-secret-xx", &token).is_err());
    }

    #[test]
    fn test_expired_token() {
        let token = issue_token(SECRET, Uuid::new_v4(), "a@b.co", Uuid::new_v4(), Duration::hours(-2)).unwrap();
        assert!(verify_token(SECRET, &token).is_err());
    }

    #[test]
    fn test_extract_bearer_then_cookie() {
        let p = parts(&[("authorization", "Bearer abc"), ("cookie", "dd_session=xyz")]);
        assert_eq!(extract_token(&p, "dd_session").as_deref(), Some("abc"));

        let p = parts(&[("cookie", "theme=dark; dd_session=xyz; other=1")]);
        assert_eq!(extract_token(&p, "dd_session").as_deref(), Some("xyz"));

        let p = parts(&[("cookie", "dd_session=")]);
        assert!(extract_token(&p, "dd_session").is_none());
        assert!(extract_token(&parts(&[]), "dd_session").is_none());
    }
}
