//! Tenant data store ports
//!
//! Repository traits the API is written against. Every tenant-scoped lookup
//! takes the caller's `org_id`; a record owned by another organization is
//! reported exactly like a missing one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::model::*;
use crate::plans::PlanTier;

/// Store error type
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("assessment quota exhausted for {tier} plan ({limit} per month)")]
    QuotaExceeded { tier: PlanTier, limit: i64 },
    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// In-place edit run while the store holds the record locked.
///
/// `Ok(true)` reports a change. An error leaves the stored record untouched.
pub type Edit<'a, T> = Box<dyn FnOnce(&mut T) -> StoreResult<bool> + Send + 'a>;

/// Company removed together with the documents it owned
#[derive(Debug, Clone)]
pub struct CompanyRemoval {
    pub company: Company,
    pub documents: Vec<Document>,
}

/// Organizations
#[async_trait]
pub trait OrgRepository: Send + Sync {
    /// Insert; slugs are unique
    async fn create_organization(&self, org: Organization) -> StoreResult<Organization>;

    async fn get_organization(&self, id: OrgId) -> StoreResult<Option<Organization>>;

    /// Read with the billing cycle rolled forward to `now` and persisted
    async fn current_organization(&self, id: OrgId, now: DateTime<Utc>) -> StoreResult<Option<Organization>>;

    async fn find_organization_by_slug(&self, slug: &str) -> StoreResult<Option<Organization>>;

    async fn find_organization_by_customer(&self, customer_id: &str) -> StoreResult<Option<Organization>>;

    /// Edit one organization in place; returns the stored record and the edit's flag
    async fn edit_organization(&self, id: OrgId, edit: Edit<'_, Organization>) -> StoreResult<(Organization, bool)>;

    /// Remember a processed payments event; `false` when it was seen before
    async fn mark_event_processed(&self, event_id: &str) -> StoreResult<bool>;
}

/// Users, preferences and the session ledger
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert the user unless one with the same id exists; returns the stored record
    async fn upsert_user(&self, user: User) -> StoreResult<User>;

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn update_user(&self, user: User) -> StoreResult<User>;

    async fn notification_preferences(&self, user_id: UserId) -> StoreResult<NotificationPreferences>;

    async fn put_notification_preferences(
        &self,
        user_id: UserId,
        prefs: NotificationPreferences,
    ) -> StoreResult<NotificationPreferences>;

    /// Record a sighting of `session_id`; the flag is `true` on first sight
    async fn observe_session(
        &self,
        session_id: Uuid,
        user_id: UserId,
        user_agent: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<(UserSession, bool)>;

    async fn list_sessions(&self, user_id: UserId) -> StoreResult<Vec<UserSession>>;

    /// Revoke one of the user's own sessions; `false` when none matched
    async fn revoke_session(&self, user_id: UserId, session_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool>;
}

/// Memberships and invitations
#[async_trait]
pub trait MembershipRepository: Send + Sync {
    async fn add_membership(&self, membership: OrgMembership) -> StoreResult<OrgMembership>;

    async fn get_membership(&self, org_id: OrgId, user_id: UserId) -> StoreResult<Option<OrgMembership>>;

    /// Oldest membership first
    async fn memberships_for_user(&self, user_id: UserId) -> StoreResult<Vec<OrgMembership>>;

    async fn list_members(&self, org_id: OrgId) -> StoreResult<Vec<(OrgMembership, User)>>;

    /// `false` when no membership matched; removing the last owner is an invalid state
    async fn remove_membership(&self, org_id: OrgId, user_id: UserId) -> StoreResult<bool>;

    async fn create_invitation(&self, invitation: Invitation) -> StoreResult<Invitation>;

    async fn pending_invitations(&self, org_id: OrgId) -> StoreResult<Vec<Invitation>>;

    /// Convert pending invitations addressed to the user's email into memberships
    async fn claim_invitations(&self, user: &User, now: DateTime<Utc>) -> StoreResult<Vec<OrgMembership>>;
}

/// Companies, documents and intake submissions
#[async_trait]
pub trait DealRepository: Send + Sync {
    async fn insert_company(&self, company: Company) -> StoreResult<Company>;

    async fn get_company(&self, org_id: OrgId, id: Uuid) -> StoreResult<Option<Company>>;

    async fn list_companies(&self, org_id: OrgId) -> StoreResult<Vec<Company>>;

    async fn update_company(&self, company: Company) -> StoreResult<Company>;

    /// Delete the company and everything hanging off it
    async fn delete_company(&self, org_id: OrgId, id: Uuid) -> StoreResult<Option<CompanyRemoval>>;

    async fn insert_document(&self, document: Document) -> StoreResult<Document>;

    async fn get_document(&self, org_id: OrgId, id: Uuid) -> StoreResult<Option<Document>>;

    async fn list_documents(&self, org_id: OrgId, company_id: Uuid) -> StoreResult<Vec<Document>>;

    async fn update_document(&self, document: Document) -> StoreResult<Document>;

    async fn delete_document(&self, org_id: OrgId, id: Uuid) -> StoreResult<Option<Document>>;

    async fn insert_submission(&self, submission: DealSubmission) -> StoreResult<DealSubmission>;

    async fn get_submission(&self, org_id: OrgId, id: Uuid) -> StoreResult<Option<DealSubmission>>;

    /// Newest first
    async fn list_submissions(&self, org_id: OrgId) -> StoreResult<Vec<DealSubmission>>;

    /// Review edit; accepted submissions are frozen and the edit may not accept
    async fn review_submission(
        &self,
        org_id: OrgId,
        id: Uuid,
        edit: Edit<'_, DealSubmission>,
    ) -> StoreResult<DealSubmission>;

    /// Create the company and mark the submission accepted as one unit
    async fn accept_submission(
        &self,
        org_id: OrgId,
        id: Uuid,
        reviewer: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<(DealSubmission, Company)>;
}

/// Assessments and the usage log
#[async_trait]
pub trait AssessmentRepository: Send + Sync {
    /// Quota check, counter increment and insert as one unit
    async fn create_metered_assessment(&self, assessment: Assessment, now: DateTime<Utc>) -> StoreResult<Assessment>;

    async fn get_assessment(&self, org_id: OrgId, id: Uuid) -> StoreResult<Option<Assessment>>;

    /// Newest first
    async fn list_assessments(&self, org_id: OrgId, company_id: Uuid) -> StoreResult<Vec<Assessment>>;

    /// Apply a processor report. Terminal assessments are frozen. Reaching
    /// `completed` appends the usage record in the same unit; the flag reports it.
    async fn transition_assessment(
        &self,
        org_id: OrgId,
        id: Uuid,
        edit: Edit<'_, Assessment>,
    ) -> StoreResult<(Assessment, bool)>;

    async fn delete_assessment(&self, org_id: OrgId, id: Uuid) -> StoreResult<Option<Assessment>>;

    async fn usage_since(&self, org_id: OrgId, since: DateTime<Utc>) -> StoreResult<Vec<UsageRecord>>;
}

/// Chat threads and messages
#[async_trait]
pub trait ChatRepository: Send + Sync {
    async fn create_thread(&self, thread: ChatThread) -> StoreResult<ChatThread>;

    async fn get_thread(&self, org_id: OrgId, id: Uuid) -> StoreResult<Option<ChatThread>>;

    /// Newest first, optionally limited to one company
    async fn list_threads(&self, org_id: OrgId, company_id: Option<Uuid>) -> StoreResult<Vec<ChatThread>>;

    async fn append_message(&self, message: ChatMessage) -> StoreResult<ChatMessage>;

    /// Oldest first
    async fn list_messages(&self, org_id: OrgId, thread_id: Uuid) -> StoreResult<Vec<ChatMessage>>;
}

/// Complete tenant data store
pub trait TenantStore:
    OrgRepository + UserRepository + MembershipRepository + DealRepository + AssessmentRepository + ChatRepository
{
}

impl<T> TenantStore for T where
    T: OrgRepository + UserRepository + MembershipRepository + DealRepository + AssessmentRepository + ChatRepository
{
}
