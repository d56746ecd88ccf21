//! Tenant Data Model
//!
//! Every business record is owned by exactly one organization (`org_id`).
//! [`User`] is global and joined to organizations through [`OrgMembership`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::plans::PlanTier;

/// Organization ID (tenant isolation key)
pub type OrgId = Uuid;

/// User ID
pub type UserId = Uuid;

// ============ Organizations ============

/// Organization (tenant)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Organization {
    pub id: OrgId,
    pub name: String,
    /// Public handle used by the intake form
    pub slug: String,
    pub plan: PlanTier,
    pub assessments_used_this_month: u32,
    pub billing_cycle_start: DateTime<Utc>,
    /// Day the subscription started; cycle boundaries are whole months from here
    pub billing_cycle_anchor: DateTime<Utc>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    /// Create a free-tier organization whose billing cycle starts now
    pub fn new(name: &str, slug: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: slug.to_string(),
            plan: PlanTier::Free,
            assessments_used_this_month: 0,
            billing_cycle_start: now,
            billing_cycle_anchor: now,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            created_at: now,
        }
    }

    /// Builder-style plan override
    pub fn with_plan(mut self, plan: PlanTier) -> Self {
        self.plan = plan;
        self
    }
}

/// Organization role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrgRole {
    Owner,
    Admin,
    Member,
}

impl OrgRole {
    /// Owners and admins may perform administrative actions
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

/// Membership of a user in an organization
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrgMembership {
    pub org_id: OrgId,
    pub user_id: UserId,
    pub role: OrgRole,
    pub joined_at: DateTime<Utc>,
}

/// Pending invitation to join an organization
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Invitation {
    pub id: Uuid,
    pub org_id: OrgId,
    pub email: String,
    pub role: OrgRole,
    pub invited_by: UserId,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

// ============ Users ============

/// User (global, not tenant-scoped)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub full_name: Option<String>,
    pub title: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: UserId, email: &str) -> Self {
        Self {
            id,
            email: email.trim().to_lowercase(),
            full_name: None,
            title: None,
            avatar_url: None,
            created_at: Utc::now(),
        }
    }
}

/// Per-user email notification settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NotificationPreferences {
    pub assessment_completed: bool,
    pub new_submission: bool,
    pub weekly_digest: bool,
    pub product_updates: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            assessment_completed: true,
            new_submission: true,
            weekly_digest: true,
            product_updates: false,
        }
    }
}

/// A session observed from the identity provider
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserSession {
    pub id: Uuid,
    pub user_id: UserId,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl UserSession {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

// ============ Companies ============

/// Company lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CompanyStage {
    PreSeed,
    Seed,
    SeriesA,
    SeriesB,
    SeriesC,
    Growth,
}

/// Company pipeline status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CompanyStatus {
    #[default]
    Active,
    Passed,
    Invested,
    Watching,
}

/// Company under review
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Company {
    pub id: Uuid,
    pub org_id: OrgId,
    pub name: String,
    pub website: Option<String>,
    pub description: Option<String>,
    pub sector: Option<String>,
    pub stage: Option<CompanyStage>,
    pub status: CompanyStatus,
    /// Intake submission this company was accepted from
    pub source_submission_id: Option<Uuid>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Company {
    pub fn new(org_id: OrgId, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            org_id,
            name: name.to_string(),
            website: None,
            description: None,
            sector: None,
            stage: None,
            status: CompanyStatus::Active,
            source_submission_id: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============ Documents ============

/// Document classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentClass {
    PitchDeck,
    Financials,
    CapTable,
    Legal,
    Product,
    #[default]
    Other,
}

/// Uploaded company document
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Document {
    pub id: Uuid,
    pub org_id: OrgId,
    pub company_id: Uuid,
    pub file_name: String,
    /// Object key in the storage bucket
    pub storage_path: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub classification: DocumentClass,
    /// Filled in by the extraction worker
    pub extracted_text: Option<String>,
    pub uploaded_by: UserId,
    pub created_at: DateTime<Utc>,
}

// ============ Assessments ============

/// Assessment depth; also the usage record type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentKind {
    Screening,
    Full,
}

/// Assessment processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AssessmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Transitions the processor may report
    pub fn can_transition_to(&self, next: AssessmentStatus) -> bool {
        use AssessmentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }
}

/// Due-diligence assessment of a company
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Assessment {
    pub id: Uuid,
    pub org_id: OrgId,
    pub company_id: Uuid,
    pub kind: AssessmentKind,
    pub status: AssessmentStatus,
    pub summary: Option<String>,
    pub score: Option<u8>,
    pub tokens_used: u64,
    pub requested_by: UserId,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Assessment {
    pub fn pending(org_id: OrgId, company_id: Uuid, kind: AssessmentKind, requested_by: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            company_id,
            kind,
            status: AssessmentStatus::Pending,
            summary: None,
            score: None,
            tokens_used: 0,
            requested_by,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Billable action (append-only)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UsageRecord {
    pub id: Uuid,
    pub org_id: OrgId,
    pub kind: AssessmentKind,
    pub tokens_used: u64,
    pub assessment_id: Option<Uuid>,
    pub recorded_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn for_assessment(assessment: &Assessment) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id: assessment.org_id,
            kind: assessment.kind,
            tokens_used: assessment.tokens_used,
            assessment_id: Some(assessment.id),
            recorded_at: assessment.completed_at.unwrap_or_else(Utc::now),
        }
    }
}

// ============ Chat ============

/// Chat participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Conversation thread, optionally pinned to a company
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatThread {
    pub id: Uuid,
    pub org_id: OrgId,
    pub company_id: Option<Uuid>,
    pub title: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatMessage {
    pub id: Uuid,
    pub org_id: OrgId,
    pub thread_id: Uuid,
    pub role: ChatRole,
    pub author_id: Option<UserId>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// ============ Intake ============

/// Deal submission review status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Reviewing,
    Accepted,
    Rejected,
}

/// Company submitted through the public intake form
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DealSubmission {
    pub id: Uuid,
    pub org_id: OrgId,
    pub company_name: String,
    pub founder_name: String,
    pub founder_email: String,
    pub website: Option<String>,
    pub pitch: Option<String>,
    pub stage: Option<CompanyStage>,
    pub status: SubmissionStatus,
    /// Company created when the submission was accepted
    pub company_id: Option<Uuid>,
    pub notes: Option<String>,
    pub reviewed_by: Option<UserId>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub submitted_at: DateTime<Utc>,
}

impl DealSubmission {
    /// Company record seeded from this submission
    pub fn to_company(&self, accepted_by: UserId) -> Company {
        let mut company = Company::new(self.org_id, &self.company_name);
        company.website = self.website.clone();
        company.description = self.pitch.clone();
        company.stage = self.stage;
        company.source_submission_id = Some(self.id);
        company.created_by = Some(accepted_by);
        company
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assessment_transitions() {
        use AssessmentStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Pending));
        assert!(Completed.is_terminal());
    }

    #[test]
    fn test_submission_to_company() {
        let org = Organization::new("Acme Ventures", "acme");
        let reviewer = Uuid::new_v4();
        let submission = DealSubmission {
            id: Uuid::new_v4(),
            org_id: org.id,
            company_name: "Rocket Labs".into(),
            founder_name: "Sam".into(),
            founder_email: "sam@rocket.io".into(),
            website: Some("https://rocket.io".into()),
            pitch: Some("Reusable boosters".into()),
            stage: Some(CompanyStage::Seed),
            status: SubmissionStatus::Pending,
            company_id: None,
            notes: None,
            reviewed_by: None,
            reviewed_at: None,
            submitted_at: Utc::now(),
        };

        let company = submission.to_company(reviewer);
        assert_eq!(company.org_id, org.id);
        assert_eq!(company.name, "Rocket Labs");
        assert_eq!(company.stage, Some(CompanyStage::Seed));
        assert_eq!(company.source_submission_id, Some(submission.id));
        assert_eq!(company.created_by, Some(reviewer));
    }

    #[test]
    fn test_role_admin() {
        assert!(OrgRole::Owner.is_admin());
        assert!(OrgRole::Admin.is_admin());
        assert!(!OrgRole::Member.is_admin());
    }

    #[test]
    fn test_user_email_normalized() {
        let user = User::new(Uuid::new_v4(), "  Jane@Fund.VC ");
        assert_eq!(user.email, "jane@fund.vc");
    }
}
