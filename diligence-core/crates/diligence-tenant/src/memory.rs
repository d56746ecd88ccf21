//! In-process tenant store
//!
//! All tables sit behind a single lock, so the multi-record operations
//! (`accept_submission`, `create_metered_assessment`, `delete_company`) and
//! the in-place edits are atomic with respect to every other call.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::cycle;
use crate::model::*;
use crate::plans::plan_for;
use crate::store::*;

#[derive(Default)]
struct Tables {
    organizations: HashMap<OrgId, Organization>,
    users: HashMap<UserId, User>,
    preferences: HashMap<UserId, NotificationPreferences>,
    sessions: HashMap<Uuid, UserSession>,
    memberships: Vec<OrgMembership>,
    invitations: HashMap<Uuid, Invitation>,
    companies: HashMap<Uuid, Company>,
    documents: HashMap<Uuid, Document>,
    submissions: HashMap<Uuid, DealSubmission>,
    assessments: HashMap<Uuid, Assessment>,
    usage: Vec<UsageRecord>,
    threads: HashMap<Uuid, ChatThread>,
    messages: Vec<ChatMessage>,
    processed_events: HashSet<String>,
}

/// In-memory tenant store
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Run `edit` on a copy and keep it only when the edit succeeds
fn apply_edit<T: Clone>(slot: &mut T, edit: Edit<'_, T>) -> StoreResult<bool> {
    let mut draft = slot.clone();
    let changed = edit(&mut draft)?;
    *slot = draft;
    Ok(changed)
}

/// Clone the record if it belongs to `org_id`
fn scoped<T: Clone>(record: Option<&T>, org_id: OrgId, owner: impl Fn(&T) -> OrgId) -> Option<T> {
    record.filter(|r| owner(r) == org_id).cloned()
}

#[async_trait]
impl OrgRepository for MemoryStore {
    async fn create_organization(&self, org: Organization) -> StoreResult<Organization> {
        let mut t = self.tables.write();
        if t.organizations.values().any(|o| o.slug == org.slug) {
            return Err(StoreError::Conflict(format!("slug '{}' is taken", org.slug)));
        }
        t.organizations.insert(org.id, org.clone());
        Ok(org)
    }

    async fn get_organization(&self, id: OrgId) -> StoreResult<Option<Organization>> {
        Ok(self.tables.read().organizations.get(&id).cloned())
    }

    async fn current_organization(&self, id: OrgId, now: DateTime<Utc>) -> StoreResult<Option<Organization>> {
        let mut t = self.tables.write();
        Ok(t.organizations.get_mut(&id).map(|org| {
            cycle::rollover(org, now);
            org.clone()
        }))
    }

    async fn find_organization_by_slug(&self, slug: &str) -> StoreResult<Option<Organization>> {
        let t = self.tables.read();
        Ok(t.organizations.values().find(|o| o.slug == slug).cloned())
    }

    async fn find_organization_by_customer(&self, customer_id: &str) -> StoreResult<Option<Organization>> {
        let t = self.tables.read();
        Ok(t
            .organizations
            .values()
            .find(|o| o.stripe_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn edit_organization(&self, id: OrgId, edit: Edit<'_, Organization>) -> StoreResult<(Organization, bool)> {
        let mut t = self.tables.write();
        let slot = t.organizations.get_mut(&id).ok_or(StoreError::NotFound)?;
        let changed = apply_edit(slot, edit)?;
        Ok((slot.clone(), changed))
    }

    async fn mark_event_processed(&self, event_id: &str) -> StoreResult<bool> {
        Ok(self.tables.write().processed_events.insert(event_id.to_string()))
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn upsert_user(&self, user: User) -> StoreResult<User> {
        let mut t = self.tables.write();
        if let Some(existing) = t.users.get(&user.id) {
            return Ok(existing.clone());
        }
        if t.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict(format!("email {} belongs to another user", user.email)));
        }
        t.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.tables.read().users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email = email.trim().to_lowercase();
        let t = self.tables.read();
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn update_user(&self, user: User) -> StoreResult<User> {
        let mut t = self.tables.write();
        let slot = t.users.get_mut(&user.id).ok_or(StoreError::NotFound)?;
        *slot = user.clone();
        Ok(user)
    }

    async fn notification_preferences(&self, user_id: UserId) -> StoreResult<NotificationPreferences> {
        let t = self.tables.read();
        Ok(t.preferences.get(&user_id).cloned().unwrap_or_default())
    }

    async fn put_notification_preferences(
        &self,
        user_id: UserId,
        prefs: NotificationPreferences,
    ) -> StoreResult<NotificationPreferences> {
        self.tables.write().preferences.insert(user_id, prefs.clone());
        Ok(prefs)
    }

    async fn observe_session(
        &self,
        session_id: Uuid,
        user_id: UserId,
        user_agent: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<(UserSession, bool)> {
        let mut t = self.tables.write();
        if let Some(session) = t.sessions.get_mut(&session_id) {
            if session.user_id != user_id {
                return Err(StoreError::Conflict("session belongs to another user".into()));
            }
            if !session.is_revoked() {
                session.last_seen_at = now;
            }
            return Ok((session.clone(), false));
        }

        let session = UserSession {
            id: session_id,
            user_id,
            user_agent,
            created_at: now,
            last_seen_at: now,
            revoked_at: None,
        };
        t.sessions.insert(session_id, session.clone());
        Ok((session, true))
    }

    async fn list_sessions(&self, user_id: UserId) -> StoreResult<Vec<UserSession>> {
        let t = self.tables.read();
        let mut sessions: Vec<_> = t.sessions.values().filter(|s| s.user_id == user_id).cloned().collect();
        sessions.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        Ok(sessions)
    }

    async fn revoke_session(&self, user_id: UserId, session_id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut t = self.tables.write();
        match t.sessions.get_mut(&session_id) {
            Some(session) if session.user_id == user_id => {
                session.revoked_at.get_or_insert(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl MembershipRepository for MemoryStore {
    async fn add_membership(&self, membership: OrgMembership) -> StoreResult<OrgMembership> {
        let mut t = self.tables.write();
        if !t.organizations.contains_key(&membership.org_id) || !t.users.contains_key(&membership.user_id) {
            return Err(StoreError::NotFound);
        }
        if t
            .memberships
            .iter()
            .any(|m| m.org_id == membership.org_id && m.user_id == membership.user_id)
        {
            return Err(StoreError::Conflict("user is already a member".into()));
        }
        t.memberships.push(membership.clone());
        Ok(membership)
    }

    async fn get_membership(&self, org_id: OrgId, user_id: UserId) -> StoreResult<Option<OrgMembership>> {
        let t = self.tables.read();
        Ok(t
            .memberships
            .iter()
            .find(|m| m.org_id == org_id && m.user_id == user_id)
            .cloned())
    }

    async fn memberships_for_user(&self, user_id: UserId) -> StoreResult<Vec<OrgMembership>> {
        let t = self.tables.read();
        let mut found: Vec<_> = t.memberships.iter().filter(|m| m.user_id == user_id).cloned().collect();
        found.sort_by_key(|m| m.joined_at);
        Ok(found)
    }

    async fn list_members(&self, org_id: OrgId) -> StoreResult<Vec<(OrgMembership, User)>> {
        let t = self.tables.read();
        let mut members: Vec<_> = t
            .memberships
            .iter()
            .filter(|m| m.org_id == org_id)
            .filter_map(|m| t.users.get(&m.user_id).map(|u| (m.clone(), u.clone())))
            .collect();
        members.sort_by_key(|(m, _)| m.joined_at);
        Ok(members)
    }

    async fn remove_membership(&self, org_id: OrgId, user_id: UserId) -> StoreResult<bool> {
        let mut t = self.tables.write();
        let Some(index) = t
            .memberships
            .iter()
            .position(|m| m.org_id == org_id && m.user_id == user_id)
        else {
            return Ok(false);
        };

        if t.memberships[index].role == OrgRole::Owner {
            let owners = t
                .memberships
                .iter()
                .filter(|m| m.org_id == org_id && m.role == OrgRole::Owner)
                .count();
            if owners <= 1 {
                return Err(StoreError::InvalidState(
                    "An organization must keep at least one owner".into(),
                ));
            }
        }

        t.memberships.remove(index);
        Ok(true)
    }

    async fn create_invitation(&self, invitation: Invitation) -> StoreResult<Invitation> {
        let mut t = self.tables.write();
        let duplicate = t.invitations.values().any(|i| {
            i.org_id == invitation.org_id && i.email == invitation.email && i.accepted_at.is_none()
        });
        if duplicate {
            return Err(StoreError::Conflict(format!("{} already has a pending invitation", invitation.email)));
        }
        t.invitations.insert(invitation.id, invitation.clone());
        Ok(invitation)
    }

    async fn pending_invitations(&self, org_id: OrgId) -> StoreResult<Vec<Invitation>> {
        let t = self.tables.read();
        let mut pending: Vec<_> = t
            .invitations
            .values()
            .filter(|i| i.org_id == org_id && i.accepted_at.is_none())
            .cloned()
            .collect();
        pending.sort_by_key(|i| i.created_at);
        Ok(pending)
    }

    async fn claim_invitations(&self, user: &User, now: DateTime<Utc>) -> StoreResult<Vec<OrgMembership>> {
        let mut guard = self.tables.write();
        let t = &mut *guard;
        let mut claimed = Vec::new();

        for invitation in t.invitations.values_mut() {
            if invitation.accepted_at.is_some() || invitation.email != user.email {
                continue;
            }
            invitation.accepted_at = Some(now);

            let already_member = t
                .memberships
                .iter()
                .any(|m| m.org_id == invitation.org_id && m.user_id == user.id);
            if already_member {
                continue;
            }

            let membership = OrgMembership {
                org_id: invitation.org_id,
                user_id: user.id,
                role: invitation.role,
                joined_at: now,
            };
            t.memberships.push(membership.clone());
            claimed.push(membership);
        }

        Ok(claimed)
    }
}

#[async_trait]
impl DealRepository for MemoryStore {
    async fn insert_company(&self, company: Company) -> StoreResult<Company> {
        let mut t = self.tables.write();
        if !t.organizations.contains_key(&company.org_id) {
            return Err(StoreError::NotFound);
        }
        t.companies.insert(company.id, company.clone());
        Ok(company)
    }

    async fn get_company(&self, org_id: OrgId, id: Uuid) -> StoreResult<Option<Company>> {
        Ok(scoped(self.tables.read().companies.get(&id), org_id, |c| c.org_id))
    }

    async fn list_companies(&self, org_id: OrgId) -> StoreResult<Vec<Company>> {
        let t = self.tables.read();
        let mut companies: Vec<_> = t.companies.values().filter(|c| c.org_id == org_id).cloned().collect();
        companies.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(companies)
    }

    async fn update_company(&self, company: Company) -> StoreResult<Company> {
        let mut t = self.tables.write();
        match t.companies.get_mut(&company.id) {
            Some(slot) if slot.org_id == company.org_id => {
                *slot = company.clone();
                Ok(company)
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn delete_company(&self, org_id: OrgId, id: Uuid) -> StoreResult<Option<CompanyRemoval>> {
        let mut t = self.tables.write();
        if scoped(t.companies.get(&id), org_id, |c| c.org_id).is_none() {
            return Ok(None);
        }
        let Some(company) = t.companies.remove(&id) else {
            return Ok(None);
        };

        let document_ids: Vec<Uuid> = t
            .documents
            .values()
            .filter(|d| d.company_id == id)
            .map(|d| d.id)
            .collect();
        let documents = document_ids
            .iter()
            .filter_map(|doc_id| t.documents.remove(doc_id))
            .collect();

        t.assessments.retain(|_, a| a.company_id != id);

        let thread_ids: Vec<Uuid> = t
            .threads
            .values()
            .filter(|th| th.company_id == Some(id))
            .map(|th| th.id)
            .collect();
        t.threads.retain(|_, th| th.company_id != Some(id));
        t.messages.retain(|m| !thread_ids.contains(&m.thread_id));

        Ok(Some(CompanyRemoval { company, documents }))
    }

    async fn insert_document(&self, document: Document) -> StoreResult<Document> {
        let mut t = self.tables.write();
        if scoped(t.companies.get(&document.company_id), document.org_id, |c| c.org_id).is_none() {
            return Err(StoreError::NotFound);
        }
        t.documents.insert(document.id, document.clone());
        Ok(document)
    }

    async fn get_document(&self, org_id: OrgId, id: Uuid) -> StoreResult<Option<Document>> {
        Ok(scoped(self.tables.read().documents.get(&id), org_id, |d| d.org_id))
    }

    async fn list_documents(&self, org_id: OrgId, company_id: Uuid) -> StoreResult<Vec<Document>> {
        let t = self.tables.read();
        let mut docs: Vec<_> = t
            .documents
            .values()
            .filter(|d| d.org_id == org_id && d.company_id == company_id)
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(docs)
    }

    async fn update_document(&self, document: Document) -> StoreResult<Document> {
        let mut t = self.tables.write();
        match t.documents.get_mut(&document.id) {
            Some(slot) if slot.org_id == document.org_id => {
                *slot = document.clone();
                Ok(document)
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn delete_document(&self, org_id: OrgId, id: Uuid) -> StoreResult<Option<Document>> {
        let mut t = self.tables.write();
        if scoped(t.documents.get(&id), org_id, |d| d.org_id).is_none() {
            return Ok(None);
        }
        Ok(t.documents.remove(&id))
    }

    async fn insert_submission(&self, submission: DealSubmission) -> StoreResult<DealSubmission> {
        let mut t = self.tables.write();
        if !t.organizations.contains_key(&submission.org_id) {
            return Err(StoreError::NotFound);
        }
        t.submissions.insert(submission.id, submission.clone());
        Ok(submission)
    }

    async fn get_submission(&self, org_id: OrgId, id: Uuid) -> StoreResult<Option<DealSubmission>> {
        Ok(scoped(self.tables.read().submissions.get(&id), org_id, |s| s.org_id))
    }

    async fn list_submissions(&self, org_id: OrgId) -> StoreResult<Vec<DealSubmission>> {
        let t = self.tables.read();
        let mut subs: Vec<_> = t.submissions.values().filter(|s| s.org_id == org_id).cloned().collect();
        subs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(subs)
    }

    async fn review_submission(
        &self,
        org_id: OrgId,
        id: Uuid,
        edit: Edit<'_, DealSubmission>,
    ) -> StoreResult<DealSubmission> {
        let mut t = self.tables.write();
        let slot = match t.submissions.get_mut(&id) {
            Some(slot) if slot.org_id == org_id => slot,
            _ => return Err(StoreError::NotFound),
        };
        if slot.status == SubmissionStatus::Accepted {
            return Err(StoreError::InvalidState("Submission has already been accepted".into()));
        }

        let mut draft = slot.clone();
        edit(&mut draft)?;
        if draft.status == SubmissionStatus::Accepted || draft.company_id.is_some() {
            return Err(StoreError::InvalidState(
                "Use the accept endpoint to accept a submission".into(),
            ));
        }
        *slot = draft;
        Ok(slot.clone())
    }

    async fn accept_submission(
        &self,
        org_id: OrgId,
        id: Uuid,
        reviewer: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<(DealSubmission, Company)> {
        let mut t = self.tables.write();
        let submission = match t.submissions.get(&id) {
            Some(s) if s.org_id == org_id => s,
            _ => return Err(StoreError::NotFound),
        };

        match submission.status {
            SubmissionStatus::Accepted => {
                return Err(StoreError::InvalidState("submission was already accepted".into()))
            }
            SubmissionStatus::Rejected => {
                return Err(StoreError::InvalidState("rejected submissions cannot be accepted".into()))
            }
            SubmissionStatus::Pending | SubmissionStatus::Reviewing => {}
        }

        let mut company = submission.to_company(reviewer);
        company.created_at = now;
        company.updated_at = now;

        let mut accepted = submission.clone();
        accepted.status = SubmissionStatus::Accepted;
        accepted.company_id = Some(company.id);
        accepted.reviewed_by = Some(reviewer);
        accepted.reviewed_at = Some(now);

        t.companies.insert(company.id, company.clone());
        t.submissions.insert(accepted.id, accepted.clone());
        Ok((accepted, company))
    }
}

#[async_trait]
impl AssessmentRepository for MemoryStore {
    async fn create_metered_assessment(&self, assessment: Assessment, now: DateTime<Utc>) -> StoreResult<Assessment> {
        let mut guard = self.tables.write();
        let t = &mut *guard;

        if scoped(t.companies.get(&assessment.company_id), assessment.org_id, |c| c.org_id).is_none() {
            return Err(StoreError::NotFound);
        }
        let org = t.organizations.get_mut(&assessment.org_id).ok_or(StoreError::NotFound)?;
        cycle::rollover(org, now);

        let quota = plan_for(org.plan).monthly_assessments;
        if !quota.allows(org.assessments_used_this_month) {
            return Err(StoreError::QuotaExceeded {
                tier: org.plan,
                limit: quota.as_i64(),
            });
        }

        org.assessments_used_this_month = org.assessments_used_this_month.saturating_add(1);
        t.assessments.insert(assessment.id, assessment.clone());
        Ok(assessment)
    }

    async fn get_assessment(&self, org_id: OrgId, id: Uuid) -> StoreResult<Option<Assessment>> {
        Ok(scoped(self.tables.read().assessments.get(&id), org_id, |a| a.org_id))
    }

    async fn list_assessments(&self, org_id: OrgId, company_id: Uuid) -> StoreResult<Vec<Assessment>> {
        let t = self.tables.read();
        let mut found: Vec<_> = t
            .assessments
            .values()
            .filter(|a| a.org_id == org_id && a.company_id == company_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn transition_assessment(
        &self,
        org_id: OrgId,
        id: Uuid,
        edit: Edit<'_, Assessment>,
    ) -> StoreResult<(Assessment, bool)> {
        let mut guard = self.tables.write();
        let t = &mut *guard;
        let slot = match t.assessments.get_mut(&id) {
            Some(slot) if slot.org_id == org_id => slot,
            _ => return Err(StoreError::NotFound),
        };

        let before = slot.status;
        let mut draft = slot.clone();
        let changed = edit(&mut draft)?;
        if before.is_terminal() && changed {
            return Err(StoreError::InvalidState(format!("Assessment is already {before:?}")));
        }
        if draft.status != before && !before.can_transition_to(draft.status) {
            return Err(StoreError::InvalidState(format!(
                "Cannot move assessment from {before:?} to {:?}",
                draft.status
            )));
        }

        *slot = draft;
        let completed = before != AssessmentStatus::Completed && slot.status == AssessmentStatus::Completed;
        if completed {
            t.usage.push(UsageRecord::for_assessment(slot));
        }
        Ok((slot.clone(), completed))
    }

    async fn delete_assessment(&self, org_id: OrgId, id: Uuid) -> StoreResult<Option<Assessment>> {
        let mut t = self.tables.write();
        if scoped(t.assessments.get(&id), org_id, |a| a.org_id).is_none() {
            return Ok(None);
        }
        Ok(t.assessments.remove(&id))
    }

    async fn usage_since(&self, org_id: OrgId, since: DateTime<Utc>) -> StoreResult<Vec<UsageRecord>> {
        let t = self.tables.read();
        Ok(t
            .usage
            .iter()
            .filter(|r| r.org_id == org_id && r.recorded_at >= since)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ChatRepository for MemoryStore {
    async fn create_thread(&self, thread: ChatThread) -> StoreResult<ChatThread> {
        let mut t = self.tables.write();
        if let Some(company_id) = thread.company_id {
            if scoped(t.companies.get(&company_id), thread.org_id, |c| c.org_id).is_none() {
                return Err(StoreError::NotFound);
            }
        }
        t.threads.insert(thread.id, thread.clone());
        Ok(thread)
    }

    async fn get_thread(&self, org_id: OrgId, id: Uuid) -> StoreResult<Option<ChatThread>> {
        Ok(scoped(self.tables.read().threads.get(&id), org_id, |th| th.org_id))
    }

    async fn list_threads(&self, org_id: OrgId, company_id: Option<Uuid>) -> StoreResult<Vec<ChatThread>> {
        let t = self.tables.read();
        let mut threads: Vec<_> = t
            .threads
            .values()
            .filter(|th| th.org_id == org_id)
            .filter(|th| company_id.is_none() || th.company_id == company_id)
            .cloned()
            .collect();
        threads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(threads)
    }

    async fn append_message(&self, message: ChatMessage) -> StoreResult<ChatMessage> {
        let mut t = self.tables.write();
        if scoped(t.threads.get(&message.thread_id), message.org_id, |th| th.org_id).is_none() {
            return Err(StoreError::NotFound);
        }
        t.messages.push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, org_id: OrgId, thread_id: Uuid) -> StoreResult<Vec<ChatMessage>> {
        let t = self.tables.read();
        Ok(t
            .messages
            .iter()
            .filter(|m| m.org_id == org_id && m.thread_id == thread_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plans::PlanTier;
    use chrono::Duration;

    async fn seeded() -> (MemoryStore, Organization, Organization) {
        let store = MemoryStore::new();
        let acme = store.create_organization(Organization::new("Acme", "acme")).await.unwrap();
        let rival = store.create_organization(Organization::new("Rival", "rival")).await.unwrap();
        (store, acme, rival)
    }

    fn submission(org_id: OrgId) -> DealSubmission {
        DealSubmission {
            id: Uuid::new_v4(),
            org_id,
            company_name: "Orbital".into(),
            founder_name: "Kim".into(),
            founder_email: "kim@orbital.dev".into(),
            website: None,
            pitch: Some("Satellite telemetry".into()),
            stage: Some(CompanyStage::PreSeed),
            status: SubmissionStatus::Pending,
            company_id: None,
            notes: None,
            reviewed_by: None,
            reviewed_at: None,
            submitted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_slug_unique() {
        let (store, _, _) = seeded().await;
        let err = store.create_organization(Organization::new("Acme 2", "acme")).await;
        assert!(matches!(err, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_company_isolation() {
        let (store, acme, rival) = seeded().await;
        let company = store.insert_company(Company::new(acme.id, "Widgets")).await.unwrap();

        assert!(store.get_company(acme.id, company.id).await.unwrap().is_some());
        assert!(store.get_company(rival.id, company.id).await.unwrap().is_none());
        assert!(store.list_companies(rival.id).await.unwrap().is_empty());
        assert!(store.delete_company(rival.id, company.id).await.unwrap().is_none());

        let mut hijack = company.clone();
        hijack.org_id = rival.id;
        assert!(matches!(store.update_company(hijack).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_accept_submission_links_company() {
        let (store, acme, _) = seeded().await;
        let reviewer = Uuid::new_v4();
        let sub = store.insert_submission(submission(acme.id)).await.unwrap();

        let (accepted, company) = store.accept_submission(acme.id, sub.id, reviewer, Utc::now()).await.unwrap();
        assert_eq!(accepted.status, SubmissionStatus::Accepted);
        assert_eq!(accepted.company_id, Some(company.id));
        assert_eq!(company.source_submission_id, Some(sub.id));
        assert!(store.get_company(acme.id, company.id).await.unwrap().is_some());

        let again = store.accept_submission(acme.id, sub.id, reviewer, Utc::now()).await;
        assert!(matches!(again, Err(StoreError::InvalidState(_))));
        assert_eq!(store.list_companies(acme.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_accept_foreign_submission_writes_nothing() {
        let (store, acme, rival) = seeded().await;
        let sub = store.insert_submission(submission(acme.id)).await.unwrap();

        let result = store.accept_submission(rival.id, sub.id, Uuid::new_v4(), Utc::now()).await;
        assert!(matches!(result, Err(StoreError::NotFound)));
        assert!(store.list_companies(rival.id).await.unwrap().is_empty());
        let unchanged = store.get_submission(acme.id, sub.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, SubmissionStatus::Pending);
    }

    #[tokio::test]
    async fn test_metered_assessment_enforces_quota() {
        let (store, acme, _) = seeded().await;
        let company = store.insert_company(Company::new(acme.id, "Widgets")).await.unwrap();
        let user = Uuid::new_v4();
        let now = Utc::now();

        for _ in 0..3 {
            let a = Assessment::pending(acme.id, company.id, AssessmentKind::Screening, user);
            store.create_metered_assessment(a, now).await.unwrap();
        }
        let fourth = Assessment::pending(acme.id, company.id, AssessmentKind::Screening, user);
        let err = store.create_metered_assessment(fourth, now).await;
        assert!(matches!(err, Err(StoreError::QuotaExceeded { tier: PlanTier::Free, limit: 3 })));

        let org = store.get_organization(acme.id).await.unwrap().unwrap();
        assert_eq!(org.assessments_used_this_month, 3);
    }

    #[tokio::test]
    async fn test_metered_assessment_rolls_cycle() {
        let (store, acme, _) = seeded().await;
        let anchor = Utc::now() - Duration::days(40);
        let (acme, _) = store
            .edit_organization(
                acme.id,
                Box::new(move |org| {
                    org.billing_cycle_anchor = anchor;
                    org.billing_cycle_start = anchor;
                    org.assessments_used_this_month = 3;
                    Ok(true)
                }),
            )
            .await
            .unwrap();
        let company = store.insert_company(Company::new(acme.id, "Widgets")).await.unwrap();

        let a = Assessment::pending(acme.id, company.id, AssessmentKind::Full, Uuid::new_v4());
        store.create_metered_assessment(a, Utc::now()).await.unwrap();

        let org = store.get_organization(acme.id).await.unwrap().unwrap();
        assert_eq!(org.assessments_used_this_month, 1);
        assert!(org.billing_cycle_start > acme.billing_cycle_start);
    }

    #[tokio::test]
    async fn test_delete_company_cascades() {
        let (store, acme, _) = seeded().await;
        let user = Uuid::new_v4();
        let company = store.insert_company(Company::new(acme.id, "Widgets")).await.unwrap();
        let doc = Document {
            id: Uuid::new_v4(),
            org_id: acme.id,
            company_id: company.id,
            file_name: "deck.pdf".into(),
            storage_path: format!("{}/{}/deck.pdf", acme.id, company.id),
            content_type: "application/pdf".into(),
            size_bytes: 42,
            classification: DocumentClass::PitchDeck,
            extracted_text: None,
            uploaded_by: user,
            created_at: Utc::now(),
        };
        store.insert_document(doc.clone()).await.unwrap();
        let a = Assessment::pending(acme.id, company.id, AssessmentKind::Screening, user);
        let a = store.create_metered_assessment(a, Utc::now()).await.unwrap();

        let removal = store.delete_company(acme.id, company.id).await.unwrap().unwrap();
        assert_eq!(removal.documents.len(), 1);
        assert_eq!(removal.documents[0].storage_path, doc.storage_path);
        assert!(store.get_document(acme.id, doc.id).await.unwrap().is_none());
        assert!(store.get_assessment(acme.id, a.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_invitations() {
        let (store, acme, _) = seeded().await;
        let owner = store.upsert_user(User::new(Uuid::new_v4(), "owner@acme.vc")).await.unwrap();
        store
            .create_invitation(Invitation {
                id: Uuid::new_v4(),
                org_id: acme.id,
                email: "analyst@acme.vc".into(),
                role: OrgRole::Member,
                invited_by: owner.id,
                created_at: Utc::now(),
                accepted_at: None,
            })
            .await
            .unwrap();

        let analyst = store.upsert_user(User::new(Uuid::new_v4(), "Analyst@acme.vc")).await.unwrap();
        let claimed = store.claim_invitations(&analyst, Utc::now()).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].org_id, acme.id);
        assert!(store.pending_invitations(acme.id).await.unwrap().is_empty());
        assert!(store.claim_invitations(&analyst, Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_session_ledger() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let sid = Uuid::new_v4();
        let now = Utc::now();

        let (_, first) = store.observe_session(sid, user, Some("curl".into()), now).await.unwrap();
        assert!(first);
        let (_, first) = store.observe_session(sid, user, None, now).await.unwrap();
        assert!(!first);
        assert!(store.observe_session(sid, other, None, now).await.is_err());

        assert!(!store.revoke_session(other, sid, now).await.unwrap());
        assert!(store.revoke_session(user, sid, now).await.unwrap());
        let (session, _) = store.observe_session(sid, user, None, now).await.unwrap();
        assert!(session.is_revoked());
    }

    #[tokio::test]
    async fn test_failed_edit_leaves_record() {
        let (store, acme, _) = seeded().await;
        let result = store
            .edit_organization(
                acme.id,
                Box::new(|org| {
                    org.plan = PlanTier::Enterprise;
                    Err(StoreError::InvalidState("nope".into()))
                }),
            )
            .await;
        assert!(result.is_err());
        let org = store.get_organization(acme.id).await.unwrap().unwrap();
        assert_eq!(org.plan, PlanTier::Free);

        let missing = store.edit_organization(Uuid::new_v4(), Box::new(|_| Ok(true))).await;
        assert!(matches!(missing, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_processed_events_are_remembered() {
        let store = MemoryStore::new();
        assert!(store.mark_event_processed("evt_1").await.unwrap());
        assert!(!store.mark_event_processed("evt_1").await.unwrap());
        assert!(store.mark_event_processed("evt_2").await.unwrap());
    }

    #[tokio::test]
    async fn test_counter_saturates() {
        let (store, acme, _) = seeded().await;
        store
            .edit_organization(
                acme.id,
                Box::new(|org| {
                    org.plan = PlanTier::Enterprise;
                    org.assessments_used_this_month = u32::MAX;
                    Ok(true)
                }),
            )
            .await
            .unwrap();
        let company = store.insert_company(Company::new(acme.id, "Widgets")).await.unwrap();

        let a = Assessment::pending(acme.id, company.id, AssessmentKind::Screening, Uuid::new_v4());
        store.create_metered_assessment(a, Utc::now()).await.unwrap();
        let org = store.get_organization(acme.id).await.unwrap().unwrap();
        assert_eq!(org.assessments_used_this_month, u32::MAX);
    }

    fn set_status(next: AssessmentStatus) -> Edit<'static, Assessment> {
        Box::new(move |a| {
            let changed = a.status != next;
            a.status = next;
            Ok(changed)
        })
    }

    #[tokio::test]
    async fn test_terminal_assessment_is_frozen() {
        let (store, acme, rival) = seeded().await;
        let company = store.insert_company(Company::new(acme.id, "Widgets")).await.unwrap();
        let a = Assessment::pending(acme.id, company.id, AssessmentKind::Full, Uuid::new_v4());
        let a = store.create_metered_assessment(a, Utc::now()).await.unwrap();

        let foreign = store.transition_assessment(rival.id, a.id, set_status(AssessmentStatus::Processing)).await;
        assert!(matches!(foreign, Err(StoreError::NotFound)));

        let skipped = store.transition_assessment(acme.id, a.id, set_status(AssessmentStatus::Completed)).await;
        assert!(matches!(skipped, Err(StoreError::InvalidState(_))));

        store
            .transition_assessment(acme.id, a.id, set_status(AssessmentStatus::Processing))
            .await
            .unwrap();
        let (done, completed) = store
            .transition_assessment(acme.id, a.id, set_status(AssessmentStatus::Completed))
            .await
            .unwrap();
        assert!(completed);
        assert_eq!(done.status, AssessmentStatus::Completed);

        let (_, again) = store
            .transition_assessment(acme.id, a.id, set_status(AssessmentStatus::Completed))
            .await
            .unwrap();
        assert!(!again);
        let failed = store.transition_assessment(acme.id, a.id, set_status(AssessmentStatus::Failed)).await;
        assert!(matches!(failed, Err(StoreError::InvalidState(_))));

        let stored = store.get_assessment(acme.id, a.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AssessmentStatus::Completed);
        let usage = store.usage_since(acme.id, acme.created_at).await.unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].assessment_id, Some(a.id));
    }

    #[tokio::test]
    async fn test_accepted_submission_is_frozen() {
        let (store, acme, _) = seeded().await;
        let sub = store.insert_submission(submission(acme.id)).await.unwrap();

        let reviewing = store
            .review_submission(
                acme.id,
                sub.id,
                Box::new(|s| {
                    s.status = SubmissionStatus::Reviewing;
                    Ok(true)
                }),
            )
            .await
            .unwrap();
        assert_eq!(reviewing.status, SubmissionStatus::Reviewing);

        let sneaky = store
            .review_submission(
                acme.id,
                sub.id,
                Box::new(|s| {
                    s.status = SubmissionStatus::Accepted;
                    Ok(true)
                }),
            )
            .await;
        assert!(matches!(sneaky, Err(StoreError::InvalidState(_))));

        let (_, company) = store.accept_submission(acme.id, sub.id, Uuid::new_v4(), Utc::now()).await.unwrap();
        let reopen = store
            .review_submission(
                acme.id,
                sub.id,
                Box::new(|s| {
                    s.status = SubmissionStatus::Pending;
                    s.company_id = None;
                    Ok(true)
                }),
            )
            .await;
        assert!(matches!(reopen, Err(StoreError::InvalidState(_))));

        let stored = store.get_submission(acme.id, sub.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Accepted);
        assert_eq!(stored.company_id, Some(company.id));
    }

    #[tokio::test]
    async fn test_last_owner_cannot_be_removed() {
        let (store, acme, _) = seeded().await;
        let mut owners = Vec::new();
        for email in ["a@acme.vc", "b@acme.vc"] {
            let user = store.upsert_user(User::new(Uuid::new_v4(), email)).await.unwrap();
            store
                .add_membership(OrgMembership {
                    org_id: acme.id,
                    user_id: user.id,
                    role: OrgRole::Owner,
                    joined_at: Utc::now(),
                })
                .await
                .unwrap();
            owners.push(user.id);
        }

        assert!(store.remove_membership(acme.id, owners[0]).await.unwrap());
        let last = store.remove_membership(acme.id, owners[1]).await;
        assert!(matches!(last, Err(StoreError::InvalidState(_))));
        assert!(!store.remove_membership(acme.id, owners[0]).await.unwrap());
        assert_eq!(store.list_members(acme.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_owner_removal_keeps_one() {
        let (store, acme, _) = seeded().await;
        let store = std::sync::Arc::new(store);
        let mut owners = Vec::new();
        for email in ["a@acme.vc", "b@acme.vc"] {
            let user = store.upsert_user(User::new(Uuid::new_v4(), email)).await.unwrap();
            store
                .add_membership(OrgMembership {
                    org_id: acme.id,
                    user_id: user.id,
                    role: OrgRole::Owner,
                    joined_at: Utc::now(),
                })
                .await
                .unwrap();
            owners.push(user.id);
        }

        let tasks: Vec<_> = owners
            .iter()
            .map(|&user_id| {
                let store = store.clone();
                tokio::spawn(async move { store.remove_membership(acme.id, user_id).await })
            })
            .collect();
        let mut removed = 0;
        for task in tasks {
            if let Ok(true) = task.await.unwrap() {
                removed += 1;
            }
        }
        assert_eq!(removed, 1);
        assert_eq!(store.list_members(acme.id).await.unwrap().len(), 1);
    }
}
