//! Tenant Core
//!
//! Organizations, their deal flow and the plan quota that meters them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          TENANT CORE                            │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐    │
//! │  │    model     │   │    plans     │   │  usage / cycle   │    │
//! │  │ org-owned    │   │ tier → quota │   │ monthly rollover │    │
//! │  │ records      │   │ + features   │   │ + summaries      │    │
//! │  └──────┬───────┘   └──────┬───────┘   └────────┬─────────┘    │
//! │         │                  │                    │              │
//! │  ┌──────▼──────────────────▼────────────────────▼──────────┐   │
//! │  │                 store (repository ports)                │   │
//! │  │        every lookup scoped by the caller's org_id       │   │
//! │  └──────────────────────────┬──────────────────────────────┘   │
//! │                             │                                  │
//! │                     ┌───────▼───────┐                          │
//! │                     │  MemoryStore  │                          │
//! │                     └───────────────┘                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod cycle;
pub mod memory;
pub mod model;
pub mod plans;
pub mod store;
pub mod usage;

pub use memory::MemoryStore;
pub use model::*;
pub use plans::{catalog, can_create_assessment, plan_for, AssessmentQuota, PlanDefinition, PlanTier};
pub use store::{
    AssessmentRepository, ChatRepository, CompanyRemoval, DealRepository, Edit, MembershipRepository, OrgRepository,
    StoreError, StoreResult, TenantStore, UserRepository,
};
pub use usage::UsageSummary;
