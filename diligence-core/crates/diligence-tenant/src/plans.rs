//! Plan Catalog and Assessment Quotas
//!
//! Static mapping from plan tier to display name, monthly assessment quota
//! and feature list.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// Wire value for an unlimited quota
pub const UNLIMITED: i64 = -1;

/// Subscription tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Angel,
    Pro,
    Enterprise,
}

impl PlanTier {
    pub const ALL: [PlanTier; 4] = [Self::Free, Self::Angel, Self::Pro, Self::Enterprise];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Angel => "angel",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }

    /// Tiers that go through checkout
    pub fn is_paid(&self) -> bool {
        !matches!(self, Self::Free)
    }

    pub fn definition(&self) -> &'static PlanDefinition {
        plan_for(*self)
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "angel" => Ok(Self::Angel),
            "pro" => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(UnknownTier(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown plan tier: {0}")]
pub struct UnknownTier(pub String);

/// Monthly assessment allowance
///
/// Serialized as an integer where `-1` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessmentQuota {
    Limited(u32),
    Unlimited,
}

impl AssessmentQuota {
    pub fn allows(&self, used: u32) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Limited(quota) => used < *quota,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Unlimited => UNLIMITED,
            Self::Limited(quota) => i64::from(*quota),
        }
    }
}

impl Serialize for AssessmentQuota {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

impl<'de> Deserialize<'de> for AssessmentQuota {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        if raw == UNLIMITED {
            return Ok(Self::Unlimited);
        }
        u32::try_from(raw)
            .map(Self::Limited)
            .map_err(|_| serde::de::Error::custom(format!("invalid assessment quota: {raw}")))
    }
}

/// Plan definition
#[derive(Debug, Clone, Serialize)]
pub struct PlanDefinition {
    pub tier: PlanTier,
    pub name: &'static str,
    pub monthly_assessments: AssessmentQuota,
    pub features: &'static [&'static str],
}

static CATALOG: [PlanDefinition; 4] = [
    PlanDefinition {
        tier: PlanTier::Free,
        name: "Free",
        monthly_assessments: AssessmentQuota::Limited(3),
        features: &[
            "Screening assessments",
            "Company pipeline",
            "Public intake form",
        ],
    },
    PlanDefinition {
        tier: PlanTier::Angel,
        name: "Angel",
        monthly_assessments: AssessmentQuota::Limited(15),
        features: &[
            "Screening assessments",
            "Full assessments",
            "Company pipeline",
            "Public intake form",
            "Document chat",
        ],
    },
    PlanDefinition {
        tier: PlanTier::Pro,
        name: "Pro",
        monthly_assessments: AssessmentQuota::Limited(50),
        features: &[
            "Screening assessments",
            "Full assessments",
            "Company pipeline",
            "Public intake form",
            "Document chat",
            "Team workspace",
            "Priority processing",
        ],
    },
    PlanDefinition {
        tier: PlanTier::Enterprise,
        name: "Enterprise",
        monthly_assessments: AssessmentQuota::Unlimited,
        features: &[
            "Screening assessments",
            "Full assessments",
            "Company pipeline",
            "Public intake form",
            "Document chat",
            "Team workspace",
            "Priority processing",
            "Single sign-on",
            "Dedicated support",
            "Custom limits",
        ],
    },
];

/// All plans, cheapest first
pub fn catalog() -> &'static [PlanDefinition] {
    &CATALOG
}

pub fn plan_for(tier: PlanTier) -> &'static PlanDefinition {
    match tier {
        PlanTier::Free => &CATALOG[0],
        PlanTier::Angel => &CATALOG[1],
        PlanTier::Pro => &CATALOG[2],
        PlanTier::Enterprise => &CATALOG[3],
    }
}

/// Whether one more assessment fits in the current cycle
pub fn can_create_assessment(tier: PlanTier, used: u32) -> bool {
    plan_for(tier).monthly_assessments.allows(used)
}
