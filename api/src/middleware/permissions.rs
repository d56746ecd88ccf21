//! Role permissions within an organization

use diligence_tenant::OrgRole;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    // Deal flow
    DealsRead,
    DealsWrite,
    DealsDelete,

    // Intake
    SubmissionsReview,

    // Team
    TeamManage,
    OwnersManage,

    // Billing
    BillingManage,
}

impl Permission {
    pub fn for_role(role: OrgRole) -> HashSet<Permission> {
        match role {
            OrgRole::Owner => Self::owner(),
            OrgRole::Admin => Self::admin(),
            OrgRole::Member => Self::member(),
        }
    }

    fn owner() -> HashSet<Permission> {
        let mut all = Self::admin();
        all.insert(Permission::OwnersManage);
        all
    }

    fn admin() -> HashSet<Permission> {
        use Permission::*;
        [
            DealsRead, DealsWrite, DealsDelete,
            SubmissionsReview,
            TeamManage,
            BillingManage,
        ].into_iter().collect()
    }

    fn member() -> HashSet<Permission> {
        use Permission::*;
        [DealsRead, DealsWrite].into_iter().collect()
    }
}

pub fn has_permission(permissions: &HashSet<Permission>, required: Permission) -> bool {
    permissions.contains(&required)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_matrix() {
        let member = Permission::for_role(OrgRole::Member);
        assert!(has_permission(&member, Permission::DealsWrite));
        assert!(!has_permission(&member, Permission::DealsDelete));
        assert!(!has_permission(&member, Permission::BillingManage));

        let admin = Permission::for_role(OrgRole::Admin);
        assert!(has_permission(&admin, Permission::SubmissionsReview));
        assert!(!has_permission(&admin, Permission::OwnersManage));

        let owner = Permission::for_role(OrgRole::Owner);
        assert!(owner.is_superset(&admin));
        assert!(has_permission(&owner, Permission::OwnersManage));
    }
}
