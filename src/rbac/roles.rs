//! Static, code-defined role table.
//!
//! Roles are not user-editable: the six definitions below form a strict
//! numeric hierarchy and every capability item a role may carry comes from
//! the fixed universe in [`ITEM_UNIVERSE`].

use serde::Serialize;
use utoipa::ToSchema;

/// Permission required to start impersonating another user.
pub const IMPERSONATE_PERMISSION: &str = "users.impersonate";

/// Minimum role level allowed to edit tenant/user overrides.
pub const OVERRIDE_ADMIN_LEVEL: i32 = 70;

/// Every capability/navigation item the service knows about. Override writes
/// are filtered against this list so stale clients cannot store garbage.
pub const ITEM_UNIVERSE: &[&str] = &[
    "dashboard",
    "programs",
    "participants",
    "mentoring",
    "goals",
    "assessments",
    "certificates",
    "analytics",
    "users",
    "settings",
    "overrides.manage",
    "users.impersonate",
];

#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct RoleDefinition {
    pub name: &'static str,
    pub slug: &'static str,
    /// Higher means more privileged; levels are unique per role.
    pub level: i32,
    pub description: &'static str,
    /// Default capability items, in presentation order.
    pub items: &'static [&'static str],
    /// Agency-scope roles exist outside any single tenant.
    pub agency_scope: bool,
}

pub const ROLES: &[RoleDefinition] = &[
    RoleDefinition {
        name: "Super Admin",
        slug: "super_admin",
        level: 100,
        description: "Full platform access across all agencies and tenants",
        items: &[
            "dashboard",
            "programs",
            "participants",
            "mentoring",
            "goals",
            "assessments",
            "certificates",
            "analytics",
            "users",
            "settings",
            "overrides.manage",
            "users.impersonate",
        ],
        agency_scope: true,
    },
    RoleDefinition {
        name: "Agency Admin",
        slug: "agency_admin",
        level: 90,
        description: "Administers every tenant within one agency",
        items: &[
            "dashboard",
            "programs",
            "participants",
            "mentoring",
            "goals",
            "assessments",
            "certificates",
            "analytics",
            "users",
            "overrides.manage",
            "users.impersonate",
        ],
        agency_scope: true,
    },
    RoleDefinition {
        name: "Program Director",
        slug: "program_director",
        level: 70,
        description: "Runs the programs of a single tenant",
        items: &[
            "dashboard",
            "programs",
            "participants",
            "mentoring",
            "goals",
            "assessments",
            "certificates",
            "analytics",
            "users",
            "overrides.manage",
        ],
        agency_scope: false,
    },
    RoleDefinition {
        name: "Coordinator",
        slug: "coordinator",
        level: 50,
        description: "Coordinates mentors and participants day to day",
        items: &[
            "dashboard",
            "participants",
            "mentoring",
            "goals",
            "assessments",
            "certificates",
        ],
        agency_scope: false,
    },
    RoleDefinition {
        name: "Mentor",
        slug: "mentor",
        level: 30,
        description: "Works with assigned participants",
        items: &["dashboard", "mentoring", "goals", "assessments"],
        agency_scope: false,
    },
    RoleDefinition {
        name: "Participant",
        slug: "participant",
        level: 10,
        description: "Takes part in a mentoring program",
        items: &["dashboard", "goals", "assessments", "certificates"],
        agency_scope: false,
    },
];

#[must_use]
pub fn find_role(slug: &str) -> Option<&'static RoleDefinition> {
    ROLES.iter().find(|role| role.slug == slug)
}

#[must_use]
pub fn is_known_item(item: &str) -> bool {
    ITEM_UNIVERSE.contains(&item)
}

/// Keep only known items, de-duplicated, order preserved. Unknown names are
/// dropped silently rather than rejected.
#[must_use]
pub fn sanitize_items(items: &[String]) -> Vec<String> {
    let mut seen = Vec::with_capacity(items.len());
    for item in items {
        if is_known_item(item) && !seen.contains(item) {
            seen.push(item.clone());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_roles_with_unique_descending_levels() {
        assert_eq!(ROLES.len(), 6);
        let levels: Vec<i32> = ROLES.iter().map(|role| role.level).collect();
        assert_eq!(levels, vec![100, 90, 70, 50, 30, 10]);
    }

    #[test]
    fn every_default_item_is_in_the_universe() {
        for role in ROLES {
            for item in role.items {
                assert!(is_known_item(item), "{} carries unknown {item}", role.slug);
            }
        }
    }

    #[test]
    fn find_role_by_slug() {
        let mentor = find_role("mentor").expect("mentor role");
        assert_eq!(mentor.level, 30);
        assert!(!mentor.agency_scope);
        assert!(find_role("plumber").is_none());
    }

    #[test]
    fn impersonation_is_reserved_to_agency_roles() {
        for role in ROLES {
            let can = role.items.contains(&IMPERSONATE_PERMISSION);
            assert_eq!(can, role.agency_scope, "{}", role.slug);
        }
    }

    #[test]
    fn sanitize_drops_unknown_and_duplicate_items() {
        let input = vec![
            "dashboard".to_string(),
            "bogus".to_string(),
            "mentoring".to_string(),
            "dashboard".to_string(),
        ];
        assert_eq!(
            sanitize_items(&input),
            vec!["dashboard".to_string(), "mentoring".to_string()]
        );
    }
}
