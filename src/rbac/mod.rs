//! Role definitions and the three-tier permission override chain.

pub mod repo;
pub mod resolver;
pub mod roles;

pub use resolver::{effective_items, PermissionResolver, UserOverride};
pub use roles::{
    find_role, sanitize_items, RoleDefinition, IMPERSONATE_PERMISSION, OVERRIDE_ADMIN_LEVEL, ROLES,
};
