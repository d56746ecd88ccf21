//! Request middleware and extractors

pub mod auth;
pub mod permissions;
pub mod rate_limit;

pub use auth::{CurrentUser, OrgContext};
pub use permissions::Permission;
