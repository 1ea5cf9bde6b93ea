//! Platform types.

mod ids;
mod permissions;

pub use ids::{CommunityId, ExternalRoleId, PrincipalId};
pub use permissions::PlatformPermissions;
