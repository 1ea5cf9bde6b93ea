//! Membership Snapshot Provider
//!
//! Read-only view of the host platform: the community role roster, a member's
//! current roles and permissions. The platform is the only authority; every
//! call goes out over the network and is bounded by a timeout.

mod discord;
#[cfg(test)]
pub mod mock;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vk_common::{CommunityId, ExternalRoleId, PlatformPermissions, PrincipalId};

pub use discord::DiscordClient;

/// A role as the platform reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformRole {
    pub external_id: ExternalRoleId,
    pub name: String,
    /// `#RRGGBB`
    pub color: String,
    pub position: i32,
}

/// Platform fetch failures.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The community or member does not exist on the platform.
    #[error("Not found on platform")]
    NotFound,

    /// Transport failure, timeout or unexpected status.
    #[error("Platform unavailable: {0}")]
    Unavailable(String),

    /// The platform answered with something we could not read.
    #[error("Malformed platform response: {0}")]
    Decode(String),
}

impl PlatformError {
    /// Whether the failure means "does not exist" rather than "could not ask".
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;

/// Source of fresh membership truth.
#[async_trait]
pub trait MembershipProvider: Send + Sync {
    /// Assignable roles of a community, excluding integration-managed roles and
    /// the implicit everyone role.
    async fn fetch_community_roles(&self, community: CommunityId)
        -> PlatformResult<Vec<PlatformRole>>;

    /// External ids of the assignable roles a member currently holds.
    async fn fetch_principal_role_ids(
        &self,
        community: CommunityId,
        principal: PrincipalId,
    ) -> PlatformResult<HashSet<ExternalRoleId>>;

    /// Effective permission mask of a member.
    async fn fetch_actor_permission_mask(
        &self,
        community: CommunityId,
        actor: PrincipalId,
    ) -> PlatformResult<PlatformPermissions>;

    /// Names of the roles a member currently holds.
    async fn fetch_actor_role_names(
        &self,
        community: CommunityId,
        actor: PrincipalId,
    ) -> PlatformResult<HashSet<String>>;
}

/// Format a 24-bit platform color as `#RRGGBB`.
#[must_use]
pub fn hex_color(color: u32) -> String {
    format!("#{:06X}", color & 0x00FF_FFFF)
}
