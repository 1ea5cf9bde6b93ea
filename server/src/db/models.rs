//! Database Models

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use vk_common::{CommunityId, ExternalRoleId, PrincipalId};

/// Default color for roles without one.
pub const DEFAULT_ROLE_COLOR: &str = "#6B7280";

/// A community (guild) the bot has joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Community {
    pub id: CommunityId,
    pub name: String,
    pub owner_id: PrincipalId,
    /// Platform role that grants privileged commands, set via `/setmod`.
    pub moderator_role_id: Option<ExternalRoleId>,
    pub active: bool,
    pub joined_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for registering or refreshing a community.
#[derive(Debug, Clone)]
pub struct NewCommunity {
    pub id: CommunityId,
    pub name: String,
    pub owner_id: PrincipalId,
}

/// Local record of a privilege grouping for one community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Role {
    pub id: Uuid,
    pub community_id: CommunityId,
    pub name: String,
    /// Linked platform role; `None` for dashboard-only roles.
    pub external_id: Option<ExternalRoleId>,
    pub color: String,
    pub position: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a role.
#[derive(Debug, Clone)]
pub struct NewRole {
    pub community_id: CommunityId,
    pub name: String,
    pub external_id: Option<ExternalRoleId>,
    pub color: String,
    pub position: i32,
}

/// Mutable role fields written by roster reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleUpdate {
    pub name: String,
    pub external_id: Option<ExternalRoleId>,
    pub color: String,
    pub position: i32,
    pub active: bool,
}

/// Registered member profile within one community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub community_id: CommunityId,
    pub username: String,
    pub global_name: Option<String>,
    /// Ordered, duplicate-free list of local role ids.
    pub role_ids: Vec<Uuid>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Principal {
    /// Global display name if set, username otherwise.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.global_name.as_deref().unwrap_or(&self.username)
    }
}

/// Parameters for registering a member profile.
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub principal_id: PrincipalId,
    pub community_id: CommunityId,
    pub username: String,
    pub global_name: Option<String>,
}

/// Dashboard operator allow-list entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Operator {
    pub user_id: PrincipalId,
    pub username: String,
    pub added_by: String,
    pub reason: String,
    pub added_at: DateTime<Utc>,
}

/// Parameters for allow-listing an operator.
#[derive(Debug, Clone)]
pub struct NewOperator {
    pub user_id: PrincipalId,
    pub username: String,
    pub added_by: String,
    pub reason: String,
}

/// Second-factor state for one dashboard identity.
///
/// `totp_secret` is the AES-GCM encrypted base32 secret. Backup codes and the
/// remembered-device token are stored as SHA-256 hex digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTrustRecord {
    pub user_id: PrincipalId,
    pub totp_secret: Option<String>,
    pub totp_enabled: bool,
    pub backup_codes: Vec<String>,
    pub remember_token_hash: Option<String>,
    pub remember_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuthTrustRecord {
    /// Fresh record with the second factor disabled.
    #[must_use]
    pub fn new(user_id: PrincipalId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            totp_secret: None,
            totp_enabled: false,
            backup_codes: Vec::new(),
            remember_token_hash: None,
            remember_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Authenticated dashboard session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardSession {
    pub id: Uuid,
    pub user_id: PrincipalId,
    pub username: String,
    /// Session-scoped second factor state; never outlives the session row.
    pub second_factor_verified: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for creating a dashboard session.
#[derive(Debug, Clone)]
pub struct NewSession {
    /// SHA-256 hex digest of the session cookie value.
    pub token_hash: String,
    pub user_id: PrincipalId,
    pub username: String,
    pub second_factor_verified: bool,
    pub expires_at: DateTime<Utc>,
}
