//! Storage abstraction.
//!
//! The sync engine, resolver and trust service only see this trait. Every
//! method is a suspension point; callers must not hold locks across them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;
use vk_common::{CommunityId, ExternalRoleId, PrincipalId};

use super::models::{
    AuthTrustRecord, Community, DashboardSession, NewCommunity, NewOperator, NewRole,
    NewPrincipal, NewSession, Operator, Principal, Role, RoleUpdate,
};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Backend could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Database error.
    #[error("Database error")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence operations needed by access control.
#[async_trait]
pub trait AccessStore: Send + Sync {
    // ------------------------------------------------------------------
    // Communities
    // ------------------------------------------------------------------

    async fn list_active_communities(&self) -> StoreResult<Vec<Community>>;

    async fn find_community(&self, id: CommunityId) -> StoreResult<Option<Community>>;

    /// Insert or refresh a community; re-activates it if it was inactive.
    async fn upsert_community(&self, community: &NewCommunity) -> StoreResult<Community>;

    /// Returns `false` when the community is unknown.
    async fn set_community_active(&self, id: CommunityId, active: bool) -> StoreResult<bool>;

    /// Returns `false` when the community is unknown.
    async fn set_moderator_role(
        &self,
        id: CommunityId,
        role: Option<ExternalRoleId>,
    ) -> StoreResult<bool>;

    // ------------------------------------------------------------------
    // Roles
    // ------------------------------------------------------------------

    /// All roles of a community, inactive ones included, by position then name.
    async fn list_roles(&self, community: CommunityId) -> StoreResult<Vec<Role>>;

    async fn insert_role(&self, role: &NewRole) -> StoreResult<Role>;

    async fn update_role(&self, id: Uuid, update: &RoleUpdate) -> StoreResult<()>;

    /// Mark roles inactive; returns how many rows changed.
    async fn deactivate_roles(&self, community: CommunityId, ids: &[Uuid]) -> StoreResult<u64>;

    // ------------------------------------------------------------------
    // Member profiles
    // ------------------------------------------------------------------

    async fn list_principals(&self, community: CommunityId) -> StoreResult<Vec<Principal>>;

    async fn find_principal(
        &self,
        community: CommunityId,
        principal: PrincipalId,
    ) -> StoreResult<Option<Principal>>;

    /// Returns `None` when the member is already registered.
    async fn insert_principal(&self, principal: &NewPrincipal) -> StoreResult<Option<Principal>>;

    /// Replace the role reference list of a registered member.
    async fn set_principal_roles(
        &self,
        community: CommunityId,
        principal: PrincipalId,
        role_ids: &[Uuid],
    ) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Operator allow-list
    // ------------------------------------------------------------------

    async fn is_operator(&self, user: PrincipalId) -> StoreResult<bool>;

    async fn list_operators(&self) -> StoreResult<Vec<Operator>>;

    /// Returns `None` when the user is already allow-listed.
    async fn add_operator(&self, operator: &NewOperator) -> StoreResult<Option<Operator>>;

    async fn remove_operator(&self, user: PrincipalId) -> StoreResult<bool>;

    // ------------------------------------------------------------------
    // Second factor
    // ------------------------------------------------------------------

    async fn find_trust_record(&self, user: PrincipalId) -> StoreResult<Option<AuthTrustRecord>>;

    /// Fetch the record, creating a disabled one on first use.
    async fn ensure_trust_record(&self, user: PrincipalId) -> StoreResult<AuthTrustRecord>;

    /// Persist a confirmed secret and its backup codes, enabling the factor.
    async fn enable_second_factor(
        &self,
        user: PrincipalId,
        encrypted_secret: &str,
        backup_code_hashes: &[String],
    ) -> StoreResult<()>;

    /// Clear secret, flag, backup codes and remembered device.
    async fn disable_second_factor(&self, user: PrincipalId) -> StoreResult<()>;

    async fn replace_backup_codes(
        &self,
        user: PrincipalId,
        backup_code_hashes: &[String],
    ) -> StoreResult<()>;

    /// Atomically remove one backup code; `false` if it was not present.
    async fn consume_backup_code(&self, user: PrincipalId, code_hash: &str) -> StoreResult<bool>;

    /// Store the single remembered-device token, replacing any previous one.
    async fn set_remember_token(
        &self,
        user: PrincipalId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Dashboard sessions
    // ------------------------------------------------------------------

    async fn create_session(&self, session: &NewSession) -> StoreResult<DashboardSession>;

    /// Unexpired session by token hash.
    async fn find_session(&self, token_hash: &str) -> StoreResult<Option<DashboardSession>>;

    async fn set_session_verified(&self, session_id: Uuid, verified: bool) -> StoreResult<()>;

    async fn delete_session(&self, token_hash: &str) -> StoreResult<bool>;

    /// Delete up to `limit` expired sessions, returning how many went.
    async fn purge_expired_sessions(&self, limit: i64) -> StoreResult<u64>;
}
