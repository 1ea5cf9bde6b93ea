//! `PostgreSQL` implementation of [`AccessStore`].
//!
//! Snowflakes are stored as `BIGINT`; the row types below carry the raw
//! columns and convert into the typed models.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use vk_common::{CommunityId, ExternalRoleId, PrincipalId};

use super::models::{
    AuthTrustRecord, Community, DashboardSession, NewCommunity, NewOperator, NewRole,
    NewPrincipal, NewSession, Operator, Principal, Role, RoleUpdate,
};
use super::store::{AccessStore, StoreError, StoreResult};

/// Store backed by a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const fn snowflake(raw: i64) -> u64 {
    raw as u64
}

// Parsing rejects snowflakes above i64::MAX.
const fn column(id: u64) -> i64 {
    id as i64
}

fn map_unique_violation(err: sqlx::Error, what: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(what.to_string())
        }
        _ => StoreError::Database(err),
    }
}

// ============================================================================
// Row types
// ============================================================================

#[derive(FromRow)]
struct CommunityRow {
    id: i64,
    name: String,
    owner_id: i64,
    moderator_role_id: Option<i64>,
    active: bool,
    joined_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CommunityRow> for Community {
    fn from(row: CommunityRow) -> Self {
        Self {
            id: CommunityId::new(snowflake(row.id)),
            name: row.name,
            owner_id: PrincipalId::new(snowflake(row.owner_id)),
            moderator_role_id: row.moderator_role_id.map(|r| ExternalRoleId::new(snowflake(r))),
            active: row.active,
            joined_at: row.joined_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct RoleRow {
    id: Uuid,
    community_id: i64,
    name: String,
    external_id: Option<i64>,
    color: String,
    position: i32,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Self {
            id: row.id,
            community_id: CommunityId::new(snowflake(row.community_id)),
            name: row.name,
            external_id: row.external_id.map(|r| ExternalRoleId::new(snowflake(r))),
            color: row.color,
            position: row.position,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct PrincipalRow {
    principal_id: i64,
    community_id: i64,
    username: String,
    global_name: Option<String>,
    role_ids: Vec<Uuid>,
    registered_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PrincipalRow> for Principal {
    fn from(row: PrincipalRow) -> Self {
        Self {
            principal_id: PrincipalId::new(snowflake(row.principal_id)),
            community_id: CommunityId::new(snowflake(row.community_id)),
            username: row.username,
            global_name: row.global_name,
            role_ids: row.role_ids,
            registered_at: row.registered_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct OperatorRow {
    user_id: i64,
    username: String,
    added_by: String,
    reason: String,
    added_at: DateTime<Utc>,
}

impl From<OperatorRow> for Operator {
    fn from(row: OperatorRow) -> Self {
        Self {
            user_id: PrincipalId::new(snowflake(row.user_id)),
            username: row.username,
            added_by: row.added_by,
            reason: row.reason,
            added_at: row.added_at,
        }
    }
}

#[derive(FromRow)]
struct TrustRow {
    user_id: i64,
    totp_secret: Option<String>,
    totp_enabled: bool,
    backup_codes: Vec<String>,
    remember_token_hash: Option<String>,
    remember_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TrustRow> for AuthTrustRecord {
    fn from(row: TrustRow) -> Self {
        Self {
            user_id: PrincipalId::new(snowflake(row.user_id)),
            totp_secret: row.totp_secret,
            totp_enabled: row.totp_enabled,
            backup_codes: row.backup_codes,
            remember_token_hash: row.remember_token_hash,
            remember_expires_at: row.remember_expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: i64,
    username: String,
    second_factor_verified: bool,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<SessionRow> for DashboardSession {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            user_id: PrincipalId::new(snowflake(row.user_id)),
            username: row.username,
            second_factor_verified: row.second_factor_verified,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

const COMMUNITY_COLUMNS: &str =
    "id, name, owner_id, moderator_role_id, active, joined_at, updated_at";
const ROLE_COLUMNS: &str =
    "id, community_id, name, external_id, color, position, active, created_at, updated_at";
const PRINCIPAL_COLUMNS: &str =
    "principal_id, community_id, username, global_name, role_ids, registered_at, updated_at";
const TRUST_COLUMNS: &str = "user_id, totp_secret, totp_enabled, backup_codes, \
     remember_token_hash, remember_expires_at, created_at, updated_at";
const SESSION_COLUMNS: &str =
    "id, user_id, username, second_factor_verified, expires_at, created_at";

#[async_trait]
impl AccessStore for PgStore {
    // ========================================================================
    // Communities
    // ========================================================================

    #[tracing::instrument(skip(self))]
    async fn list_active_communities(&self) -> StoreResult<Vec<Community>> {
        let rows = sqlx::query_as::<_, CommunityRow>(&format!(
            "SELECT {COMMUNITY_COLUMNS} FROM communities WHERE active = TRUE ORDER BY joined_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Community::from).collect())
    }

    async fn find_community(&self, id: CommunityId) -> StoreResult<Option<Community>> {
        let row = sqlx::query_as::<_, CommunityRow>(&format!(
            "SELECT {COMMUNITY_COLUMNS} FROM communities WHERE id = $1"
        ))
        .bind(column(id.get()))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Community::from))
    }

    async fn upsert_community(&self, community: &NewCommunity) -> StoreResult<Community> {
        let row = sqlx::query_as::<_, CommunityRow>(&format!(
            r"
            INSERT INTO communities (id, name, owner_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
                SET name = EXCLUDED.name,
                    owner_id = EXCLUDED.owner_id,
                    active = TRUE,
                    updated_at = NOW()
            RETURNING {COMMUNITY_COLUMNS}
            "
        ))
        .bind(column(community.id.get()))
        .bind(&community.name)
        .bind(column(community.owner_id.get()))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn set_community_active(&self, id: CommunityId, active: bool) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE communities SET active = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(column(id.get()))
        .bind(active)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_moderator_role(
        &self,
        id: CommunityId,
        role: Option<ExternalRoleId>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE communities SET moderator_role_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(column(id.get()))
        .bind(role.map(|r| column(r.get())))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Roles
    // ========================================================================

    async fn list_roles(&self, community: CommunityId) -> StoreResult<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE community_id = $1 ORDER BY position, name"
        ))
        .bind(column(community.get()))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn insert_role(&self, role: &NewRole) -> StoreResult<Role> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            r"
            INSERT INTO roles (id, community_id, name, external_id, color, position)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ROLE_COLUMNS}
            "
        ))
        .bind(Uuid::now_v7())
        .bind(column(role.community_id.get()))
        .bind(&role.name)
        .bind(role.external_id.map(|r| column(r.get())))
        .bind(&role.color)
        .bind(role.position)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, &format!("role {:?}", role.name)))?;

        Ok(row.into())
    }

    async fn update_role(&self, id: Uuid, update: &RoleUpdate) -> StoreResult<()> {
        sqlx::query(
            r"
            UPDATE roles
            SET name = $2, external_id = $3, color = $4, position = $5, active = $6,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(&update.name)
        .bind(update.external_id.map(|r| column(r.get())))
        .bind(&update.color)
        .bind(update.position)
        .bind(update.active)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, &format!("role {:?}", update.name)))?;

        Ok(())
    }

    async fn deactivate_roles(&self, community: CommunityId, ids: &[Uuid]) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r"
            UPDATE roles SET active = FALSE, updated_at = NOW()
            WHERE community_id = $1 AND id = ANY($2) AND active = TRUE
            ",
        )
        .bind(column(community.get()))
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // ========================================================================
    // Member profiles
    // ========================================================================

    #[tracing::instrument(skip(self))]
    async fn list_principals(&self, community: CommunityId) -> StoreResult<Vec<Principal>> {
        let rows = sqlx::query_as::<_, PrincipalRow>(&format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE community_id = $1"
        ))
        .bind(column(community.get()))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Principal::from).collect())
    }

    async fn find_principal(
        &self,
        community: CommunityId,
        principal: PrincipalId,
    ) -> StoreResult<Option<Principal>> {
        let row = sqlx::query_as::<_, PrincipalRow>(&format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE community_id = $1 AND principal_id = $2"
        ))
        .bind(column(community.get()))
        .bind(column(principal.get()))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Principal::from))
    }

    async fn insert_principal(&self, principal: &NewPrincipal) -> StoreResult<Option<Principal>> {
        let row = sqlx::query_as::<_, PrincipalRow>(&format!(
            r"
            INSERT INTO principals (principal_id, community_id, username, global_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (principal_id, community_id) DO NOTHING
            RETURNING {PRINCIPAL_COLUMNS}
            "
        ))
        .bind(column(principal.principal_id.get()))
        .bind(column(principal.community_id.get()))
        .bind(&principal.username)
        .bind(&principal.global_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Principal::from))
    }

    async fn set_principal_roles(
        &self,
        community: CommunityId,
        principal: PrincipalId,
        role_ids: &[Uuid],
    ) -> StoreResult<()> {
        sqlx::query(
            r"
            UPDATE principals SET role_ids = $3, updated_at = NOW()
            WHERE community_id = $1 AND principal_id = $2
            ",
        )
        .bind(column(community.get()))
        .bind(column(principal.get()))
        .bind(role_ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========================================================================
    // Operator allow-list
    // ========================================================================

    async fn is_operator(&self, user: PrincipalId) -> StoreResult<bool> {
        let result: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM operators WHERE user_id = $1)")
                .bind(column(user.get()))
                .fetch_one(&self.pool)
                .await?;

        Ok(result.0)
    }

    async fn list_operators(&self) -> StoreResult<Vec<Operator>> {
        let rows = sqlx::query_as::<_, OperatorRow>(
            "SELECT user_id, username, added_by, reason, added_at FROM operators ORDER BY added_at",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Operator::from).collect())
    }

    async fn add_operator(&self, operator: &NewOperator) -> StoreResult<Option<Operator>> {
        let row = sqlx::query_as::<_, OperatorRow>(
            r"
            INSERT INTO operators (user_id, username, added_by, reason)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO NOTHING
            RETURNING user_id, username, added_by, reason, added_at
            ",
        )
        .bind(column(operator.user_id.get()))
        .bind(&operator.username)
        .bind(&operator.added_by)
        .bind(&operator.reason)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Operator::from))
    }

    async fn remove_operator(&self, user: PrincipalId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM operators WHERE user_id = $1")
            .bind(column(user.get()))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Second factor
    // ========================================================================

    async fn find_trust_record(&self, user: PrincipalId) -> StoreResult<Option<AuthTrustRecord>> {
        let row = sqlx::query_as::<_, TrustRow>(&format!(
            "SELECT {TRUST_COLUMNS} FROM auth_trust WHERE user_id = $1"
        ))
        .bind(column(user.get()))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(AuthTrustRecord::from))
    }

    async fn ensure_trust_record(&self, user: PrincipalId) -> StoreResult<AuthTrustRecord> {
        sqlx::query("INSERT INTO auth_trust (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(column(user.get()))
            .execute(&self.pool)
            .await?;

        let row = sqlx::query_as::<_, TrustRow>(&format!(
            "SELECT {TRUST_COLUMNS} FROM auth_trust WHERE user_id = $1"
        ))
        .bind(column(user.get()))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn enable_second_factor(
        &self,
        user: PrincipalId,
        encrypted_secret: &str,
        backup_code_hashes: &[String],
    ) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO auth_trust (user_id, totp_secret, totp_enabled, backup_codes)
            VALUES ($1, $2, TRUE, $3)
            ON CONFLICT (user_id) DO UPDATE
                SET totp_secret = EXCLUDED.totp_secret,
                    totp_enabled = TRUE,
                    backup_codes = EXCLUDED.backup_codes,
                    updated_at = NOW()
            ",
        )
        .bind(column(user.get()))
        .bind(encrypted_secret)
        .bind(backup_code_hashes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn disable_second_factor(&self, user: PrincipalId) -> StoreResult<()> {
        sqlx::query(
            r"
            UPDATE auth_trust
            SET totp_secret = NULL, totp_enabled = FALSE, backup_codes = '{}',
                remember_token_hash = NULL, remember_expires_at = NULL, updated_at = NOW()
            WHERE user_id = $1
            ",
        )
        .bind(column(user.get()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn replace_backup_codes(
        &self,
        user: PrincipalId,
        backup_code_hashes: &[String],
    ) -> StoreResult<()> {
        sqlx::query("UPDATE auth_trust SET backup_codes = $2, updated_at = NOW() WHERE user_id = $1")
            .bind(column(user.get()))
            .bind(backup_code_hashes)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn consume_backup_code(&self, user: PrincipalId, code_hash: &str) -> StoreResult<bool> {
        // Single statement so two concurrent presentations cannot both win.
        let result = sqlx::query(
            r"
            UPDATE auth_trust
            SET backup_codes = array_remove(backup_codes, $2), updated_at = NOW()
            WHERE user_id = $1 AND totp_enabled = TRUE AND $2 = ANY(backup_codes)
            ",
        )
        .bind(column(user.get()))
        .bind(code_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_remember_token(
        &self,
        user: PrincipalId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r"
            UPDATE auth_trust
            SET remember_token_hash = $2, remember_expires_at = $3, updated_at = NOW()
            WHERE user_id = $1
            ",
        )
        .bind(column(user.get()))
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========================================================================
    // Dashboard sessions
    // ========================================================================

    async fn create_session(&self, session: &NewSession) -> StoreResult<DashboardSession> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            r"
            INSERT INTO dashboard_sessions
                (id, token_hash, user_id, username, second_factor_verified, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {SESSION_COLUMNS}
            "
        ))
        .bind(Uuid::now_v7())
        .bind(&session.token_hash)
        .bind(column(session.user_id.get()))
        .bind(&session.username)
        .bind(session.second_factor_verified)
        .bind(session.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn find_session(&self, token_hash: &str) -> StoreResult<Option<DashboardSession>> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM dashboard_sessions WHERE token_hash = $1 AND expires_at > NOW()"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(DashboardSession::from))
    }

    async fn set_session_verified(&self, session_id: Uuid, verified: bool) -> StoreResult<()> {
        sqlx::query("UPDATE dashboard_sessions SET second_factor_verified = $2 WHERE id = $1")
            .bind(session_id)
            .bind(verified)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete_session(&self, token_hash: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM dashboard_sessions WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired_sessions(&self, limit: i64) -> StoreResult<u64> {
        let result = sqlx::query(
            r"
            DELETE FROM dashboard_sessions WHERE id IN (
                SELECT id FROM dashboard_sessions WHERE expires_at <= NOW() LIMIT $1
            )
            ",
        )
        .bind(limit)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
