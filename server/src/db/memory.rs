//! In-memory [`AccessStore`] for unit tests.
//!
//! Counts writes so tests can assert idempotence, and can be switched into a
//! failing mode to exercise fail-closed paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use vk_common::{CommunityId, ExternalRoleId, PrincipalId};

use super::models::{
    AuthTrustRecord, Community, DashboardSession, NewCommunity, NewOperator, NewPrincipal,
    NewRole, NewSession, Operator, Principal, Role, RoleUpdate, DEFAULT_ROLE_COLOR,
};
use super::store::{AccessStore, StoreError, StoreResult};

#[derive(Default)]
struct State {
    communities: HashMap<CommunityId, Community>,
    roles: Vec<Role>,
    principals: HashMap<(CommunityId, PrincipalId), Principal>,
    operators: Vec<Operator>,
    trust: HashMap<PrincipalId, AuthTrustRecord>,
    sessions: HashMap<String, (Uuid, DashboardSession)>,
}

/// Mutex-backed store; no lock is held across an await.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    failing: AtomicBool,
    role_writes: AtomicUsize,
    principal_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Role inserts, updates and deactivations so far.
    pub fn role_writes(&self) -> usize {
        self.role_writes.load(Ordering::SeqCst)
    }

    /// Member role-list replacements so far.
    pub fn principal_writes(&self) -> usize {
        self.principal_writes.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.role_writes.store(0, Ordering::SeqCst);
        self.principal_writes.store(0, Ordering::SeqCst);
    }

    /// Seed a community without touching counters.
    pub fn seed_community(&self, id: u64, owner: u64, moderator_role: Option<u64>) -> Community {
        let now = Utc::now();
        let community = Community {
            id: CommunityId::new(id),
            name: format!("community-{id}"),
            owner_id: PrincipalId::new(owner),
            moderator_role_id: moderator_role.map(ExternalRoleId::new),
            active: true,
            joined_at: now,
            updated_at: now,
        };
        self.lock()
            .communities
            .insert(community.id, community.clone());
        community
    }

    /// Seed a role without touching counters.
    pub fn seed_role(&self, community: u64, name: &str, external: Option<u64>, position: i32) -> Role {
        let now = Utc::now();
        let role = Role {
            id: Uuid::new_v4(),
            community_id: CommunityId::new(community),
            name: name.to_string(),
            external_id: external.map(ExternalRoleId::new),
            color: DEFAULT_ROLE_COLOR.to_string(),
            position,
            active: true,
            created_at: now,
            updated_at: now,
        };
        self.lock().roles.push(role.clone());
        role
    }

    /// Seed a registered member holding `role_ids`.
    pub fn seed_principal(&self, community: u64, principal: u64, role_ids: Vec<Uuid>) -> Principal {
        let now = Utc::now();
        let record = Principal {
            principal_id: PrincipalId::new(principal),
            community_id: CommunityId::new(community),
            username: format!("user{principal}"),
            global_name: None,
            role_ids,
            registered_at: now,
            updated_at: now,
        };
        self.lock()
            .principals
            .insert((record.community_id, record.principal_id), record.clone());
        record
    }

    pub fn seed_operator(&self, user: u64) {
        self.lock().operators.push(Operator {
            user_id: PrincipalId::new(user),
            username: format!("user{user}"),
            added_by: "seed".into(),
            reason: String::new(),
            added_at: Utc::now(),
        });
    }

    pub fn principal(&self, community: u64, principal: u64) -> Option<Principal> {
        self.lock()
            .principals
            .get(&(CommunityId::new(community), PrincipalId::new(principal)))
            .cloned()
    }

    pub fn roles(&self, community: u64) -> Vec<Role> {
        let id = CommunityId::new(community);
        self.lock()
            .roles
            .iter()
            .filter(|r| r.community_id == id)
            .cloned()
            .collect()
    }

    pub fn trust(&self, user: u64) -> Option<AuthTrustRecord> {
        self.lock().trust.get(&PrincipalId::new(user)).cloned()
    }

    /// Rewrite a trust record in place, e.g. to expire a remembered device.
    pub fn edit_trust(&self, user: u64, edit: impl FnOnce(&mut AuthTrustRecord)) {
        if let Some(record) = self.lock().trust.get_mut(&PrincipalId::new(user)) {
            edit(record);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AccessStore for MemoryStore {
    async fn list_active_communities(&self) -> StoreResult<Vec<Community>> {
        self.check()?;
        let mut list: Vec<_> = self
            .lock()
            .communities
            .values()
            .filter(|c| c.active)
            .cloned()
            .collect();
        list.sort_by_key(|c| c.id);
        Ok(list)
    }

    async fn find_community(&self, id: CommunityId) -> StoreResult<Option<Community>> {
        self.check()?;
        Ok(self.lock().communities.get(&id).cloned())
    }

    async fn upsert_community(&self, community: &NewCommunity) -> StoreResult<Community> {
        self.check()?;
        let now = Utc::now();
        let mut state = self.lock();
        let entry = state
            .communities
            .entry(community.id)
            .or_insert_with(|| Community {
                id: community.id,
                name: community.name.clone(),
                owner_id: community.owner_id,
                moderator_role_id: None,
                active: true,
                joined_at: now,
                updated_at: now,
            });
        entry.name.clone_from(&community.name);
        entry.owner_id = community.owner_id;
        entry.active = true;
        entry.updated_at = now;
        Ok(entry.clone())
    }

    async fn set_community_active(&self, id: CommunityId, active: bool) -> StoreResult<bool> {
        self.check()?;
        Ok(self
            .lock()
            .communities
            .get_mut(&id)
            .map(|c| c.active = active)
            .is_some())
    }

    async fn set_moderator_role(
        &self,
        id: CommunityId,
        role: Option<ExternalRoleId>,
    ) -> StoreResult<bool> {
        self.check()?;
        Ok(self
            .lock()
            .communities
            .get_mut(&id)
            .map(|c| c.moderator_role_id = role)
            .is_some())
    }

    async fn list_roles(&self, community: CommunityId) -> StoreResult<Vec<Role>> {
        self.check()?;
        let mut roles: Vec<_> = self
            .lock()
            .roles
            .iter()
            .filter(|r| r.community_id == community)
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.name.cmp(&b.name)));
        Ok(roles)
    }

    async fn insert_role(&self, role: &NewRole) -> StoreResult<Role> {
        self.check()?;
        let mut state = self.lock();
        let clash = state.roles.iter().any(|r| {
            r.community_id == role.community_id
                && (r.name == role.name
                    || (role.external_id.is_some() && r.external_id == role.external_id))
        });
        if clash {
            return Err(StoreError::Conflict(format!("role {:?}", role.name)));
        }

        let now = Utc::now();
        let created = Role {
            id: Uuid::new_v4(),
            community_id: role.community_id,
            name: role.name.clone(),
            external_id: role.external_id,
            color: role.color.clone(),
            position: role.position,
            active: true,
            created_at: now,
            updated_at: now,
        };
        state.roles.push(created.clone());
        self.role_writes.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn update_role(&self, id: Uuid, update: &RoleUpdate) -> StoreResult<()> {
        self.check()?;
        let mut state = self.lock();
        let Some(community) = state.roles.iter().find(|r| r.id == id).map(|r| r.community_id)
        else {
            return Ok(());
        };
        let clash = state
            .roles
            .iter()
            .any(|r| r.id != id && r.community_id == community && r.name == update.name);
        if clash {
            return Err(StoreError::Conflict(format!("role {:?}", update.name)));
        }

        if let Some(role) = state.roles.iter_mut().find(|r| r.id == id) {
            role.name.clone_from(&update.name);
            role.external_id = update.external_id;
            role.color.clone_from(&update.color);
            role.position = update.position;
            role.active = update.active;
            role.updated_at = Utc::now();
        }
        self.role_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn deactivate_roles(&self, community: CommunityId, ids: &[Uuid]) -> StoreResult<u64> {
        self.check()?;
        let mut changed = 0;
        for role in &mut self.lock().roles {
            if role.community_id == community && role.active && ids.contains(&role.id) {
                role.active = false;
                changed += 1;
            }
        }
        if changed > 0 {
            self.role_writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(changed)
    }

    async fn list_principals(&self, community: CommunityId) -> StoreResult<Vec<Principal>> {
        self.check()?;
        let mut list: Vec<_> = self
            .lock()
            .principals
            .values()
            .filter(|p| p.community_id == community)
            .cloned()
            .collect();
        list.sort_by_key(|p| p.principal_id);
        Ok(list)
    }

    async fn find_principal(
        &self,
        community: CommunityId,
        principal: PrincipalId,
    ) -> StoreResult<Option<Principal>> {
        self.check()?;
        Ok(self.lock().principals.get(&(community, principal)).cloned())
    }

    async fn insert_principal(&self, principal: &NewPrincipal) -> StoreResult<Option<Principal>> {
        self.check()?;
        let key = (principal.community_id, principal.principal_id);
        let mut state = self.lock();
        if state.principals.contains_key(&key) {
            return Ok(None);
        }
        let now = Utc::now();
        let record = Principal {
            principal_id: principal.principal_id,
            community_id: principal.community_id,
            username: principal.username.clone(),
            global_name: principal.global_name.clone(),
            role_ids: Vec::new(),
            registered_at: now,
            updated_at: now,
        };
        state.principals.insert(key, record.clone());
        Ok(Some(record))
    }

    async fn set_principal_roles(
        &self,
        community: CommunityId,
        principal: PrincipalId,
        role_ids: &[Uuid],
    ) -> StoreResult<()> {
        self.check()?;
        if let Some(record) = self.lock().principals.get_mut(&(community, principal)) {
            record.role_ids = role_ids.to_vec();
            record.updated_at = Utc::now();
        }
        self.principal_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_operator(&self, user: PrincipalId) -> StoreResult<bool> {
        self.check()?;
        Ok(self.lock().operators.iter().any(|o| o.user_id == user))
    }

    async fn list_operators(&self) -> StoreResult<Vec<Operator>> {
        self.check()?;
        Ok(self.lock().operators.clone())
    }

    async fn add_operator(&self, operator: &NewOperator) -> StoreResult<Option<Operator>> {
        self.check()?;
        let mut state = self.lock();
        if state.operators.iter().any(|o| o.user_id == operator.user_id) {
            return Ok(None);
        }
        let entry = Operator {
            user_id: operator.user_id,
            username: operator.username.clone(),
            added_by: operator.added_by.clone(),
            reason: operator.reason.clone(),
            added_at: Utc::now(),
        };
        state.operators.push(entry.clone());
        Ok(Some(entry))
    }

    async fn remove_operator(&self, user: PrincipalId) -> StoreResult<bool> {
        self.check()?;
        let mut state = self.lock();
        let before = state.operators.len();
        state.operators.retain(|o| o.user_id != user);
        Ok(state.operators.len() != before)
    }

    async fn find_trust_record(&self, user: PrincipalId) -> StoreResult<Option<AuthTrustRecord>> {
        self.check()?;
        Ok(self.lock().trust.get(&user).cloned())
    }

    async fn ensure_trust_record(&self, user: PrincipalId) -> StoreResult<AuthTrustRecord> {
        self.check()?;
        Ok(self
            .lock()
            .trust
            .entry(user)
            .or_insert_with(|| AuthTrustRecord::new(user))
            .clone())
    }

    async fn enable_second_factor(
        &self,
        user: PrincipalId,
        encrypted_secret: &str,
        backup_code_hashes: &[String],
    ) -> StoreResult<()> {
        self.check()?;
        let mut state = self.lock();
        let record = state
            .trust
            .entry(user)
            .or_insert_with(|| AuthTrustRecord::new(user));
        record.totp_secret = Some(encrypted_secret.to_string());
        record.totp_enabled = true;
        record.backup_codes = backup_code_hashes.to_vec();
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn disable_second_factor(&self, user: PrincipalId) -> StoreResult<()> {
        self.check()?;
        if let Some(record) = self.lock().trust.get_mut(&user) {
            record.totp_secret = None;
            record.totp_enabled = false;
            record.backup_codes.clear();
            record.remember_token_hash = None;
            record.remember_expires_at = None;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn replace_backup_codes(
        &self,
        user: PrincipalId,
        backup_code_hashes: &[String],
    ) -> StoreResult<()> {
        self.check()?;
        if let Some(record) = self.lock().trust.get_mut(&user) {
            record.backup_codes = backup_code_hashes.to_vec();
        }
        Ok(())
    }

    async fn consume_backup_code(&self, user: PrincipalId, code_hash: &str) -> StoreResult<bool> {
        self.check()?;
        let mut state = self.lock();
        let Some(record) = state.trust.get_mut(&user).filter(|r| r.totp_enabled) else {
            return Ok(false);
        };
        match record.backup_codes.iter().position(|c| c == code_hash) {
            Some(index) => {
                record.backup_codes.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_remember_token(
        &self,
        user: PrincipalId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.check()?;
        if let Some(record) = self.lock().trust.get_mut(&user) {
            record.remember_token_hash = Some(token_hash.to_string());
            record.remember_expires_at = Some(expires_at);
        }
        Ok(())
    }

    async fn create_session(&self, session: &NewSession) -> StoreResult<DashboardSession> {
        self.check()?;
        let id = Uuid::new_v4();
        let created = DashboardSession {
            id,
            user_id: session.user_id,
            username: session.username.clone(),
            second_factor_verified: session.second_factor_verified,
            expires_at: session.expires_at,
            created_at: Utc::now(),
        };
        self.lock()
            .sessions
            .insert(session.token_hash.clone(), (id, created.clone()));
        Ok(created)
    }

    async fn find_session(&self, token_hash: &str) -> StoreResult<Option<DashboardSession>> {
        self.check()?;
        let now = Utc::now();
        Ok(self
            .lock()
            .sessions
            .get(token_hash)
            .map(|(_, s)| s.clone())
            .filter(|s| s.expires_at > now))
    }

    async fn set_session_verified(&self, session_id: Uuid, verified: bool) -> StoreResult<()> {
        self.check()?;
        for (id, session) in self.lock().sessions.values_mut() {
            if *id == session_id {
                session.second_factor_verified = verified;
            }
        }
        Ok(())
    }

    async fn delete_session(&self, token_hash: &str) -> StoreResult<bool> {
        self.check()?;
        Ok(self.lock().sessions.remove(token_hash).is_some())
    }

    async fn purge_expired_sessions(&self, limit: i64) -> StoreResult<u64> {
        self.check()?;
        let now = Utc::now();
        let mut state = self.lock();
        let expired: Vec<String> = state
            .sessions
            .iter()
            .filter(|(_, (_, s))| s.expires_at <= now)
            .map(|(hash, _)| hash.clone())
            .take(usize::try_from(limit).unwrap_or(0))
            .collect();
        for hash in &expired {
            state.sessions.remove(hash);
        }
        Ok(expired.len() as u64)
    }
}
