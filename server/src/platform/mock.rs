//! Scripted [`MembershipProvider`] for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use vk_common::{CommunityId, ExternalRoleId, PlatformPermissions, PrincipalId};

use super::{hex_color, MembershipProvider, PlatformError, PlatformResult, PlatformRole};

#[derive(Default)]
struct Script {
    roles: HashMap<CommunityId, Vec<PlatformRole>>,
    members: HashMap<(CommunityId, PrincipalId), HashSet<ExternalRoleId>>,
    masks: HashMap<(CommunityId, PrincipalId), PlatformPermissions>,
}

/// In-memory platform whose state tests edit between calls.
#[derive(Default)]
pub struct ScriptedPlatform {
    script: Mutex<Script>,
    unavailable: AtomicBool,
    member_fetches: AtomicUsize,
}

impl ScriptedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Add or replace a role in a community's roster.
    pub fn set_role(&self, community: u64, external: u64, name: &str, position: i32) {
        let community = CommunityId::new(community);
        let role = PlatformRole {
            external_id: ExternalRoleId::new(external),
            name: name.to_string(),
            color: hex_color(0x0099_AAFF),
            position,
        };
        let mut script = self.lock();
        let roster = script.roles.entry(community).or_default();
        roster.retain(|r| r.external_id != role.external_id);
        roster.push(role);
    }

    pub fn remove_role(&self, community: u64, external: u64) {
        if let Some(roster) = self.lock().roles.get_mut(&CommunityId::new(community)) {
            roster.retain(|r| r.external_id.get() != external);
        }
    }

    /// Make a principal a member holding exactly `roles`.
    pub fn set_member(&self, community: u64, principal: u64, roles: &[u64]) {
        self.lock().members.insert(
            (CommunityId::new(community), PrincipalId::new(principal)),
            roles.iter().copied().map(ExternalRoleId::new).collect(),
        );
    }

    pub fn remove_member(&self, community: u64, principal: u64) {
        self.lock()
            .members
            .remove(&(CommunityId::new(community), PrincipalId::new(principal)));
    }

    pub fn set_mask(&self, community: u64, principal: u64, mask: PlatformPermissions) {
        self.lock()
            .masks
            .insert((CommunityId::new(community), PrincipalId::new(principal)), mask);
    }

    /// Fail every call with [`PlatformError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Member lookups served so far.
    pub fn member_fetches(&self) -> usize {
        self.member_fetches.load(Ordering::SeqCst)
    }

    fn check(&self) -> PlatformResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PlatformError::Unavailable("scripted outage".into()));
        }
        Ok(())
    }

    fn member(
        &self,
        community: CommunityId,
        principal: PrincipalId,
    ) -> PlatformResult<HashSet<ExternalRoleId>> {
        self.check()?;
        self.member_fetches.fetch_add(1, Ordering::SeqCst);
        self.lock()
            .members
            .get(&(community, principal))
            .cloned()
            .ok_or(PlatformError::NotFound)
    }
}

#[async_trait]
impl MembershipProvider for ScriptedPlatform {
    async fn fetch_community_roles(
        &self,
        community: CommunityId,
    ) -> PlatformResult<Vec<PlatformRole>> {
        self.check()?;
        self.lock()
            .roles
            .get(&community)
            .cloned()
            .ok_or(PlatformError::NotFound)
    }

    async fn fetch_principal_role_ids(
        &self,
        community: CommunityId,
        principal: PrincipalId,
    ) -> PlatformResult<HashSet<ExternalRoleId>> {
        self.member(community, principal)
    }

    async fn fetch_actor_permission_mask(
        &self,
        community: CommunityId,
        actor: PrincipalId,
    ) -> PlatformResult<PlatformPermissions> {
        self.member(community, actor)?;
        Ok(self
            .lock()
            .masks
            .get(&(community, actor))
            .copied()
            .unwrap_or_default())
    }

    async fn fetch_actor_role_names(
        &self,
        community: CommunityId,
        actor: PrincipalId,
    ) -> PlatformResult<HashSet<String>> {
        let held = self.member(community, actor)?;
        let script = self.lock();
        Ok(script
            .roles
            .get(&community)
            .map(|roster| {
                roster
                    .iter()
                    .filter(|r| held.contains(&r.external_id))
                    .map(|r| r.name.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}
