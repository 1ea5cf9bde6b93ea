//! Permission resolution.
//!
//! Stateless apart from collaborators: each decision is a pure function of
//! the actor, the community and reads taken at call time. Every failure to
//! read denies.

use std::sync::Arc;

use tracing::{debug, error, warn};
use vk_common::{CommunityId, PrincipalId};

use super::decision::{AccessDecision, AccessKind, CommunityRef, DenyReason};
use super::owner::ApplicationOwner;
use crate::db::{AccessStore, Community};
use crate::platform::{MembershipProvider, PlatformError};
use crate::sync::RoleSyncEngine;

/// Default role name granting dashboard access to any member holding it.
pub const DEFAULT_ELEVATED_ROLE: &str = "DEV";

/// Default role name granting dashboard access to allow-listed operators.
pub const DEFAULT_LIAISON_ROLE: &str = "Mod";

/// Decides privileged command, settings and dashboard access.
#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn AccessStore>,
    platform: Arc<dyn MembershipProvider>,
    sync: Arc<RoleSyncEngine>,
    owner: ApplicationOwner,
    elevated_role: String,
    liaison_role: String,
}

fn platform_denial(err: &PlatformError, community: CommunityId, actor: PrincipalId) -> DenyReason {
    match err {
        PlatformError::NotFound => DenyReason::NotAMember { community },
        other => {
            warn!(
                community_id = %community,
                actor_id = %actor,
                error = %other,
                "Platform lookup failed, denying"
            );
            DenyReason::UpstreamUnavailable
        }
    }
}

impl PermissionResolver {
    pub fn new(
        store: Arc<dyn AccessStore>,
        platform: Arc<dyn MembershipProvider>,
        sync: Arc<RoleSyncEngine>,
        owner: ApplicationOwner,
    ) -> Self {
        Self {
            store,
            platform,
            sync,
            owner,
            elevated_role: DEFAULT_ELEVATED_ROLE.to_string(),
            liaison_role: DEFAULT_LIAISON_ROLE.to_string(),
        }
    }

    /// Override the role names checked by the dashboard gate.
    #[must_use]
    pub fn with_dashboard_roles(mut self, elevated: &str, liaison: &str) -> Self {
        self.elevated_role = elevated.to_string();
        self.liaison_role = liaison.to_string();
        self
    }

    #[must_use]
    pub const fn owner(&self) -> &ApplicationOwner {
        &self.owner
    }

    /// Decide `kind` for `actor` in `community`.
    pub async fn authorize(
        &self,
        actor: PrincipalId,
        community: Option<&CommunityRef>,
        kind: AccessKind,
    ) -> AccessDecision {
        let decision = match kind {
            AccessKind::PrivilegedCommand => {
                self.can_execute_privileged_command(actor, community).await
            }
            AccessKind::CommunitySettings => {
                self.can_manage_community_settings(actor, community).await
            }
            AccessKind::Dashboard => match community {
                Some(community) => self.has_dashboard_guild_access(actor, community.id).await,
                None => AccessDecision::deny(DenyReason::NoCommunityContext),
            },
        };

        if let Some(reason) = decision.reason {
            debug!(actor_id = %actor, ?kind, reason = reason.code(), "Access denied");
        }
        decision
    }

    async fn load_community(&self, id: CommunityId) -> Result<Option<Community>, DenyReason> {
        self.store.find_community(id).await.map_err(|e| {
            error!(community_id = %id, error = %e, "Failed to load community");
            DenyReason::StoreUnavailable
        })
    }

    /// Owner, or holder of the configured moderator role right now.
    #[tracing::instrument(skip(self))]
    pub async fn can_execute_privileged_command(
        &self,
        actor: PrincipalId,
        community: Option<&CommunityRef>,
    ) -> AccessDecision {
        let Some(community) = community else {
            return AccessDecision::deny(DenyReason::NoCommunityContext);
        };
        if self.owner.is_application_owner(actor) || community.owner_id == Some(actor) {
            return AccessDecision::allow();
        }

        let record = match self.load_community(community.id).await {
            Ok(record) => record,
            Err(reason) => return AccessDecision::deny(reason),
        };
        if record.as_ref().is_some_and(|c| c.owner_id == actor) {
            return AccessDecision::allow();
        }
        let Some(moderator_role) = record.and_then(|c| c.moderator_role_id) else {
            return AccessDecision::deny(DenyReason::ModeratorRoleNotConfigured);
        };

        match self.sync.refresh_principal(community.id, actor).await {
            Ok(held) if held.contains(&moderator_role) => AccessDecision::allow(),
            Ok(_) => AccessDecision::deny(DenyReason::MissingModeratorRole),
            Err(e) => AccessDecision::deny(platform_denial(&e, community.id, actor)),
        }
    }

    /// Community owner only.
    #[tracing::instrument(skip(self))]
    pub async fn can_manage_community_settings(
        &self,
        actor: PrincipalId,
        community: Option<&CommunityRef>,
    ) -> AccessDecision {
        let Some(community) = community else {
            return AccessDecision::deny(DenyReason::NoCommunityContext);
        };
        if self.owner.is_application_owner(actor) {
            return AccessDecision::allow();
        }
        if let Some(owner_id) = community.owner_id {
            return if owner_id == actor {
                AccessDecision::allow()
            } else {
                AccessDecision::deny(DenyReason::NotCommunityOwner)
            };
        }

        match self.load_community(community.id).await {
            Ok(Some(record)) if record.owner_id == actor => AccessDecision::allow(),
            Ok(Some(_)) => AccessDecision::deny(DenyReason::NotCommunityOwner),
            Ok(None) => AccessDecision::deny(DenyReason::CommunityNotManaged {
                community: community.id,
            }),
            Err(reason) => AccessDecision::deny(reason),
        }
    }

    /// Dashboard access to one community.
    ///
    /// Application owner; else the administrator bit; else the elevated role;
    /// else the liaison role, for allow-listed operators only.
    #[tracing::instrument(skip(self))]
    pub async fn has_dashboard_guild_access(
        &self,
        actor: PrincipalId,
        community: CommunityId,
    ) -> AccessDecision {
        if self.owner.is_application_owner(actor) {
            return AccessDecision::allow();
        }

        match self.load_community(community).await {
            Ok(Some(record)) if record.active => {}
            Ok(_) => return AccessDecision::deny(DenyReason::CommunityNotManaged { community }),
            Err(reason) => return AccessDecision::deny(reason),
        }

        match self.platform.fetch_actor_permission_mask(community, actor).await {
            Ok(mask) if mask.is_administrator() => return AccessDecision::allow(),
            Ok(_) => {}
            Err(e) => return AccessDecision::deny(platform_denial(&e, community, actor)),
        }

        let names = match self.platform.fetch_actor_role_names(community, actor).await {
            Ok(names) => names,
            Err(e) => return AccessDecision::deny(platform_denial(&e, community, actor)),
        };
        if names.contains(&self.elevated_role) {
            return AccessDecision::allow();
        }
        if names.contains(&self.liaison_role) {
            match self.store.is_operator(actor).await {
                Ok(true) => return AccessDecision::allow(),
                Ok(false) => {}
                Err(e) => {
                    error!(actor_id = %actor, error = %e, "Failed to check operator allow-list");
                    return AccessDecision::deny(DenyReason::StoreUnavailable);
                }
            }
        }

        AccessDecision::deny(DenyReason::InsufficientRole { community })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::platform::mock::ScriptedPlatform;
    use vk_common::PlatformPermissions;

    const GUILD: u64 = 100;
    const GUILD_OWNER: u64 = 5;
    const APP_OWNER: u64 = 1;
    const MOD_ROLE: u64 = 50;

    struct Harness {
        store: Arc<MemoryStore>,
        platform: Arc<ScriptedPlatform>,
        resolver: PermissionResolver,
    }

    fn harness(moderator_role: Option<u64>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(ScriptedPlatform::new());
        store.seed_community(GUILD, GUILD_OWNER, moderator_role);
        platform.set_role(GUILD, MOD_ROLE, "Moderators", 3);
        platform.set_role(GUILD, 60, "DEV", 4);
        platform.set_role(GUILD, 61, "Mod", 2);

        let sync = Arc::new(RoleSyncEngine::new(store.clone(), platform.clone()));
        let resolver = PermissionResolver::new(
            store.clone(),
            platform.clone(),
            sync,
            ApplicationOwner::new(Some(PrincipalId::new(APP_OWNER))),
        );
        Harness {
            store,
            platform,
            resolver,
        }
    }

    fn guild_ref() -> CommunityRef {
        CommunityRef::new(CommunityId::new(GUILD))
    }

    fn actor(id: u64) -> PrincipalId {
        PrincipalId::new(id)
    }

    // ========================================================================
    // Privileged commands
    // ========================================================================

    #[tokio::test]
    async fn test_command_outside_community_denied() {
        let h = harness(Some(MOD_ROLE));
        let decision = h.resolver.can_execute_privileged_command(actor(7), None).await;
        assert_eq!(decision.reason, Some(DenyReason::NoCommunityContext));
    }

    #[tokio::test]
    async fn test_command_owner_allowed_without_moderator_role() {
        let h = harness(None);
        let by_context = CommunityRef::with_owner(CommunityId::new(GUILD), actor(GUILD_OWNER));
        assert!(h
            .resolver
            .can_execute_privileged_command(actor(GUILD_OWNER), Some(&by_context))
            .await
            .is_allowed());
        assert!(h
            .resolver
            .can_execute_privileged_command(actor(GUILD_OWNER), Some(&guild_ref()))
            .await
            .is_allowed());
    }

    #[tokio::test]
    async fn test_command_without_moderator_role_configured() {
        let h = harness(None);
        h.platform.set_member(GUILD, 7, &[MOD_ROLE]);

        let decision = h
            .resolver
            .can_execute_privileged_command(actor(7), Some(&guild_ref()))
            .await;
        assert_eq!(decision.reason, Some(DenyReason::ModeratorRoleNotConfigured));
        assert!(decision
            .reason
            .unwrap()
            .to_string()
            .contains("moderator role"));
    }

    #[tokio::test]
    async fn test_command_uses_fresh_platform_roles() {
        let h = harness(Some(MOD_ROLE));
        h.platform.set_member(GUILD, 7, &[MOD_ROLE]);
        assert!(h
            .resolver
            .can_execute_privileged_command(actor(7), Some(&guild_ref()))
            .await
            .is_allowed());

        h.platform.set_member(GUILD, 7, &[]);
        let decision = h
            .resolver
            .can_execute_privileged_command(actor(7), Some(&guild_ref()))
            .await;
        assert_eq!(decision.reason, Some(DenyReason::MissingModeratorRole));
    }

    #[tokio::test]
    async fn test_command_refresh_converges_registered_member() {
        let h = harness(Some(MOD_ROLE));
        let role = h.store.seed_role(GUILD, "Moderators", Some(MOD_ROLE), 3);
        h.store.seed_principal(GUILD, 7, vec![]);
        h.platform.set_member(GUILD, 7, &[MOD_ROLE]);

        h.resolver
            .can_execute_privileged_command(actor(7), Some(&guild_ref()))
            .await;
        assert_eq!(h.store.principal(GUILD, 7).unwrap().role_ids, vec![role.id]);
    }

    #[tokio::test]
    async fn test_command_fails_closed_on_outage() {
        let h = harness(Some(MOD_ROLE));
        h.platform.set_member(GUILD, 7, &[MOD_ROLE]);
        h.platform.set_unavailable(true);

        let decision = h
            .resolver
            .authorize(actor(7), Some(&guild_ref()), AccessKind::PrivilegedCommand)
            .await;
        assert!(!decision.is_allowed());
        assert_eq!(decision.reason, Some(DenyReason::UpstreamUnavailable));
    }

    #[tokio::test]
    async fn test_command_fails_closed_on_store_error() {
        let h = harness(Some(MOD_ROLE));
        h.platform.set_member(GUILD, 7, &[MOD_ROLE]);
        h.store.set_failing(true);

        let decision = h
            .resolver
            .can_execute_privileged_command(actor(7), Some(&guild_ref()))
            .await;
        assert_eq!(decision.reason, Some(DenyReason::StoreUnavailable));
    }

    // ========================================================================
    // Settings
    // ========================================================================

    #[tokio::test]
    async fn test_settings_owner_only() {
        let h = harness(Some(MOD_ROLE));
        h.platform.set_member(GUILD, 7, &[MOD_ROLE]);

        let moderator = h
            .resolver
            .can_manage_community_settings(actor(7), Some(&guild_ref()))
            .await;
        assert_eq!(moderator.reason, Some(DenyReason::NotCommunityOwner));

        assert!(h
            .resolver
            .can_manage_community_settings(actor(GUILD_OWNER), Some(&guild_ref()))
            .await
            .is_allowed());
    }

    #[tokio::test]
    async fn test_settings_unknown_community() {
        let h = harness(None);
        let unknown = CommunityRef::new(CommunityId::new(999));
        let decision = h
            .resolver
            .can_manage_community_settings(actor(7), Some(&unknown))
            .await;
        assert_eq!(
            decision.reason,
            Some(DenyReason::CommunityNotManaged {
                community: CommunityId::new(999)
            })
        );
    }

    // ========================================================================
    // Dashboard
    // ========================================================================

    #[tokio::test]
    async fn test_dashboard_administrator_bit() {
        let h = harness(None);
        h.platform.set_member(GUILD, 7, &[]);
        h.platform
            .set_mask(GUILD, 7, PlatformPermissions::ADMINISTRATOR);

        assert!(h
            .resolver
            .has_dashboard_guild_access(actor(7), CommunityId::new(GUILD))
            .await
            .is_allowed());
    }

    #[tokio::test]
    async fn test_dashboard_elevated_role() {
        let h = harness(None);
        h.platform.set_member(GUILD, 7, &[60]);

        assert!(h
            .resolver
            .has_dashboard_guild_access(actor(7), CommunityId::new(GUILD))
            .await
            .is_allowed());
    }

    #[tokio::test]
    async fn test_dashboard_liaison_role_needs_allow_list() {
        let h = harness(None);
        h.platform.set_member(GUILD, 7, &[61]);

        let decision = h
            .resolver
            .has_dashboard_guild_access(actor(7), CommunityId::new(GUILD))
            .await;
        assert_eq!(
            decision.reason,
            Some(DenyReason::InsufficientRole {
                community: CommunityId::new(GUILD)
            })
        );

        h.store.seed_operator(7);
        assert!(h
            .resolver
            .has_dashboard_guild_access(actor(7), CommunityId::new(GUILD))
            .await
            .is_allowed());
    }

    #[tokio::test]
    async fn test_dashboard_not_a_member_vs_insufficient() {
        let h = harness(None);
        h.platform.set_member(GUILD, 8, &[MOD_ROLE]);

        let stranger = h
            .resolver
            .has_dashboard_guild_access(actor(7), CommunityId::new(GUILD))
            .await;
        assert_eq!(stranger.reason.unwrap().code(), "not_a_member");

        let member = h
            .resolver
            .has_dashboard_guild_access(actor(8), CommunityId::new(GUILD))
            .await;
        assert_eq!(member.reason.unwrap().code(), "insufficient_role");
    }

    #[tokio::test]
    async fn test_dashboard_inactive_community() {
        let h = harness(None);
        h.store
            .set_community_active(CommunityId::new(GUILD), false)
            .await
            .unwrap();
        h.platform.set_member(GUILD, 7, &[60]);

        let decision = h
            .resolver
            .has_dashboard_guild_access(actor(7), CommunityId::new(GUILD))
            .await;
        assert_eq!(decision.reason.unwrap().code(), "community_not_managed");
    }

    #[tokio::test]
    async fn test_dashboard_fails_closed_on_outage() {
        let h = harness(None);
        h.platform.set_member(GUILD, 7, &[60]);
        h.platform.set_unavailable(true);

        let decision = h
            .resolver
            .authorize(actor(7), Some(&guild_ref()), AccessKind::Dashboard)
            .await;
        assert_eq!(decision.reason, Some(DenyReason::UpstreamUnavailable));
    }

    #[tokio::test]
    async fn test_custom_dashboard_role_names() {
        let h = harness(None);
        let resolver = h.resolver.clone().with_dashboard_roles("Moderators", "Nobody");
        h.platform.set_member(GUILD, 7, &[MOD_ROLE]);

        assert!(resolver
            .has_dashboard_guild_access(actor(7), CommunityId::new(GUILD))
            .await
            .is_allowed());
    }

    // ========================================================================
    // Owner bypass
    // ========================================================================

    #[tokio::test]
    async fn test_application_owner_passes_every_kind() {
        let h = harness(None);
        h.platform.set_unavailable(true);
        h.store.set_failing(true);

        for kind in [
            AccessKind::PrivilegedCommand,
            AccessKind::CommunitySettings,
            AccessKind::Dashboard,
        ] {
            let decision = h
                .resolver
                .authorize(actor(APP_OWNER), Some(&guild_ref()), kind)
                .await;
            assert!(decision.is_allowed(), "owner denied for {kind:?}");
        }
    }
}
