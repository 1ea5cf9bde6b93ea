//! Reconciliation passes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vk_common::{CommunityId, ExternalRoleId, PrincipalId};

use super::SyncError;
use crate::db::{AccessStore, NewPrincipal, NewRole, Principal, Role, RoleUpdate, StoreError};
use crate::platform::{MembershipProvider, PlatformError, PlatformRole};

/// Result of one roster pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RosterReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Platform roles left alone because their name clashes with another role.
    pub skipped: usize,
}

/// Result of reconciling one member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalOutcome {
    Unchanged,
    Updated { added: usize, removed: usize },
    /// The platform no longer knows the member; the profile is kept.
    NotOnPlatform,
    /// No local profile exists for the member.
    NotRegistered,
}

/// Aggregate counts of a principal pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub checked: usize,
    pub updated: usize,
    pub not_on_platform: usize,
    pub failed: usize,
}

impl SyncReport {
    fn merge(&mut self, other: Self) {
        self.checked += other.checked;
        self.updated += other.updated;
        self.not_on_platform += other.not_on_platform;
        self.failed += other.failed;
    }
}

/// Aggregate counts of a full background cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub communities: usize,
    pub failed_communities: usize,
    pub roles_created: usize,
    pub roles_updated: usize,
    pub roles_deactivated: u64,
    pub principals: SyncReport,
}

/// Reconciles the local role mirror against the platform.
#[derive(Clone)]
pub struct RoleSyncEngine {
    store: Arc<dyn AccessStore>,
    platform: Arc<dyn MembershipProvider>,
}

fn role_matches(role: &Role, update: &RoleUpdate) -> bool {
    role.name == update.name
        && role.external_id == update.external_id
        && role.color == update.color
        && role.position == update.position
        && role.active == update.active
}

impl RoleSyncEngine {
    pub fn new(store: Arc<dyn AccessStore>, platform: Arc<dyn MembershipProvider>) -> Self {
        Self { store, platform }
    }

    pub(crate) fn store(&self) -> &dyn AccessStore {
        self.store.as_ref()
    }

    // ========================================================================
    // Roster
    // ========================================================================

    /// Create missing roles and refresh changed ones. Never deactivates.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_community_roster(
        &self,
        community: CommunityId,
    ) -> Result<RosterReport, SyncError> {
        let fetched = self.platform.fetch_community_roles(community).await?;
        self.apply_roster(community, &fetched).await
    }

    async fn apply_roster(
        &self,
        community: CommunityId,
        fetched: &[PlatformRole],
    ) -> Result<RosterReport, SyncError> {
        let mut local = self.store.list_roles(community).await?;
        let mut report = RosterReport::default();

        for platform_role in fetched {
            // Prefer the linked record; otherwise adopt an unlinked role of the same name.
            let target = local
                .iter()
                .position(|r| r.external_id == Some(platform_role.external_id))
                .or_else(|| {
                    local
                        .iter()
                        .position(|r| r.external_id.is_none() && r.name == platform_role.name)
                });

            let Some(index) = target else {
                let new_role = NewRole {
                    community_id: community,
                    name: platform_role.name.clone(),
                    external_id: Some(platform_role.external_id),
                    color: platform_role.color.clone(),
                    position: platform_role.position,
                };
                match self.store.insert_role(&new_role).await {
                    Ok(role) => {
                        report.created += 1;
                        local.push(role);
                    }
                    Err(StoreError::Conflict(what)) => {
                        warn!(
                            community_id = %community,
                            external_id = %platform_role.external_id,
                            conflict = %what,
                            "Role name already taken, skipping"
                        );
                        report.skipped += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
                continue;
            };

            let update = RoleUpdate {
                name: platform_role.name.clone(),
                external_id: Some(platform_role.external_id),
                color: platform_role.color.clone(),
                position: platform_role.position,
                active: true,
            };
            let role_id = local[index].id;
            if role_matches(&local[index], &update) {
                report.unchanged += 1;
                continue;
            }
            if local.iter().any(|r| r.id != role_id && r.name == update.name) {
                warn!(
                    community_id = %community,
                    external_id = %platform_role.external_id,
                    "Renamed role clashes with an existing role, skipping"
                );
                report.skipped += 1;
                continue;
            }

            match self.store.update_role(role_id, &update).await {
                Ok(()) => {
                    report.updated += 1;
                    let role = &mut local[index];
                    role.name = update.name;
                    role.external_id = update.external_id;
                    role.color = update.color;
                    role.position = update.position;
                    role.active = true;
                }
                Err(StoreError::Conflict(what)) => {
                    warn!(community_id = %community, conflict = %what, "Role update rejected, skipping");
                    report.skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if report.created + report.updated > 0 {
            info!(
                community_id = %community,
                created = report.created,
                updated = report.updated,
                "Role roster reconciled"
            );
        }
        Ok(report)
    }

    /// Mark roles inactive whose platform counterpart is gone.
    ///
    /// `fetched` must be a complete, successfully fetched roster.
    pub async fn sweep_inactive_roles(
        &self,
        community: CommunityId,
        fetched: &[PlatformRole],
    ) -> Result<u64, SyncError> {
        let present: HashSet<ExternalRoleId> = fetched.iter().map(|r| r.external_id).collect();
        let stale: Vec<Uuid> = self
            .store
            .list_roles(community)
            .await?
            .into_iter()
            .filter(|r| r.active && r.external_id.is_some_and(|e| !present.contains(&e)))
            .map(|r| r.id)
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }

        let deactivated = self.store.deactivate_roles(community, &stale).await?;
        info!(community_id = %community, deactivated, "Deactivated vanished roles");
        Ok(deactivated)
    }

    // ========================================================================
    // Principals
    // ========================================================================

    /// Fetch a member's platform roles and converge the local profile.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_principal(
        &self,
        community: CommunityId,
        principal: PrincipalId,
    ) -> Result<PrincipalOutcome, SyncError> {
        let Some(record) = self.store.find_principal(community, principal).await? else {
            return Ok(PrincipalOutcome::NotRegistered);
        };

        match self
            .platform
            .fetch_principal_role_ids(community, principal)
            .await
        {
            Ok(fetched) => self.converge(&record, &fetched).await,
            Err(PlatformError::NotFound) => Ok(PrincipalOutcome::NotOnPlatform),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the profile's platform-linked role references with `fetched`.
    ///
    /// Dashboard-only roles (no external id) are kept. Writes only when the
    /// resulting list differs.
    async fn converge(
        &self,
        record: &Principal,
        fetched: &HashSet<ExternalRoleId>,
    ) -> Result<PrincipalOutcome, SyncError> {
        let community = record.community_id;
        let mut roles = self.store.list_roles(community).await?;

        let known = |roles: &[Role], id: &ExternalRoleId| {
            roles.iter().any(|r| r.external_id == Some(*id))
        };
        if fetched.iter().any(|id| !known(&roles, id)) {
            debug!(community_id = %community, "Member holds roles missing locally, reconciling roster");
            if let Err(e) = self.reconcile_community_roster(community).await {
                warn!(community_id = %community, error = %e, "Roster reconcile failed");
            }
            roles = self.store.list_roles(community).await?;
        }

        let by_id: HashMap<Uuid, &Role> = roles.iter().map(|r| (r.id, r)).collect();
        let by_external: HashMap<ExternalRoleId, &Role> = roles
            .iter()
            .filter_map(|r| r.external_id.map(|e| (e, r)))
            .collect();

        let unmapped = fetched
            .iter()
            .filter(|id| !by_external.contains_key(id))
            .count();
        if unmapped > 0 {
            warn!(
                community_id = %community,
                principal_id = %record.principal_id,
                unmapped,
                "Platform roles without a local record"
            );
        }

        let mut next: Vec<Uuid> = Vec::with_capacity(record.role_ids.len());
        let mut held: HashSet<ExternalRoleId> = HashSet::new();
        let mut removed = 0;
        for id in &record.role_ids {
            if next.contains(id) {
                continue;
            }
            match by_id.get(id).map(|r| r.external_id) {
                Some(None) => next.push(*id),
                Some(Some(external)) if fetched.contains(&external) => {
                    held.insert(external);
                    next.push(*id);
                }
                _ => removed += 1,
            }
        }

        let mut gained: Vec<&Role> = fetched
            .iter()
            .filter(|e| !held.contains(e))
            .filter_map(|e| by_external.get(e).copied())
            .collect();
        gained.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.name.cmp(&b.name)));
        let added = gained.len();
        next.extend(gained.iter().map(|r| r.id));

        if next == record.role_ids {
            return Ok(PrincipalOutcome::Unchanged);
        }

        self.store
            .set_principal_roles(community, record.principal_id, &next)
            .await?;
        debug!(
            community_id = %community,
            principal_id = %record.principal_id,
            added,
            removed,
            "Updated member roles"
        );
        Ok(PrincipalOutcome::Updated { added, removed })
    }

    /// Reconcile every registered member of a community.
    ///
    /// Per-member failures are logged and counted, never raised.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_all_principals(
        &self,
        community: CommunityId,
    ) -> Result<SyncReport, SyncError> {
        let principals = self.store.list_principals(community).await?;
        let mut report = SyncReport::default();

        for record in &principals {
            report.checked += 1;

            let fetched = match self
                .platform
                .fetch_principal_role_ids(community, record.principal_id)
                .await
            {
                Ok(fetched) => fetched,
                Err(PlatformError::NotFound) => {
                    report.not_on_platform += 1;
                    continue;
                }
                Err(e) => {
                    warn!(
                        community_id = %community,
                        principal_id = %record.principal_id,
                        error = %e,
                        "Failed to fetch member roles"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            match self.converge(record, &fetched).await {
                Ok(PrincipalOutcome::Updated { .. }) => report.updated += 1,
                Ok(_) => {}
                Err(e) => {
                    error!(
                        community_id = %community,
                        principal_id = %record.principal_id,
                        error = %e,
                        "Failed to sync member roles"
                    );
                    report.failed += 1;
                }
            }
        }

        if report.updated > 0 {
            info!(
                community_id = %community,
                checked = report.checked,
                updated = report.updated,
                "Member role sync completed"
            );
        } else {
            debug!(
                community_id = %community,
                checked = report.checked,
                "Member role sync completed, no changes"
            );
        }
        Ok(report)
    }

    /// Fresh platform roles of a member, converging the profile on the way.
    ///
    /// Only the fetch can fail; store trouble while converging is logged.
    pub async fn refresh_principal(
        &self,
        community: CommunityId,
        principal: PrincipalId,
    ) -> Result<HashSet<ExternalRoleId>, PlatformError> {
        let fetched = self
            .platform
            .fetch_principal_role_ids(community, principal)
            .await?;

        match self.store.find_principal(community, principal).await {
            Ok(Some(record)) => {
                if let Err(e) = self.converge(&record, &fetched).await {
                    warn!(community_id = %community, principal_id = %principal, error = %e, "Converge after refresh failed");
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(community_id = %community, principal_id = %principal, error = %e, "Profile lookup after refresh failed");
            }
        }

        Ok(fetched)
    }

    /// Create a member profile and seed its roles from the platform.
    #[tracing::instrument(skip(self, registration), fields(principal_id = %registration.principal_id))]
    pub async fn register_principal(
        &self,
        registration: &NewPrincipal,
    ) -> Result<Principal, SyncError> {
        let community = registration.community_id;
        let principal = registration.principal_id;

        if self.store.find_principal(community, principal).await?.is_some() {
            return Err(SyncError::AlreadyRegistered);
        }

        let fetched = self
            .platform
            .fetch_principal_role_ids(community, principal)
            .await?;
        let record = self
            .store
            .insert_principal(registration)
            .await?
            .ok_or(SyncError::AlreadyRegistered)?;
        self.converge(&record, &fetched).await?;

        info!(community_id = %community, principal_id = %principal, "Member registered");
        Ok(self
            .store
            .find_principal(community, principal)
            .await?
            .unwrap_or(record))
    }

    // ========================================================================
    // Full cycle
    // ========================================================================

    async fn reconcile_community(
        &self,
        community: CommunityId,
        report: &mut CycleReport,
    ) -> Result<(), SyncError> {
        let fetched = self.platform.fetch_community_roles(community).await?;
        let roster = self.apply_roster(community, &fetched).await?;
        report.roles_created += roster.created;
        report.roles_updated += roster.updated;

        let principals = self.reconcile_all_principals(community).await?;
        report.principals.merge(principals);

        report.roles_deactivated += self.sweep_inactive_roles(community, &fetched).await?;
        Ok(())
    }

    /// One background cycle over every active community. Never fails.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_all_communities(&self) -> CycleReport {
        let start = Instant::now();
        let mut report = CycleReport::default();

        let communities = match self.store.list_active_communities().await {
            Ok(communities) => communities,
            Err(e) => {
                error!(error = %e, "Failed to list communities for role sync");
                return report;
            }
        };

        for community in &communities {
            report.communities += 1;
            if let Err(e) = self.reconcile_community(community.id, &mut report).await {
                report.failed_communities += 1;
                error!(community_id = %community.id, error = %e, "Role sync failed for community");
            }
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        if report.principals.updated > 0 || report.roles_created + report.roles_updated > 0 {
            info!(
                elapsed_ms,
                communities = report.communities,
                checked = report.principals.checked,
                updated = report.principals.updated,
                roles_created = report.roles_created,
                roles_deactivated = report.roles_deactivated,
                "Role sync cycle completed"
            );
        } else {
            debug!(
                elapsed_ms,
                communities = report.communities,
                checked = report.principals.checked,
                "Role sync cycle completed, no changes"
            );
        }
        report
    }
}
