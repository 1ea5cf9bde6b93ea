//! Platform event triggers.
//!
//! The gateway layer forwards the few events that matter for access control.
//! Handling never fails outward; problems are logged and the periodic sweep
//! picks up whatever was missed.

use tracing::{debug, error, info, warn};
use vk_common::{CommunityId, PrincipalId};

use super::{PrincipalOutcome, RoleSyncEngine};
use crate::db::NewCommunity;

/// Events relevant to role synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    /// The bot was added to a community.
    CommunityJoined {
        community: CommunityId,
        name: String,
        owner_id: PrincipalId,
    },
    /// The bot left or was removed from a community.
    CommunityLeft { community: CommunityId },
    /// A member's role set changed on the platform.
    MemberRolesUpdated {
        community: CommunityId,
        principal: PrincipalId,
    },
}

impl RoleSyncEngine {
    /// Apply one platform event.
    pub async fn handle_event(&self, event: PlatformEvent) {
        match event {
            PlatformEvent::CommunityJoined {
                community,
                name,
                owner_id,
            } => {
                let registration = NewCommunity {
                    id: community,
                    name,
                    owner_id,
                };
                if let Err(e) = self.store().upsert_community(&registration).await {
                    error!(community_id = %community, error = %e, "Failed to register community");
                    return;
                }
                info!(community_id = %community, "Joined community");

                if let Err(e) = self.reconcile_community_roster(community).await {
                    warn!(community_id = %community, error = %e, "Initial roster reconcile failed");
                }
            }
            PlatformEvent::CommunityLeft { community } => {
                match self.store().set_community_active(community, false).await {
                    Ok(true) => info!(community_id = %community, "Left community"),
                    Ok(false) => debug!(community_id = %community, "Left unknown community"),
                    Err(e) => {
                        error!(community_id = %community, error = %e, "Failed to deactivate community");
                    }
                }
            }
            PlatformEvent::MemberRolesUpdated {
                community,
                principal,
            } => match self.reconcile_principal(community, principal).await {
                Ok(PrincipalOutcome::Updated { added, removed }) => {
                    info!(
                        community_id = %community,
                        principal_id = %principal,
                        added,
                        removed,
                        "Member roles updated"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(community_id = %community, principal_id = %principal, error = %e, "Member role update sync failed");
                }
            },
        }
    }
}
