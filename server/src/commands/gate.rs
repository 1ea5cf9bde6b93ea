//! Command gate.
//!
//! Maps bot commands to access kinds and runs the resolver before the
//! command's effect.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use vk_common::{ExternalRoleId, PrincipalId};

use crate::access::{AccessKind, CommunityRef, DenyReason, PermissionResolver};
use crate::db::{NewPrincipal, Principal};
use crate::platform::PlatformError;
use crate::sync::{RoleSyncEngine, SyncError};

/// Who may run a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAccess {
    Public,
    /// Moderator role holders and the community owner.
    Privileged,
    /// Community owner only.
    CommunitySettings,
    /// Application owner only.
    ApplicationOwner,
}

const COMMANDS: &[(&str, CommandAccess)] = &[
    ("ping", CommandAccess::Public),
    ("help", CommandAccess::Public),
    ("feedback", CommandAccess::Public),
    ("kick", CommandAccess::Privileged),
    ("setpoints", CommandAccess::Privileged),
    ("stats", CommandAccess::Privileged),
    ("userlist", CommandAccess::Privileged),
    ("viewuserstats", CommandAccess::Privileged),
    ("register", CommandAccess::Privileged),
    ("backup", CommandAccess::Privileged),
    ("bug", CommandAccess::Privileged),
    ("guildinfo", CommandAccess::Privileged),
    ("onboarding", CommandAccess::Privileged),
    ("setbugchannel", CommandAccess::Privileged),
    ("setmod", CommandAccess::CommunitySettings),
    ("setlogchannel", CommandAccess::CommunitySettings),
    ("setprogress", CommandAccess::CommunitySettings),
    ("listguilds", CommandAccess::ApplicationOwner),
];

/// Access class of a command, `None` for unknown commands.
pub fn command_access(name: &str) -> Option<CommandAccess> {
    COMMANDS
        .iter()
        .find(|(command, _)| command.eq_ignore_ascii_case(name))
        .map(|(_, access)| *access)
}

/// Command errors, surfaced to the invoking user as an ephemeral reply.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("{0}")]
    Denied(DenyReason),

    #[error("{target} is already registered in this server")]
    AlreadyRegistered { target: PrincipalId },

    #[error("{target} is not a member of this server")]
    TargetNotMember { target: PrincipalId },

    #[error("Something went wrong, please try again later")]
    Failed(#[from] SyncError),
}

/// One bot command invocation.
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    pub command: String,
    pub actor: PrincipalId,
    /// `None` for direct messages.
    pub community: Option<CommunityRef>,
}

/// Target of `/register`, as resolved by the bot.
#[derive(Debug, Clone)]
pub struct MemberRegistration {
    pub principal: PrincipalId,
    pub username: String,
    pub global_name: Option<String>,
}

/// Runs access checks for bot commands and owns the access-related effects.
#[derive(Clone)]
pub struct CommandGate {
    resolver: PermissionResolver,
    sync: Arc<RoleSyncEngine>,
}

impl CommandGate {
    pub fn new(resolver: PermissionResolver, sync: Arc<RoleSyncEngine>) -> Self {
        Self { resolver, sync }
    }

    /// Decide whether the invocation may run.
    #[tracing::instrument(skip(self, invocation), fields(command = %invocation.command, actor_id = %invocation.actor))]
    pub async fn check(&self, invocation: &CommandInvocation) -> Result<(), CommandError> {
        let access = command_access(&invocation.command)
            .ok_or_else(|| CommandError::UnknownCommand(invocation.command.clone()))?;
        let community = invocation.community.as_ref();

        let decision = match access {
            CommandAccess::Public => return Ok(()),
            CommandAccess::Privileged => {
                self.resolver
                    .authorize(invocation.actor, community, AccessKind::PrivilegedCommand)
                    .await
            }
            CommandAccess::CommunitySettings => {
                self.resolver
                    .authorize(invocation.actor, community, AccessKind::CommunitySettings)
                    .await
            }
            CommandAccess::ApplicationOwner => {
                return if self.resolver.owner().is_application_owner(invocation.actor) {
                    Ok(())
                } else {
                    Err(CommandError::Denied(DenyReason::NotApplicationOwner))
                };
            }
        };

        decision.into_result().map_err(CommandError::Denied)
    }

    /// `/setmod`: set the moderator role of the invoking community.
    pub async fn set_moderator_role(
        &self,
        invocation: &CommandInvocation,
        role: ExternalRoleId,
    ) -> Result<(), CommandError> {
        self.check(invocation).await?;
        let community = invocation
            .community
            .ok_or(CommandError::Denied(DenyReason::NoCommunityContext))?;

        let updated = self
            .sync
            .store()
            .set_moderator_role(community.id, Some(role))
            .await
            .map_err(|e| CommandError::Failed(e.into()))?;
        if !updated {
            return Err(CommandError::Denied(DenyReason::CommunityNotManaged {
                community: community.id,
            }));
        }

        info!(community_id = %community.id, role_id = %role, "Moderator role set");
        Ok(())
    }

    /// `/register`: create the target's member profile and seed its roles.
    pub async fn register_member(
        &self,
        invocation: &CommandInvocation,
        target: MemberRegistration,
    ) -> Result<Principal, CommandError> {
        self.check(invocation).await?;
        let community = invocation
            .community
            .ok_or(CommandError::Denied(DenyReason::NoCommunityContext))?;

        let registration = NewPrincipal {
            principal_id: target.principal,
            community_id: community.id,
            username: target.username,
            global_name: target.global_name,
        };
        match self.sync.register_principal(&registration).await {
            Ok(principal) => Ok(principal),
            Err(SyncError::AlreadyRegistered) => Err(CommandError::AlreadyRegistered {
                target: target.principal,
            }),
            Err(SyncError::Platform(PlatformError::NotFound)) => {
                Err(CommandError::TargetNotMember {
                    target: target.principal,
                })
            }
            Err(e) => {
                warn!(community_id = %community.id, error = %e, "Member registration failed");
                Err(e.into())
            }
        }
    }
}
