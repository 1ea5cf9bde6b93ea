//! Access decisions and deny reasons.

use std::fmt;

use serde::Serialize;
use vk_common::{CommunityId, PrincipalId};

/// What the actor is trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    /// Moderation commands gated on the moderator role.
    PrivilegedCommand,
    /// Community configuration, reserved to the community owner.
    CommunitySettings,
    /// Managing a community through the web dashboard.
    Dashboard,
}

/// The community an action targets, as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommunityRef {
    pub id: CommunityId,
    /// Owner as reported by the invoking context; looked up when absent.
    pub owner_id: Option<PrincipalId>,
}

impl CommunityRef {
    #[must_use]
    pub const fn new(id: CommunityId) -> Self {
        Self { id, owner_id: None }
    }

    #[must_use]
    pub const fn with_owner(id: CommunityId, owner_id: PrincipalId) -> Self {
        Self {
            id,
            owner_id: Some(owner_id),
        }
    }
}

/// Why an action was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum DenyReason {
    /// The action only makes sense inside a community.
    NoCommunityContext,
    /// The community owner has not configured a moderator role.
    ModeratorRoleNotConfigured,
    /// The actor does not hold the moderator role.
    MissingModeratorRole,
    /// Reserved to the community owner.
    NotCommunityOwner,
    /// Reserved to the application owner.
    NotApplicationOwner,
    /// The actor is not a member of the community on the platform.
    NotAMember { community: CommunityId },
    /// Member, but without a role that grants access.
    InsufficientRole { community: CommunityId },
    /// The bot does not manage this community.
    CommunityNotManaged { community: CommunityId },
    /// The dashboard session has not passed its second factor.
    SecondFactorRequired,
    /// The platform could not be asked.
    UpstreamUnavailable,
    /// Local storage could not be read.
    StoreUnavailable,
}

impl DenyReason {
    /// Machine-checkable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoCommunityContext => "no_community_context",
            Self::ModeratorRoleNotConfigured => "moderator_role_not_configured",
            Self::MissingModeratorRole => "missing_moderator_role",
            Self::NotCommunityOwner => "not_community_owner",
            Self::NotApplicationOwner => "not_application_owner",
            Self::NotAMember { .. } => "not_a_member",
            Self::InsufficientRole { .. } => "insufficient_role",
            Self::CommunityNotManaged { .. } => "community_not_managed",
            Self::SecondFactorRequired => "second_factor_required",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCommunityContext => write!(f, "This command can only be used in a server"),
            Self::ModeratorRoleNotConfigured => write!(
                f,
                "No moderator role has been set. The server owner must use /setmod to set a moderator role"
            ),
            Self::MissingModeratorRole => write!(
                f,
                "You need to be the server owner or have the moderator role to use this command"
            ),
            Self::NotCommunityOwner => write!(f, "Only the server owner can do this"),
            Self::NotApplicationOwner => {
                write!(f, "This command is only available to the bot owner")
            }
            Self::NotAMember { .. } => write!(f, "You are not a member of this server"),
            Self::InsufficientRole { .. } => {
                write!(f, "You do not have a role that grants access to this server")
            }
            Self::CommunityNotManaged { .. } => write!(f, "The bot does not manage this server"),
            Self::SecondFactorRequired => write!(f, "Two-factor verification required"),
            Self::UpstreamUnavailable => {
                write!(f, "Could not verify your permissions right now. Please try again")
            }
            Self::StoreUnavailable => write!(
                f,
                "An error occurred while checking permissions. Please try again"
            ),
        }
    }
}

/// Allow, or deny with a reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
}

impl AccessDecision {
    #[must_use]
    pub const fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    #[must_use]
    pub const fn deny(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }

    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// `Ok` when allowed, the deny reason otherwise.
    pub fn into_result(self) -> Result<(), DenyReason> {
        match self.reason {
            Some(reason) if !self.allowed => Err(reason),
            _ => Ok(()),
        }
    }
}
