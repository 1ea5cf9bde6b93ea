//! Discord REST implementation of [`MembershipProvider`].
//!
//! Uses the bot token. Every request carries the configured timeout; there is
//! no retry here, callers treat [`PlatformError::Unavailable`] as "no change"
//! or "deny".

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use vk_common::{CommunityId, ExternalRoleId, PlatformPermissions, PrincipalId};

use super::{hex_color, MembershipProvider, PlatformError, PlatformResult, PlatformRole};

#[derive(Debug, Deserialize)]
struct GuildObject {
    owner_id: PrincipalId,
}

#[derive(Debug, Clone, Deserialize)]
struct RoleObject {
    id: ExternalRoleId,
    name: String,
    #[serde(default)]
    color: u32,
    #[serde(default)]
    position: i32,
    #[serde(default)]
    permissions: String,
    #[serde(default)]
    managed: bool,
}

#[derive(Debug, Deserialize)]
struct MemberObject {
    #[serde(default)]
    roles: Vec<ExternalRoleId>,
}

/// Bot-authenticated Discord API client.
#[derive(Debug, Clone)]
pub struct DiscordClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl DiscordClient {
    pub fn new(api_base: &str, token: &str, timeout: Duration) -> PlatformResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::Unavailable(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> PlatformResult<T> {
        let url = format!("{}{path}", self.api_base);
        let resp = self
            .http
            .get(&url)
            .header("Authorization", format!("Bot {}", self.token))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| PlatformError::Unavailable(e.to_string()))?;

        match resp.status() {
            status if status.is_success() => resp
                .json::<T>()
                .await
                .map_err(|e| PlatformError::Decode(e.to_string())),
            StatusCode::NOT_FOUND => Err(PlatformError::NotFound),
            status => {
                debug!(path, status = %status, "Unexpected platform status");
                Err(PlatformError::Unavailable(format!("HTTP {status}")))
            }
        }
    }

    async fn guild(&self, community: CommunityId) -> PlatformResult<GuildObject> {
        self.get_json(&format!("/guilds/{community}")).await
    }

    async fn roles(&self, community: CommunityId) -> PlatformResult<Vec<RoleObject>> {
        self.get_json(&format!("/guilds/{community}/roles")).await
    }

    async fn member(
        &self,
        community: CommunityId,
        principal: PrincipalId,
    ) -> PlatformResult<MemberObject> {
        self.get_json(&format!("/guilds/{community}/members/{principal}"))
            .await
    }
}

/// The everyone role shares the community's id.
fn is_everyone(role: &RoleObject, community: CommunityId) -> bool {
    role.id.get() == community.get()
}

fn assignable_roles(roles: Vec<RoleObject>, community: CommunityId) -> Vec<PlatformRole> {
    roles
        .into_iter()
        .filter(|r| !r.managed && !is_everyone(r, community))
        .map(|r| PlatformRole {
            external_id: r.id,
            name: r.name,
            color: hex_color(r.color),
            position: r.position,
        })
        .collect()
}

fn member_assignable_ids(
    member: &MemberObject,
    roles: &[RoleObject],
    community: CommunityId,
) -> HashSet<ExternalRoleId> {
    let held: HashSet<_> = member.roles.iter().copied().collect();
    roles
        .iter()
        .filter(|r| held.contains(&r.id) && !r.managed && !is_everyone(r, community))
        .map(|r| r.id)
        .collect()
}

fn permission_mask(
    member: &MemberObject,
    roles: &[RoleObject],
    community: CommunityId,
) -> PlatformPermissions {
    let held: HashSet<_> = member.roles.iter().copied().collect();
    roles
        .iter()
        .filter(|r| is_everyone(r, community) || held.contains(&r.id))
        .fold(PlatformPermissions::empty(), |mask, r| {
            mask | PlatformPermissions::from_api_string(&r.permissions)
        })
}

fn role_names(member: &MemberObject, roles: &[RoleObject]) -> HashSet<String> {
    let held: HashSet<_> = member.roles.iter().copied().collect();
    roles
        .iter()
        .filter(|r| held.contains(&r.id))
        .map(|r| r.name.clone())
        .collect()
}

#[async_trait]
impl MembershipProvider for DiscordClient {
    async fn fetch_community_roles(
        &self,
        community: CommunityId,
    ) -> PlatformResult<Vec<PlatformRole>> {
        let roles = self.roles(community).await?;
        Ok(assignable_roles(roles, community))
    }

    async fn fetch_principal_role_ids(
        &self,
        community: CommunityId,
        principal: PrincipalId,
    ) -> PlatformResult<HashSet<ExternalRoleId>> {
        let member = self.member(community, principal).await?;
        let roles = self.roles(community).await?;
        Ok(member_assignable_ids(&member, &roles, community))
    }

    async fn fetch_actor_permission_mask(
        &self,
        community: CommunityId,
        actor: PrincipalId,
    ) -> PlatformResult<PlatformPermissions> {
        let member = self.member(community, actor).await?;
        let guild = self.guild(community).await?;
        if guild.owner_id == actor {
            return Ok(PlatformPermissions::all());
        }

        let roles = self.roles(community).await?;
        Ok(permission_mask(&member, &roles, community))
    }

    async fn fetch_actor_role_names(
        &self,
        community: CommunityId,
        actor: PrincipalId,
    ) -> PlatformResult<HashSet<String>> {
        let member = self.member(community, actor).await?;
        let roles = self.roles(community).await?;
        Ok(role_names(&member, &roles))
    }
}
