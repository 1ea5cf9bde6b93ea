//! Discord OAuth2 login.
//!
//! Authorization code flow with PKCE. The CSRF state and PKCE verifier travel
//! in a sealed cookie between `/auth/login` and `/auth/callback`.

use std::time::Duration;

use openidconnect::{CsrfToken, PkceCodeChallenge};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;
use vk_common::PrincipalId;

use super::secret_box::SecretBox;

const AUTHORIZE_URL: &str = "https://discord.com/oauth2/authorize";
const SCOPES: &str = "identify guilds";

/// OAuth errors.
#[derive(Debug, Error)]
pub enum OAuthError {
    /// Missing, unreadable or mismatched flow state.
    #[error("Invalid OAuth state")]
    InvalidState,

    #[error("Token exchange failed")]
    Exchange(String),

    #[error("Failed to fetch identity")]
    Identity(String),
}

/// State kept client-side for the duration of one login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowState {
    pub csrf: String,
    pub pkce_verifier: String,
}

impl FlowState {
    pub fn seal(&self, sealer: &SecretBox) -> Result<String, OAuthError> {
        let json = serde_json::to_string(self).map_err(|_| OAuthError::InvalidState)?;
        sealer.seal(&json).map_err(|_| OAuthError::InvalidState)
    }

    pub fn open(sealed: &str, sealer: &SecretBox) -> Result<Self, OAuthError> {
        let json = sealer.open(sealed).map_err(|_| OAuthError::InvalidState)?;
        serde_json::from_str(&json).map_err(|_| OAuthError::InvalidState)
    }
}

/// Identity returned by `/users/@me`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscordIdentity {
    pub id: PrincipalId,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// OAuth2 client for dashboard login.
#[derive(Debug, Clone)]
pub struct DiscordOAuth {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    api_base: String,
}

impl DiscordOAuth {
    pub fn new(
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        api_base: &str,
        timeout: Duration,
    ) -> Result<Self, OAuthError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OAuthError::Exchange(e.to_string()))?;

        Ok(Self {
            http,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_uri: redirect_uri.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    /// Build the provider redirect and the state to remember.
    pub fn authorize(&self) -> Result<(String, FlowState), OAuthError> {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let csrf = CsrfToken::new_random();

        let mut url = openidconnect::url::Url::parse(AUTHORIZE_URL)
            .map_err(|e| OAuthError::Exchange(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", SCOPES)
            .append_pair("state", csrf.secret())
            .append_pair("code_challenge", challenge.as_str())
            .append_pair("code_challenge_method", "S256")
            .append_pair("prompt", "none");

        Ok((
            url.to_string(),
            FlowState {
                csrf: csrf.secret().clone(),
                pkce_verifier: verifier.secret().clone(),
            },
        ))
    }

    /// Exchange the callback code for the user's identity.
    pub async fn complete(
        &self,
        code: &str,
        flow: &FlowState,
    ) -> Result<DiscordIdentity, OAuthError> {
        let access_token = self.exchange_code(code, &flow.pkce_verifier).await?;
        self.fetch_identity(&access_token).await
    }

    async fn exchange_code(&self, code: &str, verifier: &str) -> Result<String, OAuthError> {
        let resp = self
            .http
            .post(format!("{}/oauth2/token", self.api_base))
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("code_verifier", verifier),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| OAuthError::Exchange(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            error!(status = %status, "OAuth token exchange rejected");
            return Err(OAuthError::Exchange(format!("HTTP {status}")));
        }

        resp.json::<TokenResponse>()
            .await
            .map(|t| t.access_token)
            .map_err(|e| OAuthError::Exchange(e.to_string()))
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<DiscordIdentity, OAuthError> {
        let resp = self
            .http
            .get(format!("{}/users/@me", self.api_base))
            .header("Authorization", format!("Bearer {access_token}"))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| OAuthError::Identity(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(OAuthError::Identity(format!("HTTP {}", resp.status())));
        }

        resp.json::<DiscordIdentity>()
            .await
            .map_err(|e| OAuthError::Identity(e.to_string()))
    }
}
