//! Session Trust Service
//!
//! Second-factor state machine layered over primary dashboard identity.
//! A session is trusted once the user has no second factor, has proven a
//! TOTP or backup code, or presents a valid remembered-device token.
//!
//! The service owns the [`AuthTrustRecord`] lifecycle; the per-session
//! verified flag lives on the session row and is written by the web layer
//! from the values returned here.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{info, warn};
use vk_common::PrincipalId;

use super::secret_box::{CryptoError, SecretBox};
use super::{backup_codes, generate_token, hash_token, totp};
use crate::access::ApplicationOwner;
use crate::db::{AccessStore, AuthTrustRecord, StoreError};

/// Remembered devices skip the second factor for this many days.
pub const REMEMBER_DEVICE_DAYS: i64 = 7;

/// Trust service errors.
#[derive(Debug, Error)]
pub enum TrustError {
    /// TOTP or backup code did not validate.
    #[error("Invalid verification code")]
    InvalidProof,

    #[error("Two-factor authentication is already enabled")]
    AlreadyEnabled,

    #[error("Two-factor authentication is not enabled")]
    NotEnabled,

    /// Secret is not valid base32 or too short.
    #[error("Malformed second factor secret")]
    MalformedSecret,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type TrustResult<T> = Result<T, TrustError>;

/// Second-factor state of one dashboard session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustState {
    NoSecondFactor,
    /// Secret issued but not yet confirmed; the factor is still off.
    Enrolling,
    EnabledUnverified,
    EnabledVerified,
    EnabledRememberedDevice,
}

impl TrustState {
    /// State of a session from the record flag and the session flag.
    #[must_use]
    pub const fn resolve(second_factor_enabled: bool, session_verified: bool) -> Self {
        match (second_factor_enabled, session_verified) {
            (false, _) => Self::NoSecondFactor,
            (true, false) => Self::EnabledUnverified,
            (true, true) => Self::EnabledVerified,
        }
    }

    /// Whether privileged dashboard routes may proceed.
    #[must_use]
    pub const fn is_verified(self) -> bool {
        !matches!(self, Self::EnabledUnverified)
    }
}

/// Issued by [`SessionTrustService::begin_enrollment`]; nothing is persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Enrollment {
    pub secret: String,
    pub provisioning_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
}

/// How a verification succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum VerificationMethod {
    Totp,
    BackupCode { remaining: usize },
}

/// Successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub method: VerificationMethod,
    /// Plaintext remembered-device token, present when one was requested.
    pub remember_token: Option<String>,
}

/// Snapshot for the status route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrustStatus {
    pub enabled: bool,
    pub backup_codes_remaining: usize,
    pub remembered_until: Option<DateTime<Utc>>,
    pub is_owner: bool,
}

/// Second-factor operations for dashboard identities.
#[derive(Clone)]
pub struct SessionTrustService {
    store: Arc<dyn AccessStore>,
    secret_box: SecretBox,
    owner: ApplicationOwner,
    issuer: String,
}

impl SessionTrustService {
    pub fn new(
        store: Arc<dyn AccessStore>,
        secret_box: SecretBox,
        owner: ApplicationOwner,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            store,
            secret_box,
            owner,
            issuer: issuer.into(),
        }
    }

    pub async fn is_second_factor_required(&self, user: PrincipalId) -> TrustResult<bool> {
        Ok(self
            .store
            .find_trust_record(user)
            .await?
            .is_some_and(|r| r.totp_enabled))
    }

    /// Initial trust state of a fresh login.
    ///
    /// Creates the trust record on first login. A remembered-device token is
    /// only honoured if it matches the stored one and has not expired.
    #[tracing::instrument(skip(self, remember_token))]
    pub async fn establish_session(
        &self,
        user: PrincipalId,
        remember_token: Option<&str>,
    ) -> TrustResult<TrustState> {
        let record = self.store.ensure_trust_record(user).await?;
        if !record.totp_enabled {
            return Ok(TrustState::NoSecondFactor);
        }

        if remember_token.is_some_and(|token| remembered(&record, token, Utc::now())) {
            return Ok(TrustState::EnabledRememberedDevice);
        }
        Ok(TrustState::EnabledUnverified)
    }

    /// Issue a new secret for the user to scan. The secret is not persisted
    /// until [`confirm_enrollment`](Self::confirm_enrollment).
    #[tracing::instrument(skip(self))]
    pub async fn begin_enrollment(
        &self,
        user: PrincipalId,
        account: &str,
    ) -> TrustResult<Enrollment> {
        let record = self.store.ensure_trust_record(user).await?;
        if record.totp_enabled {
            return Err(TrustError::AlreadyEnabled);
        }

        let generated = totp::generate(&self.issuer, account)?;
        Ok(Enrollment {
            secret: generated.secret,
            provisioning_uri: generated.provisioning_uri,
            qr_code: generated.qr_code,
        })
    }

    /// Confirm a secret with a current code and enable the factor.
    ///
    /// Returns the plaintext backup codes; they are never retrievable again.
    #[tracing::instrument(skip(self, secret, code))]
    pub async fn confirm_enrollment(
        &self,
        user: PrincipalId,
        secret: &str,
        code: &str,
    ) -> TrustResult<Vec<String>> {
        let record = self.store.ensure_trust_record(user).await?;
        if record.totp_enabled {
            return Err(TrustError::AlreadyEnabled);
        }
        if !totp::verify_code(secret, code)? {
            return Err(TrustError::InvalidProof);
        }

        let sealed = self.secret_box.seal(secret)?;
        let codes = backup_codes::generate();
        self.store
            .enable_second_factor(user, &sealed, &backup_codes::digest_all(&codes))
            .await?;

        info!(user_id = %user, "Two-factor authentication enabled");
        Ok(codes)
    }

    /// Prove the second factor with a TOTP code or an unused backup code.
    ///
    /// Backup codes are tried first and removed on success.
    #[tracing::instrument(skip(self, proof))]
    pub async fn verify(
        &self,
        user: PrincipalId,
        proof: &str,
        remember_device: bool,
    ) -> TrustResult<Verification> {
        let record = self.enabled_record(user).await?;

        let method = if backup_codes::looks_like_backup_code(proof)
            && self
                .store
                .consume_backup_code(user, &backup_codes::digest(proof))
                .await?
        {
            let remaining = self
                .store
                .find_trust_record(user)
                .await?
                .map_or(0, |r| r.backup_codes.len());
            info!(user_id = %user, remaining, "Backup code used");
            VerificationMethod::BackupCode { remaining }
        } else if self.check_totp(&record, proof)? {
            VerificationMethod::Totp
        } else {
            warn!(user_id = %user, "Second factor verification failed");
            return Err(TrustError::InvalidProof);
        };

        let remember_token = if remember_device {
            Some(self.remember_device(user).await?)
        } else {
            None
        };

        Ok(Verification {
            method,
            remember_token,
        })
    }

    /// Turn the factor off. The application owner needs no code.
    #[tracing::instrument(skip(self, code))]
    pub async fn disable(&self, actor: PrincipalId, code: Option<&str>) -> TrustResult<()> {
        let record = self.enabled_record(actor).await?;

        if !self.owner.is_application_owner(actor) {
            let code = code.ok_or(TrustError::InvalidProof)?;
            if !self.check_totp(&record, code)? {
                return Err(TrustError::InvalidProof);
            }
        }

        self.store.disable_second_factor(actor).await?;
        info!(user_id = %actor, "Two-factor authentication disabled");
        Ok(())
    }

    /// Replace the whole backup code set after a TOTP check.
    #[tracing::instrument(skip(self, code))]
    pub async fn regenerate_backup_codes(
        &self,
        user: PrincipalId,
        code: &str,
    ) -> TrustResult<Vec<String>> {
        let record = self.enabled_record(user).await?;
        if !self.check_totp(&record, code)? {
            return Err(TrustError::InvalidProof);
        }

        let codes = backup_codes::generate();
        self.store
            .replace_backup_codes(user, &backup_codes::digest_all(&codes))
            .await?;

        info!(user_id = %user, "Backup codes regenerated");
        Ok(codes)
    }

    pub async fn status(&self, user: PrincipalId) -> TrustResult<TrustStatus> {
        let record = self.store.find_trust_record(user).await?;
        let is_owner = self.owner.is_application_owner(user);

        Ok(match record {
            Some(r) if r.totp_enabled => TrustStatus {
                enabled: true,
                backup_codes_remaining: r.backup_codes.len(),
                remembered_until: r.remember_expires_at.filter(|at| *at > Utc::now()),
                is_owner,
            },
            _ => TrustStatus {
                enabled: false,
                backup_codes_remaining: 0,
                remembered_until: None,
                is_owner,
            },
        })
    }

    async fn enabled_record(&self, user: PrincipalId) -> TrustResult<AuthTrustRecord> {
        self.store
            .find_trust_record(user)
            .await?
            .filter(|r| r.totp_enabled)
            .ok_or(TrustError::NotEnabled)
    }

    fn check_totp(&self, record: &AuthTrustRecord, code: &str) -> TrustResult<bool> {
        let sealed = record
            .totp_secret
            .as_deref()
            .ok_or_else(|| TrustError::Internal("Enabled record has no secret".into()))?;
        let secret = self.secret_box.open(sealed)?;
        totp::verify_code(&secret, code)
    }

    /// Issue a new token, replacing any earlier one.
    async fn remember_device(&self, user: PrincipalId) -> TrustResult<String> {
        let token = generate_token();
        let expires_at = Utc::now() + Duration::days(REMEMBER_DEVICE_DAYS);
        self.store
            .set_remember_token(user, &hash_token(&token), expires_at)
            .await?;
        Ok(token)
    }
}

fn remembered(record: &AuthTrustRecord, token: &str, now: DateTime<Utc>) -> bool {
    let (Some(stored), Some(expires_at)) = (
        record.remember_token_hash.as_deref(),
        record.remember_expires_at,
    ) else {
        return false;
    };
    let presented = hash_token(token);
    expires_at > now && bool::from(presented.as_bytes().ct_eq(stored.as_bytes()))
}
