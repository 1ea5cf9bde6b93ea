//! TOTP helpers.
//!
//! SHA-1, 6 digits, 30 second steps, and a skew of two steps either side.
//! A code stays valid for its whole window, so the same code can be accepted
//! twice inside it.

use totp_rs::{Algorithm, Secret, TOTP};

use super::trust::TrustError;

const DIGITS: usize = 6;
const SKEW: u8 = 2;
const STEP_SECS: u64 = 30;

/// Freshly generated, not yet persisted secret.
#[derive(Debug, Clone)]
pub struct GeneratedSecret {
    /// Base32 secret shown to the user for manual entry.
    pub secret: String,
    /// `otpauth://` provisioning URI.
    pub provisioning_uri: String,
    /// PNG QR code of the URI, base64 encoded.
    pub qr_code: Option<String>,
}

/// Labels may not contain `:`, which separates issuer and account.
fn account_label(account: &str) -> String {
    let label: String = account.chars().filter(|c| *c != ':').collect();
    if label.trim().is_empty() {
        "user".to_string()
    } else {
        label
    }
}

fn build(secret: &str, issuer: &str, account: &str) -> Result<TOTP, TrustError> {
    let bytes = Secret::Encoded(secret.to_string())
        .to_bytes()
        .map_err(|_| TrustError::MalformedSecret)?;

    TOTP::new(
        Algorithm::SHA1,
        DIGITS,
        SKEW,
        STEP_SECS,
        bytes,
        Some(account_label(issuer)),
        account_label(account),
    )
    .map_err(|_| TrustError::MalformedSecret)
}

/// Generate a 160-bit secret and its provisioning URI.
pub fn generate(issuer: &str, account: &str) -> Result<GeneratedSecret, TrustError> {
    let secret = Secret::default().to_encoded().to_string();
    let totp = build(&secret, issuer, account)?;

    Ok(GeneratedSecret {
        provisioning_uri: totp.get_url(),
        qr_code: totp.get_qr_base64().ok(),
        secret,
    })
}

/// Check a submitted code against a base32 secret at the current time.
pub fn verify_code(secret: &str, code: &str) -> Result<bool, TrustError> {
    let code = code.trim();
    if code.len() != DIGITS || !code.chars().all(|c| c.is_ascii_digit()) {
        return Ok(false);
    }

    build(secret, "verify", "verify")?
        .check_current(code)
        .map_err(|e| TrustError::Internal(format!("System clock error: {e}")))
}

#[cfg(test)]
pub fn current_code(secret: &str) -> String {
    build(secret, "test", "test")
        .and_then(|t| {
            t.generate_current()
                .map_err(|e| TrustError::Internal(e.to_string()))
        })
        .expect("valid test secret")
}
