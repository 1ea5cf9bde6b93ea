//! Single-use backup codes.
//!
//! Codes are 8 uppercase hex characters. Only their SHA-256 digests are
//! stored; matching is exact after normalisation.

use rand::RngCore;

use super::hash_token;

/// Codes issued per enrollment or regeneration.
pub const BACKUP_CODE_COUNT: usize = 10;

/// Generate a fresh set of plaintext codes.
pub fn generate() -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..BACKUP_CODE_COUNT)
        .map(|_| {
            let mut bytes = [0u8; 4];
            rng.fill_bytes(&mut bytes);
            hex::encode_upper(bytes)
        })
        .collect()
}

/// Uppercase and drop whitespace, so `ab12 cd34` matches `AB12CD34`.
pub fn normalize(code: &str) -> String {
    code.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Whether a submitted proof has the shape of a backup code.
pub fn looks_like_backup_code(proof: &str) -> bool {
    let code = normalize(proof);
    code.len() == 8 && code.chars().all(|c| c.is_ascii_hexdigit())
}

/// Storage digest of a (possibly unnormalised) code.
pub fn digest(code: &str) -> String {
    hash_token(&normalize(code))
}

pub fn digest_all(codes: &[String]) -> Vec<String> {
    codes.iter().map(|c| digest(c)).collect()
}
