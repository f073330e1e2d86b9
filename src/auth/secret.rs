//! Token secret generation and hashing.
//!
//! A secret is `vgl_` followed by 32 bytes from the OS CSPRNG encoded as
//! URL-safe base64 without padding. Only its SHA-256 digest is stored.

use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use crate::models::token::TokenDigest;

pub const TOKEN_PREFIX: &str = "vgl_";
const SECRET_BYTES: usize = 32;
const DISPLAY_PREFIX_LEN: usize = 12;

/// Generate a fresh token secret. The buffer is wiped when dropped.
pub fn generate() -> Zeroizing<String> {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    bytes.zeroize();
    Zeroizing::new(format!("{}{}", TOKEN_PREFIX, encoded))
}

/// Keyed lookup form of a presented or issued secret.
pub fn digest(secret: &str) -> TokenDigest {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    TokenDigest::from_hex(hex::encode(hasher.finalize()))
}

/// Compare two digests without short-circuiting on the first differing byte.
pub fn digests_match(a: &TokenDigest, b: &TokenDigest) -> bool {
    bool::from(a.as_str().as_bytes().ct_eq(b.as_str().as_bytes()))
}

/// Display-safe leading slice of a secret, used in listings and logs.
pub fn display_prefix(secret: &str) -> String {
    secret.chars().take(DISPLAY_PREFIX_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secret_has_expected_shape() {
        let secret = generate();
        assert!(secret.starts_with(TOKEN_PREFIX));
        // 32 bytes -> 43 base64 chars without padding
        assert_eq!(secret.len(), TOKEN_PREFIX.len() + 43);
        assert!(secret[TOKEN_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn secrets_do_not_repeat() {
        let a = generate();
        let b = generate();
        assert_ne!(*a, *b);
    }

    #[test]
    fn digest_is_stable_sha256_hex() {
        let d = digest("abc");
        assert_eq!(
            d.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(digests_match(&d, &digest("abc")));
        assert!(!digests_match(&d, &digest("abd")));
    }

    #[test]
    fn display_prefix_is_short() {
        assert_eq!(display_prefix("vgl_0123456789abcdef"), "vgl_01234567");
        assert_eq!(display_prefix("vgl_"), "vgl_");
    }
}
