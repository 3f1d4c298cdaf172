//! PKCE (RFC 7636) and CSRF-state generation

use std::fmt::Write as _;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Generate a PKCE code verifier and its S256 code challenge.
///
/// The verifier is 32 cryptographically random bytes encoded as unpadded
/// base64url (43 characters); the challenge is the unpadded base64url SHA-256
/// of the verifier's ASCII bytes.
#[must_use]
pub fn generate_pkce() -> (String, String) {
    let verifier_bytes: [u8; 32] = rand::rng().random();
    let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

    (verifier, challenge)
}

/// Generate a random state parameter for CSRF protection: 16 random bytes,
/// hex-encoded (32 characters).
#[must_use]
pub fn generate_state() -> String {
    let state_bytes: [u8; 16] = rand::rng().random();
    state_bytes.iter().fold(String::new(), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_verifier_and_challenge_are_43_chars() {
        let (verifier, challenge) = generate_pkce();
        assert_eq!(verifier.len(), 43);
        assert_eq!(challenge.len(), 43);
    }

    #[test]
    fn pkce_challenge_is_sha256_of_verifier() {
        let (verifier, challenge) = generate_pkce();
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let expected = URL_SAFE_NO_PAD.encode(hasher.finalize());
        assert_eq!(challenge, expected);
    }

    #[test]
    fn pkce_output_is_base64url_safe() {
        for _ in 0..10 {
            let (verifier, challenge) = generate_pkce();
            for s in [&verifier, &challenge] {
                assert!(!s.contains('+'));
                assert!(!s.contains('/'));
                assert!(!s.contains('='));
            }
        }
    }

    #[test]
    fn pkce_generates_unique_values() {
        let (v1, c1) = generate_pkce();
        let (v2, c2) = generate_pkce();
        assert_ne!(v1, v2);
        assert_ne!(c1, c2);
    }

    #[test]
    fn state_is_32_hex_chars() {
        let state = generate_state();
        assert_eq!(state.len(), 32);
        assert!(state.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn state_generates_unique_values() {
        assert_ne!(generate_state(), generate_state());
    }
}
