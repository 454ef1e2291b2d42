//! PKCE and flow-parameter generation (RFC 7636).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Generate a PKCE code verifier and its S256 challenge.
#[must_use]
pub fn generate_pkce() -> (String, String) {
    let verifier_bytes: [u8; 32] = rand::rng().random();
    let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);
    let challenge = challenge_for(&verifier);
    (verifier, challenge)
}

/// S256 challenge for a given verifier: `BASE64URL(SHA256(verifier))`.
#[must_use]
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Generate a random OAuth `state` parameter (128 bits of entropy).
#[must_use]
pub fn generate_state() -> String {
    random_token()
}

/// Generate a random OIDC nonce (128 bits of entropy).
#[must_use]
pub fn generate_nonce() -> String {
    random_token()
}

fn random_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_is_base64url_safe() {
        for _ in 0..10 {
            let (verifier, challenge) = generate_pkce();
            assert!(verifier.len() >= 43);
            assert!(!verifier.contains('+'));
            assert!(!verifier.contains('/'));
            assert!(!verifier.contains('='));
            assert!(!challenge.contains('='));
        }
    }

    #[test]
    fn challenge_is_sha256_of_verifier() {
        let (verifier, challenge) = generate_pkce();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        assert_eq!(challenge, expected);
    }

    #[test]
    fn challenge_is_deterministic() {
        assert_eq!(challenge_for("fixed-verifier"), challenge_for("fixed-verifier"));
        assert_ne!(challenge_for("verifier-a"), challenge_for("verifier-b"));
    }

    #[test]
    fn generated_values_are_unique() {
        let (v1, c1) = generate_pkce();
        let (v2, c2) = generate_pkce();
        assert_ne!(v1, v2);
        assert_ne!(c1, c2);
        assert_ne!(generate_state(), generate_state());
        assert_ne!(generate_nonce(), generate_nonce());
    }

    #[test]
    fn state_has_at_least_128_bits() {
        // 16 random bytes -> 22 base64url chars
        assert!(generate_state().len() >= 22);
        assert!(generate_nonce().len() >= 22);
    }
}
