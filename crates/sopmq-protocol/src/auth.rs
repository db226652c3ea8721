//! Challenge/response authentication hashing.
//!
//! The final hash concatenates the **hex string** of the password hash
//! with the **raw** challenge bytes before hashing again — the challenge
//! is not hex-encoded a second time. Getting this byte layout wrong means
//! a correct client can never authenticate against a correct server.

use sha2::{Digest, Sha256};

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// `uname_hash = lowercase_hex(SHA256(utf8(username)))`
pub fn uname_hash(username: &str) -> String {
    sha256_hex(username.as_bytes())
}

/// `pw_hash = lowercase_hex(SHA256(utf8(password)))`
pub fn pw_hash(password: &str) -> String {
    sha256_hex(password.as_bytes())
}

/// `challenge_response = lowercase_hex(SHA256(pw_hash_hex ++ raw_challenge))`
///
/// `challenge` is taken as raw bytes, not re-hexed, before the outer hash.
pub fn challenge_response(password: &str, challenge: &[u8]) -> String {
    let pw_hash_hex = pw_hash(password);
    let mut preimage = Vec::with_capacity(pw_hash_hex.len() + challenge.len());
    preimage.extend_from_slice(pw_hash_hex.as_bytes());
    preimage.extend_from_slice(challenge);
    sha256_hex(&preimage)
}

/// Computes the same response from an already-hashed password, as the
/// server does when checking against a stored `pw_hash`.
pub fn challenge_response_from_pw_hash(pw_hash_hex: &str, challenge: &[u8]) -> String {
    let mut preimage = Vec::with_capacity(pw_hash_hex.len() + challenge.len());
    preimage.extend_from_slice(pw_hash_hex.as_bytes());
    preimage.extend_from_slice(challenge);
    sha256_hex(&preimage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uname_hash_is_deterministic_sha256_hex() {
        let a = uname_hash("alice");
        let b = uname_hash("alice");
        let c = uname_hash("bob");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn challenge_response_matches_hash_from_stored_pw_hash() {
        let challenge = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let direct = challenge_response("good", &challenge);
        let via_stored = challenge_response_from_pw_hash(&pw_hash("good"), &challenge);
        assert_eq!(direct, via_stored);
    }

    #[test]
    fn wrong_password_does_not_match() {
        let challenge = [9u8; 32];
        let expected = challenge_response("good", &challenge);
        let attempt = challenge_response("bad", &challenge);
        assert_ne!(expected, attempt);
    }

    #[test]
    fn challenge_is_not_rehexed_before_outer_hash() {
        // If the implementation incorrectly hex-encoded the challenge before
        // the final hash, this would equal `challenge_response`, which it
        // must not for a non-trivial challenge.
        let challenge = [0xABu8, 0xCD, 0xEF];
        let correct = challenge_response("good", &challenge);

        let pw = pw_hash("good");
        let mut wrong_preimage = pw.into_bytes();
        wrong_preimage.extend_from_slice(hex::encode(challenge).as_bytes());
        let incorrect = hex::encode(Sha256::digest(&wrong_preimage));

        assert_ne!(correct, incorrect);
    }
}
