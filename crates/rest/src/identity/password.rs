//! Credential hashing.
//!
//! Hashes are PBKDF2-HMAC-SHA256 with a random 16-byte salt, encoded as
//! `pbkdf2-sha256$<rounds>$<salt>$<hash>` with unpadded standard base64.
//! The round count travels with the hash so it can be raised without
//! invalidating stored credentials.

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use crate::error::{RestError, RestResult};

/// Iterations used by [`hash_credential`].
pub const DEFAULT_ROUNDS: u32 = 100_000;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// Hashes a plaintext credential with [`DEFAULT_ROUNDS`].
pub fn hash_credential(plaintext: &str) -> String {
    hash_credential_with_rounds(plaintext, DEFAULT_ROUNDS)
}

/// Hashes a plaintext credential with an explicit iteration count.
pub fn hash_credential_with_rounds(plaintext: &str, rounds: u32) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut hash = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(plaintext.as_bytes(), &salt, rounds, &mut hash);

    format!(
        "{}${}${}${}",
        SCHEME,
        rounds,
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(hash)
    )
}

/// Checks a plaintext credential against an encoded hash.
///
/// Malformed hashes never verify.
pub fn verify_credential(plaintext: &str, encoded: &str) -> bool {
    let mut parts = encoded.split('$');
    let (Some(SCHEME), Some(rounds), Some(salt), Some(expected), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    let Ok(rounds) = rounds.parse::<u32>() else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (STANDARD_NO_PAD.decode(salt), STANDARD_NO_PAD.decode(expected))
    else {
        return false;
    };
    if rounds == 0 || expected.len() != HASH_LEN {
        return false;
    }

    let mut actual = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(plaintext.as_bytes(), &salt, rounds, &mut actual);
    constant_time_eq(&actual, &expected)
}

/// Hashes on the blocking thread pool so key derivation never stalls the
/// async workers.
pub async fn hash_credential_blocking(plaintext: &str, rounds: u32) -> RestResult<String> {
    let plaintext = plaintext.to_owned();
    tokio::task::spawn_blocking(move || hash_credential_with_rounds(&plaintext, rounds))
        .await
        .map_err(|e| RestError::internal(format!("Credential hashing task failed: {}", e)))
}

/// Verifies on the blocking thread pool.
pub async fn verify_credential_blocking(plaintext: &str, encoded: &str) -> RestResult<bool> {
    let plaintext = plaintext.to_owned();
    let encoded = encoded.to_owned();
    tokio::task::spawn_blocking(move || verify_credential(&plaintext, &encoded))
        .await
        .map_err(|e| RestError::internal(format!("Credential verification task failed: {}", e)))
}

// Compares through an HMAC verification so the comparison time does not
// depend on where the inputs differ.
fn constant_time_eq(actual: &[u8], expected: &[u8]) -> bool {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(actual) else {
        return false;
    };
    mac.update(b"carenet-credential");
    let tag = mac.finalize().into_bytes();
    let Ok(mut check) = Hmac::<Sha256>::new_from_slice(expected) else {
        return false;
    };
    check.update(b"carenet-credential");
    check.verify_slice(&tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_credential_with_rounds("correct horse", 1_000);
        assert!(hash.starts_with("pbkdf2-sha256$1000$"));
        assert!(verify_credential("correct horse", &hash));
        assert!(!verify_credential("wrong horse", &hash));
    }

    #[test]
    fn test_salts_differ() {
        let a = hash_credential_with_rounds("secret", 1_000);
        let b = hash_credential_with_rounds("secret", 1_000);
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        assert!(!verify_credential("secret", ""));
        assert!(!verify_credential("secret", "secret"));
        assert!(!verify_credential("secret", "$2b$10$abcdefghijklmnopqrstuv"));
        assert!(!verify_credential("secret", "pbkdf2-sha256$0$AAAA$AAAA"));
        assert!(!verify_credential("secret", "pbkdf2-sha256$x$AAAA$AAAA"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_blocking_pool_hash_and_verify() {
        let hash = hash_credential_blocking("correct horse", 1_000).await.unwrap();
        assert!(hash.starts_with("pbkdf2-sha256$1000$"));
        assert!(verify_credential_blocking("correct horse", &hash).await.unwrap());
        assert!(!verify_credential_blocking("wrong horse", &hash).await.unwrap());
    }
}
