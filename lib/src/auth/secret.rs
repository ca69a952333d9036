//! Client-secret hashing (PBKDF2-HMAC-SHA256) and authorization-code hashing
//! (SHA-256) per spec.md §4.4 step 4/6.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::constants::oauth::{PBKDF2_ITERATIONS, PBKDF2_SALT_BYTES};
use crate::error::Error;

const HASH_LEN: usize = 32;

/// Branchless equality check over equal-length byte slices, so a mismatched
/// client secret can't be timed out by which byte differed.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Hashes an OAuth client secret with a fresh random salt, encoded as
/// `pbkdf2-sha256$<iterations>$<salt-hex>$<hash-hex>` so verification needs
/// no side channel to recover the parameters it was hashed with.
pub fn hash_client_secret(secret: &str) -> Result<String, Error> {
    let mut salt = vec![0u8; PBKDF2_SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut out = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut out);
    Ok(format!(
        "pbkdf2-sha256${PBKDF2_ITERATIONS}${}${}",
        hex::encode(&salt),
        hex::encode(out)
    ))
}

/// Constant-time verification against a hash produced by
/// [`hash_client_secret`].
pub fn verify_client_secret(secret: &str, hash: &str) -> Result<bool, Error> {
    let mut parts = hash.split('$');
    let scheme = parts.next();
    let iterations = parts.next();
    let salt_hex = parts.next();
    let hash_hex = parts.next();
    let (Some("pbkdf2-sha256"), Some(iterations), Some(salt_hex), Some(hash_hex)) =
        (scheme, iterations, salt_hex, hash_hex)
    else {
        return Err(Error::Database("stored client secret hash is corrupt".to_string()));
    };
    let iterations: u32 = iterations
        .parse()
        .map_err(|_| Error::Database("stored client secret hash has an invalid iteration count".to_string()))?;
    let salt = hex::decode(salt_hex)
        .map_err(|_| Error::Database("stored client secret hash has an invalid salt".to_string()))?;
    let expected = hex::decode(hash_hex)
        .map_err(|_| Error::Database("stored client secret hash has an invalid digest".to_string()))?;

    let mut actual = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), &salt, iterations, &mut actual);
    Ok(constant_time_eq(&actual, &expected))
}

/// SHA-256 hex digest of an authorization code. Only the hash is persisted;
/// the code itself is returned to the client exactly once (spec.md §4.4
/// step 6: "Store its hash (not the code itself)").
pub fn hash_authorization_code(code: &str) -> String {
    let digest = Sha256::digest(code.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_secret_round_trips() {
        let hash = hash_client_secret("s3cr3t").unwrap();
        assert!(verify_client_secret("s3cr3t", &hash).unwrap());
        assert!(!verify_client_secret("wrong", &hash).unwrap());
    }

    #[test]
    fn code_hash_is_deterministic() {
        assert_eq!(hash_authorization_code("abc"), hash_authorization_code("abc"));
        assert_ne!(hash_authorization_code("abc"), hash_authorization_code("abd"));
    }
}
