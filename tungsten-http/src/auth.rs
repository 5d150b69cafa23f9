//! Signing-key hashing for bearer authentication.
//!
//! The worker never sends a signing key verbatim: the secret portion is
//! SHA-256 hashed and the scope prefix (`signkey-prod-`, `signkey-branch-`
//! and friends) is kept so the API can route the lookup.

use sha2::{Digest, Sha256};

/// Hash a signing key for use as a bearer token.
///
/// The secret after the `signkey-<scope>-` prefix is hex-decoded when
/// possible (raw bytes otherwise), SHA-256 hashed, and re-prefixed.
pub fn hashed_signing_key(key: &str) -> String {
    let (prefix, secret) = split_prefix(key);
    let raw = hex::decode(secret).unwrap_or_else(|_| secret.as_bytes().to_vec());
    let digest = Sha256::digest(&raw);
    format!("{prefix}{}", hex::encode(digest))
}

/// Whether a key is branch-scoped, which makes the environment tag
/// mandatory in the worker configuration.
pub fn is_branch_scoped(key: &str) -> bool {
    key.starts_with("signkey-branch-")
}

fn split_prefix(key: &str) -> (&str, &str) {
    if let Some(rest) = key.strip_prefix("signkey-") {
        if let Some(idx) = rest.find('-') {
            return key.split_at("signkey-".len() + idx + 1);
        }
    }
    ("", key)
}
