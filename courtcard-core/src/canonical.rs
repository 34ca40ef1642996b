//! Canonical JSON serialization and hashing helpers used by the Card
//! Issuer and Verifier.
//!
//! `serde_json::Map` is backed by a `BTreeMap` unless the `preserve_order`
//! feature is enabled (it isn't, here), so `serde_json::Value` objects
//! already serialize with lexicographically sorted keys; this module just
//! names that guarantee and adds the SHA-256 step.

use sha2::{Digest, Sha256};

/// Serialize a `Value` as compact, key-sorted UTF-8 JSON with no
/// insignificant whitespace.
pub fn canonical_json_bytes(value: &serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(value).expect("Value serialization is infallible")
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn canonical_hash(value: &serde_json::Value) -> String {
    sha256_hex(&canonical_json_bytes(value))
}

/// 64 hex zeros — the `prevHash` of chain position 1 for every participant.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

const _ASSERT_ZERO_HASH_LEN: () = assert!(ZERO_HASH.len() == 64);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn different_content_differs() {
        let a = json!({"a": 1});
        let b = json!({"a": 2});
        assert_ne!(canonical_hash(&a), canonical_hash(&b));
    }
}
