//! Canonical serialization for fingerprints.
//!
//! Prompts and data exports carry an xxh64 fingerprint over their canonical
//! JSON form. Only ordered collections (`Vec`, `BTreeMap`, `BTreeSet`) may
//! appear in fingerprinted values, so equal values always hash equally.

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

/// Serialize a value to canonical JSON bytes.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// xxh64 of the canonical form of a value.
pub fn canonical_hash<T: Serialize>(value: &T) -> Result<u64, serde_json::Error> {
    Ok(xxh64(&to_canonical_bytes(value)?, 0))
}

/// Canonical hash as a 16-character hex string.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    canonical_hash(value).map(|h| format!("{:016x}", h))
}
