//! Reading the `Idempotency-Key` header and hashing request payloads.

use axum::http::HeaderMap;
use serde::Serialize;
use sha2::{Digest, Sha256};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Keys longer than this are truncated.
pub const MAX_KEY_CHARS: usize = 200;

/// The caller-supplied key, trimmed and truncated.  Blank or missing
/// headers yield `None`, meaning the request is not de-duplicated.
pub fn read_idempotency_key(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(IDEMPOTENCY_KEY_HEADER)?.to_str().ok()?.trim();
    if value.is_empty() {
        return None;
    }
    Some(value.chars().take(MAX_KEY_CHARS).collect())
}

/// Hex SHA-256 of the normalised JSON form of a payload.  Object keys
/// are emitted in sorted order, so two payloads that differ only in key
/// order hash the same.
pub fn hash_payload<T: Serialize + ?Sized>(payload: &T) -> Result<String, serde_json::Error> {
    let normalised = serde_json::to_value(payload)?;
    let bytes = serde_json::to_vec(&normalised)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}
