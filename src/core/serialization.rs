use super::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Compute a stable hash of serialized bytes.
///
/// Uses SeaHash which stays stable across Rust compiler versions, process
/// restarts and machines. Idempotency keys for remote invocations are derived
/// from this hash, so the same logical invocation must produce the same key
/// every time it is replayed.
///
/// Note: not cryptographically secure; stable, fast equality hashing is all
/// that is needed here.
pub fn stable_hash(bytes: &[u8]) -> u64 {
    seahash::hash(bytes)
}

/// Serializes a value to bytes using JSON.
///
/// # Errors
/// Returns `Error::Serialization` if the value cannot be serialized.
pub fn serialize_value<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(Error::Serialization)
}

/// Deserializes bytes to a value using JSON.
///
/// # Errors
/// Returns `Error::Deserialization` if the bytes cannot be deserialized.
pub fn deserialize_value<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(Error::Deserialization)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_hash_distinguishes_values() {
        let a = serialize_value(&Some("SAVE20".to_string())).unwrap();
        let b = serialize_value(&Option::<String>::None).unwrap();
        assert_ne!(stable_hash(&a), stable_hash(&b));
        assert_eq!(stable_hash(&a), stable_hash(&a));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let value = vec!["hello".to_string(), "world".to_string()];
        let bytes = serialize_value(&value).unwrap();
        let back: Vec<String> = deserialize_value(&bytes).unwrap();
        assert_eq!(value, back);
    }
}
