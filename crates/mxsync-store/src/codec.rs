//! Record encoding.
//!
//! Values are stored as CBOR so any backend can treat them as opaque bytes.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StoreError};

/// Encode a value for storage.
pub fn encode<V: Serialize + ?Sized>(value: &V) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

/// Decode a stored value.
pub fn decode<V: DeserializeOwned>(bytes: &[u8]) -> Result<V> {
    ciborium::de::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_value_survives_encoding() {
        let value = json!({ "body": "hi", "n": 3, "nested": { "flag": true } });
        let bytes = encode(&value).unwrap();
        let decoded: serde_json::Value = decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: Result<String> = decode(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }
}
