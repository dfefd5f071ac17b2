//! Payload serialisation seam.
//!
//! User payloads are encoded and decoded by an externally supplied
//! serializer; the core only fixes the interface and the error payload
//! convention. [`JsonSerializer`] is the stock implementation.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, ErrorCode};

/// Encodes and decodes user payloads.
pub trait Serializer: Send + Sync + 'static {
    /// Serialises a value to payload bytes.
    fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ClusterError>;

    /// Deserialises payload bytes into a value.
    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, ClusterError>;
}

/// JSON serializer backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ClusterError> {
        serde_json::to_vec(value)
            .map_err(|e| ClusterError::new(ErrorCode::Internal, format!("json marshal: {e}")))
    }

    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, ClusterError> {
        serde_json::from_slice(bytes)
            .map_err(|e| ClusterError::new(ErrorCode::BadRequest, format!("json unmarshal: {e}")))
    }
}

/// The error shape delivered to clients in error responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    /// Opaque error code.
    pub code: String,
    /// Human-readable message.
    pub msg: String,
    /// Optional error metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl From<&ClusterError> for ErrorPayload {
    fn from(err: &ClusterError) -> Self {
        Self {
            code: err.code.clone(),
            msg: err.message.clone(),
            metadata: err.metadata.clone(),
        }
    }
}

/// Encodes an error through the serializer's error convention.
pub fn error_payload<S: Serializer>(
    serializer: &S,
    err: &ClusterError,
) -> Result<Vec<u8>, ClusterError> {
    serializer.marshal(&ErrorPayload::from(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Probe {
        name: String,
    }

    #[test]
    fn json_roundtrip() {
        let serializer = JsonSerializer;
        let value = Probe {
            name: "A".to_owned(),
        };

        let bytes = serializer.marshal(&value).unwrap();
        let back: Probe = serializer.unmarshal(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn unmarshal_failure_is_bad_request() {
        let serializer = JsonSerializer;
        let err = serializer.unmarshal::<Probe>(b"not json").unwrap_err();
        assert!(err.is(ErrorCode::BadRequest));
    }

    #[test]
    fn error_payload_shape() {
        let serializer = JsonSerializer;
        let err = ClusterError::new(ErrorCode::NotFound, "handler: x not found");

        let bytes = error_payload(&serializer, &err).unwrap();
        let payload: ErrorPayload = serializer.unmarshal(&bytes).unwrap();
        assert_eq!(payload.code, "NotFound");
        assert_eq!(payload.msg, "handler: x not found");
    }
}
