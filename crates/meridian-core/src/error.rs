//! Coded errors that survive cross-node transport.
//!
//! Every error carries a string code, a human-readable message and optional
//! metadata. The code travels the wire verbatim, so errors raised on one
//! node are observed with the same code by the caller.

use std::collections::HashMap;

use meridian_proto::{ErrorRecord, ProtoError};
use thiserror::Error;

/// Error codes raised by the core.
///
/// The wire treats codes as opaque strings; this enum only names the ones
/// the core itself produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Route has no registered handler.
    NotFound,
    /// Payload failed to decode, or the request is malformed.
    BadRequest,
    /// Internal failure, including recovered handler panics.
    Internal,
    /// Unclassified error; the default for empty wire codes.
    Unknown,
    /// A cross-node call outlived its deadline.
    Timeout,
    /// No peer client is registered for the target server.
    NoConnectionToServer,
    /// A binding-directory lookup was needed but no module is configured.
    NoBindingStorageModule,
    /// The operation is not supported on this transport.
    NotImplemented,
    /// Message kind is outside the valid range.
    WrongMessageType,
    /// A request arrived for a notify handler; dispatch aborts.
    RequestOnNotify,
    /// A notify arrived for a request handler; dispatch continues.
    NotifyOnRequest,
    /// A compressed route code is absent from the dictionary.
    RouteInfoNotFound,
    /// Frame is truncated or structurally malformed.
    InvalidMessage,
}

impl ErrorCode {
    /// The wire representation of this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::BadRequest => "BadRequest",
            Self::Internal => "Internal",
            Self::Unknown => "Unknown",
            Self::Timeout => "Timeout",
            Self::NoConnectionToServer => "NoConnectionToServer",
            Self::NoBindingStorageModule => "NoBindingStorageModule",
            Self::NotImplemented => "NotImplemented",
            Self::WrongMessageType => "WrongMessageType",
            Self::RequestOnNotify => "RequestOnNotify",
            Self::NotifyOnRequest => "NotifyOnRequest",
            Self::RouteInfoNotFound => "RouteInfoNotFound",
            Self::InvalidMessage => "InvalidMessage",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coded error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ClusterError {
    /// Opaque error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional metadata forwarded with the error.
    pub metadata: HashMap<String, String>,
}

impl ClusterError {
    /// Creates an error with one of the core's codes.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_str().to_owned(),
            message: message.into(),
            metadata: HashMap::new(),
        }
    }

    /// Creates an error with an opaque code, e.g. one received on the wire.
    #[must_use]
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            metadata: HashMap::new(),
        }
    }

    /// Attaches metadata to the error.
    #[must_use]
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether this error carries the given core code.
    #[must_use]
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code.as_str()
    }

    /// Builds an error from its wire record, defaulting an empty code to
    /// [`ErrorCode::Unknown`].
    #[must_use]
    pub fn from_record(record: ErrorRecord) -> Self {
        let code = if record.code.is_empty() {
            ErrorCode::Unknown.as_str().to_owned()
        } else {
            record.code
        };
        Self {
            code,
            message: record.message,
            metadata: record.metadata.into_iter().collect(),
        }
    }

    /// Converts this error to its wire record.
    #[must_use]
    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord {
            code: self.code.clone(),
            message: self.message.clone(),
            metadata: self
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

impl From<ProtoError> for ClusterError {
    fn from(err: ProtoError) -> Self {
        let code = match &err {
            ProtoError::InvalidMessage | ProtoError::RouteTooLong(_) => ErrorCode::InvalidMessage,
            ProtoError::WrongMessageType(_) => ErrorCode::WrongMessageType,
            ProtoError::RouteInfoNotFound(_) => ErrorCode::RouteInfoNotFound,
            ProtoError::InvalidRoute(_) | ProtoError::Deserialisation(_) => ErrorCode::BadRequest,
            ProtoError::MessageTooLarge { .. }
            | ProtoError::UnsupportedVersion(_)
            | ProtoError::UnknownFrameType(_)
            | ProtoError::CorrelationMismatch { .. }
            | ProtoError::Serialisation(_)
            | ProtoError::Io(_) => ErrorCode::Unknown,
            ProtoError::DuplicatedRoute { .. } => ErrorCode::Internal,
        };
        Self::new(code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_wire_code_defaults_to_unknown() {
        let err = ClusterError::from_record(ErrorRecord {
            code: String::new(),
            message: "x".to_owned(),
            metadata: Vec::new(),
        });
        assert!(err.is(ErrorCode::Unknown));
        assert_eq!(err.message, "x");
    }

    #[test]
    fn wire_code_is_retained() {
        let err = ClusterError::from_record(ErrorRecord {
            code: "GAME-001".to_owned(),
            message: "room full".to_owned(),
            metadata: vec![("room".to_owned(), "lobby".to_owned())],
        });
        assert_eq!(err.code, "GAME-001");
        assert_eq!(err.metadata.get("room").map(String::as_str), Some("lobby"));
    }

    #[test]
    fn record_roundtrip() {
        let err = ClusterError::new(ErrorCode::NotFound, "handler: x not found");
        let back = ClusterError::from_record(err.to_record());
        assert_eq!(back, err);
    }

    #[test]
    fn proto_errors_map_to_codes() {
        let err: ClusterError = ProtoError::WrongMessageType(5).into();
        assert!(err.is(ErrorCode::WrongMessageType));

        let err: ClusterError = ProtoError::RouteInfoNotFound(7).into();
        assert!(err.is(ErrorCode::RouteInfoNotFound));

        let err: ClusterError = ProtoError::InvalidMessage.into();
        assert!(err.is(ErrorCode::InvalidMessage));
    }
}
