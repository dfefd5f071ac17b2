//! Error types for the protocol.

use thiserror::Error;

/// Protocol errors.
#[derive(Error, Debug)]
pub enum ProtoError {
    /// Frame is truncated or structurally malformed.
    #[error("invalid message")]
    InvalidMessage,

    /// Flag byte carries a message kind outside the valid range.
    #[error("wrong message type: {0}")]
    WrongMessageType(u8),

    /// A compressed route code has no entry in the dictionary.
    #[error("route info not found in dictionary: code {0}")]
    RouteInfoNotFound(u16),

    /// Route string does not parse as `[serverType.]service.method`.
    #[error("invalid route: {0}")]
    InvalidRoute(String),

    /// Uncompressed routes are length-prefixed with a single byte.
    #[error("route too long: {0} bytes (max 255)")]
    RouteTooLong(usize),

    /// A dictionary install contained a duplicate route or code.
    #[error("duplicated route (route: {route}, code: {code})")]
    DuplicatedRoute { route: String, code: u16 },

    /// Message exceeds the peer-channel size limit.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Unsupported peer-channel protocol version.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    /// Unknown peer-channel frame type.
    #[error("unknown frame type: {0}")]
    UnknownFrameType(u16),

    /// A response envelope did not echo the request's correlation id.
    #[error("correlation id mismatch: sent {sent}, received {received}")]
    CorrelationMismatch { sent: String, received: String },

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Deserialisation error.
    #[error("deserialisation error: {0}")]
    Deserialisation(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
