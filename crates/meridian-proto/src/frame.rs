//! Peer-channel frame encoding and decoding.
//!
//! Inter-node records travel as rkyv-serialised envelopes behind a fixed
//! 8-byte header:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              Frame Header (8 bytes, fixed)              │
//! ├──────────────┬──────────────┬───────────────────────────┤
//! │  Version (2) │ Frame Type(2)│    Payload Length (4)     │
//! ├──────────────┴──────────────┴───────────────────────────┤
//! │                 rkyv-serialised Envelope                │
//! └─────────────────────────────────────────────────────────┘
//! ```

use rkyv::api::high::{HighDeserializer, HighSerializer, HighValidator};
use rkyv::bytecheck::CheckBytes;
use rkyv::rancor::Error as RkyvError;
use rkyv::ser::allocator::ArenaHandle;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use crate::error::ProtoError;

/// Frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Maximum envelope size (10 MB).
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Protocol version constants.
pub mod version {
    /// Current peer-channel protocol version.
    pub const CURRENT: u16 = 1;

    /// Minimum supported peer-channel protocol version.
    pub const MIN_SUPPORTED: u16 = 1;
}

/// Frame type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FrameType {
    /// Directed RPC traffic.
    Rpc = 0x01,
}

impl FrameType {
    /// Creates a frame type from its numeric value.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x01 => Some(Self::Rpc),
            _ => None,
        }
    }

    /// Returns the numeric value of this frame type.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Frame header preceding every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol version.
    pub version: u16,
    /// Frame type discriminant.
    pub frame_type: FrameType,
    /// Length of the envelope payload in bytes.
    pub payload_len: u32,
}

impl FrameHeader {
    /// Creates a header for the current protocol version.
    #[must_use]
    pub const fn new(frame_type: FrameType, payload_len: u32) -> Self {
        Self {
            version: version::CURRENT,
            frame_type,
            payload_len,
        }
    }

    /// Encodes the header to bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.version.to_be_bytes());
        buf[2..4].copy_from_slice(&self.frame_type.as_u16().to_be_bytes());
        buf[4..8].copy_from_slice(&self.payload_len.to_be_bytes());
        buf
    }

    /// Decodes a header from bytes.
    pub fn decode(bytes: &[u8; FRAME_HEADER_SIZE]) -> Result<Self, ProtoError> {
        let version = u16::from_be_bytes([bytes[0], bytes[1]]);
        if version < version::MIN_SUPPORTED || version > version::CURRENT {
            return Err(ProtoError::UnsupportedVersion(version));
        }

        let frame_type_raw = u16::from_be_bytes([bytes[2], bytes[3]]);
        let frame_type = FrameType::from_u16(frame_type_raw)
            .ok_or(ProtoError::UnknownFrameType(frame_type_raw))?;
        let payload_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);

        Ok(Self {
            version,
            frame_type,
            payload_len,
        })
    }

    /// Validates the payload length against the size limit.
    pub fn validate_payload_len(&self) -> Result<(), ProtoError> {
        let len = self.payload_len as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(ProtoError::MessageTooLarge {
                size: len,
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(())
    }
}

/// Correlation id for request/response matching on the peer channel.
///
/// ULID format: 128-bit, lexicographically sortable.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[rkyv(compare(PartialEq))]
pub struct CorrelationId(pub [u8; 16]);

impl CorrelationId {
    /// Creates a fresh correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_bytes())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", ulid::Ulid::from_bytes(self.0))
    }
}

/// Envelope header carried with every peer-channel payload.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Protocol version.
    pub version: u16,
    /// Correlation id; responses echo the request's.
    pub correlation_id: CorrelationId,
    /// Optional deadline in nanoseconds since the Unix epoch.
    pub deadline_ns: Option<u64>,
}

impl EnvelopeHeader {
    /// Creates a header with a fresh correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: version::CURRENT,
            correlation_id: CorrelationId::new(),
            deadline_ns: None,
        }
    }

    /// Creates a response header echoing the request's correlation id.
    #[must_use]
    pub fn response_to(request: &Self) -> Self {
        Self {
            version: version::CURRENT,
            correlation_id: request.correlation_id,
            deadline_ns: None,
        }
    }
}

impl Default for EnvelopeHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// A peer-channel envelope: header metadata plus a typed payload.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Envelope<T> {
    /// Envelope header.
    pub header: EnvelopeHeader,
    /// The payload.
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Creates a new envelope with a fresh correlation id.
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self {
            header: EnvelopeHeader::new(),
            payload,
        }
    }

    /// Creates a response envelope echoing the request's correlation id.
    #[must_use]
    pub fn response_to(request_header: &EnvelopeHeader, payload: T) -> Self {
        Self {
            header: EnvelopeHeader::response_to(request_header),
            payload,
        }
    }
}

/// Codec for peer-channel envelopes.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buffer: Vec<u8>,
}

impl FrameCodec {
    /// Creates a new codec.
    #[must_use]
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Creates a codec with pre-allocated buffer capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encodes an envelope to bytes, frame header included.
    pub fn encode<T>(&mut self, envelope: &Envelope<T>) -> Result<&[u8], ProtoError>
    where
        T: Archive,
        Envelope<T>: for<'a> Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, RkyvError>>,
    {
        let payload = rkyv::to_bytes::<RkyvError>(envelope)
            .map_err(|e| ProtoError::Serialisation(e.to_string()))?;

        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(ProtoError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let header = FrameHeader::new(FrameType::Rpc, payload.len() as u32);
        self.buffer.clear();
        self.buffer.extend_from_slice(&header.encode());
        self.buffer.extend_from_slice(&payload);

        Ok(&self.buffer)
    }

    /// Decodes an envelope from payload bytes (frame header excluded).
    pub fn decode<T>(bytes: &[u8]) -> Result<Envelope<T>, ProtoError>
    where
        T: Archive,
        <Envelope<T> as Archive>::Archived: for<'a> CheckBytes<HighValidator<'a, RkyvError>>
            + Deserialize<Envelope<T>, HighDeserializer<RkyvError>>,
    {
        rkyv::from_bytes::<Envelope<T>, RkyvError>(bytes)
            .map_err(|e| ProtoError::Deserialisation(e.to_string()))
    }
}
