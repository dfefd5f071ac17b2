//! Client-link message codec.
//!
//! Every frame on the client link is one [`Message`]. The header is
//! deliberately small:
//!
//! ```text
//! flag(1 byte) | message id(0..5 bytes, varint) | route(0..255 bytes)
//! ```
//!
//! The flag byte partitions as `reserved(4) | kind(3) | routeCompressed(1)`.
//! Two of the reserved bits are claimed: `0x20` marks an error response and
//! `0x10` marks a gzipped payload. The message id is unsigned LEB128 (7 bits
//! per byte, MSB continuation) and is only present for Request and Response.
//! The route is either a 1-byte length plus UTF-8 bytes, or a 2-byte
//! big-endian dictionary code when route compression applies.

use std::io::{Read, Write};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rkyv::{Archive, Deserialize, Serialize};

use crate::dictionary::RouteDictionary;
use crate::error::ProtoError;

const ERROR_MASK: u8 = 0x20;
const GZIP_MASK: u8 = 0x10;
const ROUTE_COMPRESS_MASK: u8 = 0x01;
const KIND_MASK: u8 = 0x07;

/// Minimum size of a well-formed frame: flag plus one id or route byte.
const MIN_FRAME_LEN: usize = 2;

/// Maximum encoded length of a message id varint.
const MAX_ID_BYTES: usize = 5;

/// The kind of a client-link message.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Client request expecting a response.
    Request = 0x00,
    /// Client notification, no response.
    Notify = 0x01,
    /// Server response to a request.
    Response = 0x02,
    /// Server-originated push.
    Push = 0x03,
}

impl MessageKind {
    /// Creates a message kind from its wire value.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Request),
            0x01 => Some(Self::Notify),
            0x02 => Some(Self::Response),
            0x03 => Some(Self::Push),
            _ => None,
        }
    }

    /// Returns the wire value of this kind.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Kinds that carry a route on the wire.
    #[must_use]
    pub const fn routable(self) -> bool {
        matches!(self, Self::Request | Self::Notify | Self::Push)
    }

    /// Kinds that carry a message id on the wire.
    #[must_use]
    pub const fn has_id(self) -> bool {
        matches!(self, Self::Request | Self::Response)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => write!(f, "Request"),
            Self::Notify => write!(f, "Notify"),
            Self::Response => write!(f, "Response"),
            Self::Push => write!(f, "Push"),
        }
    }
}

/// One frame on the client link, decoded or awaiting encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message kind.
    pub kind: MessageKind,
    /// Correlation id; zero while in notify or push mode.
    pub id: u64,
    /// Route locating the target handler; absent for responses.
    pub route: Option<String>,
    /// Opaque payload bytes.
    pub data: Vec<u8>,
    /// Whether the route travelled as a dictionary code.
    pub compressed: bool,
    /// Whether this is an error response.
    pub err: bool,
}

impl Message {
    /// Creates a request message.
    #[must_use]
    pub fn request(id: u64, route: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::Request,
            id,
            route: Some(route.into()),
            data,
            compressed: false,
            err: false,
        }
    }

    /// Creates a notify message.
    #[must_use]
    pub fn notify(route: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::Notify,
            id: 0,
            route: Some(route.into()),
            data,
            compressed: false,
            err: false,
        }
    }

    /// Creates a response message.
    #[must_use]
    pub fn response(id: u64, data: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::Response,
            id,
            route: None,
            data,
            compressed: false,
            err: false,
        }
    }

    /// Creates an error response message.
    #[must_use]
    pub fn error_response(id: u64, data: Vec<u8>) -> Self {
        Self {
            err: true,
            ..Self::response(id, data)
        }
    }

    /// Creates a push message.
    #[must_use]
    pub fn push(route: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::Push,
            id: 0,
            route: Some(route.into()),
            data,
            compressed: false,
            err: false,
        }
    }
}

/// Codec for client-link messages.
///
/// Holds the optional shared route dictionary and the payload compression
/// switch. Without a dictionary the route-compressed flag is never set on
/// egress, and a compressed route on ingress fails with
/// [`ProtoError::RouteInfoNotFound`].
#[derive(Debug, Clone, Default)]
pub struct MessageCodec {
    dictionary: Option<Arc<RouteDictionary>>,
    data_compression: bool,
}

impl MessageCodec {
    /// Creates a codec with no dictionary and no payload compression.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a shared route dictionary for route compression.
    #[must_use]
    pub fn with_dictionary(mut self, dictionary: Arc<RouteDictionary>) -> Self {
        self.dictionary = Some(dictionary);
        self
    }

    /// Enables gzip payload compression on egress.
    ///
    /// The compressed form is used only when strictly smaller than the raw
    /// payload.
    #[must_use]
    pub const fn with_data_compression(mut self, enabled: bool) -> Self {
        self.data_compression = enabled;
        self
    }

    /// Encodes a message to its frame bytes.
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtoError> {
        let kind = message.kind;
        let route = match (kind.routable(), message.route.as_deref()) {
            (true, Some(route)) => Some(route),
            (true, None) => return Err(ProtoError::InvalidMessage),
            (false, _) => None,
        };

        let code = route.and_then(|r| {
            self.dictionary
                .as_ref()
                .and_then(|dict| dict.code_for(r))
        });

        let mut flag = kind.as_u8() << 1;
        if code.is_some() {
            flag |= ROUTE_COMPRESS_MASK;
        }
        if message.err {
            flag |= ERROR_MASK;
        }

        let mut data = std::borrow::Cow::Borrowed(message.data.as_slice());
        if self.data_compression && !message.data.is_empty() {
            let deflated = gzip(&message.data)?;
            if deflated.len() < message.data.len() {
                data = std::borrow::Cow::Owned(deflated);
                flag |= GZIP_MASK;
            }
        }

        let mut buf = Vec::with_capacity(MIN_FRAME_LEN + data.len());
        buf.push(flag);

        if kind.has_id() {
            encode_varint(message.id, &mut buf);
        }

        match (route, code) {
            (_, Some(code)) => buf.extend_from_slice(&code.to_be_bytes()),
            (Some(route), None) => {
                if route.len() > u8::MAX as usize {
                    return Err(ProtoError::RouteTooLong(route.len()));
                }
                buf.push(route.len() as u8);
                buf.extend_from_slice(route.as_bytes());
            }
            (None, None) => {}
        }

        buf.extend_from_slice(&data);
        Ok(buf)
    }

    /// Decodes a message from its frame bytes.
    pub fn decode(&self, bytes: &[u8]) -> Result<Message, ProtoError> {
        if bytes.len() < MIN_FRAME_LEN {
            return Err(ProtoError::InvalidMessage);
        }

        let flag = bytes[0];
        let raw_kind = (flag >> 1) & KIND_MASK;
        let kind =
            MessageKind::from_u8(raw_kind).ok_or(ProtoError::WrongMessageType(raw_kind))?;
        let mut offset = 1;

        let mut id = 0u64;
        if kind.has_id() {
            let (decoded, read) = decode_varint(&bytes[offset..])?;
            id = decoded;
            offset += read;
        }

        let compressed = flag & ROUTE_COMPRESS_MASK != 0;
        let mut route = None;
        if kind.routable() {
            if compressed {
                let raw = bytes
                    .get(offset..offset + 2)
                    .ok_or(ProtoError::InvalidMessage)?;
                let code = u16::from_be_bytes([raw[0], raw[1]]);
                let resolved = self
                    .dictionary
                    .as_ref()
                    .and_then(|dict| dict.route_for(code))
                    .ok_or(ProtoError::RouteInfoNotFound(code))?;
                route = Some(resolved);
                offset += 2;
            } else {
                let len = *bytes.get(offset).ok_or(ProtoError::InvalidMessage)? as usize;
                offset += 1;
                let raw = bytes
                    .get(offset..offset + len)
                    .ok_or(ProtoError::InvalidMessage)?;
                let parsed =
                    std::str::from_utf8(raw).map_err(|_| ProtoError::InvalidMessage)?;
                route = Some(parsed.to_owned());
                offset += len;
            }
        }

        let mut data = bytes[offset..].to_vec();
        if flag & GZIP_MASK != 0 {
            data = gunzip(&data)?;
        }

        Ok(Message {
            kind,
            id,
            route,
            data,
            compressed,
            err: flag & ERROR_MASK != 0,
        })
    }
}

/// Appends an unsigned LEB128 varint to `buf`.
fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            buf.push(byte | 0x80);
        } else {
            buf.push(byte);
            break;
        }
    }
}

/// Decodes an unsigned LEB128 varint, returning the value and bytes read.
fn decode_varint(bytes: &[u8]) -> Result<(u64, usize), ProtoError> {
    let mut value = 0u64;
    for (i, &byte) in bytes.iter().enumerate() {
        if i >= MAX_ID_BYTES {
            return Err(ProtoError::InvalidMessage);
        }
        value |= u64::from(byte & 0x7F) << (7 * i as u32);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(ProtoError::InvalidMessage)
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, ProtoError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>, ProtoError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|_| ProtoError::InvalidMessage)?;
    Ok(out)
}
