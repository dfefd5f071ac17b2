//! Wire protocol types for Meridian client and inter-node communication.
//!
//! Two protocols live here:
//!
//! - The **client-link message codec** ([`message`]): compact framed
//!   messages between game clients and frontend servers, with an optional
//!   route compression dictionary.
//! - The **peer channel** ([`rpc`], [`frame`]): rkyv-serialised records
//!   exchanged between cluster nodes behind a fixed frame header.

pub mod dictionary;
mod error;
pub mod frame;
pub mod message;
pub mod route;
pub mod rpc;

pub use dictionary::RouteDictionary;
pub use error::ProtoError;
pub use frame::{
    CorrelationId, Envelope, EnvelopeHeader, FrameCodec, FrameHeader, FrameType,
    FRAME_HEADER_SIZE, MAX_MESSAGE_SIZE,
};
pub use message::{Message, MessageCodec, MessageKind};
pub use route::Route;
pub use rpc::{
    BindRecord, ErrorRecord, KickRecord, MessageRecord, PeerMessage, PushRecord, RpcKind,
    RpcRequest, RpcResponse, SessionRecord,
};
