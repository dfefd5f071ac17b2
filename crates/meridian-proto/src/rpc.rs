//! Inter-node RPC record types.
//!
//! These are the shapes exchanged between peers; the byte format of the
//! channel that carries them is the envelope codec in [`crate::frame`].

use rkyv::{Archive, Deserialize, Serialize};

use crate::message::{Message, MessageKind};

/// The kind of an inter-node RPC.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RpcKind {
    /// A user-addressed call forwarded to the owning backend.
    User = 0,
    /// Session binding broadcast.
    SystemBind = 1,
    /// Kick delivered to the owning frontend.
    SystemKick = 2,
    /// Push delivered to the owning frontend.
    SystemPush = 3,
}

/// Snapshot of a client-link message embedded in a request.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    /// Kind of the client message that triggered the call.
    pub kind: MessageKind,
    /// Correlation id from the client link; zero for notify.
    pub id: u64,
    /// Full route string.
    pub route: String,
    /// Payload bytes.
    pub data: Vec<u8>,
}

impl From<&Message> for MessageRecord {
    fn from(message: &Message) -> Self {
        Self {
            kind: message.kind,
            id: message.id,
            route: message.route.clone().unwrap_or_default(),
            data: message.data.clone(),
        }
    }
}

/// Snapshot of a user session carried with a request.
///
/// `data` is the serializer-encoded session attribute map; the core treats
/// it as opaque bytes.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionRecord {
    /// Frontend-local session id.
    pub id: i64,
    /// Bound user id; empty while unauthenticated.
    pub uid: String,
    /// Encoded session attributes.
    pub data: Vec<u8>,
}

/// A request directed at one peer.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RpcRequest {
    /// RPC kind.
    pub kind: RpcKind,
    /// Full route string.
    pub route: String,
    /// Session snapshot, when the call is session-scoped.
    pub session: Option<SessionRecord>,
    /// The client message that triggered the call.
    pub msg: MessageRecord,
    /// Originating server id.
    pub frontend_id: String,
    /// Propagated context pairs.
    pub metadata: Vec<(String, String)>,
}

/// Error shape that survives cross-node transport.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorRecord {
    /// Opaque error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional error metadata.
    pub metadata: Vec<(String, String)>,
}

/// The reply to an [`RpcRequest`].
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct RpcResponse {
    /// Serialized response payload.
    pub data: Vec<u8>,
    /// Error, when the call failed on the remote side.
    pub error: Option<ErrorRecord>,
}

impl RpcResponse {
    /// A successful response carrying `data`.
    #[must_use]
    pub fn ok(data: Vec<u8>) -> Self {
        Self { data, error: None }
    }

    /// A failed response carrying an error record.
    #[must_use]
    pub fn err(error: ErrorRecord) -> Self {
        Self {
            data: Vec::new(),
            error: Some(error),
        }
    }
}

/// Session binding broadcast: `uid` is now owned by frontend `frontend_id`.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BindRecord {
    /// Bound user id.
    pub uid: String,
    /// Owning frontend server id.
    pub frontend_id: String,
}

/// Kick directed at a user's frontend.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KickRecord {
    /// User to disconnect.
    pub user_id: String,
}

/// Push directed at a user's frontend.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PushRecord {
    /// Target user id.
    pub uid: String,
    /// Route delivered to the client.
    pub route: String,
    /// Serialized push payload.
    pub data: Vec<u8>,
}

/// Frame payload of the peer channel.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// Directed call.
    CallRequest(RpcRequest),
    /// Reply to a directed call.
    CallResponse(RpcResponse),
    /// Session binding broadcast.
    Bind(BindRecord),
    /// Kick delivery.
    Kick(KickRecord),
    /// Push delivery.
    Push(PushRecord),
    /// Bare acknowledgement for bind/kick/push.
    Ack,
}
