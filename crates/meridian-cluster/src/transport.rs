//! Peer channel transport.
//!
//! A [`PeerChannel`] exposes the four logical methods of the inter-node
//! RPC surface. [`TcpConnector`] produces the stock implementation: framed
//! rkyv envelopes over a TCP stream, one exchange at a time, correlation
//! ids checked on every reply. The [`Connector`] seam lets tests and other
//! transports substitute their own channels.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meridian_core::{ClusterError, ErrorCode};
use meridian_proto::{
    BindRecord, Envelope, FrameCodec, FrameHeader, KickRecord, PeerMessage, ProtoError,
    PushRecord, RpcRequest, RpcResponse, FRAME_HEADER_SIZE,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// The four logical methods of the inter-node RPC surface.
#[async_trait]
pub trait PeerChannel: Send + Sync {
    /// Directed call; the reply carries payload bytes or an error record.
    async fn call(&self, request: RpcRequest) -> Result<RpcResponse, ClusterError>;

    /// Announces a session binding.
    async fn session_bind(&self, msg: BindRecord) -> Result<(), ClusterError>;

    /// Delivers a kick to the user's frontend.
    async fn kick_user(&self, msg: KickRecord) -> Result<(), ClusterError>;

    /// Delivers a push to the user's frontend.
    async fn push_to_user(&self, push: PushRecord) -> Result<(), ClusterError>;
}

impl std::fmt::Debug for dyn PeerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn PeerChannel")
    }
}

/// Dials peer addresses into channels.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a channel to `address` within `timeout`.
    async fn connect(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn PeerChannel>, ClusterError>;
}

/// Connector producing [`TcpChannel`]s over plain (insecure) TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn PeerChannel>, ClusterError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                ClusterError::new(ErrorCode::Timeout, format!("dial {address} timed out"))
            })?
            .map_err(|e| {
                ClusterError::new(ErrorCode::Unknown, format!("dial {address}: {e}"))
            })?;
        Ok(Arc::new(TcpChannel::new(stream)))
    }
}

/// A peer channel over one TCP stream.
///
/// Exchanges are serialised on the stream's mutex; each request envelope
/// carries a fresh correlation id and the reply must echo it.
pub struct TcpChannel {
    stream: Mutex<TcpStream>,
    codec: Mutex<FrameCodec>,
}

impl TcpChannel {
    /// Wraps an established stream.
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Mutex::new(stream),
            codec: Mutex::new(FrameCodec::with_capacity(8192)),
        }
    }

    async fn exchange(&self, payload: PeerMessage) -> Result<PeerMessage, ClusterError> {
        let envelope = Envelope::new(payload);
        let sent = envelope.header.correlation_id;

        let bytes = {
            let mut codec = self.codec.lock().await;
            codec.encode(&envelope)?.to_vec()
        };

        let mut stream = self.stream.lock().await;
        stream.write_all(&bytes).await.map_err(channel_io_error)?;
        stream.flush().await.map_err(channel_io_error)?;

        let mut header_buf = [0u8; FRAME_HEADER_SIZE];
        stream
            .read_exact(&mut header_buf)
            .await
            .map_err(channel_io_error)?;
        let header = FrameHeader::decode(&header_buf).map_err(ClusterError::from)?;
        header.validate_payload_len().map_err(ClusterError::from)?;

        let mut payload_buf = vec![0u8; header.payload_len as usize];
        stream
            .read_exact(&mut payload_buf)
            .await
            .map_err(channel_io_error)?;
        drop(stream);

        let response: Envelope<PeerMessage> =
            FrameCodec::decode(&payload_buf).map_err(ClusterError::from)?;

        if response.header.correlation_id != sent {
            return Err(ClusterError::from(ProtoError::CorrelationMismatch {
                sent: sent.to_string(),
                received: response.header.correlation_id.to_string(),
            }));
        }

        Ok(response.payload)
    }
}

#[async_trait]
impl PeerChannel for TcpChannel {
    async fn call(&self, request: RpcRequest) -> Result<RpcResponse, ClusterError> {
        match self.exchange(PeerMessage::CallRequest(request)).await? {
            PeerMessage::CallResponse(response) => Ok(response),
            other => Err(unexpected_reply("CallResponse", &other)),
        }
    }

    async fn session_bind(&self, msg: BindRecord) -> Result<(), ClusterError> {
        expect_ack(self.exchange(PeerMessage::Bind(msg)).await?)
    }

    async fn kick_user(&self, msg: KickRecord) -> Result<(), ClusterError> {
        expect_ack(self.exchange(PeerMessage::Kick(msg)).await?)
    }

    async fn push_to_user(&self, push: PushRecord) -> Result<(), ClusterError> {
        expect_ack(self.exchange(PeerMessage::Push(push)).await?)
    }
}

fn expect_ack(reply: PeerMessage) -> Result<(), ClusterError> {
    match reply {
        PeerMessage::Ack => Ok(()),
        other => Err(unexpected_reply("Ack", &other)),
    }
}

fn unexpected_reply(expected: &str, got: &PeerMessage) -> ClusterError {
    ClusterError::new(
        ErrorCode::Unknown,
        format!("peer channel: expected {expected}, got {got:?}"),
    )
}

fn channel_io_error(err: std::io::Error) -> ClusterError {
    ClusterError::new(ErrorCode::Unknown, format!("peer channel: {err}"))
}
