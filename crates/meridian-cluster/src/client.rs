//! Peer client pool.
//!
//! Tracks the membership of peer servers and keeps one lazily-connected
//! channel per peer. Directed calls, pushes, kicks and binding broadcasts
//! all resolve their target through the pool; user-addressed operations
//! consult the binding directory when the caller does not already know the
//! owning frontend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use meridian_core::context::keys;
use meridian_core::{ClusterError, Context, ErrorCode, Session};
use meridian_proto::{
    BindRecord, KickRecord, Message, MessageRecord, PushRecord, Route, RpcKind, RpcRequest,
    RpcResponse,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::binding::BindingStorage;
use crate::config::RpcClientConfig;
use crate::server::{metadata, InfoRetriever, PeerServer, StaticInfo};
use crate::transport::{Connector, PeerChannel, TcpConnector};

/// One lazily-connected channel bound to a peer.
pub struct PeerClient {
    address: String,
    connector: Arc<dyn Connector>,
    dial_timeout: Duration,
    connected: AtomicBool,
    chan: Mutex<Option<Arc<dyn PeerChannel>>>,
}

impl PeerClient {
    fn new(address: String, connector: Arc<dyn Connector>, dial_timeout: Duration) -> Self {
        Self {
            address,
            connector,
            dial_timeout,
            connected: AtomicBool::new(false),
            chan: Mutex::new(None),
        }
    }

    /// The address this client dials.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether a channel is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Opens the channel; idempotent under the client's lock.
    pub async fn connect(&self) -> Result<(), ClusterError> {
        let mut slot = self.chan.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        let channel = self
            .connector
            .connect(&self.address, self.dial_timeout)
            .await?;
        *slot = Some(channel);
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    /// Closes the channel; the symmetric operation.
    pub async fn disconnect(&self) {
        let mut slot = self.chan.lock().await;
        if slot.take().is_some() {
            self.connected.store(false, Ordering::Release);
        }
    }

    /// The open channel, connecting lazily when necessary.
    ///
    /// The relaxed `connected` read keeps the common already-connected path
    /// off the connect contention; the slot is re-checked under the lock.
    async fn channel(&self) -> Result<Arc<dyn PeerChannel>, ClusterError> {
        if self.connected.load(Ordering::Relaxed) {
            if let Some(channel) = self.chan.lock().await.as_ref() {
                return Ok(channel.clone());
            }
        }

        let mut slot = self.chan.lock().await;
        if let Some(channel) = slot.as_ref() {
            return Ok(channel.clone());
        }
        let channel = self
            .connector
            .connect(&self.address, self.dial_timeout)
            .await?;
        *slot = Some(channel.clone());
        self.connected.store(true, Ordering::Release);
        Ok(channel)
    }
}

/// The peer client pool.
pub struct RpcClient {
    server: PeerServer,
    config: RpcClientConfig,
    clients: DashMap<String, Arc<PeerClient>>,
    connector: Arc<dyn Connector>,
    info_retriever: Arc<dyn InfoRetriever>,
    binding_storage: Option<Arc<dyn BindingStorage>>,
}

impl RpcClient {
    /// Creates a pool for the local `server` with the stock TCP connector.
    #[must_use]
    pub fn new(server: PeerServer, config: RpcClientConfig) -> Self {
        Self {
            server,
            config,
            clients: DashMap::new(),
            connector: Arc::new(TcpConnector),
            info_retriever: Arc::new(StaticInfo::default()),
            binding_storage: None,
        }
    }

    /// Replaces the connector, e.g. with an in-memory transport.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Installs the local deployment info used for host selection.
    #[must_use]
    pub fn with_info_retriever(mut self, info_retriever: Arc<dyn InfoRetriever>) -> Self {
        self.info_retriever = info_retriever;
        self
    }

    /// Installs the binding directory used for user-addressed operations.
    #[must_use]
    pub fn with_binding_storage(mut self, storage: Arc<dyn BindingStorage>) -> Self {
        self.binding_storage = Some(storage);
        self
    }

    /// The peer client for `server_id`, when one is registered.
    #[must_use]
    pub fn peer(&self, server_id: &str) -> Option<Arc<PeerClient>> {
        self.clients.get(server_id).map(|entry| entry.value().clone())
    }

    /// Registers a discovered server and, unless lazy mode is on, connects
    /// eagerly. A connect failure is logged and the client retained so a
    /// later call can retry.
    pub async fn add_server(&self, sv: &PeerServer) {
        let Some((host, port_key)) = self.server_host(sv) else {
            error!(id = %sv.id, "server has no grpcHost specified in metadata");
            return;
        };
        let Some(port) = sv.metadata.get(port_key) else {
            error!(id = %sv.id, port_key, "server has no port specified in metadata");
            return;
        };

        let address = format!("{host}:{port}");
        let client = Arc::new(PeerClient::new(
            address.clone(),
            self.connector.clone(),
            self.config.dialtimeout,
        ));

        if !self.config.lazyconnection {
            if let Err(err) = client.connect().await {
                error!(id = %sv.id, %address, error = %err, "unable to connect to server");
            }
        }

        self.clients.insert(sv.id.clone(), client);
        debug!(id = %sv.id, %address, "added server");
    }

    /// Disconnects and removes a departed server.
    pub async fn remove_server(&self, sv: &PeerServer) {
        if let Some((_, client)) = self.clients.remove(&sv.id) {
            client.disconnect().await;
            debug!(id = %sv.id, "removed server");
        }
    }

    /// Directed call to `target`.
    ///
    /// Builds a request from the tuple, attaches the propagated context
    /// keys and applies the request timeout (tightened by the context's own
    /// deadline). An error record in the reply surfaces as a typed error,
    /// its code defaulting to `Unknown` when empty.
    pub async fn call(
        &self,
        ctx: &Context,
        kind: RpcKind,
        route: &Route,
        session: Option<&Session>,
        msg: &Message,
        target: &PeerServer,
    ) -> Result<RpcResponse, ClusterError> {
        let client = self.peer(&target.id).ok_or_else(no_connection)?;

        let start_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let ctx = ctx
            .add_propagated(keys::ROUTE, route.to_string())
            .add_propagated(keys::START_TIME, start_ns.to_string())
            .add_propagated(keys::PEER_ID, self.server.id.clone());

        let request = RpcRequest {
            kind,
            route: route.to_string(),
            session: session.map(Session::snapshot),
            msg: MessageRecord::from(msg),
            frontend_id: self.server.id.clone(),
            metadata: ctx.to_metadata(),
        };

        let channel = client.channel().await?;
        let response = self
            .bounded(&ctx, channel.call(request), &target.id)
            .await?;

        if let Some(error) = response.error {
            return Err(ClusterError::from_record(error));
        }
        Ok(response)
    }

    /// Sends a push to `uid` through the owning frontend.
    ///
    /// An explicit `frontend.id` wins; otherwise the binding directory
    /// resolves the owner by `frontend.server_type`.
    pub async fn send_push(
        &self,
        uid: &str,
        frontend: &PeerServer,
        push: PushRecord,
    ) -> Result<(), ClusterError> {
        let server_id = if frontend.id.is_empty() {
            self.binding_storage()?
                .user_frontend_id(uid, &frontend.server_type)
                .await?
        } else {
            frontend.id.clone()
        };

        let client = self.peer(&server_id).ok_or_else(no_connection)?;
        let channel = client.channel().await?;
        self.bounded(&Context::new(), channel.push_to_user(push), &server_id)
            .await
    }

    /// Sends a kick to `user_id` through the owning frontend of
    /// `server_type`.
    pub async fn send_kick(
        &self,
        user_id: &str,
        server_type: &str,
        kick: KickRecord,
    ) -> Result<(), ClusterError> {
        let server_id = self
            .binding_storage()?
            .user_frontend_id(user_id, server_type)
            .await?;

        let client = self.peer(&server_id).ok_or_else(no_connection)?;
        let channel = client.channel().await?;
        self.bounded(&Context::new(), channel.kick_user(kick), &server_id)
            .await
    }

    /// Announces that this server now holds `uid`'s session to the peer
    /// previously recorded in the binding directory.
    pub async fn broadcast_session_bind(&self, uid: &str) -> Result<(), ClusterError> {
        let storage = self.binding_storage()?;
        let frontend_id = storage
            .user_frontend_id(uid, &self.server.server_type)
            .await
            .unwrap_or_default();
        if frontend_id.is_empty() {
            return Ok(());
        }

        if let Some(client) = self.peer(&frontend_id) {
            let msg = BindRecord {
                uid: uid.to_owned(),
                frontend_id: self.server.id.clone(),
            };
            let channel = client.channel().await?;
            return self
                .bounded(&Context::new(), channel.session_bind(msg), &frontend_id)
                .await;
        }
        Ok(())
    }

    /// Raw sends are not supported on this transport.
    pub fn send(&self, _uid: &str, _data: &[u8]) -> Result<(), ClusterError> {
        Err(ClusterError::new(
            ErrorCode::NotImplemented,
            "send is not implemented on the peer channel",
        ))
    }

    fn binding_storage(&self) -> Result<&Arc<dyn BindingStorage>, ClusterError> {
        self.binding_storage.as_ref().ok_or_else(|| {
            ClusterError::new(
                ErrorCode::NoBindingStorageModule,
                "no binding storage module is configured",
            )
        })
    }

    /// Awaits `fut` under the request timeout, tightened by the context's
    /// remaining deadline.
    async fn bounded<T>(
        &self,
        ctx: &Context,
        fut: impl std::future::Future<Output = Result<T, ClusterError>>,
        target_id: &str,
    ) -> Result<T, ClusterError> {
        let timeout = match ctx.remaining() {
            Some(remaining) => remaining.min(self.config.requesttimeout),
            None => self.config.requesttimeout,
        };
        tokio::time::timeout(timeout, fut).await.map_err(|_| {
            ClusterError::new(
                ErrorCode::Timeout,
                format!("rpc to server {target_id} timed out"),
            )
        })?
    }

    /// Host and port-key selection for a discovered server.
    ///
    /// Prefers the internal host when caller and callee share a region;
    /// falls back with a warning when region or external host metadata is
    /// missing.
    fn server_host<'a>(&self, sv: &'a PeerServer) -> Option<(&'a str, &'static str)> {
        let region = sv
            .metadata
            .get(metadata::REGION)
            .filter(|value| !value.is_empty());
        let external = sv
            .metadata
            .get(metadata::GRPC_EXTERNAL_HOST)
            .filter(|value| !value.is_empty());
        let internal = sv.metadata.get(metadata::GRPC_HOST);

        let Some(server_region) = region else {
            return if let Some(host) = external {
                warn!(id = %sv.id, "server has no region specified in metadata, using external host");
                Some((host.as_str(), metadata::GRPC_EXTERNAL_PORT))
            } else {
                warn!(id = %sv.id, "server has no region nor external host specified in metadata, using internal host");
                internal.map(|host| (host.as_str(), metadata::GRPC_PORT))
            };
        };

        let same_region = self.info_retriever.region().as_deref() == Some(server_region.as_str());
        match external {
            Some(host) if !same_region => {
                info!(id = %sv.id, "server is in other region, using external host");
                Some((host.as_str(), metadata::GRPC_EXTERNAL_PORT))
            }
            _ => {
                info!(id = %sv.id, "server is in same region or external host not provided, using internal host");
                internal.map(|host| (host.as_str(), metadata::GRPC_PORT))
            }
        }
    }
}

fn no_connection() -> ClusterError {
    ClusterError::new(
        ErrorCode::NoConnectionToServer,
        "no connection to the target server",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lazy_pool(region: Option<&str>) -> RpcClient {
        let config = RpcClientConfig {
            lazyconnection: true,
            ..RpcClientConfig::default()
        };
        let mut pool = RpcClient::new(PeerServer::new("local", "connector"), config);
        if let Some(region) = region {
            pool = pool.with_info_retriever(Arc::new(StaticInfo::with_region(region)));
        }
        pool
    }

    fn peer(id: &str) -> PeerServer {
        PeerServer::new(id, "chat")
            .with_metadata(metadata::GRPC_HOST, "10.0.0.1")
            .with_metadata(metadata::GRPC_PORT, "3434")
            .with_metadata(metadata::GRPC_EXTERNAL_HOST, "203.0.113.1")
            .with_metadata(metadata::GRPC_EXTERNAL_PORT, "3435")
    }

    #[tokio::test]
    async fn same_region_uses_internal_host() {
        let pool = lazy_pool(Some("eu"));
        pool.add_server(&peer("b").with_metadata(metadata::REGION, "eu"))
            .await;
        assert_eq!(pool.peer("b").unwrap().address(), "10.0.0.1:3434");
    }

    #[tokio::test]
    async fn other_region_uses_external_host() {
        let pool = lazy_pool(Some("eu"));
        pool.add_server(&peer("b").with_metadata(metadata::REGION, "us"))
            .await;
        assert_eq!(pool.peer("b").unwrap().address(), "203.0.113.1:3435");
    }

    #[tokio::test]
    async fn missing_region_prefers_external_host() {
        let pool = lazy_pool(Some("eu"));
        pool.add_server(&peer("b")).await;
        assert_eq!(pool.peer("b").unwrap().address(), "203.0.113.1:3435");
    }

    #[tokio::test]
    async fn missing_region_and_external_falls_back_to_internal() {
        let pool = lazy_pool(None);
        let sv = PeerServer::new("b", "chat")
            .with_metadata(metadata::GRPC_HOST, "10.0.0.1")
            .with_metadata(metadata::GRPC_PORT, "3434");
        pool.add_server(&sv).await;
        assert_eq!(pool.peer("b").unwrap().address(), "10.0.0.1:3434");
    }

    #[tokio::test]
    async fn missing_host_metadata_skips_the_server() {
        let pool = lazy_pool(None);
        pool.add_server(&PeerServer::new("b", "chat")).await;
        assert!(pool.peer("b").is_none());
    }

    #[tokio::test]
    async fn missing_port_metadata_skips_the_server() {
        let pool = lazy_pool(None);
        let sv = PeerServer::new("b", "chat").with_metadata(metadata::GRPC_HOST, "10.0.0.1");
        pool.add_server(&sv).await;
        assert!(pool.peer("b").is_none());
    }

    #[tokio::test]
    async fn send_is_not_implemented() {
        let pool = lazy_pool(None);
        let err = pool.send("u1", b"data").unwrap_err();
        assert!(err.is(ErrorCode::NotImplemented));
    }
}
