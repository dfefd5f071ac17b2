//! Peer membership records.

use std::collections::HashMap;

/// Metadata keys consumed by the peer client pool.
pub mod metadata {
    /// Region the server is deployed in.
    pub const REGION: &str = "region";
    /// Host reachable from inside the region.
    pub const GRPC_HOST: &str = "grpcHost";
    /// Host reachable from other regions.
    pub const GRPC_EXTERNAL_HOST: &str = "grpcExternalHost";
    /// Port paired with the internal host.
    pub const GRPC_PORT: &str = "grpcPort";
    /// Port paired with the external host.
    pub const GRPC_EXTERNAL_PORT: &str = "grpcExternalPort";
}

/// Membership record for one cluster node.
///
/// Inserted into the pool on a discovery arrival event and removed on
/// departure; the discovery watcher itself lives outside the core.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerServer {
    /// Unique server id.
    pub id: String,
    /// Role grouping, e.g. `connector` or `chat`.
    pub server_type: String,
    /// Discovery metadata, including host and port keys.
    pub metadata: HashMap<String, String>,
    /// Whether this node terminates client connections.
    pub frontend: bool,
}

impl PeerServer {
    /// Creates a membership record.
    #[must_use]
    pub fn new(id: impl Into<String>, server_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            server_type: server_type.into(),
            metadata: HashMap::new(),
            frontend: false,
        }
    }

    /// Marks the server as a frontend.
    #[must_use]
    pub const fn frontend(mut self, frontend: bool) -> Self {
        self.frontend = frontend;
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Exposes deployment facts about the local process.
pub trait InfoRetriever: Send + Sync {
    /// The region this process runs in, when known.
    fn region(&self) -> Option<String>;
}

/// Static [`InfoRetriever`] configured up front.
#[derive(Debug, Clone, Default)]
pub struct StaticInfo {
    region: Option<String>,
}

impl StaticInfo {
    /// Creates an info retriever with a fixed region.
    #[must_use]
    pub fn with_region(region: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
        }
    }
}

impl InfoRetriever for StaticInfo {
    fn region(&self) -> Option<String> {
        self.region.clone()
    }
}
