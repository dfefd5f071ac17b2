//! Peer client pool, membership and binding directory client.
//!
//! This crate hosts the cluster-facing half of the framework: the pool of
//! lazily-connected peer channels driven by discovery membership events,
//! the binding directory read path resolving which frontend owns a user
//! session, and the configuration the peer client consumes.

pub mod binding;
pub mod client;
pub mod config;
pub mod server;
pub mod transport;

pub use binding::BindingStorage;
pub use client::{PeerClient, RpcClient};
pub use config::{ConfigError, RpcClientConfig};
pub use server::{metadata, InfoRetriever, PeerServer, StaticInfo};
pub use transport::{Connector, PeerChannel, TcpChannel, TcpConnector};
