//! Service registry, dispatch pipeline and context propagation.
//!
//! This crate hosts the node-local half of the framework: user services
//! declared against a [`registry::ServiceBuilder`], the
//! [`dispatch::Dispatcher`] that drives client messages through the hook
//! pipeline into handlers, and the [`context::Context`] bundle carried
//! across calls. Everything is configured at startup and read-only while
//! serving.

pub mod context;
pub mod dispatch;
mod error;
pub mod pipeline;
pub mod registry;
pub mod serializer;
pub mod session;

pub use context::Context;
pub use dispatch::Dispatcher;
pub use error::{ClusterError, ErrorCode};
pub use pipeline::{AfterHook, BeforeHook, Pipeline};
pub use registry::{
    Handler, HandlerArg, HandlerKind, HandlerReturn, Registry, Remote, Service, ServiceBuilder,
};
pub use serializer::{error_payload, ErrorPayload, JsonSerializer, Serializer};
pub use session::Session;
