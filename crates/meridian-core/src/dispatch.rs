//! The dispatch pipeline.
//!
//! Drives a decoded client message through route resolution, kind
//! validation, payload decoding, the before-hooks, handler invocation, the
//! after-hooks and response serialisation, in that order. Handler panics
//! are trapped and reported as internal errors; the dispatcher imposes no
//! timeout of its own on local invocation.

use std::sync::Arc;

use meridian_proto::{Message, MessageCodec, MessageKind, Route};
use tracing::Instrument;

use crate::context::{keys, Context};
use crate::error::{ClusterError, ErrorCode};
use crate::pipeline::Pipeline;
use crate::registry::{HandlerReturn, InvokeFuture, Registry};
use crate::serializer::{error_payload, Serializer};
use crate::session::Session;

/// Reply body synthesised for remote-origin notify traffic.
const ACK: &[u8] = b"ack";

/// Drives messages through hooks, invocation and serialisation.
///
/// Constructed once at startup; the registry, pipeline and codec are
/// read-only while serving.
pub struct Dispatcher<S> {
    registry: Registry<S>,
    serializer: S,
    pipeline: Pipeline,
    codec: MessageCodec,
}

impl<S: Serializer> Dispatcher<S> {
    /// Creates a dispatcher over a finished registry.
    #[must_use]
    pub fn new(registry: Registry<S>, serializer: S, pipeline: Pipeline) -> Self {
        Self {
            registry,
            serializer,
            pipeline,
            codec: MessageCodec::new(),
        }
    }

    /// Replaces the client-link codec, e.g. to attach a route dictionary.
    #[must_use]
    pub fn with_codec(mut self, codec: MessageCodec) -> Self {
        self.codec = codec;
        self
    }

    /// The payload serializer.
    #[must_use]
    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// The client-link codec.
    #[must_use]
    pub fn codec(&self) -> &MessageCodec {
        &self.codec
    }

    /// Handles one inbound client frame.
    ///
    /// Requests yield an encoded Response frame, with the error bit and an
    /// error payload on failure. Notify frames yield nothing; a response
    /// produced by a mismatched handler is discarded.
    pub async fn dispatch_frame(
        &self,
        ctx: Context,
        session: Option<Arc<Session>>,
        frame: &[u8],
    ) -> Result<Option<Vec<u8>>, ClusterError> {
        let message = self.codec.decode(frame)?;
        if !matches!(message.kind, MessageKind::Request | MessageKind::Notify) {
            return Err(ClusterError::new(
                ErrorCode::WrongMessageType,
                format!("cannot dispatch a {} frame", message.kind),
            ));
        }

        let result = match message.route.as_deref().unwrap_or_default().parse::<Route>() {
            Ok(route) => {
                let ctx = ctx.add_propagated(keys::ROUTE, route.to_string());
                self.process_message(ctx, &route, message.kind, &message.data, session, false)
                    .await
            }
            Err(err) => Err(ClusterError::from(err)),
        };

        if message.kind == MessageKind::Request {
            let response = match result {
                Ok(data) => Message::response(message.id, data),
                Err(err) => {
                    let payload = error_payload(&self.serializer, &err)?;
                    Message::error_response(message.id, payload)
                }
            };
            Ok(Some(self.codec.encode(&response)?))
        } else {
            if let Err(err) = result {
                let route = message.route.as_deref().unwrap_or_default();
                tracing::warn!(route, error = %err, "notify dispatch failed");
            }
            Ok(None)
        }
    }

    /// Drives one message through the full pipeline.
    ///
    /// `remote` marks calls arriving over the peer channel; a remote-origin
    /// notify still yields the literal `ack` bytes so the originating
    /// transport does not time out.
    pub async fn process_message(
        &self,
        ctx: Context,
        route: &Route,
        kind: MessageKind,
        payload: &[u8],
        session: Option<Arc<Session>>,
        remote: bool,
    ) -> Result<Vec<u8>, ClusterError> {
        let ctx = match session {
            Some(session) => ctx.with_session(session),
            None => ctx,
        };
        let span = tracing::info_span!("dispatch", route = %route, uid = %ctx.uid());
        let ctx = ctx.with_span(span.clone());

        let handler = self.registry.handler(&route.short()).ok_or_else(|| {
            ClusterError::new(ErrorCode::NotFound, format!("handler: {route} not found"))
        })?;

        let (exit, kind_err) = handler.validate_kind(kind);
        if let Some(err) = kind_err {
            if exit {
                return Err(err);
            }
            span.in_scope(|| tracing::warn!(error = %err, "invalid message kind"));
        }

        let arg = handler.decode(&self.serializer, payload)?;
        let arg = self.pipeline.run_before(&ctx, arg)?;

        let fut = handler.invoke(ctx.clone(), arg);
        let (mut ret, err) = invoke_trapped(fut, span).await;

        if remote && kind == MessageKind::Notify {
            // The peer channel expects a reply even for notify traffic, or
            // the originating server times the call out.
            ret = HandlerReturn::Raw(ACK.to_vec());
        }

        let (ret, err) = self.pipeline.run_after(&ctx, ret, err);
        if let Some(err) = err {
            return Err(err);
        }

        match handler.encode(&self.serializer, ret) {
            Ok(bytes) => Ok(bytes),
            Err(err) => {
                tracing::error!(%route, error = %err, "failed to serialise handler return");
                error_payload(&self.serializer, &err)
            }
        }
    }

    /// Invokes a remote descriptor with a decoded argument.
    ///
    /// Remote methods bypass the hook chains; their arguments and results
    /// are always serialisable message types.
    pub async fn dispatch_remote(
        &self,
        ctx: Context,
        route: &Route,
        payload: &[u8],
    ) -> Result<Vec<u8>, ClusterError> {
        let remote = self.registry.remote(&route.short()).ok_or_else(|| {
            ClusterError::new(ErrorCode::NotFound, format!("remote: {route} not found"))
        })?;

        let span = tracing::info_span!("remote", route = %route);
        let ctx = ctx.with_span(span.clone());

        let arg = remote.decode(&self.serializer, payload)?;
        let fut = remote.invoke(ctx, arg);
        let (ret, err) = invoke_trapped(fut, span).await;
        if let Some(err) = err {
            return Err(err);
        }
        remote.encode(&self.serializer, ret)
    }
}

/// Awaits an invocation on its own task so a panic surfaces as a join
/// error instead of tearing down the dispatching task.
async fn invoke_trapped(
    fut: InvokeFuture,
    span: tracing::Span,
) -> (HandlerReturn, Option<ClusterError>) {
    match tokio::spawn(fut.instrument(span)).await {
        Ok(outcome) => outcome,
        Err(join_err) => (HandlerReturn::None, Some(recovered_error(join_err))),
    }
}

fn recovered_error(err: tokio::task::JoinError) -> ClusterError {
    if err.is_panic() {
        let panic = err.into_panic();
        let recovered = panic
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "opaque panic payload".to_owned());
        ClusterError::new(
            ErrorCode::Internal,
            format!("recovered from handler panic: {recovered}"),
        )
    } else {
        ClusterError::new(ErrorCode::Internal, "handler task was cancelled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServiceBuilder;
    use crate::serializer::JsonSerializer;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Echo {
        text: String,
    }

    struct Probe;

    fn dispatcher() -> Dispatcher<JsonSerializer> {
        let service = ServiceBuilder::new("Probe", Arc::new(Probe))
            .notify_noarg("Tick", |_recv, _ctx| async { Ok(()) })
            .remote("Echo", |_recv, _ctx, echo: Echo| async move {
                Ok(Echo {
                    text: echo.text.to_uppercase(),
                })
            })
            .build()
            .unwrap();
        let mut registry = Registry::new();
        registry.register(service).unwrap();
        Dispatcher::new(registry, JsonSerializer, Pipeline::new())
    }

    #[tokio::test]
    async fn missing_route_is_not_found() {
        let err = dispatcher()
            .process_message(
                Context::new(),
                &Route::new("Probe", "Missing"),
                MessageKind::Request,
                b"{}",
                None,
                false,
            )
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn remote_origin_notify_yields_ack() {
        let bytes = dispatcher()
            .process_message(
                Context::new(),
                &Route::new("Probe", "Tick"),
                MessageKind::Notify,
                b"",
                None,
                true,
            )
            .await
            .unwrap();
        assert_eq!(bytes, b"ack");
    }

    #[tokio::test]
    async fn remote_descriptor_decodes_invokes_and_serialises() {
        let bytes = dispatcher()
            .dispatch_remote(
                Context::new(),
                &Route::new("Probe", "Echo"),
                br#"{"text":"hi"}"#,
            )
            .await
            .unwrap();
        assert_eq!(bytes, br#"{"text":"HI"}"#);
    }

    #[tokio::test]
    async fn missing_remote_is_not_found() {
        let err = dispatcher()
            .dispatch_remote(Context::new(), &Route::new("Probe", "Missing"), b"{}")
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn local_notify_yields_nothing() {
        let bytes = dispatcher()
            .process_message(
                Context::new(),
                &Route::new("Probe", "Tick"),
                MessageKind::Notify,
                b"",
                None,
                false,
            )
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }
}
