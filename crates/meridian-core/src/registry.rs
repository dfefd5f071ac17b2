//! Service registry: route strings to typed invocations.
//!
//! Services are declared with [`ServiceBuilder`], which captures the decode,
//! invoke and serialise steps for each method as type-erased closures at
//! registration time. Each closure holds a shared handle to the service
//! receiver, so a descriptor never outlives the state it is bound to. The
//! registry maps `serviceName.methodName` to descriptors and is built once
//! at startup, read-only while serving.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use meridian_proto::MessageKind;

use crate::context::Context;
use crate::error::{ClusterError, ErrorCode};
use crate::serializer::Serializer;

/// The single message kind a handler accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Handler returns a value; accepts Request messages.
    Request,
    /// Handler returns only an error; accepts Notify messages.
    Notify,
}

/// The argument value flowing through hooks and invocation.
pub enum HandlerArg {
    /// Handler takes no payload argument.
    None,
    /// Raw payload bytes, passed verbatim.
    Raw(Vec<u8>),
    /// A decoded payload value.
    Typed(Box<dyn Any + Send>),
}

impl HandlerArg {
    /// Wraps a decoded value.
    #[must_use]
    pub fn typed<T: Send + 'static>(value: T) -> Self {
        Self::Typed(Box::new(value))
    }

    /// Recovers the decoded value, failing when a hook substituted an
    /// argument of a different type.
    pub fn downcast<T: 'static>(self) -> Result<T, ClusterError> {
        match self {
            Self::Typed(any) => any.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
                ClusterError::new(
                    ErrorCode::Internal,
                    "handler argument has an unexpected type",
                )
            }),
            Self::Raw(_) | Self::None => Err(ClusterError::new(
                ErrorCode::Internal,
                "handler expected a decoded argument",
            )),
        }
    }

    /// Recovers raw payload bytes.
    pub fn into_raw(self) -> Result<Vec<u8>, ClusterError> {
        match self {
            Self::Raw(bytes) => Ok(bytes),
            Self::Typed(_) | Self::None => Err(ClusterError::new(
                ErrorCode::Internal,
                "handler expected raw payload bytes",
            )),
        }
    }
}

impl std::fmt::Debug for HandlerArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "HandlerArg::None"),
            Self::Raw(bytes) => write!(f, "HandlerArg::Raw({} bytes)", bytes.len()),
            Self::Typed(_) => write!(f, "HandlerArg::Typed"),
        }
    }
}

/// The value a handler produced, observed by after-hooks before
/// serialisation.
pub enum HandlerReturn {
    /// No response value.
    None,
    /// Pre-serialised bytes, emitted verbatim.
    Raw(Vec<u8>),
    /// A typed value awaiting serialisation.
    Typed(Box<dyn Any + Send>),
}

impl HandlerReturn {
    /// Wraps a typed return value.
    #[must_use]
    pub fn typed<T: Send + 'static>(value: T) -> Self {
        Self::Typed(Box::new(value))
    }
}

impl std::fmt::Debug for HandlerReturn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "HandlerReturn::None"),
            Self::Raw(bytes) => write!(f, "HandlerReturn::Raw({} bytes)", bytes.len()),
            Self::Typed(_) => write!(f, "HandlerReturn::Typed"),
        }
    }
}

/// Future produced by an invocation closure.
pub type InvokeFuture =
    Pin<Box<dyn Future<Output = (HandlerReturn, Option<ClusterError>)> + Send + 'static>>;

type DecodeFn<S> = Arc<dyn Fn(&S, &[u8]) -> Result<HandlerArg, ClusterError> + Send + Sync>;
type InvokeFn = Arc<dyn Fn(Context, HandlerArg) -> InvokeFuture + Send + Sync>;
type EncodeFn<S> = Arc<dyn Fn(&S, HandlerReturn) -> Result<Vec<u8>, ClusterError> + Send + Sync>;

/// Descriptor for one client-facing handler method.
pub struct Handler<S> {
    kind: HandlerKind,
    raw_arg: bool,
    decode: DecodeFn<S>,
    invoke: InvokeFn,
    encode: EncodeFn<S>,
}

impl<S> Handler<S> {
    /// The message kind this handler accepts.
    #[must_use]
    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    /// Whether the handler receives payload bytes verbatim.
    #[must_use]
    pub fn raw_arg(&self) -> bool {
        self.raw_arg
    }

    /// Validates an incoming message kind against the handler's.
    ///
    /// Returns the error, when any, and whether the dispatcher must abort:
    /// a Request arriving for a Notify handler aborts; the inverse is
    /// reported but dispatch continues.
    #[must_use]
    pub fn validate_kind(&self, kind: MessageKind) -> (bool, Option<ClusterError>) {
        match (self.kind, kind) {
            (HandlerKind::Notify, MessageKind::Request) => (
                true,
                Some(ClusterError::new(
                    ErrorCode::RequestOnNotify,
                    "tried to request a notify handler",
                )),
            ),
            (HandlerKind::Request, MessageKind::Notify) => (
                false,
                Some(ClusterError::new(
                    ErrorCode::NotifyOnRequest,
                    "tried to notify a request handler",
                )),
            ),
            _ => (false, None),
        }
    }

    /// Decodes the payload into the handler's argument.
    pub fn decode(&self, serializer: &S, payload: &[u8]) -> Result<HandlerArg, ClusterError> {
        (self.decode)(serializer, payload)
    }

    /// Invokes the handler.
    #[must_use]
    pub fn invoke(&self, ctx: Context, arg: HandlerArg) -> InvokeFuture {
        (self.invoke)(ctx, arg)
    }

    /// Serialises the handler's return value.
    pub fn encode(&self, serializer: &S, ret: HandlerReturn) -> Result<Vec<u8>, ClusterError> {
        (self.encode)(serializer, ret)
    }
}

/// Descriptor for one peer-facing remote method.
///
/// Remote arguments and results are always serialisable message types.
pub struct Remote<S> {
    decode: DecodeFn<S>,
    invoke: InvokeFn,
    encode: EncodeFn<S>,
}

impl<S> Remote<S> {
    /// Decodes the payload into the remote's argument.
    pub fn decode(&self, serializer: &S, payload: &[u8]) -> Result<HandlerArg, ClusterError> {
        (self.decode)(serializer, payload)
    }

    /// Invokes the remote.
    #[must_use]
    pub fn invoke(&self, ctx: Context, arg: HandlerArg) -> InvokeFuture {
        (self.invoke)(ctx, arg)
    }

    /// Serialises the remote's result.
    pub fn encode(&self, serializer: &S, ret: HandlerReturn) -> Result<Vec<u8>, ClusterError> {
        (self.encode)(serializer, ret)
    }
}

/// A named collection of handlers and remotes sharing one receiver.
pub struct Service<S> {
    pub(crate) name: String,
    pub(crate) handlers: HashMap<String, Handler<S>>,
    pub(crate) remotes: HashMap<String, Remote<S>>,
}

impl<S> Service<S> {
    /// The service name, the first segment of its routes.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<S> std::fmt::Debug for Service<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service").field("name", &self.name).finish()
    }
}

/// Builder declaring a service's methods against a shared receiver.
pub struct ServiceBuilder<R, S> {
    name: String,
    receiver: Arc<R>,
    handlers: HashMap<String, Handler<S>>,
    remotes: HashMap<String, Remote<S>>,
    duplicate: Option<String>,
}

impl<R, S> ServiceBuilder<R, S>
where
    R: Send + Sync + 'static,
    S: Serializer,
{
    /// Starts a service named `name` over `receiver`.
    ///
    /// The name becomes the first segment of every route the service
    /// registers.
    #[must_use]
    pub fn new(name: impl Into<String>, receiver: Arc<R>) -> Self {
        Self {
            name: name.into(),
            receiver,
            handlers: HashMap::new(),
            remotes: HashMap::new(),
            duplicate: None,
        }
    }

    /// Declares a request handler with a decoded argument.
    #[must_use]
    pub fn request<Req, Res, F, Fut>(mut self, method: impl Into<String>, f: F) -> Self
    where
        Req: serde::de::DeserializeOwned + Send + 'static,
        Res: serde::Serialize + Send + 'static,
        F: Fn(Arc<R>, Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, ClusterError>> + Send + 'static,
    {
        let receiver = self.receiver.clone();
        let invoke: InvokeFn = Arc::new(move |ctx, arg| {
            let req = match arg.downcast::<Req>() {
                Ok(req) => req,
                Err(err) => return ready_err(err),
            };
            let fut = f(receiver.clone(), ctx, req);
            Box::pin(async move {
                match fut.await {
                    Ok(res) => (HandlerReturn::typed(res), None),
                    Err(err) => (HandlerReturn::None, Some(err)),
                }
            })
        });

        self.insert_handler(
            method.into(),
            Handler {
                kind: HandlerKind::Request,
                raw_arg: false,
                decode: typed_decode::<Req, S>(),
                invoke,
                encode: typed_encode::<Res, S>(),
            },
        );
        self
    }

    /// Declares a request handler receiving and returning raw bytes.
    #[must_use]
    pub fn request_raw<F, Fut>(mut self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<R>, Context, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>, ClusterError>> + Send + 'static,
    {
        let receiver = self.receiver.clone();
        let invoke: InvokeFn = Arc::new(move |ctx, arg| {
            let payload = match arg.into_raw() {
                Ok(payload) => payload,
                Err(err) => return ready_err(err),
            };
            let fut = f(receiver.clone(), ctx, payload);
            Box::pin(async move {
                match fut.await {
                    Ok(bytes) => (HandlerReturn::Raw(bytes), None),
                    Err(err) => (HandlerReturn::None, Some(err)),
                }
            })
        });

        self.insert_handler(
            method.into(),
            Handler {
                kind: HandlerKind::Request,
                raw_arg: true,
                decode: raw_decode::<S>(),
                invoke,
                encode: raw_encode::<S>(),
            },
        );
        self
    }

    /// Declares a notify handler with a decoded argument.
    #[must_use]
    pub fn notify<Req, F, Fut>(mut self, method: impl Into<String>, f: F) -> Self
    where
        Req: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(Arc<R>, Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ClusterError>> + Send + 'static,
    {
        let receiver = self.receiver.clone();
        let invoke: InvokeFn = Arc::new(move |ctx, arg| {
            let req = match arg.downcast::<Req>() {
                Ok(req) => req,
                Err(err) => return ready_err(err),
            };
            let fut = f(receiver.clone(), ctx, req);
            Box::pin(async move {
                match fut.await {
                    Ok(()) => (HandlerReturn::None, None),
                    Err(err) => (HandlerReturn::None, Some(err)),
                }
            })
        });

        self.insert_handler(
            method.into(),
            Handler {
                kind: HandlerKind::Notify,
                raw_arg: false,
                decode: typed_decode::<Req, S>(),
                invoke,
                encode: raw_encode::<S>(),
            },
        );
        self
    }

    /// Declares a notify handler receiving raw bytes.
    #[must_use]
    pub fn notify_raw<F, Fut>(mut self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<R>, Context, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ClusterError>> + Send + 'static,
    {
        let receiver = self.receiver.clone();
        let invoke: InvokeFn = Arc::new(move |ctx, arg| {
            let payload = match arg.into_raw() {
                Ok(payload) => payload,
                Err(err) => return ready_err(err),
            };
            let fut = f(receiver.clone(), ctx, payload);
            Box::pin(async move {
                match fut.await {
                    Ok(()) => (HandlerReturn::None, None),
                    Err(err) => (HandlerReturn::None, Some(err)),
                }
            })
        });

        self.insert_handler(
            method.into(),
            Handler {
                kind: HandlerKind::Notify,
                raw_arg: true,
                decode: raw_decode::<S>(),
                invoke,
                encode: raw_encode::<S>(),
            },
        );
        self
    }

    /// Declares a notify handler taking only the context.
    #[must_use]
    pub fn notify_noarg<F, Fut>(mut self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<R>, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ClusterError>> + Send + 'static,
    {
        let receiver = self.receiver.clone();
        let invoke: InvokeFn = Arc::new(move |ctx, _arg| {
            let fut = f(receiver.clone(), ctx);
            Box::pin(async move {
                match fut.await {
                    Ok(()) => (HandlerReturn::None, None),
                    Err(err) => (HandlerReturn::None, Some(err)),
                }
            })
        });

        self.insert_handler(
            method.into(),
            Handler {
                kind: HandlerKind::Notify,
                raw_arg: false,
                decode: Arc::new(|_, _| Ok(HandlerArg::None)),
                invoke,
                encode: raw_encode::<S>(),
            },
        );
        self
    }

    /// Declares a remote method for peer RPC traffic.
    ///
    /// Both the argument and the result must be serialisable message types.
    #[must_use]
    pub fn remote<Req, Res, F, Fut>(mut self, method: impl Into<String>, f: F) -> Self
    where
        Req: serde::de::DeserializeOwned + Send + 'static,
        Res: serde::Serialize + Send + 'static,
        F: Fn(Arc<R>, Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, ClusterError>> + Send + 'static,
    {
        let receiver = self.receiver.clone();
        let invoke: InvokeFn = Arc::new(move |ctx, arg| {
            let req = match arg.downcast::<Req>() {
                Ok(req) => req,
                Err(err) => return ready_err(err),
            };
            let fut = f(receiver.clone(), ctx, req);
            Box::pin(async move {
                match fut.await {
                    Ok(res) => (HandlerReturn::typed(res), None),
                    Err(err) => (HandlerReturn::None, Some(err)),
                }
            })
        });

        let method = method.into();
        if self.remotes.contains_key(&method) {
            self.duplicate.get_or_insert(method);
            return self;
        }
        self.remotes.insert(
            method,
            Remote {
                decode: typed_decode::<Req, S>(),
                invoke,
                encode: typed_encode::<Res, S>(),
            },
        );
        self
    }

    /// Finalises the service.
    ///
    /// Fails when a method name was declared twice or when the service has
    /// no methods at all.
    pub fn build(self) -> Result<Service<S>, ClusterError> {
        if let Some(method) = self.duplicate {
            return Err(ClusterError::new(
                ErrorCode::Internal,
                format!("service {}: method {method} declared twice", self.name),
            ));
        }
        if self.handlers.is_empty() && self.remotes.is_empty() {
            return Err(ClusterError::new(
                ErrorCode::Internal,
                format!(
                    "type {} has no exported methods of suitable type \
                     (hint: pass a pointer to value of that type)",
                    self.name
                ),
            ));
        }
        Ok(Service {
            name: self.name,
            handlers: self.handlers,
            remotes: self.remotes,
        })
    }

    fn insert_handler(&mut self, method: String, handler: Handler<S>) {
        if self.handlers.contains_key(&method) {
            self.duplicate.get_or_insert(method);
            return;
        }
        self.handlers.insert(method, handler);
    }
}

fn ready_err(err: ClusterError) -> InvokeFuture {
    Box::pin(std::future::ready((HandlerReturn::None, Some(err))))
}

fn typed_decode<Req, S>() -> DecodeFn<S>
where
    Req: serde::de::DeserializeOwned + Send + 'static,
    S: Serializer,
{
    Arc::new(|serializer: &S, payload: &[u8]| {
        Ok(HandlerArg::typed(serializer.unmarshal::<Req>(payload)?))
    })
}

fn raw_decode<S>() -> DecodeFn<S> {
    Arc::new(|_serializer: &S, payload: &[u8]| Ok(HandlerArg::Raw(payload.to_vec())))
}

fn typed_encode<Res, S>() -> EncodeFn<S>
where
    Res: serde::Serialize + Send + 'static,
    S: Serializer,
{
    Arc::new(|serializer: &S, ret| match ret {
        HandlerReturn::None => Ok(Vec::new()),
        HandlerReturn::Raw(bytes) => Ok(bytes),
        HandlerReturn::Typed(any) => {
            let res = any.downcast::<Res>().map_err(|_| {
                ClusterError::new(
                    ErrorCode::Internal,
                    "handler return has an unexpected type",
                )
            })?;
            serializer.marshal(&*res)
        }
    })
}

fn raw_encode<S>() -> EncodeFn<S> {
    Arc::new(|_serializer: &S, ret| match ret {
        HandlerReturn::None => Ok(Vec::new()),
        HandlerReturn::Raw(bytes) => Ok(bytes),
        HandlerReturn::Typed(_) => Err(ClusterError::new(
            ErrorCode::Internal,
            "raw handler cannot serialise a typed return",
        )),
    })
}

/// Route table mapping `serviceName.methodName` to descriptors.
pub struct Registry<S> {
    handlers: HashMap<String, Arc<Handler<S>>>,
    remotes: HashMap<String, Arc<Remote<S>>>,
}

impl<S> Default for Registry<S> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            remotes: HashMap::new(),
        }
    }
}

impl<S> Registry<S> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service, installing all its routes.
    ///
    /// Fails without side effects when any route is already registered.
    pub fn register(&mut self, service: Service<S>) -> Result<(), ClusterError> {
        for method in service.handlers.keys() {
            let route = format!("{}.{}", service.name, method);
            if self.handlers.contains_key(&route) {
                return Err(ClusterError::new(
                    ErrorCode::Internal,
                    format!("handler: route {route} already registered"),
                ));
            }
        }
        for method in service.remotes.keys() {
            let route = format!("{}.{}", service.name, method);
            if self.remotes.contains_key(&route) {
                return Err(ClusterError::new(
                    ErrorCode::Internal,
                    format!("remote: route {route} already registered"),
                ));
            }
        }

        for (method, handler) in service.handlers {
            self.handlers
                .insert(format!("{}.{}", service.name, method), Arc::new(handler));
        }
        for (method, remote) in service.remotes {
            self.remotes
                .insert(format!("{}.{}", service.name, method), Arc::new(remote));
        }
        Ok(())
    }

    /// Looks up a handler by its `serviceName.methodName` key.
    #[must_use]
    pub fn handler(&self, route: &str) -> Option<Arc<Handler<S>>> {
        self.handlers.get(route).cloned()
    }

    /// Looks up a remote by its `serviceName.methodName` key.
    #[must_use]
    pub fn remote(&self, route: &str) -> Option<Arc<Remote<S>>> {
        self.remotes.get(route).cloned()
    }

    /// Registered handler routes, in no particular order.
    pub fn handler_routes(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}
