//! Request context propagation.
//!
//! A [`Context`] is a read-only, cheaply cloned bundle carried through
//! dispatch and across peer calls. Derivation (`add_propagated`,
//! `with_timeout`, ...) builds a child context and never mutates the
//! parent. Only the propagated string pairs cross the peer channel; the
//! live session reference and the span stay on the local node.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::session::Session;

/// Well-known propagated keys.
pub mod keys {
    /// Full route string of the originating request.
    pub const ROUTE: &str = "req-route";
    /// Request start time, nanoseconds since the Unix epoch.
    pub const START_TIME: &str = "req-timestamp";
    /// Id of the server that originated the call.
    pub const PEER_ID: &str = "peer.id";
}

/// A derivable request context.
#[derive(Debug, Clone, Default)]
pub struct Context {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    session: Option<Arc<Session>>,
    propagated: HashMap<String, String>,
    span: tracing::Span,
    deadline: Option<Instant>,
}

impl Default for ContextInner {
    fn default() -> Self {
        Self {
            session: None,
            propagated: HashMap::new(),
            span: tracing::Span::none(),
            deadline: None,
        }
    }
}

impl Context {
    /// Creates an empty root context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a context from propagated wire pairs.
    #[must_use]
    pub fn from_metadata(pairs: Vec<(String, String)>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                propagated: pairs.into_iter().collect(),
                ..ContextInner::default()
            }),
        }
    }

    /// Derives a context carrying the session reference.
    #[must_use]
    pub fn with_session(&self, session: Arc<Session>) -> Self {
        self.derive(|inner| inner.session = Some(session))
    }

    /// Derives a context with an additional propagated pair.
    #[must_use]
    pub fn add_propagated(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.derive(|inner| {
            inner.propagated.insert(key.into(), value.into());
        })
    }

    /// Derives a context whose deadline is at most `timeout` from now.
    ///
    /// A tighter parent deadline is kept.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.derive(|inner| {
            inner.deadline = Some(match inner.deadline {
                Some(existing) => existing.min(candidate),
                None => candidate,
            });
        })
    }

    /// Derives a context bound to a span.
    #[must_use]
    pub fn with_span(&self, span: tracing::Span) -> Self {
        self.derive(|inner| inner.span = span)
    }

    /// The session reference, when the call is session-scoped.
    #[must_use]
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.inner.session.as_ref()
    }

    /// The bound user id; empty without a session.
    #[must_use]
    pub fn uid(&self) -> &str {
        self.inner
            .session
            .as_ref()
            .map_or("", |session| session.uid.as_str())
    }

    /// A propagated value by key.
    #[must_use]
    pub fn propagated(&self, key: &str) -> Option<&str> {
        self.inner.propagated.get(key).map(String::as_str)
    }

    /// The span this context is bound to.
    #[must_use]
    pub fn span(&self) -> &tracing::Span {
        &self.inner.span
    }

    /// The absolute deadline, if one is installed.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time remaining before the deadline; `None` without a deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// The propagated pairs in wire form.
    #[must_use]
    pub fn to_metadata(&self) -> Vec<(String, String)> {
        self.inner
            .propagated
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn derive(&self, mutate: impl FnOnce(&mut ContextInner)) -> Self {
        let mut inner = ContextInner {
            session: self.inner.session.clone(),
            propagated: self.inner.propagated.clone(),
            span: self.inner.span.clone(),
            deadline: self.inner.deadline,
        };
        mutate(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }
}
