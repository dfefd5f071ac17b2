//! Pre- and post-processing hook chains.
//!
//! Hooks are registered while the dispatcher is being configured and never
//! mutated afterwards. Before-hooks may transform or reject the decoded
//! argument; after-hooks observe the handler outcome, including failures,
//! and may replace either the result or the error.

use crate::context::Context;
use crate::error::ClusterError;
use crate::registry::{HandlerArg, HandlerReturn};

/// Hook running before invocation: `(ctx, arg) → Result<arg>`.
pub type BeforeHook =
    Box<dyn Fn(&Context, HandlerArg) -> Result<HandlerArg, ClusterError> + Send + Sync>;

/// Hook running after invocation: `(ctx, result, err) → (result, err)`.
pub type AfterHook = Box<
    dyn Fn(&Context, HandlerReturn, Option<ClusterError>) -> (HandlerReturn, Option<ClusterError>)
        + Send
        + Sync,
>;

/// The ordered hook chains of a dispatcher.
#[derive(Default)]
pub struct Pipeline {
    before: Vec<BeforeHook>,
    after: Vec<AfterHook>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a before-hook.
    #[must_use]
    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Context, HandlerArg) -> Result<HandlerArg, ClusterError> + Send + Sync + 'static,
    {
        self.before.push(Box::new(hook));
        self
    }

    /// Appends an after-hook.
    #[must_use]
    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Context, HandlerReturn, Option<ClusterError>) -> (HandlerReturn, Option<ClusterError>)
            + Send
            + Sync
            + 'static,
    {
        self.after.push(Box::new(hook));
        self
    }

    /// Runs the before-chain; the first error short-circuits unchanged.
    pub(crate) fn run_before(
        &self,
        ctx: &Context,
        mut arg: HandlerArg,
    ) -> Result<HandlerArg, ClusterError> {
        for hook in &self.before {
            match hook(ctx, arg) {
                Ok(next) => arg = next,
                Err(err) => {
                    tracing::debug!(error = %err, "broken pipeline");
                    return Err(err);
                }
            }
        }
        Ok(arg)
    }

    /// Runs the after-chain, even when the handler failed.
    pub(crate) fn run_after(
        &self,
        ctx: &Context,
        mut ret: HandlerReturn,
        mut err: Option<ClusterError>,
    ) -> (HandlerReturn, Option<ClusterError>) {
        for hook in &self.after {
            (ret, err) = hook(ctx, ret, err);
        }
        (ret, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn before_error_short_circuits() {
        let second_ran = Arc::new(AtomicUsize::new(0));
        let counter = second_ran.clone();

        let pipeline = Pipeline::new()
            .before(|_ctx, _arg| Err(ClusterError::new(ErrorCode::BadRequest, "rejected")))
            .before(move |_ctx, arg| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(arg)
            });

        let err = pipeline
            .run_before(&Context::new(), HandlerArg::None)
            .unwrap_err();
        assert!(err.is(ErrorCode::BadRequest));
        assert_eq!(second_ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn after_hooks_observe_and_override_errors() {
        let pipeline = Pipeline::new().after(|_ctx, ret, err| {
            assert!(err.as_ref().unwrap().is(ErrorCode::Internal));
            (ret, Some(ClusterError::new(ErrorCode::BadRequest, "rewritten")))
        });

        let (_, err) = pipeline.run_after(
            &Context::new(),
            HandlerReturn::None,
            Some(ClusterError::new(ErrorCode::Internal, "boom")),
        );
        assert!(err.unwrap().is(ErrorCode::BadRequest));
    }

    #[test]
    fn hooks_run_in_order() {
        let pipeline = Pipeline::new()
            .before(|_ctx, _arg| Ok(HandlerArg::Raw(b"a".to_vec())))
            .before(|_ctx, arg| {
                let mut bytes = arg.into_raw()?;
                bytes.push(b'b');
                Ok(HandlerArg::Raw(bytes))
            });

        let arg = pipeline
            .run_before(&Context::new(), HandlerArg::None)
            .unwrap();
        assert_eq!(arg.into_raw().unwrap(), b"ab");
    }
}
