//! Middlewares and their ordered execution.
//!
//! A middleware inspects or mutates a [`RequestContext`] before or after the view runs. It
//! either lets the request continue with `Ok(())` or rejects it with a [`StatusError`], whose
//! status and message become the response. Chains run strictly in order and stop at the
//! first error.

use crate::context::RequestContext;
use crate::error::StatusError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

pub type MiddlewareResult = Result<(), StatusError>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, ctx: &mut RequestContext) -> MiddlewareResult;
}

/// A middleware built from a closure, see [`middleware_fn`].
pub struct FnMiddleware<F> {
    f: F,
}

/// Wraps a closure returning a boxed future as a [`Middleware`].
///
/// ```
/// use atrium_web::{StatusError, middleware_fn};
///
/// let require_token = middleware_fn(|ctx| {
///     Box::pin(async move {
///         match ctx.header("x-token") {
///             Some(_) => Ok(()),
///             None => Err(StatusError::forbidden("missing token")),
///         }
///     })
/// });
/// # let _ = require_token;
/// ```
pub fn middleware_fn<F>(f: F) -> FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, MiddlewareResult> + Send + Sync,
{
    FnMiddleware { f }
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, MiddlewareResult> + Send + Sync,
{
    async fn call(&self, ctx: &mut RequestContext) -> MiddlewareResult {
        (self.f)(ctx).await
    }
}

impl<F> fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnMiddleware")
    }
}

/// An ordered list of middlewares. Duplicates are allowed and run once per occurrence.
pub type Chain = Vec<Arc<dyn Middleware>>;

/// Route-level middlewares, merged with the global ones at registration:
/// `before = global ++ filters.before` and `after = filters.after ++ global`.
#[derive(Clone, Default)]
pub struct Filters {
    pub before: Chain,
    pub after: Chain,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn before(mut self, middleware: impl Middleware + 'static) -> Self {
        self.before.push(Arc::new(middleware));
        self
    }

    #[must_use]
    pub fn after(mut self, middleware: impl Middleware + 'static) -> Self {
        self.after.push(Arc::new(middleware));
        self
    }
}

impl fmt::Debug for Filters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filters").field("before", &self.before.len()).field("after", &self.after.len()).finish()
    }
}

/// Runs `chain` in order, returning the first error and skipping everything after it.
pub async fn execute(ctx: &mut RequestContext, chain: &[Arc<dyn Middleware>]) -> MiddlewareResult {
    for middleware in chain {
        middleware.call(ctx).await?;
    }
    Ok(())
}
