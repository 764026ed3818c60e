use crate::context::RequestContext;
use crate::error::BoxError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;

pub type ViewResult = Result<(), BoxError>;

/// The terminal handler of a route.
///
/// A view writes its response through the context. Returning an error turns the response
/// into a `500` carrying the error message and skips the after-chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait View: Send + Sync {
    async fn call(&self, ctx: &mut RequestContext) -> ViewResult;
}

pub struct FnView<F> {
    f: F,
}

/// Wraps a closure returning a boxed future as a [`View`].
///
/// ```
/// use atrium_web::view_fn;
///
/// let hello = view_fn(|ctx| Box::pin(async move { ctx.text_response("hello world") }));
/// # let _ = hello;
/// ```
pub fn view_fn<F>(f: F) -> FnView<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, ViewResult> + Send + Sync,
{
    FnView { f }
}

#[async_trait]
impl<F> View for FnView<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, ViewResult> + Send + Sync,
{
    async fn call(&self, ctx: &mut RequestContext) -> ViewResult {
        (self.f)(ctx).await
    }
}

impl<F> fmt::Debug for FnView<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnView")
    }
}
