//! Binds a view and its effective middleware chains into one [`RequestHandler`].
//!
//! Per request: acquire a pooled context, run the before-chain, the view, then the
//! after-chain. A before-chain error means the view never runs; a view error means the
//! after-chain never runs. The first error is logged and written as the response body with
//! its status. The context goes back to the pool on every path, panics included.

use crate::body::{RequestBody, ResponseBody};
use crate::context::{ContextPool, PathParams, RequestContext};
use crate::error::DispatchError;
use crate::handler::RequestHandler;
use crate::middleware::{self, Chain};
use crate::view::View;
use async_trait::async_trait;
use futures::FutureExt;
use http::{Request, Response};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

/// Turns a panic raised by a view or middleware into a response.
///
/// Receives the context of the failed request and the panic message.
pub type PanicHandler = Arc<dyn Fn(&mut RequestContext, &str) + Send + Sync>;

pub struct ViewDispatcher {
    pool: Arc<ContextPool>,
    before: Chain,
    view: Arc<dyn View>,
    after: Chain,
    panic_handler: Option<PanicHandler>,
}

impl ViewDispatcher {
    pub fn new(pool: Arc<ContextPool>, view: Arc<dyn View>, before: Chain, after: Chain) -> Self {
        Self { pool, before, view, after, panic_handler: None }
    }

    #[must_use]
    pub fn with_panic_handler(mut self, panic_handler: Option<PanicHandler>) -> Self {
        self.panic_handler = panic_handler;
        self
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), DispatchError> {
        middleware::execute(ctx, &self.before).await.map_err(DispatchError::Before)?;
        self.view.call(ctx).await.map_err(DispatchError::View)?;
        middleware::execute(ctx, &self.after).await.map_err(DispatchError::After)
    }

    fn write_error(&self, ctx: &mut RequestContext, err: &DispatchError) {
        error!(stage = err.stage(), status = err.status().as_u16(), cause = %err, "request failed");

        match (err, &self.panic_handler) {
            (DispatchError::Panic { message }, Some(panic_handler)) => panic_handler(ctx, message),
            (DispatchError::Panic { .. }, None) => {
                let status = err.status();
                ctx.error(status.canonical_reason().unwrap_or_default(), status);
            }
            _ => ctx.error(err.to_string(), err.status()),
        }
    }
}

#[async_trait]
impl RequestHandler for ViewDispatcher {
    async fn invoke(&self, req: Request<RequestBody>, params: PathParams) -> Response<ResponseBody> {
        let mut ctx = self.pool.acquire(req, params);
        debug!(method = %ctx.method(), uri = %ctx.uri(), "dispatching request");

        let outcome = match AssertUnwindSafe(self.run(&mut ctx)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => Err(DispatchError::Panic { message: panic_message(payload.as_ref()) }),
        };

        if let Err(err) = outcome {
            self.write_error(&mut ctx, &err);
        }

        ctx.take_response()
    }
}

impl fmt::Debug for ViewDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewDispatcher")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .field("panic_handler", &self.panic_handler.is_some())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
