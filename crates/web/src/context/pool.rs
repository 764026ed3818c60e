use super::{PathParams, RequestContext};
use crate::body::RequestBody;
use http::Request;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

/// Number of released contexts kept around for reuse.
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// A free-list of [`RequestContext`]s shared by every dispatcher of a server.
///
/// [`acquire`](ContextPool::acquire) pops an idle context (or allocates a new one) and binds it
/// to a request; the returned [`PooledContext`] owns it exclusively and gives it back on drop.
/// Release therefore happens on every exit path of a request: normal return, error, panic
/// unwinding, and a dispatcher future dropped mid-flight.
pub struct ContextPool {
    idle: Mutex<Vec<Box<RequestContext>>>,
    max_idle: usize,
    body_limit: usize,
}

impl ContextPool {
    pub fn new(max_idle: usize, body_limit: usize) -> Self {
        Self { idle: Mutex::new(Vec::new()), max_idle, body_limit }
    }

    pub fn acquire(self: &Arc<Self>, req: Request<RequestBody>, params: PathParams) -> PooledContext {
        let popped = self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
        let mut ctx = popped.unwrap_or_else(|| Box::new(RequestContext::unbound(self.body_limit)));
        ctx.bind(req, params);
        PooledContext { ctx: Some(ctx), pool: Arc::clone(self) }
    }

    /// Number of contexts waiting for reuse.
    pub fn idle_len(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn release(&self, mut ctx: Box<RequestContext>) {
        ctx.clear();
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle {
            idle.push(ctx);
        }
    }
}

impl fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextPool").field("idle", &self.idle_len()).field("max_idle", &self.max_idle).finish()
    }
}

/// Exclusive handle on a pooled context, released back to its pool on drop.
pub struct PooledContext {
    ctx: Option<Box<RequestContext>>,
    pool: Arc<ContextPool>,
}

impl Deref for PooledContext {
    type Target = RequestContext;

    fn deref(&self) -> &Self::Target {
        // only `Drop` takes the context out
        self.ctx.as_deref().unwrap_or_else(|| unreachable!("pooled context used after release"))
    }
}

impl DerefMut for PooledContext {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx.as_deref_mut().unwrap_or_else(|| unreachable!("pooled context used after release"))
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.release(ctx);
        }
    }
}

impl fmt::Debug for PooledContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PooledContext").field(&self.ctx).finish()
    }
}
