//! Deadline and concurrency bounds for a route.
//!
//! [`TimeoutHandler`] runs the wrapped handler on its own task and waits for it at most
//! `timeout`. When the deadline passes the caller gets the configured status and message right
//! away, while the task keeps running in the background until the handler returns and its
//! context is released. A semaphore shared by every timeout route of a server caps how many
//! wrapped handlers run at once; requests beyond the cap are answered `429` immediately.

use crate::body::{RequestBody, ResponseBody};
use crate::context::PathParams;
use crate::handler::{RequestHandler, status_response};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONNECTION;
use http::{HeaderValue, Request, Response, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, warn};

/// Status used by timeout routes registered without an explicit code.
pub const DEFAULT_TIMEOUT_STATUS: StatusCode = StatusCode::REQUEST_TIMEOUT;

pub struct TimeoutHandler {
    inner: Arc<dyn RequestHandler>,
    timeout: Duration,
    message: Bytes,
    status: StatusCode,
    limiter: Arc<Semaphore>,
}

impl TimeoutHandler {
    pub fn new(
        inner: Arc<dyn RequestHandler>,
        timeout: Duration,
        message: impl Into<String>,
        status: StatusCode,
        limiter: Arc<Semaphore>,
    ) -> Self {
        Self { inner, timeout, message: Bytes::from(message.into()), status, limiter }
    }
}

/// Wraps `inner` in a [`TimeoutHandler`], or returns it untouched for a zero `timeout`.
pub fn with_timeout(
    inner: Arc<dyn RequestHandler>,
    timeout: Duration,
    message: impl Into<String>,
    status: StatusCode,
    limiter: Arc<Semaphore>,
) -> Arc<dyn RequestHandler> {
    if timeout.is_zero() {
        return inner;
    }
    Arc::new(TimeoutHandler::new(inner, timeout, message, status, limiter))
}

#[async_trait]
impl RequestHandler for TimeoutHandler {
    async fn invoke(&self, req: Request<RequestBody>, params: PathParams) -> Response<ResponseBody> {
        let Ok(permit) = Arc::clone(&self.limiter).try_acquire_owned() else {
            warn!(uri = %req.uri(), "too many concurrent requests on timeout routes");
            return status_response(StatusCode::TOO_MANY_REQUESTS, self.message.clone());
        };

        let uri = req.uri().clone();
        let inner = Arc::clone(&self.inner);
        let mut task = tokio::spawn(async move {
            let _permit = permit;
            inner.invoke(req, params).await
        });

        match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!(cause = %e, %uri, "timeout route task failed");
                let status = StatusCode::INTERNAL_SERVER_ERROR;
                status_response(status, status.canonical_reason().unwrap_or_default())
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, %uri, "request timed out");
                let mut response = status_response(self.status, self.message.clone());
                response.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
                response
            }
        }
    }
}

impl fmt::Debug for TimeoutHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutHandler")
            .field("timeout", &self.timeout)
            .field("status", &self.status)
            .field("available", &self.limiter.available_permits())
            .finish_non_exhaustive()
    }
}
