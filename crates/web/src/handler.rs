use crate::body::{RequestBody, ResponseBody};
use crate::context::PathParams;
use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Request, Response, StatusCode};

/// A compiled route target, as stored in the router.
///
/// Handlers never fail: every request-scoped error has been turned into a response by the
/// time `invoke` returns.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn invoke(&self, req: Request<RequestBody>, params: PathParams) -> Response<ResponseBody>;
}

/// Answers every request with a fixed status and its canonical reason as plain text.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StatusHandler {
    status: StatusCode,
}

impl StatusHandler {
    pub(crate) fn new(status: StatusCode) -> Self {
        Self { status }
    }
}

#[async_trait]
impl RequestHandler for StatusHandler {
    async fn invoke(&self, _req: Request<RequestBody>, _params: PathParams) -> Response<ResponseBody> {
        status_response(self.status, self.status.canonical_reason().unwrap_or_default())
    }
}

/// A plain-text response with the given status.
pub(crate) fn status_response(status: StatusCode, message: impl Into<ResponseBody>) -> Response<ResponseBody> {
    let mut response = Response::new(message.into());
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(crate::context::TEXT_PLAIN_UTF_8));
    response
}
