//! The per-request context handed to middlewares and views.
//!
//! A [`RequestContext`] owns everything that belongs to one in-flight request: the request
//! head and body, the path parameters found by the router, typed user values shared between
//! middlewares and the view, and the response being assembled. Contexts are recycled by the
//! [`ContextPool`]; releasing one clears every field, so nothing from a previous request can
//! be observed through a reused instance.

mod extract;
mod params;
mod pool;
mod response;

pub use params::PathParams;
pub use pool::{ContextPool, DEFAULT_MAX_IDLE, PooledContext};
pub(crate) use response::TEXT_PLAIN_UTF_8;

use crate::body::{RequestBody, ResponseBody};
use crate::config::DEFAULT_MAX_REQUEST_BODY_SIZE;
use crate::error::RemoteAddr;
use bytes::Bytes;
use http::request::Parts;
use http::{Extensions, HeaderMap, Method, Request, StatusCode, Uri, Version};
use std::fmt;
use std::mem;
use std::net::SocketAddr;

pub struct RequestContext {
    head: Parts,
    body: Option<RequestBody>,
    body_bytes: Option<Bytes>,
    body_limit: usize,
    params: PathParams,
    user_values: Extensions,

    status: StatusCode,
    headers: HeaderMap,
    response_body: ResponseBody,

    bound: bool,
}

impl RequestContext {
    /// Creates a context bound to `req`, outside of any pool.
    ///
    /// Mostly useful for exercising middlewares and views in isolation.
    pub fn new(req: Request<RequestBody>, params: PathParams) -> Self {
        let mut ctx = Self::unbound(DEFAULT_MAX_REQUEST_BODY_SIZE);
        ctx.bind(req, params);
        ctx
    }

    pub(crate) fn unbound(body_limit: usize) -> Self {
        Self {
            head: empty_head(),
            body: None,
            body_bytes: None,
            body_limit,
            params: PathParams::empty(),
            user_values: Extensions::new(),
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            response_body: ResponseBody::empty(),
            bound: false,
        }
    }

    pub(crate) fn bind(&mut self, req: Request<RequestBody>, params: PathParams) {
        let (head, body) = req.into_parts();
        self.head = head;
        self.body = Some(body);
        self.params = params;
        self.bound = true;
    }

    /// Drops every reference to the request and response, keeping allocated capacity.
    pub(crate) fn clear(&mut self) {
        self.head = empty_head();
        self.body = None;
        self.body_bytes = None;
        self.params.clear();
        self.user_values.clear();
        self.status = StatusCode::OK;
        self.headers.clear();
        self.response_body = ResponseBody::empty();
        self.bound = false;
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.bound
    }

    /// Moves the assembled response out, leaving an empty `200 OK` behind.
    pub(crate) fn take_response(&mut self) -> http::Response<ResponseBody> {
        let mut response = http::Response::new(self.response_body.take());
        *response.status_mut() = mem::replace(&mut self.status, StatusCode::OK);
        *response.headers_mut() = mem::take(&mut self.headers);
        response
    }

    #[inline]
    pub fn method(&self) -> &Method {
        &self.head.method
    }

    #[inline]
    pub fn uri(&self) -> &Uri {
        &self.head.uri
    }

    #[inline]
    pub fn path(&self) -> &str {
        self.head.uri.path()
    }

    #[inline]
    pub fn query_string(&self) -> Option<&str> {
        self.head.uri.query()
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.head.version
    }

    /// The request headers.
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// Returns a request header as text, if present and visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn path_params(&self) -> &PathParams {
        &self.params
    }

    /// The peer address, when the request came in over a socket.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.head.extensions.get::<RemoteAddr>().map(|addr| addr.0)
    }

    /// Stores a value for later middlewares and the view of this request.
    pub fn set_user_value<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.user_values.insert(value)
    }

    pub fn user_value<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.user_values.get::<T>()
    }

    pub fn remove_user_value<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.user_values.remove::<T>()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("bound", &self.bound)
            .field("method", &self.head.method)
            .field("uri", &self.head.uri)
            .field("params", &self.params)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

fn empty_head() -> Parts {
    Request::new(()).into_parts().0
}
