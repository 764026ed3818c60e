//! The server handle.
//!
//! A [`Server`] is an immutable snapshot produced by [`ServerBuilder::build`]: compiled
//! routes, router slots, the context pool and the configuration. It is cheap to clone and
//! can be driven without a socket through [`Server::call`], or put on a listener with one
//! of the serve methods.

mod builder;
mod io;
mod lifecycle;
mod listener;
mod signal;
mod tls;

pub use builder::ServerBuilder;

use crate::body::{RequestBody, ResponseBody};
use crate::config::Config;
use crate::context::{ContextPool, PathParams};
use crate::date::DateService;
use crate::encoding;
use crate::error::BoxError;
use crate::handler::RequestHandler;
use crate::router::{RouteMatch, Router};
use arc_swap::ArcSwap;
use bytes::Bytes;
use http::header::{ACCEPT_ENCODING, ALLOW, DATE, LOCATION, SERVER};
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body::Body as HttpBody;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Where a server is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Constructed,
    Listening,
    Draining,
    Stopped,
}

#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: ArcSwap<Config>,
    router: Router,
    not_found: Arc<dyn RequestHandler>,
    method_not_allowed: Arc<dyn RequestHandler>,
    pool: Arc<ContextPool>,
    server_name: Option<HeaderValue>,
    date: DateService,
    state: watch::Sender<ServerState>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    fn new(
        config: Config,
        router: Router,
        not_found: Arc<dyn RequestHandler>,
        method_not_allowed: Arc<dyn RequestHandler>,
        pool: Arc<ContextPool>,
        server_name: Option<HeaderValue>,
    ) -> Self {
        let (state, _) = watch::channel(ServerState::Constructed);
        let inner = ServerInner {
            config: ArcSwap::from_pointee(config),
            router,
            not_found,
            method_not_allowed,
            pool,
            server_name,
            date: DateService::new(),
            state,
        };
        Self { inner: Arc::new(inner) }
    }

    /// The current configuration snapshot.
    pub fn config(&self) -> Arc<Config> {
        self.inner.config.load_full()
    }

    pub fn state(&self) -> ServerState {
        *self.inner.state.borrow()
    }

    /// Subscribes to lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.inner.state.subscribe()
    }

    /// Number of idle contexts waiting in the pool.
    pub fn idle_contexts(&self) -> usize {
        self.inner.pool.idle_len()
    }

    fn set_state(&self, state: ServerState) {
        self.inner.state.send_replace(state);
    }

    /// Runs one request through routing, dispatch and response post-processing.
    pub async fn call<B>(&self, req: Request<B>) -> Response<ResponseBody>
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let accept_encoding =
            if self.inner.config.load().compress { req.headers().get(ACCEPT_ENCODING).cloned() } else { None };
        let req = req.map(RequestBody::new);

        let mut response = match self.inner.router.at(req.method(), req.uri().path(), req.uri().query()) {
            RouteMatch::Found { handler, params } => handler.invoke(req, params).await,
            RouteMatch::Redirect { location, status } => redirect_response(&location, status),
            RouteMatch::MethodNotAllowed { allowed } => {
                let mut response = self.inner.method_not_allowed.invoke(req, PathParams::empty()).await;
                let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
                if let Ok(allow) = HeaderValue::from_str(&allow) {
                    response.headers_mut().insert(ALLOW, allow);
                }
                response
            }
            RouteMatch::NotFound => self.inner.not_found.invoke(req, PathParams::empty()).await,
        };

        self.finish(&mut response, accept_encoding.as_ref());
        response
    }

    fn finish(&self, response: &mut Response<ResponseBody>, accept_encoding: Option<&HeaderValue>) {
        let headers = response.headers_mut();
        if let Some(name) = &self.inner.server_name {
            headers.entry(SERVER).or_insert_with(|| name.clone());
        }
        if let Some(date) = self.inner.date.http_date() {
            headers.insert(DATE, date);
        }

        if let Some(accept_encoding) = accept_encoding {
            encoding::encode(accept_encoding, response);
        }
    }
}

fn redirect_response(location: &str, status: StatusCode) -> Response<ResponseBody> {
    let mut response = Response::new(ResponseBody::empty());
    match HeaderValue::from_str(location) {
        Ok(location) => {
            *response.status_mut() = status;
            response.headers_mut().insert(LOCATION, location);
        }
        Err(_) => *response.status_mut() = StatusCode::NOT_FOUND,
    }
    response
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("addr", &self.inner.config.load().addr())
            .field("state", &self.state())
            .field("router", &self.inner.router)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ServerBuildError, StatusError};
    use crate::middleware::{Filters, middleware_fn};
    use crate::view::view_fn;
    use http::header::{CONNECTION, CONTENT_ENCODING, VARY};
    use http_body_util::{BodyExt, Full};
    use std::time::Duration;

    fn request(method: Method, uri: &str) -> Request<Full<Bytes>> {
        Request::builder().method(method).uri(uri).body(Full::new(Bytes::new())).unwrap()
    }

    async fn body_string(response: Response<ResponseBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn ok_view(body: &'static str) -> impl crate::view::View + 'static {
        view_fn(move |ctx| Box::pin(async move { ctx.text_response(body) }))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn plain_route_with_default_headers() {
        let server = Server::builder().path("GET", "/", ok_view("ok")).build().unwrap();

        let response = server.call(request(Method::GET, "/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(SERVER).unwrap(), "atrium");
        assert!(response.headers().contains_key(DATE));
        assert_eq!(body_string(response).await, "ok");
        assert_eq!(server.state(), ServerState::Constructed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn server_header_can_be_renamed_or_dropped() {
        let config = Config { name: "edge".to_owned(), ..Config::default() };
        let server = Server::builder().config(config).path("GET", "/", ok_view("ok")).build().unwrap();
        assert_eq!(server.call(request(Method::GET, "/")).await.headers().get(SERVER).unwrap(), "edge");

        let config = Config { no_default_server_header: true, ..Config::default() };
        let server = Server::builder().config(config).path("GET", "/", ok_view("ok")).build().unwrap();
        assert!(server.call(request(Method::GET, "/")).await.headers().get(SERVER).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn forbidden_before_middleware_hides_view() {
        let server = Server::builder()
            .path_with_filters(
                "GET",
                "/secret",
                ok_view("should not appear"),
                Filters::new()
                    .before(middleware_fn(|_ctx| Box::pin(async { Err(StatusError::forbidden("forbidden")) }))),
            )
            .build()
            .unwrap();

        let response = server.call(request(Method::GET, "/secret")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_string(response).await, "forbidden");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn view_error_skips_after_chain() {
        let server = Server::builder()
            .use_after(middleware_fn(|ctx| {
                Box::pin(async move {
                    ctx.set_header("x-after".parse().unwrap(), HeaderValue::from_static("1"));
                    Ok(())
                })
            }))
            .path("GET", "/boom", view_fn(|_ctx| Box::pin(async { Err("boom".into()) })))
            .build()
            .unwrap();

        let response = server.call(request(Method::GET, "/boom")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get("x-after").is_none());
        assert_eq!(body_string(response).await, "boom");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn router_slots_have_defaults() {
        let server = Server::builder()
            .path("GET", "/users", ok_view("users"))
            .path("POST", "/users", ok_view("created"))
            .path("GET", "/docs/", ok_view("docs"))
            .build()
            .unwrap();

        let response = server.call(request(Method::GET, "/missing")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "Not Found");

        let response = server.call(request(Method::DELETE, "/users")).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get(ALLOW).unwrap(), "GET, POST");

        let response = server.call(request(Method::GET, "/docs?page=2")).await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers().get(LOCATION).unwrap(), "/docs/?page=2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn custom_not_found_runs_global_chains() {
        let server = Server::builder()
            .use_before(middleware_fn(|ctx| {
                Box::pin(async move {
                    ctx.set_header("x-global".parse().unwrap(), HeaderValue::from_static("1"));
                    Ok(())
                })
            }))
            .not_found(view_fn(|ctx| {
                Box::pin(async move {
                    ctx.set_status(StatusCode::NOT_FOUND);
                    ctx.text_response(format!("no route for {}", ctx.path()))
                })
            }))
            .build()
            .unwrap();

        let response = server.call(request(Method::GET, "/nowhere")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers().get("x-global").unwrap(), "1");
        assert_eq!(body_string(response).await, "no route for /nowhere");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn panic_handler_is_installed_on_every_view() {
        let server = Server::builder()
            .panic_handler(|ctx, message| ctx.error(format!("recovered: {message}"), StatusCode::SERVICE_UNAVAILABLE))
            .group("/api", |api| api.path("GET", "/panic", view_fn(|_ctx| Box::pin(async { panic!("kaboom") }))))
            .build()
            .unwrap();

        let response = server.call(request(Method::GET, "/api/panic")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_string(response).await, "recovered: kaboom");
        assert!(server.idle_contexts() >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn timeout_route_answers_with_message() {
        let server = Server::builder()
            .timeout_path(
                "GET",
                "/slow",
                view_fn(|ctx| {
                    Box::pin(async move {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        ctx.text_response("late")
                    })
                }),
                Duration::from_millis(50),
                "took too long",
            )
            .build()
            .unwrap();

        let response = server.call(request(Method::GET, "/slow")).await;
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(body_string(response).await, "took too long");
    }

    fn sleepy_view(delay: Duration) -> impl crate::view::View {
        view_fn(move |ctx| {
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                ctx.text_response("late")
            })
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn timeout_route_with_custom_status() {
        let server = Server::builder()
            .timeout_with_code_path(
                "GET",
                "/slow",
                sleepy_view(Duration::from_millis(500)),
                Duration::from_millis(50),
                "upstream too slow",
                StatusCode::GATEWAY_TIMEOUT,
            )
            .timeout_with_code_path(
                "GET",
                "/quick",
                ok_view("quick"),
                Duration::from_millis(500),
                "unused",
                StatusCode::GATEWAY_TIMEOUT,
            )
            .build()
            .unwrap();

        let response = server.call(request(Method::GET, "/slow")).await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(response.headers().get(CONNECTION).unwrap(), "close");
        assert_eq!(body_string(response).await, "upstream too slow");

        let response = server.call(request(Method::GET, "/quick")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "quick");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn timeout_route_filters_run_inside_the_deadline() {
        let server = Server::builder()
            .timeout_path_with_filters(
                "GET",
                "/slow",
                sleepy_view(Duration::from_millis(500)),
                Filters::new().before(middleware_fn(|ctx| {
                    Box::pin(async move {
                        if ctx.headers().contains_key("x-token") {
                            Ok(())
                        } else {
                            Err(StatusError::unauthorized("missing token"))
                        }
                    })
                })),
                Duration::from_millis(100),
                "took too long",
            )
            .build()
            .unwrap();

        let response = server.call(request(Method::GET, "/slow")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_string(response).await, "missing token");

        let mut req = request(Method::GET, "/slow");
        req.headers_mut().insert("x-token", HeaderValue::from_static("t"));
        let response = server.call(req).await;
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(body_string(response).await, "took too long");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn compresses_large_bodies_when_enabled() {
        let payload = "a".repeat(4096);
        let config = Config { compress: true, ..Config::default() };
        let server = Server::builder()
            .config(config)
            .path(
                "GET",
                "/big",
                view_fn(move |ctx| {
                    let payload = payload.clone();
                    Box::pin(async move { ctx.text_response(payload) })
                }),
            )
            .build()
            .unwrap();

        let mut req = request(Method::GET, "/big");
        req.headers_mut().insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        let response = server.call(req).await;
        assert_eq!(response.headers().get(CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(response.headers().get(VARY).unwrap(), "accept-encoding");

        let response = server.call(request(Method::GET, "/big")).await;
        assert!(response.headers().get(CONTENT_ENCODING).is_none());
    }

    #[test]
    fn lowercase_method_fails_build() {
        let result = Server::builder().path("get", "/", ok_view("ok")).build();
        assert!(matches!(result, Err(ServerBuildError::InvalidMethod { .. })));
    }

    #[test]
    fn state_subscribers_see_transitions() {
        let server = Server::builder().build().unwrap();
        let mut states = server.subscribe_state();
        server.set_state(ServerState::Listening);
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), ServerState::Listening);
    }
}
