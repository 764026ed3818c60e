//! A request lifecycle engine on top of hyper.
//!
//! Requests are routed to views wrapped in before/after middleware chains, run on pooled
//! [`RequestContext`]s, optionally under a deadline, and served by a [`Server`] that drains
//! in-flight connections on shutdown.
//!
//! ```no_run
//! use atrium_web::{Config, Server, view_fn};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::builder()
//!         .config(Config { port: 8080, ..Config::default() })
//!         .path("GET", "/", view_fn(|ctx| Box::pin(async move { ctx.text_response("hello") })))
//!         .build()?;
//!     server.listen_and_serve().await?;
//!     Ok(())
//! }
//! ```

mod body;
mod config;
mod context;
mod date;
mod dispatch;
mod encoding;
mod error;
mod handler;
mod logging;
mod middleware;
mod router;
mod routes;
mod server;
mod static_files;
mod timeout;
mod view;

pub use body::{RequestBody, ResponseBody};
pub use config::{
    Config, DEFAULT_CONCURRENCY, DEFAULT_HOST, DEFAULT_MAX_REQUEST_BODY_SIZE, DEFAULT_PORT, DEFAULT_READ_TIMEOUT,
    DEFAULT_SERVER_NAME, LogOutput,
};
pub use context::{ContextPool, DEFAULT_MAX_IDLE, PathParams, PooledContext, RequestContext};
pub use dispatch::{PanicHandler, ViewDispatcher};
pub use error::{BoxError, DispatchError, RemoteAddr, ServerBuildError, ServerError, StatusError};
pub use handler::RequestHandler;
pub use middleware::{Chain, Filters, FnMiddleware, Middleware, MiddlewareResult, middleware_fn};
pub use routes::RouteGroup;
pub use server::{Server, ServerBuilder, ServerState};
pub use static_files::{StaticDir, StaticFile};
pub use timeout::{DEFAULT_TIMEOUT_STATUS, TimeoutHandler, with_timeout};
pub use view::{FnView, View, ViewResult, view_fn};
