//! Route registration.
//!
//! Registrations are recorded in a [`RouteTable`] while the server is being built and
//! compiled into the [`Router`] by `build()`. Compilation resolves the effective chains of
//! every view by nesting: `before = global ++ group ++ route` and
//! `after = route ++ group ++ global`.

use crate::context::ContextPool;
use crate::dispatch::{PanicHandler, ViewDispatcher};
use crate::error::ServerBuildError;
use crate::handler::RequestHandler;
use crate::middleware::{Chain, Filters, Middleware};
use crate::router::Router;
use crate::static_files::{FILEPATH_PARAM, StaticDir, StaticFile};
use crate::timeout::with_timeout;
use crate::view::View;
use http::{Method, StatusCode};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

struct TimeoutSpec {
    duration: Duration,
    message: String,
    status: StatusCode,
}

enum RouteEntry {
    View { method: String, pattern: String, view: Arc<dyn View>, filters: Filters, timeout: Option<TimeoutSpec> },
    Handler { method: String, pattern: String, handler: Arc<dyn RequestHandler> },
    Group(RouteTable),
}

#[derive(Default)]
pub(crate) struct RouteTable {
    prefix: String,
    before: Chain,
    after: Chain,
    entries: Vec<RouteEntry>,
}

/// Shared state every compiled route needs.
pub(crate) struct Compiler<'a> {
    pub(crate) router: &'a mut Router,
    pub(crate) pool: Arc<ContextPool>,
    pub(crate) limiter: Arc<Semaphore>,
    pub(crate) panic_handler: Option<PanicHandler>,
}

impl RouteTable {
    pub(crate) fn new(prefix: &str) -> Self {
        Self { prefix: prefix.trim_end_matches('/').to_owned(), ..Self::default() }
    }

    pub(crate) fn before(&self) -> &Chain {
        &self.before
    }

    pub(crate) fn after(&self) -> &Chain {
        &self.after
    }

    pub(crate) fn use_before(&mut self, middleware: Arc<dyn Middleware>) {
        self.before.push(middleware);
    }

    pub(crate) fn use_after(&mut self, middleware: Arc<dyn Middleware>) {
        self.after.push(middleware);
    }

    pub(crate) fn add_view(
        &mut self,
        method: &str,
        pattern: &str,
        view: Arc<dyn View>,
        filters: Filters,
        timeout: Option<(Duration, String, StatusCode)>,
    ) {
        let timeout = timeout.map(|(duration, message, status)| TimeoutSpec { duration, message, status });
        self.entries.push(RouteEntry::View {
            method: method.to_owned(),
            pattern: pattern.to_owned(),
            view,
            filters,
            timeout,
        });
    }

    pub(crate) fn add_handler(&mut self, method: &str, pattern: &str, handler: Arc<dyn RequestHandler>) {
        self.entries.push(RouteEntry::Handler { method: method.to_owned(), pattern: pattern.to_owned(), handler });
    }

    pub(crate) fn add_group(&mut self, group: RouteTable) {
        self.entries.push(RouteEntry::Group(group));
    }

    pub(crate) fn add_static_dir(&mut self, url: &str, root: PathBuf) {
        let url = url.trim_end_matches('/');
        let handler: Arc<dyn RequestHandler> = Arc::new(StaticDir::new(root));
        self.add_handler("GET", &format!("{url}/"), Arc::clone(&handler));
        self.add_handler("GET", &format!("{url}/{{*{FILEPATH_PARAM}}}"), handler);
    }

    pub(crate) fn add_file(&mut self, url: &str, path: PathBuf) {
        self.add_handler("GET", url, Arc::new(StaticFile::new(path)));
    }

    /// Registers every entry into the router, with the chains inherited from enclosing groups.
    pub(crate) fn compile(
        self,
        compiler: &mut Compiler<'_>,
        parent_prefix: &str,
        outer_before: &[Arc<dyn Middleware>],
        outer_after: &[Arc<dyn Middleware>],
    ) -> Result<(), ServerBuildError> {
        let prefix = format!("{parent_prefix}{}", self.prefix);
        let before: Chain = outer_before.iter().chain(&self.before).cloned().collect();
        let after: Chain = self.after.iter().chain(outer_after).cloned().collect();

        for entry in self.entries {
            match entry {
                RouteEntry::View { method, pattern, view, filters, timeout } => {
                    let method = parse_method(&method)?;
                    let route_before = before.iter().chain(&filters.before).cloned().collect();
                    let route_after = filters.after.iter().chain(&after).cloned().collect();

                    let dispatcher: Arc<dyn RequestHandler> = Arc::new(
                        ViewDispatcher::new(Arc::clone(&compiler.pool), view, route_before, route_after)
                            .with_panic_handler(compiler.panic_handler.clone()),
                    );
                    let handler = match timeout {
                        Some(deadline) => {
                            with_timeout(dispatcher, deadline.duration, deadline.message, deadline.status, Arc::clone(&compiler.limiter))
                        }
                        None => dispatcher,
                    };
                    compiler.router.register(method, &format!("{prefix}{pattern}"), handler)?;
                }
                RouteEntry::Handler { method, pattern, handler } => {
                    let method = parse_method(&method)?;
                    compiler.router.register(method, &format!("{prefix}{pattern}"), handler)?;
                }
                RouteEntry::Group(group) => group.compile(compiler, &prefix, &before, &after)?,
            }
        }

        Ok(())
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("prefix", &self.prefix)
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Methods are accepted only in their canonical uppercase spelling.
fn parse_method(method: &str) -> Result<Method, ServerBuildError> {
    if method.is_empty() || method.bytes().any(|b| b.is_ascii_lowercase()) {
        return Err(ServerBuildError::invalid_method(method));
    }
    Method::from_bytes(method.as_bytes()).ok().ok_or_else(|| ServerBuildError::invalid_method(method))
}

/// A set of routes sharing a path prefix and their own before/after middlewares.
///
/// Created through `group(prefix, |group| ...)` on the server builder or on another group.
#[derive(Debug)]
pub struct RouteGroup {
    pub(crate) routes: RouteTable,
}

impl RouteGroup {
    pub(crate) fn new(prefix: &str) -> Self {
        Self { routes: RouteTable::new(prefix) }
    }
}

/// Generates the chaining registration methods shared by the server builder and route groups.
macro_rules! route_registration {
    ($ty:ty) => {
        impl $ty {
            /// Appends a middleware run before the view of every route registered here.
            #[must_use]
            pub fn use_before(mut self, middleware: impl $crate::middleware::Middleware + 'static) -> Self {
                self.routes.use_before(::std::sync::Arc::new(middleware));
                self
            }

            /// Appends a middleware run after the view of every route registered here.
            #[must_use]
            pub fn use_after(mut self, middleware: impl $crate::middleware::Middleware + 'static) -> Self {
                self.routes.use_after(::std::sync::Arc::new(middleware));
                self
            }

            /// Registers `view` for `method` and `pattern`.
            ///
            /// `method` must be uppercase (`"GET"`, `"PURGE"`); anything else fails `build()`.
            #[must_use]
            pub fn path(self, method: &str, pattern: &str, view: impl $crate::view::View + 'static) -> Self {
                self.path_with_filters(method, pattern, view, $crate::middleware::Filters::default())
            }

            #[must_use]
            pub fn path_with_filters(
                mut self,
                method: &str,
                pattern: &str,
                view: impl $crate::view::View + 'static,
                filters: $crate::middleware::Filters,
            ) -> Self {
                self.routes.add_view(method, pattern, ::std::sync::Arc::new(view), filters, None);
                self
            }

            /// Registers `view` with a deadline: past `timeout` the client gets `408` and `message`.
            #[must_use]
            pub fn timeout_path(
                self,
                method: &str,
                pattern: &str,
                view: impl $crate::view::View + 'static,
                timeout: ::std::time::Duration,
                message: impl Into<String>,
            ) -> Self {
                self.timeout_with_code_path_with_filters(
                    method,
                    pattern,
                    view,
                    $crate::middleware::Filters::default(),
                    timeout,
                    message,
                    $crate::timeout::DEFAULT_TIMEOUT_STATUS,
                )
            }

            #[must_use]
            pub fn timeout_path_with_filters(
                self,
                method: &str,
                pattern: &str,
                view: impl $crate::view::View + 'static,
                filters: $crate::middleware::Filters,
                timeout: ::std::time::Duration,
                message: impl Into<String>,
            ) -> Self {
                self.timeout_with_code_path_with_filters(
                    method,
                    pattern,
                    view,
                    filters,
                    timeout,
                    message,
                    $crate::timeout::DEFAULT_TIMEOUT_STATUS,
                )
            }

            /// Like [`timeout_path`](Self::timeout_path), answering with `status` instead of `408`.
            #[must_use]
            pub fn timeout_with_code_path(
                self,
                method: &str,
                pattern: &str,
                view: impl $crate::view::View + 'static,
                timeout: ::std::time::Duration,
                message: impl Into<String>,
                status: ::http::StatusCode,
            ) -> Self {
                self.timeout_with_code_path_with_filters(
                    method,
                    pattern,
                    view,
                    $crate::middleware::Filters::default(),
                    timeout,
                    message,
                    status,
                )
            }

            #[must_use]
            #[allow(clippy::too_many_arguments, reason = "every registration parameter is positional")]
            pub fn timeout_with_code_path_with_filters(
                mut self,
                method: &str,
                pattern: &str,
                view: impl $crate::view::View + 'static,
                filters: $crate::middleware::Filters,
                timeout: ::std::time::Duration,
                message: impl Into<String>,
                status: ::http::StatusCode,
            ) -> Self {
                self.routes.add_view(
                    method,
                    pattern,
                    ::std::sync::Arc::new(view),
                    filters,
                    Some((timeout, message.into(), status)),
                );
                self
            }

            /// Registers the routes built by `build` below `prefix`.
            #[must_use]
            pub fn group(
                mut self,
                prefix: &str,
                build: impl FnOnce($crate::routes::RouteGroup) -> $crate::routes::RouteGroup,
            ) -> Self {
                let group = build($crate::routes::RouteGroup::new(prefix));
                self.routes.add_group(group.routes);
                self
            }

            /// Serves the directory `root` below `url`, bypassing every middleware.
            #[must_use]
            pub fn static_dir(mut self, url: &str, root: impl Into<::std::path::PathBuf>) -> Self {
                self.routes.add_static_dir(url, root.into());
                self
            }

            /// Serves the single file at `path` on `GET url`, bypassing every middleware.
            #[must_use]
            pub fn serve_file(mut self, url: &str, path: impl Into<::std::path::PathBuf>) -> Self {
                self.routes.add_file(url, path.into());
                self
            }
        }
    };
}

pub(crate) use route_registration;

route_registration!(RouteGroup);
