use super::Server;
use crate::config::Config;
use crate::context::{ContextPool, DEFAULT_MAX_IDLE, RequestContext};
use crate::dispatch::{PanicHandler, ViewDispatcher};
use crate::error::ServerBuildError;
use crate::handler::{RequestHandler, StatusHandler};
use crate::router::Router;
use crate::routes::{Compiler, RouteTable, route_registration};
use crate::view::View;
use http::{HeaderValue, StatusCode};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// Collects routes, middlewares and configuration, then freezes them into a [`Server`].
///
/// Registration happens here only: once built, the route table and middleware chains
/// of a server never change.
pub struct ServerBuilder {
    config: Config,
    routes: RouteTable,
    not_found: Option<Arc<dyn View>>,
    method_not_allowed: Option<Arc<dyn View>>,
    panic_handler: Option<PanicHandler>,
}

impl ServerBuilder {
    pub(crate) fn new() -> Self {
        Self {
            config: Config::default(),
            routes: RouteTable::new(""),
            not_found: None,
            method_not_allowed: None,
            panic_handler: None,
        }
    }

    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Answers unrouted paths with `view`, behind the global middlewares.
    #[must_use]
    pub fn not_found(mut self, view: impl View + 'static) -> Self {
        self.not_found = Some(Arc::new(view));
        self
    }

    /// Answers routed paths hit with an unregistered method. The `Allow` header is added
    /// after `view` ran.
    #[must_use]
    pub fn method_not_allowed(mut self, view: impl View + 'static) -> Self {
        self.method_not_allowed = Some(Arc::new(view));
        self
    }

    /// Shapes the response of requests whose view or middleware panicked.
    #[must_use]
    pub fn panic_handler<F>(mut self, panic_handler: F) -> Self
    where
        F: Fn(&mut RequestContext, &str) + Send + Sync + 'static,
    {
        self.panic_handler = Some(Arc::new(panic_handler));
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let config = self.config.normalize()?;

        let server_name = if config.no_default_server_header {
            None
        } else {
            let name = HeaderValue::from_str(&config.name)
                .map_err(|e| ServerBuildError::invalid_config(format!("invalid server name {:?}: {e}", config.name)))?;
            Some(name)
        };

        let pool = Arc::new(ContextPool::new(DEFAULT_MAX_IDLE, config.max_request_body_size));
        let limiter = Arc::new(Semaphore::new(config.permits()));

        let slot = |view: Option<Arc<dyn View>>, status: StatusCode| -> Arc<dyn RequestHandler> {
            match view {
                Some(view) => Arc::new(
                    ViewDispatcher::new(Arc::clone(&pool), view, self.routes.before().clone(), self.routes.after().clone())
                        .with_panic_handler(self.panic_handler.clone()),
                ),
                None => Arc::new(StatusHandler::new(status)),
            }
        };
        let not_found = slot(self.not_found, StatusCode::NOT_FOUND);
        let method_not_allowed = slot(self.method_not_allowed, StatusCode::METHOD_NOT_ALLOWED);

        let mut router = Router::new();
        let mut compiler =
            Compiler { router: &mut router, pool: Arc::clone(&pool), limiter, panic_handler: self.panic_handler };
        self.routes.compile(&mut compiler, "", &[], &[])?;

        if router.is_empty() {
            debug!("no routes registered, every request goes to the not-found slot");
        }
        debug!(router = ?router, "server built");
        Ok(Server::new(config, router, not_found, method_not_allowed, pool, server_name))
    }
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("routes", &self.routes)
            .field("custom_not_found", &self.not_found.is_some())
            .field("custom_method_not_allowed", &self.method_not_allowed.is_some())
            .field("panic_handler", &self.panic_handler.is_some())
            .finish()
    }
}

route_registration!(ServerBuilder);
