//! Method-aware routing on top of `matchit`.
//!
//! The [`Router`] only stores and looks up compiled handlers; it knows nothing about views,
//! middlewares or pooling. Patterns follow `matchit` syntax: `/users/{id}` captures one
//! segment, `/files/{*filepath}` captures the rest of the path.

use crate::context::PathParams;
use crate::error::ServerBuildError;
use crate::handler::RequestHandler;
use http::{Method, StatusCode};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type InnerRouter = matchit::Router<Arc<dyn RequestHandler>>;

#[derive(Default)]
pub struct Router {
    routes: HashMap<Method, InnerRouter>,
}

/// Outcome of looking up a request.
pub enum RouteMatch<'router> {
    Found { handler: &'router Arc<dyn RequestHandler>, params: PathParams },
    /// The path is registered with a trailing slash toggled; redirect there.
    Redirect { location: String, status: StatusCode },
    /// The path exists, but not for this method.
    MethodNotAllowed { allowed: Vec<Method> },
    NotFound,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: Method, pattern: &str, handler: Arc<dyn RequestHandler>) -> Result<(), ServerBuildError> {
        self.routes.entry(method.clone()).or_default().insert(pattern, handler).map_err(|source| {
            ServerBuildError::InvalidRoute { route: format!("{method} {pattern}"), source }
        })
    }

    pub fn at(&self, method: &Method, path: &str, query: Option<&str>) -> RouteMatch<'_> {
        if let Some(inner) = self.routes.get(method) {
            if let Ok(matched) = inner.at(path) {
                return RouteMatch::Found { handler: matched.value, params: matched.params.into() };
            }

            if let Some(location) = trailing_slash_twin(path).filter(|twin| inner.at(twin).is_ok()) {
                let location = match query {
                    Some(query) => format!("{location}?{query}"),
                    None => location,
                };
                let status = if method == Method::GET { StatusCode::MOVED_PERMANENTLY } else { StatusCode::PERMANENT_REDIRECT };
                return RouteMatch::Redirect { location, status };
            }
        }

        let mut allowed: Vec<Method> = self
            .routes
            .iter()
            .filter(|(registered, inner)| *registered != method && inner.at(path).is_ok())
            .map(|(registered, _)| registered.clone())
            .collect();

        if allowed.is_empty() {
            return RouteMatch::NotFound;
        }

        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        RouteMatch::MethodNotAllowed { allowed }
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn trailing_slash_twin(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.strip_suffix('/') {
        Some(trimmed) => Some(trimmed.to_owned()),
        None => Some(format!("{path}/")),
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router").field("methods", &self.routes.keys().collect::<Vec<_>>()).finish()
    }
}
