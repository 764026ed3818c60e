//! Error types for request dispatch, server construction and serving.
//!
//! Request-scoped failures ([`StatusError`], [`DispatchError`]) never leave the dispatcher:
//! they are rendered into a response. Construction faults ([`ServerBuildError`]) abort
//! `build()`, and transport faults ([`ServerError`]) are what the serving loop returns.

use http::StatusCode;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Boxed error type shared by views, bodies and the encoder.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error paired with the status code the response should carry.
///
/// Middlewares return this to reject a request; the message of `source` becomes the
/// response body.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct StatusError {
    status: StatusCode,
    source: BoxError,
}

impl StatusError {
    pub fn new(status: StatusCode, source: impl Into<BoxError>) -> Self {
        Self { status, source: source.into() }
    }

    pub fn bad_request(source: impl Into<BoxError>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, source)
    }

    pub fn unauthorized(source: impl Into<BoxError>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, source)
    }

    pub fn forbidden(source: impl Into<BoxError>) -> Self {
        Self::new(StatusCode::FORBIDDEN, source)
    }

    pub fn internal(source: impl Into<BoxError>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, source)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn into_source(self) -> BoxError {
        self.source
    }
}

/// The stage of a dispatch that produced the terminal error of a request.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("{0}")]
    Before(StatusError),

    #[error("{0}")]
    View(BoxError),

    #[error("{0}")]
    After(StatusError),

    #[error("{message}")]
    Panic { message: String },
}

impl DispatchError {
    /// The status the response is written with.
    ///
    /// View failures and panics always resolve to `500`, whatever the error itself says.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Before(e) | Self::After(e) => e.status(),
            Self::View(_) | Self::Panic { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            Self::Before(_) => "before",
            Self::View(_) => "view",
            Self::After(_) => "after",
            Self::Panic { .. } => "panic",
        }
    }
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("the http method '{method}' must be a non-empty uppercase token")]
    InvalidMethod { method: String },

    #[error("invalid route '{route}': {source}")]
    InvalidRoute {
        route: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },
}

impl ServerBuildError {
    pub fn invalid_method<S: ToString>(method: S) -> Self {
        Self::InvalidMethod { method: method.to_string() }
    }

    pub fn invalid_config<S: ToString>(reason: S) -> Self {
        Self::InvalidConfig { reason: reason.to_string() }
    }
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("listener failed: {0}")]
    Accept(#[source] io::Error),

    #[error("invalid tls material: {reason}")]
    Tls { reason: String },

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("in-flight connections did not drain within {0:?}")]
    ShutdownTimeout(Duration),
}

impl ServerError {
    pub fn bind<S: ToString>(addr: S, source: io::Error) -> Self {
        Self::Bind { addr: addr.to_string(), source }
    }

    pub fn tls<S: ToString>(reason: S) -> Self {
        Self::Tls { reason: reason.to_string() }
    }
}

/// The peer address of the connection a request arrived on.
///
/// Inserted into the request extensions by the connection layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);
