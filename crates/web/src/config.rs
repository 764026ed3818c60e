//! Server configuration.
//!
//! A [`Config`] is taken by value when the server is built and is treated as an
//! immutable snapshot afterwards. The only rewrite happens when serving starts on a
//! listener, where the host and port are reconciled with the address actually bound.

use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::Level;

use crate::error::ServerBuildError;

pub const DEFAULT_SERVER_NAME: &str = "atrium";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
/// Read timeout forced on graceful servers that did not set one.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(20);
/// Maximum number of concurrent connections, and of concurrent timeout-wrapped handlers.
pub const DEFAULT_CONCURRENCY: usize = 256 * 1024;
pub const DEFAULT_MAX_REQUEST_BODY_SIZE: usize = 4 * 1024 * 1024;

/// Where the log subscriber writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogOutput {
    #[default]
    Stderr,
    Stdout,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    /// Value of the `Server` response header.
    pub name: String,
    pub no_default_server_header: bool,

    pub tls_enable: bool,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,

    /// Compress response bodies according to the request's `Accept-Encoding`.
    pub compress: bool,

    pub concurrency: usize,
    pub disable_keepalive: bool,
    pub max_request_body_size: usize,

    /// Bounds the time spent reading a request head.
    pub read_timeout: Option<Duration>,
    /// Bounds how long a single write to the peer may stall.
    pub write_timeout: Option<Duration>,
    /// Bounds how long a keep-alive connection may sit without a request.
    /// Falls back to `read_timeout` when unset.
    pub idle_timeout: Option<Duration>,

    pub graceful_shutdown: bool,
    /// Upper bound for draining in-flight connections. `None` waits indefinitely.
    pub shutdown_timeout: Option<Duration>,

    pub log_level: Level,
    pub log_output: LogOutput,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            name: DEFAULT_SERVER_NAME.to_owned(),
            no_default_server_header: false,
            tls_enable: false,
            cert_file: None,
            key_file: None,
            compress: false,
            concurrency: DEFAULT_CONCURRENCY,
            disable_keepalive: false,
            max_request_body_size: DEFAULT_MAX_REQUEST_BODY_SIZE,
            read_timeout: None,
            write_timeout: None,
            idle_timeout: None,
            graceful_shutdown: false,
            shutdown_timeout: None,
            log_level: Level::INFO,
            log_output: LogOutput::Stderr,
        }
    }
}

impl Config {
    /// `host:port`, as used for binding.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls_enable { "https" } else { "http" }
    }

    /// `concurrency`, capped to what a semaphore can hold.
    pub(crate) fn permits(&self) -> usize {
        self.concurrency.min(Semaphore::MAX_PERMITS)
    }

    pub(crate) fn effective_idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout.or(self.read_timeout)
    }

    /// Checks the snapshot and fills the defaults that depend on other fields.
    pub(crate) fn normalize(mut self) -> Result<Self, ServerBuildError> {
        if self.tls_enable && (self.cert_file.is_none() || self.key_file.is_none()) {
            return Err(ServerBuildError::invalid_config("tls is enabled but cert_file or key_file is missing"));
        }

        if self.concurrency == 0 {
            return Err(ServerBuildError::invalid_config("concurrency must be greater than zero"));
        }

        if self.name.is_empty() {
            DEFAULT_SERVER_NAME.clone_into(&mut self.name);
        }

        self.read_timeout = self.read_timeout.filter(|timeout| !timeout.is_zero());
        if self.graceful_shutdown && self.read_timeout.is_none() {
            self.read_timeout = Some(DEFAULT_READ_TIMEOUT);
        }

        Ok(self)
    }
}
