//! Putting a [`Server`] on a socket.
//!
//! Every accepted connection runs on its own task, tracked by a [`TaskTracker`]. Shutdown
//! is cooperative: a [`CancellationToken`] stops the accept loop and asks each connection
//! to finish its current request and close, then the tracker is awaited, bounded by
//! `shutdown_timeout`. In-flight handlers are never aborted.

use super::io::{InFlight, TimedIo};
use super::{Server, ServerState, listener, signal, tls};
use crate::body::ResponseBody;
use crate::config::{Config, DEFAULT_READ_TIMEOUT};
use crate::error::{RemoteAddr, ServerError};
use crate::handler::status_response;
use crate::logging;
use http::header::CONNECTION;
use http::{HeaderValue, Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::{HttpService, service_fn};
use hyper_util::rt::{TokioIo, TokioTimer};
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Per-connection settings derived from the configuration snapshot.
#[derive(Debug, Clone, Copy)]
struct ConnectionSettings {
    keep_alive: bool,
    header_read_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl From<&Config> for ConnectionSettings {
    fn from(config: &Config) -> Self {
        Self {
            keep_alive: !config.disable_keepalive,
            header_read_timeout: config.read_timeout,
            idle_timeout: config.effective_idle_timeout(),
            write_timeout: config.write_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drain {
    Wait,
    Skip,
}

impl Server {
    /// Binds `config.host:config.port` and serves, gracefully when `config.graceful_shutdown` is set.
    pub async fn listen_and_serve(&self) -> Result<(), ServerError> {
        let config = self.config();
        let listener = listener::bind(&config.addr()).await?;
        if config.graceful_shutdown { self.serve_gracefully(listener).await } else { self.serve(listener).await }
    }

    /// Serves `listener` until it fails permanently.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.run(listener, false, std::future::pending(), Drain::Skip).await
    }

    /// Serves `listener` until SIGINT or SIGTERM, then drains in-flight connections.
    pub async fn serve_gracefully(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.run(listener, true, signal::terminate(), Drain::Wait).await
    }

    /// Serves `listener` until `signal` resolves, then drains in-flight connections.
    pub async fn serve_with_shutdown<F>(&self, listener: TcpListener, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        self.run(listener, false, signal, Drain::Wait).await
    }

    async fn run<F>(&self, listener: TcpListener, graceful: bool, signal: F, drain: Drain) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let config = self.reconcile(&listener, graceful)?;
        logging::init(&config);

        let acceptor = if config.tls_enable { Some(tls::acceptor(&config)?) } else { None };
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        self.set_state(ServerState::Listening);
        info!("Listening on: {}://{}/", config.scheme(), config.addr());

        let result = tokio::select! {
            result = self.accept_loop(&listener, &config, acceptor, &shutdown, &tracker) => result,
            () = signal => {
                info!("shutdown requested");
                Ok(())
            }
        };

        drop(listener);
        self.set_state(ServerState::Draining);
        shutdown.cancel();
        tracker.close();

        let drained = match drain {
            Drain::Wait => wait_for_connections(&tracker, config.shutdown_timeout).await,
            Drain::Skip => Ok(()),
        };

        self.set_state(ServerState::Stopped);
        info!("server stopped");
        result.and(drained)
    }

    /// Rewrites host and port to the address `listener` is actually bound to.
    fn reconcile(&self, listener: &TcpListener, graceful: bool) -> Result<Arc<Config>, ServerError> {
        let local = listener.local_addr()?;
        self.inner.config.rcu(|current| {
            let mut config = Config::clone(current);
            config.host = local.ip().to_string();
            config.port = local.port();
            if graceful {
                config.graceful_shutdown = true;
                config.read_timeout.get_or_insert(DEFAULT_READ_TIMEOUT);
            }
            config
        });
        Ok(self.config())
    }

    async fn accept_loop(
        &self,
        listener: &TcpListener,
        config: &Config,
        acceptor: Option<TlsAcceptor>,
        shutdown: &CancellationToken,
        tracker: &TaskTracker,
    ) -> Result<(), ServerError> {
        let settings = ConnectionSettings::from(config);
        let limiter = Arc::new(Semaphore::new(config.permits()));

        let mut backoff = ACCEPT_BACKOFF_MIN;
        loop {
            let (stream, remote) = match listener.accept().await {
                Ok(accepted) => {
                    backoff = ACCEPT_BACKOFF_MIN;
                    accepted
                }
                Err(e) => match AcceptFailure::classify(&e) {
                    AcceptFailure::Connection => {
                        debug!(cause = %e, "transient accept error");
                        continue;
                    }
                    AcceptFailure::Resource => {
                        warn!(cause = %e, backoff = ?backoff, "accept failed, retrying");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                        continue;
                    }
                    AcceptFailure::Permanent => {
                        error!(cause = %e, "accept failed");
                        return Err(ServerError::Accept(e));
                    }
                },
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!(cause = %e, %remote, "failed to set TCP_NODELAY");
            }

            let permit = Arc::clone(&limiter).try_acquire_owned().ok();
            let server = self.clone();
            let acceptor = acceptor.clone();
            let shutdown = shutdown.clone();

            tracker.spawn(async move {
                match acceptor {
                    Some(acceptor) => match handshake(&acceptor, stream, settings.header_read_timeout).await {
                        Ok(stream) => serve_connection(server, stream, remote, settings, permit, shutdown).await,
                        Err(e) => warn!(cause = %e, %remote, "tls handshake failed"),
                    },
                    None => serve_connection(server, stream, remote, settings, permit, shutdown).await,
                }
            });
        }
    }
}

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// How the accept loop reacts to a failed `accept`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptFailure {
    /// The peer went away before the connection was accepted; retry at once.
    Connection,
    /// The process or system ran out of something (descriptors, buffers, memory); back off and retry.
    Resource,
    /// The listener itself is unusable.
    Permanent,
}

impl AcceptFailure {
    fn classify(e: &io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock => Self::Connection,
            io::ErrorKind::InvalidInput | io::ErrorKind::NotConnected | io::ErrorKind::Unsupported => Self::Permanent,
            // EMFILE, ENFILE and ENOBUFS have no dedicated kind.
            _ => Self::Resource,
        }
    }
}

async fn handshake<I>(
    acceptor: &TlsAcceptor,
    stream: I,
    timeout: Option<Duration>,
) -> io::Result<tokio_rustls::server::TlsStream<I>>
where
    I: AsyncRead + AsyncWrite + Unpin,
{
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, acceptor.accept(stream))
            .await
            .map_err(|elapsed| io::Error::new(io::ErrorKind::TimedOut, elapsed))?,
        None => acceptor.accept(stream).await,
    }
}

async fn serve_connection<I>(
    server: Server,
    io: I,
    remote: SocketAddr,
    settings: ConnectionSettings,
    permit: Option<OwnedSemaphorePermit>,
    shutdown: CancellationToken,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let in_flight = Arc::new(AtomicUsize::new(0));
    let io = TokioIo::new(TimedIo::new(io, settings.idle_timeout, settings.write_timeout, Arc::clone(&in_flight)));

    let mut builder = http1::Builder::new();
    builder.timer(TokioTimer::new()).keep_alive(settings.keep_alive && permit.is_some());
    if let Some(timeout) = settings.header_read_timeout {
        builder.header_read_timeout(timeout);
    }

    let result = match permit {
        Some(_permit) => {
            let service = service_fn(move |mut req: Request<Incoming>| {
                let server = server.clone();
                let guard = InFlight::enter(&in_flight);
                req.extensions_mut().insert(RemoteAddr(remote));
                async move {
                    let response = server.call(req).await;
                    drop(guard);
                    Ok::<_, Infallible>(response)
                }
            });
            drive(builder.serve_connection(io, service), &shutdown).await
        }
        None => {
            warn!(%remote, "connection limit reached");
            let service = service_fn(|_req: Request<Incoming>| async { Ok::<_, Infallible>(overloaded()) });
            drive(builder.serve_connection(io, service), &shutdown).await
        }
    };

    if let Err(e) = result {
        debug!(cause = %e, %remote, "connection closed with error");
    }
}

/// Runs the connection, switching it to graceful shutdown once `shutdown` fires.
async fn drive<I, S>(conn: http1::Connection<I, S>, shutdown: &CancellationToken) -> hyper::Result<()>
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin,
    S: HttpService<Incoming, ResBody = ResponseBody>,
    S::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let mut conn = std::pin::pin!(conn);
    tokio::select! {
        result = conn.as_mut() => return result,
        () = shutdown.cancelled() => {}
    }
    conn.as_mut().graceful_shutdown();
    conn.await
}

fn overloaded() -> Response<ResponseBody> {
    let mut response = status_response(StatusCode::SERVICE_UNAVAILABLE, "server concurrency limit exceeded");
    response.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

async fn wait_for_connections(tracker: &TaskTracker, timeout: Option<Duration>) -> Result<(), ServerError> {
    info!(connections = tracker.len(), "draining connections");
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, tracker.wait()).await.map_err(|elapsed| {
            warn!(cause = %elapsed, connections = tracker.len(), "shutdown timed out");
            ServerError::ShutdownTimeout(timeout)
        }),
        None => {
            tracker.wait().await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::view_fn;
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    struct Running {
        addr: SocketAddr,
        server: Server,
        stop: oneshot::Sender<()>,
        handle: JoinHandle<Result<(), ServerError>>,
    }

    async fn start(server: Server) -> Running {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();

        let mut states = server.subscribe_state();
        let handle = tokio::spawn({
            let server = server.clone();
            async move {
                server
                    .serve_with_shutdown(listener, async {
                        let _ = stopped.await;
                    })
                    .await
            }
        });
        states.wait_for(|state| *state == ServerState::Listening).await.unwrap();

        Running { addr, server, stop, handle }
    }

    async fn exchange(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn get(path: &str) -> String {
        format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
    }

    fn sleeping_server(config: Config) -> Server {
        Server::builder()
            .config(config)
            .path(
                "GET",
                "/sleep",
                view_fn(|ctx| {
                    Box::pin(async move {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        ctx.text_response("rested")
                    })
                }),
            )
            .build()
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn serves_requests_over_tcp() {
        let server = Server::builder()
            .path(
                "GET",
                "/whoami",
                view_fn(|ctx| {
                    Box::pin(async move {
                        let ip = ctx.remote_addr().map(|addr| addr.ip().to_string()).unwrap_or_default();
                        ctx.text_response(ip)
                    })
                }),
            )
            .build()
            .unwrap();
        let running = start(server).await;

        let response = exchange(running.addr, &get("/whoami")).await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.contains("server: atrium\r\n"));
        assert!(response.ends_with("127.0.0.1"));

        let response = exchange(running.addr, &get("/missing")).await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"), "{response}");

        running.stop.send(()).unwrap();
        running.handle.await.unwrap().unwrap();
        assert_eq!(running.server.state(), ServerState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn config_follows_the_bound_listener() {
        let running = start(Server::builder().build().unwrap()).await;

        let config = running.server.config();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, running.addr.port());

        running.stop.send(()).unwrap();
        running.handle.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn graceful_shutdown_finishes_in_flight_request() {
        let config = Config { shutdown_timeout: Some(Duration::from_secs(5)), ..Config::default() };
        let running = start(sleeping_server(config)).await;

        let addr = running.addr;
        let started = Instant::now();
        let request = tokio::spawn(async move { exchange(addr, &get("/sleep")).await });

        tokio::time::sleep(Duration::from_millis(300)).await;
        running.stop.send(()).unwrap();

        let mut states = running.server.subscribe_state();
        states.wait_for(|state| *state != ServerState::Listening).await.unwrap();
        assert!(TcpStream::connect(addr).await.is_err(), "no connection may be accepted after the signal");

        let response = request.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.ends_with("rested"));

        running.handle.await.unwrap().unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(running.server.state(), ServerState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drain_is_bounded_by_shutdown_timeout() {
        let config = Config { shutdown_timeout: Some(Duration::from_millis(100)), ..Config::default() };
        let running = start(sleeping_server(config)).await;

        let addr = running.addr;
        let _request = tokio::spawn(async move { exchange(addr, &get("/sleep")).await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        running.stop.send(()).unwrap();

        let result = running.handle.await.unwrap();
        assert!(matches!(result, Err(ServerError::ShutdownTimeout(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn excess_connections_get_503() {
        let config = Config { concurrency: 1, ..Config::default() };
        let server = Server::builder()
            .config(config)
            .path("GET", "/", view_fn(|ctx| Box::pin(async move { ctx.text_response("ok") })))
            .build()
            .unwrap();
        let running = start(server).await;

        let mut holder = TcpStream::connect(running.addr).await.unwrap();
        holder.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await.unwrap();
        let mut buf = [0u8; 512];
        let n = holder.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 200 OK"));

        let response = exchange(running.addr, &get("/")).await;
        assert!(response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"), "{response}");
        assert!(response.ends_with("server concurrency limit exceeded"));

        drop(holder);
        running.stop.send(()).unwrap();
        running.handle.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn idle_connections_are_closed() {
        let config = Config { idle_timeout: Some(Duration::from_millis(100)), ..Config::default() };
        let running = start(Server::builder().config(config).build().unwrap()).await;

        let mut stream = TcpStream::connect(running.addr).await.unwrap();
        let mut buf = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut buf)).await;
        assert!(read.is_ok(), "idle connection should be closed by the server");

        running.stop.send(()).unwrap();
        running.handle.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn disabled_keepalive_closes_after_one_response() {
        let config = Config { disable_keepalive: true, ..Config::default() };
        let server = Server::builder()
            .config(config)
            .path("GET", "/", view_fn(|ctx| Box::pin(async move { ctx.text_response("ok") })))
            .build()
            .unwrap();
        let running = start(server).await;

        let response = exchange(running.addr, "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.contains("connection: close\r\n"));

        running.stop.send(()).unwrap();
        running.handle.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn graceful_listener_gets_a_read_timeout() {
        let server = Server::builder().build().unwrap();
        assert_eq!(server.config().read_timeout, None);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let config = server.reconcile(&listener, true).unwrap();

        assert!(config.graceful_shutdown);
        assert_eq!(config.read_timeout, Some(DEFAULT_READ_TIMEOUT));
        assert_eq!(config.port, listener.local_addr().unwrap().port());
        assert_eq!(server.config().read_timeout, Some(DEFAULT_READ_TIMEOUT));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn plain_listener_keeps_its_timeouts() {
        let server = Server::builder().build().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let config = server.reconcile(&listener, false).unwrap();

        assert!(!config.graceful_shutdown);
        assert_eq!(config.read_timeout, None);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sigterm_stops_a_graceful_server() {
        let config = Config { shutdown_timeout: Some(Duration::from_secs(5)), ..Config::default() };
        let server = sleeping_server(config);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut states = server.subscribe_state();
        let handle = tokio::spawn({
            let server = server.clone();
            async move { server.serve_gracefully(listener).await }
        });
        states.wait_for(|state| *state == ServerState::Listening).await.unwrap();

        let request = tokio::spawn(async move { exchange(addr, &get("/sleep")).await });
        tokio::time::sleep(Duration::from_millis(300)).await;

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let response = request.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.ends_with("rested"));

        handle.await.unwrap().unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.config().graceful_shutdown);
        assert_eq!(server.config().read_timeout, Some(DEFAULT_READ_TIMEOUT));
    }

    #[test]
    fn classifies_accept_errors() {
        assert_eq!(AcceptFailure::classify(&io::Error::from(io::ErrorKind::ConnectionReset)), AcceptFailure::Connection);
        assert_eq!(AcceptFailure::classify(&io::Error::from(io::ErrorKind::Interrupted)), AcceptFailure::Connection);
        assert_eq!(AcceptFailure::classify(&io::Error::from(io::ErrorKind::OutOfMemory)), AcceptFailure::Resource);
        assert_eq!(AcceptFailure::classify(&io::Error::other("too many open files")), AcceptFailure::Resource);
        assert_eq!(AcceptFailure::classify(&io::Error::from(io::ErrorKind::InvalidInput)), AcceptFailure::Permanent);
    }

    #[cfg(unix)]
    #[test]
    fn descriptor_exhaustion_is_retried() {
        const EMFILE: i32 = 24;
        const ENFILE: i32 = 23;
        assert_eq!(AcceptFailure::classify(&io::Error::from_raw_os_error(EMFILE)), AcceptFailure::Resource);
        assert_eq!(AcceptFailure::classify(&io::Error::from_raw_os_error(ENFILE)), AcceptFailure::Resource);
    }
}
