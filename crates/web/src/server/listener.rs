use crate::error::ServerError;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::warn;

const BACKLOG: i32 = 1024;

/// Binds `addr` with `SO_REUSEADDR` (and `SO_REUSEPORT` on unix), falling back to a plain
/// listener when the socket options are refused.
pub(crate) async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    let resolved = tokio::net::lookup_host(addr)
        .await
        .map_err(|e| ServerError::bind(addr, e))?
        .next()
        .ok_or_else(|| ServerError::bind(addr, io::Error::new(io::ErrorKind::AddrNotAvailable, "no address resolved")))?;

    match reuse_port_listener(resolved) {
        Ok(listener) => Ok(listener),
        Err(e) => {
            warn!(cause = %e, addr = %resolved, "reuse-port listener unavailable, binding a plain one");
            TcpListener::bind(resolved).await.map_err(|e| ServerError::bind(addr, e))
        }
    }
}

fn reuse_port_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;
    TcpListener::from_std(socket.into())
}
