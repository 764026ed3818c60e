//! Deadline enforcement on connection IO.

use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Sleep;

pin_project! {
    /// Fails reads that wait longer than `idle_timeout` while no request is in flight, and
    /// writes that stall longer than `write_timeout`, with [`io::ErrorKind::TimedOut`].
    pub(crate) struct TimedIo<I> {
        #[pin]
        inner: I,
        idle_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
        in_flight: Arc<AtomicUsize>,
        read_deadline: Option<Pin<Box<Sleep>>>,
        write_deadline: Option<Pin<Box<Sleep>>>,
    }
}

impl<I> TimedIo<I> {
    pub(crate) fn new(
        inner: I,
        idle_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
        in_flight: Arc<AtomicUsize>,
    ) -> Self {
        Self { inner, idle_timeout, write_timeout, in_flight, read_deadline: None, write_deadline: None }
    }
}

/// Marks one request as in flight on a connection for as long as it lives.
#[derive(Debug)]
pub(crate) struct InFlight {
    counter: Arc<AtomicUsize>,
}

impl InFlight {
    pub(crate) fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self { counter: Arc::clone(counter) }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

fn expired(deadline: &mut Option<Pin<Box<Sleep>>>, timeout: Duration, cx: &mut Context<'_>) -> bool {
    let sleep = deadline.get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
    sleep.as_mut().poll(cx).is_ready()
}

fn timed_out(what: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, what)
}

/// Applies the write deadline to one write-side poll.
fn poll_write_side<T>(
    poll: Poll<io::Result<T>>,
    deadline: &mut Option<Pin<Box<Sleep>>>,
    read_deadline: &mut Option<Pin<Box<Sleep>>>,
    timeout: Option<Duration>,
    cx: &mut Context<'_>,
) -> Poll<io::Result<T>> {
    match poll {
        Poll::Ready(result) => {
            *deadline = None;
            // outgoing progress counts as activity
            *read_deadline = None;
            Poll::Ready(result)
        }
        Poll::Pending => match timeout {
            Some(timeout) if expired(deadline, timeout, cx) => Poll::Ready(Err(timed_out("write timed out"))),
            _ => Poll::Pending,
        },
    }
}

impl<I: AsyncRead> AsyncRead for TimedIo<I> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        match this.inner.poll_read(cx, buf) {
            Poll::Ready(result) => {
                *this.read_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending => {
                let idle = this.in_flight.load(Ordering::Acquire) == 0;
                match *this.idle_timeout {
                    Some(timeout) if idle => {
                        if expired(this.read_deadline, timeout, cx) {
                            Poll::Ready(Err(timed_out("connection idle timeout")))
                        } else {
                            Poll::Pending
                        }
                    }
                    _ => {
                        *this.read_deadline = None;
                        Poll::Pending
                    }
                }
            }
        }
    }
}

impl<I: AsyncWrite> AsyncWrite for TimedIo<I> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.project();
        let poll = this.inner.poll_write(cx, buf);
        poll_write_side(poll, this.write_deadline, this.read_deadline, *this.write_timeout, cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        let poll = this.inner.poll_write_vectored(cx, bufs);
        poll_write_side(poll, this.write_deadline, this.read_deadline, *this.write_timeout, cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        let poll = this.inner.poll_flush(cx);
        poll_write_side(poll, this.write_deadline, this.read_deadline, *this.write_timeout, cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        let poll = this.inner.poll_shutdown(cx);
        poll_write_side(poll, this.write_deadline, this.read_deadline, *this.write_timeout, cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn idle_read_times_out() {
        let (_client, server) = tokio::io::duplex(64);
        let mut io = TimedIo::new(server, Some(SHORT), None, Arc::new(AtomicUsize::new(0)));

        let mut buf = [0u8; 8];
        let err = io.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn reads_are_not_bounded_while_a_request_is_in_flight() {
        let (_client, server) = tokio::io::duplex(64);
        let counter = Arc::new(AtomicUsize::new(0));
        let mut io = TimedIo::new(server, Some(SHORT), None, Arc::clone(&counter));

        let _guard = InFlight::enter(&counter);
        let mut buf = [0u8; 8];
        let result = tokio::time::timeout(SHORT * 4, io.read(&mut buf)).await;
        assert!(result.is_err(), "read should still be pending");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn data_arriving_in_time_is_read() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut io = TimedIo::new(server, Some(Duration::from_secs(5)), None, Arc::new(AtomicUsize::new(0)));

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        io.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn stalled_write_times_out() {
        let (_client, server) = tokio::io::duplex(8);
        let mut io = TimedIo::new(server, None, Some(SHORT), Arc::new(AtomicUsize::new(0)));

        let err = io.write_all(&[0u8; 64]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn in_flight_guard_counts() {
        let counter = Arc::new(AtomicUsize::new(0));
        let first = InFlight::enter(&counter);
        let second = InFlight::enter(&counter);
        assert_eq!(counter.load(Ordering::Acquire), 2);
        drop(first);
        drop(second);
        assert_eq!(counter.load(Ordering::Acquire), 0);
    }
}
