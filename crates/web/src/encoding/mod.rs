//! Response compression.
//!
//! [`encode`] picks an encoder from the request's `Accept-Encoding` header and swaps the
//! response body for a streaming [`encoder::EncodedBody`].

use bytes::{Bytes, BytesMut};
use std::io;

mod encoder;

pub(crate) use encoder::encode;

// inspired by from actix-http
pub(crate) struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn new() -> Self {
        Self { buf: BytesMut::with_capacity(4096) }
    }

    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
