use crate::body::ResponseBody;
use crate::encoding::Writer;
use crate::error::BoxError;
use bytes::{Buf, Bytes};
use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, VARY};
use http::{HeaderValue, Response, StatusCode};
use http_body::{Body, Frame};
use pin_project_lite::pin_project;
use std::io;
use std::io::Write;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tracing::trace;
use zstd::stream::write::Encoder as ZstdEncoder;

/// Bodies with a known size at or below this are sent as is.
const MIN_COMPRESS_SIZE: u64 = 1024;

enum Encoder {
    Gzip(GzEncoder<Writer>),
    Deflate(ZlibEncoder<Writer>),
    Zstd(ZstdEncoder<'static, Writer>),
    Br(Box<brotli::CompressorWriter<Writer>>),
}

impl Encoder {
    fn gzip() -> Self {
        Self::Gzip(GzEncoder::new(Writer::new(), Compression::default()))
    }

    fn deflate() -> Self {
        Self::Deflate(ZlibEncoder::new(Writer::new(), Compression::default()))
    }

    fn zstd() -> Option<Self> {
        match ZstdEncoder::new(Writer::new(), 6) {
            Ok(encoder) => Some(Self::Zstd(encoder)),
            Err(e) => {
                trace!(cause = %e, "failed to create zstd encoder");
                None
            }
        }
    }

    fn br() -> Self {
        Self::Br(Box::new(brotli::CompressorWriter::new(
            Writer::new(),
            32 * 1024, // 32 KiB buffer
            3,         // BROTLI_PARAM_QUALITY
            22,        // BROTLI_PARAM_LGWIN
        )))
    }

    /// Picks the first supported coding the client accepts, preferring the denser ones.
    fn select(accept_encodings: &str) -> Option<Self> {
        let accepts = |name: &str| {
            accept_encodings.split(',').any(|item| {
                let mut parts = item.split(';');
                let coding = parts.next().unwrap_or_default().trim();
                let refused = parts.any(|param| matches!(param.trim(), "q=0" | "q=0.0" | "q=0.00" | "q=0.000"));
                coding.eq_ignore_ascii_case(name) && !refused
            })
        };

        if accepts("zstd") {
            Self::zstd()
        } else if accepts("br") {
            Some(Self::br())
        } else if accepts("gzip") {
            Some(Self::gzip())
        } else if accepts("deflate") {
            Some(Self::deflate())
        } else {
            None
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Encoder::Gzip(_) => "gzip",
            Encoder::Deflate(_) => "deflate",
            Encoder::Zstd(_) => "zstd",
            Encoder::Br(_) => "br",
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let result = match self {
            Self::Gzip(encoder) => encoder.write_all(data),
            Self::Deflate(encoder) => encoder.write_all(data),
            Self::Zstd(encoder) => encoder.write_all(data),
            Self::Br(encoder) => encoder.write_all(data),
        };
        if let Err(err) = &result {
            trace!(encoding = self.name(), cause = %err, "error encoding response body");
        }
        result
    }

    fn take(&mut self) -> Bytes {
        match self {
            Self::Gzip(encoder) => encoder.get_mut().take(),
            Self::Deflate(encoder) => encoder.get_mut().take(),
            Self::Zstd(encoder) => encoder.get_mut().take(),
            Self::Br(encoder) => encoder.get_mut().take(),
        }
    }

    fn finish(self) -> io::Result<Bytes> {
        match self {
            Self::Gzip(encoder) => encoder.finish().map(Writer::into_bytes),
            Self::Deflate(encoder) => encoder.finish().map(Writer::into_bytes),
            Self::Zstd(encoder) => encoder.finish().map(Writer::into_bytes),
            Self::Br(mut encoder) => {
                encoder.flush()?;
                Ok(encoder.into_inner().into_bytes())
            }
        }
    }
}

pin_project! {
    struct EncodedBody<B> {
        #[pin]
        inner: B,
        // `None` once the trailing bytes have been flushed
        encoder: Option<Encoder>,
    }
}

impl<B> EncodedBody<B> {
    fn new(inner: B, encoder: Encoder) -> Self {
        Self { inner, encoder: Some(encoder) }
    }
}

impl<B> Body for EncodedBody<B>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        loop {
            let Some(encoder) = this.encoder.as_mut() else {
                return Poll::Ready(None);
            };

            return match ready!(this.inner.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => {
                    let mut data = match frame.into_data() {
                        Ok(data) => data,
                        // trailers are not carried through the encoder
                        Err(_) => continue,
                    };

                    while data.has_remaining() {
                        let chunk = data.chunk();
                        let len = chunk.len();
                        if let Err(e) = encoder.write(chunk) {
                            return Poll::Ready(Some(Err(e.into())));
                        }
                        data.advance(len);
                    }

                    let bytes = encoder.take();
                    if bytes.is_empty() {
                        continue;
                    }
                    Poll::Ready(Some(Ok(Frame::data(bytes))))
                }
                Some(Err(e)) => Poll::Ready(Some(Err(e.into()))),
                None => {
                    let Some(encoder) = this.encoder.take() else {
                        return Poll::Ready(None);
                    };
                    match encoder.finish() {
                        Ok(bytes) if bytes.is_empty() => Poll::Ready(None),
                        Ok(bytes) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                        Err(e) => Poll::Ready(Some(Err(e.into()))),
                    }
                }
            };
        }
    }

    fn is_end_stream(&self) -> bool {
        self.encoder.is_none()
    }
}

/// Compresses the response body according to the request's `Accept-Encoding` value.
pub(crate) fn encode(accept_encoding: &HeaderValue, resp: &mut Response<ResponseBody>) {
    let status_code = resp.status();
    if status_code == StatusCode::NO_CONTENT
        || status_code == StatusCode::NOT_MODIFIED
        || status_code == StatusCode::SWITCHING_PROTOCOLS
    {
        return;
    }

    // response has already encoded
    if resp.headers().contains_key(CONTENT_ENCODING) {
        return;
    }

    let Ok(accept_encodings) = accept_encoding.to_str() else {
        return;
    };

    let body = resp.body_mut();
    if body.is_empty() {
        return;
    }

    if body.size_hint().upper().is_some_and(|upper| upper <= MIN_COMPRESS_SIZE) {
        return;
    }

    let Some(encoder) = Encoder::select(accept_encodings) else {
        return;
    };

    let encoder_name = encoder.name();
    let encoded_body = EncodedBody::new(body.take(), encoder);
    body.replace(ResponseBody::stream(encoded_body));

    let headers = resp.headers_mut();
    headers.remove(CONTENT_LENGTH);
    headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoder_name));
    headers.append(VARY, HeaderValue::from_static("accept-encoding"));
}
