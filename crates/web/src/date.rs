//! HTTP date header value management.
//!
//! Formatting an RFC 7231 date on every response is wasteful under load, so the formatted
//! value is cached and only rebuilt once the wall-clock second it was rendered for has passed.
//! Readers never block each other: the cache lives behind an [`ArcSwap`].

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::HeaderValue;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug)]
struct Rendered {
    second: u64,
    value: HeaderValue,
}

/// A cache of the current `Date` header value.
#[derive(Debug)]
pub(crate) struct DateService {
    current: ArcSwap<Option<Rendered>>,
}

impl DateService {
    pub(crate) fn new() -> Self {
        Self { current: ArcSwap::from_pointee(None) }
    }

    /// Returns the header value for the current second, rendering it if the cached one is stale.
    pub(crate) fn http_date(&self) -> Option<HeaderValue> {
        let now = unix_second();
        let cached = self.current.load();
        if let Some(rendered) = &**cached
            && rendered.second == now
        {
            return Some(rendered.value.clone());
        }

        let value = render()?;
        self.current.store(Arc::new(Some(Rendered { second: now, value: value.clone() })));
        Some(value)
    }
}

fn unix_second() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |elapsed| elapsed.as_secs())
}

fn render() -> Option<HeaderValue> {
    let mut buf = faf_http_date::get_date_buff_no_key();
    faf_http_date::get_date_no_key(&mut buf);
    HeaderValue::from_maybe_shared(Bytes::from_owner(buf)).ok()
}
