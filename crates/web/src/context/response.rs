//! Response helpers on [`RequestContext`].
//!
//! Each `*_response` helper replaces the body and sets a matching `Content-Type`, and returns a
//! [`ViewResult`] so a view can end with `return ctx.text_response("ok")`.

use super::RequestContext;
use crate::body::ResponseBody;
use crate::view::ViewResult;
use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::Serialize;

pub(crate) const TEXT_PLAIN_UTF_8: &str = "text/plain; charset=utf-8";
const TEXT_HTML_UTF_8: &str = "text/html; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";

impl RequestContext {
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[inline]
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn response_headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Sets a response header, replacing previous values of the same name.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn set_body(&mut self, body: impl Into<ResponseBody>) {
        self.response_body = body.into();
    }

    pub fn text_response(&mut self, body: impl Into<ResponseBody>) -> ViewResult {
        self.typed_response(body.into(), HeaderValue::from_static(TEXT_PLAIN_UTF_8));
        Ok(())
    }

    pub fn html_response(&mut self, body: impl Into<ResponseBody>) -> ViewResult {
        self.typed_response(body.into(), HeaderValue::from_static(TEXT_HTML_UTF_8));
        Ok(())
    }

    pub fn json_response<T: Serialize + ?Sized>(&mut self, value: &T) -> ViewResult {
        let body = serde_json::to_vec(value)?;
        self.typed_response(body.into(), HeaderValue::from_static(APPLICATION_JSON));
        Ok(())
    }

    /// Writes `body` as is with the given content type.
    pub fn raw_response(&mut self, body: impl Into<ResponseBody>, content_type: &str) -> ViewResult {
        let content_type = HeaderValue::try_from(content_type)?;
        self.typed_response(body.into(), content_type);
        Ok(())
    }

    pub fn redirect(&mut self, location: &str, status: StatusCode) -> ViewResult {
        let location = HeaderValue::try_from(location)?;
        self.headers.insert(LOCATION, location);
        self.status = status;
        self.response_body = ResponseBody::empty();
        Ok(())
    }

    /// Replaces the response with `message` as plain text and sets `status`.
    ///
    /// Headers set earlier are dropped along with the old body.
    pub fn error(&mut self, message: impl Into<String>, status: StatusCode) {
        let message: String = message.into();
        self.headers.clear();
        self.status = status;
        self.typed_response(ResponseBody::from(message), HeaderValue::from_static(TEXT_PLAIN_UTF_8));
    }

    fn typed_response(&mut self, body: ResponseBody, content_type: HeaderValue) {
        self.headers.insert(CONTENT_TYPE, content_type);
        self.response_body = body;
    }
}
