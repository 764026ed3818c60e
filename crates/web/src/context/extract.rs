//! Typed access to the request body and query string.
//!
//! Failures are reported as [`StatusError`]s so a middleware can forward them with `?`:
//! a body over the configured limit is `413`, anything malformed is `400`.
//!
//! ```no_run
//! # use atrium_web::{RequestContext, ViewResult};
//! #[derive(serde::Deserialize)]
//! struct Login {
//!     name: String,
//! }
//!
//! async fn login(ctx: &mut RequestContext) -> ViewResult {
//!     let login: Login = ctx.form().await?;
//!     ctx.text_response(format!("hello {}", login.name))
//! }
//! ```

use super::RequestContext;
use crate::error::StatusError;
use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde::de::DeserializeOwned;

impl RequestContext {
    /// Reads the whole request body, at most `max_request_body_size` bytes.
    ///
    /// The body is collected once; later calls return the cached bytes.
    pub async fn body(&mut self) -> Result<&Bytes, StatusError> {
        if let Some(body) = self.body.take() {
            let collected = Limited::new(body, self.body_limit).collect().await.map_err(|e| {
                if e.is::<LengthLimitError>() {
                    StatusError::new(StatusCode::PAYLOAD_TOO_LARGE, e)
                } else {
                    StatusError::bad_request(e)
                }
            })?;
            self.body_bytes = Some(collected.to_bytes());
        }

        Ok(self.body_bytes.get_or_insert_with(Bytes::new))
    }

    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T, StatusError> {
        let body = self.body().await?;
        serde_json::from_slice(body).map_err(StatusError::bad_request)
    }

    pub async fn form<T: DeserializeOwned>(&mut self) -> Result<T, StatusError> {
        let body = self.body().await?;
        serde_urlencoded::from_bytes(body).map_err(StatusError::bad_request)
    }

    /// Deserializes the query string; a missing query string reads as empty.
    pub fn query<T: DeserializeOwned>(&self) -> Result<T, StatusError> {
        serde_qs::from_str(self.query_string().unwrap_or_default()).map_err(StatusError::bad_request)
    }
}
