//! JSON codec helpers. These sit at the edges of a `RequestFn` pipeline
//! rather than being `RequestFn -> RequestFn` combinators themselves,
//! because they change the value's type (from `Request`/`RawResponse` to a
//! concrete `T`) rather than just decorating it.
//!
//! The load-bearing ordering constraint from the design (§8): JSON decoding
//! of the *response* must happen after `add_error_handling` has already
//! vetted the status code, not before -- an error body is not guaranteed to
//! be valid JSON. `execute_json` enforces this by construction: it calls the
//! (already error-handling-wrapped) `RequestFn` first and only then parses.

use http::header::CONTENT_TYPE;
use http::HeaderValue;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::HttpError;
use crate::request::{RawResponse, Request, RequestFn};

/// Serializes `body` as the request's JSON payload and sets `content-type`.
pub fn add_json_request_data<T: Serialize>(mut req: Request, body: &T) -> Result<Request, HttpError> {
    let bytes = serde_json::to_vec(body)?;
    req.headers
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    req.body = Some(bytes.into());
    Ok(req)
}

/// Executes `request_fn` and parses the successful response body as JSON,
/// yielding `(response, parsed)` so callers can still inspect headers (e.g.
/// `x-weave-timestamp`-equivalent values) alongside the decoded payload.
pub async fn add_json_response<T: DeserializeOwned>(
    request_fn: &RequestFn,
    req: Request,
) -> Result<(RawResponse, T), HttpError> {
    let resp = request_fn(req).await?;
    let parsed = serde_json::from_slice(&resp.body)?;
    Ok((resp, parsed))
}

/// Executes `request_fn` and drops the response, yielding only the body.
pub async fn add_content_only(
    request_fn: &RequestFn,
    req: Request,
) -> Result<bytes::Bytes, HttpError> {
    let resp = request_fn(req).await?;
    Ok(resp.body)
}
