//! Composable `RequestFn` middleware, one function per combinator named in
//! the design: `bind_root`, `add_headers`, `add_effectful_headers`,
//! `add_error_handling`, `add_effect_on_response`. Each wraps an inner
//! `RequestFn`; order matters, most importantly that `add_error_handling`
//! must sit closer to the transport than any JSON decoding applied at the
//! call site (see `json::add_json_response`'s doc comment for the
//! commutativity law this preserves).

use std::collections::HashSet;
use std::sync::Arc;

use http::{HeaderMap, StatusCode};

use crate::error::{check_status, HttpError};
use crate::request::{BoxFuture, Request, RequestFn};

/// Prefixes any relative URL in the request with `base_url`, ensuring
/// exactly one `/` joins them. Absolute URLs (already containing a scheme)
/// pass through unchanged.
pub fn bind_root(base_url: impl Into<String>, inner: RequestFn) -> RequestFn {
    let base_url = base_url.into();
    let root = base_url.trim_end_matches('/').to_owned();
    Arc::new(move |mut req: Request| {
        if !req.url.contains("://") {
            let path = req.url.trim_start_matches('/');
            req.url = format!("{root}/{path}");
        }
        inner(req)
    })
}

/// Merges a fixed set of headers into every request; fixed values override
/// anything the caller already set, matching `add_headers`'s contract that
/// "fixed values win".
pub fn add_headers(fixed: HeaderMap, inner: RequestFn) -> RequestFn {
    Arc::new(move |mut req: Request| {
        for (name, value) in fixed.iter() {
            req.headers.insert(name.clone(), value.clone());
        }
        inner(req)
    })
}

/// Computes headers asynchronously (e.g. resolving an auth token from the
/// shared cache) and merges them into the request, with computed headers
/// taking precedence over the caller's -- used for `x-auth-token` injection.
pub fn add_effectful_headers<F>(header_effect: F, inner: RequestFn) -> RequestFn
where
    F: Fn() -> BoxFuture<'static, HeaderMap> + Send + Sync + 'static,
{
    let header_effect = Arc::new(header_effect);
    Arc::new(move |mut req: Request| {
        let header_effect = header_effect.clone();
        let inner = inner.clone();
        Box::pin(async move {
            let computed = header_effect().await;
            for (name, value) in computed.iter() {
                req.headers.insert(name.clone(), value.clone());
            }
            inner(req).await
        })
    })
}

/// Fails with `ApiError` when the response status is not in `success_codes`.
/// Must wrap any status-sensitive step directly, since nothing downstream of
/// this middleware ever sees a non-success response.
pub fn add_error_handling(success_codes: HashSet<StatusCode>, inner: RequestFn) -> RequestFn {
    Arc::new(move |req: Request| {
        let inner = inner.clone();
        let success_codes = success_codes.clone();
        Box::pin(async move {
            let resp = inner(req).await?;
            check_status(&success_codes, resp.status, resp.body.clone())?;
            Ok(resp)
        })
    })
}

/// Runs `side_effect` whenever the response status is in `codes`, then
/// propagates the response unchanged -- used to invalidate a cached auth
/// token on a 401 before the caller retries.
pub fn add_effect_on_response<F>(
    codes: HashSet<StatusCode>,
    side_effect: F,
    inner: RequestFn,
) -> RequestFn
where
    F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
{
    let side_effect = Arc::new(side_effect);
    Arc::new(move |req: Request| {
        let inner = inner.clone();
        let side_effect = side_effect.clone();
        let codes = codes.clone();
        Box::pin(async move {
            let resp = inner(req).await?;
            if codes.contains(&resp.status) {
                side_effect().await;
            }
            Ok(resp)
        })
    })
}

/// Retries a single `Request` once after invalidating the auth cache on a
/// 401, mirroring §5's "the middleware retries once" rule for expired
/// tokens. Built from `add_effect_on_response` rather than being its own
/// primitive, since the retry is just "run the invalidating request fn,
/// and if it still 401s, run it again and give up".
pub async fn with_auth_retry(
    invalidating_fn: RequestFn,
    retry_fn: RequestFn,
    req: Request,
) -> Result<crate::request::RawResponse, HttpError> {
    let first = invalidating_fn(req.clone()).await;
    match first {
        Ok(resp) if resp.status == StatusCode::UNAUTHORIZED => retry_fn(req).await,
        other => other,
    }
}
