use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

/// An HTTP call, represented as a plain data value rather than issued
/// directly. Request values stay inert until handed to a `RequestFn`,
/// which is what lets the group controller (C6) be exercised in tests
/// without any network present -- the same property `otter.util.pure_http`
/// gets from representing requests as `Effect` intents.
#[derive(Clone, Debug)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn with_header(mut self, name: &'static str, value: impl AsRef<str>) -> Self {
        if let Ok(v) = http::HeaderValue::from_str(value.as_ref()) {
            self.headers.insert(name, v);
        }
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }
}

/// The result of executing a `Request`: a status code, headers, and the raw
/// body bytes. JSON decoding is deliberately not done here -- see
/// `add_json_response` -- so `add_error_handling` can inspect non-JSON error
/// bodies.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A composed request executor. Each middleware in this crate takes a
/// `RequestFn` and returns a new `RequestFn` that wraps it, the same way
/// `otter.util.pure_http`'s decorators take and return a `request` function.
pub type RequestFn =
    Arc<dyn Fn(Request) -> BoxFuture<'static, Result<RawResponse, crate::error::HttpError>> + Send + Sync>;

/// The innermost `RequestFn`: actually performs the call via `reqwest`.
pub fn base(client: reqwest::Client) -> RequestFn {
    Arc::new(move |req: Request| {
        let client = client.clone();
        Box::pin(async move {
            let mut builder = client.request(req.method, &req.url);
            builder = builder.headers(req.headers);
            if let Some(body) = req.body {
                builder = builder.body(body);
            }
            let resp = builder.send().await?;
            let status = resp.status();
            let headers = resp.headers().clone();
            let body = resp.bytes().await?;
            Ok(RawResponse {
                status,
                headers,
                body,
            })
        })
    })
}
