//! Pure HTTP effects (C1): requests as inert values, composed from small
//! middleware functions, so the rest of the control plane can be tested
//! without a network. Grounded in `otter.util.pure_http` and in
//! `tokenserver-auth`'s direct `reqwest::Client` usage for the base
//! executor.

mod error;
mod json;
mod middleware;
mod request;

pub use error::{ApiError, HttpError};
pub use json::{add_content_only, add_json_request_data, add_json_response};
pub use middleware::{
    add_effect_on_response, add_effectful_headers, add_error_handling, add_headers, bind_root,
    with_auth_retry,
};
pub use request::{base, BoxFuture, RawResponse, Request, RequestFn};

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, StatusCode};
    use std::collections::HashSet;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn stub(status: StatusCode, body: &'static str) -> RequestFn {
        Arc::new(move |_req: Request| {
            Box::pin(async move {
                Ok(RawResponse {
                    status,
                    headers: HeaderMap::new(),
                    body: bytes::Bytes::from_static(body.as_bytes()),
                })
            })
        })
    }

    #[tokio::test]
    async fn bind_root_joins_with_single_slash() {
        let captured = Arc::new(std::sync::Mutex::new(String::new()));
        let c = captured.clone();
        let inner: RequestFn = Arc::new(move |req: Request| {
            *c.lock().unwrap() = req.url.clone();
            Box::pin(async move {
                Ok(RawResponse {
                    status: StatusCode::OK,
                    headers: HeaderMap::new(),
                    body: bytes::Bytes::new(),
                })
            })
        });
        let f = bind_root("http://slashdot.org/", inner);
        f(Request::get("foo")).await.unwrap();
        assert_eq!(&*captured.lock().unwrap(), "http://slashdot.org/foo");

        let captured2 = Arc::new(std::sync::Mutex::new(String::new()));
        let c2 = captured2.clone();
        let inner2: RequestFn = Arc::new(move |req: Request| {
            *c2.lock().unwrap() = req.url.clone();
            Box::pin(async move {
                Ok(RawResponse {
                    status: StatusCode::OK,
                    headers: HeaderMap::new(),
                    body: bytes::Bytes::new(),
                })
            })
        });
        let f2 = bind_root("http://slashdot.org", inner2);
        f2(Request::get("foo")).await.unwrap();
        assert_eq!(&*captured2.lock().unwrap(), "http://slashdot.org/foo");
    }

    #[tokio::test]
    async fn add_headers_fixed_values_win() {
        let captured = Arc::new(std::sync::Mutex::new(HeaderMap::new()));
        let c = captured.clone();
        let inner: RequestFn = Arc::new(move |req: Request| {
            *c.lock().unwrap() = req.headers.clone();
            Box::pin(async move {
                Ok(RawResponse {
                    status: StatusCode::OK,
                    headers: HeaderMap::new(),
                    body: bytes::Bytes::new(),
                })
            })
        });
        let mut fixed = HeaderMap::new();
        fixed.insert("one", "1".parse().unwrap());
        fixed.insert("two", "2".parse().unwrap());
        let f = add_headers(fixed, inner);
        let req = Request::get("u")
            .with_header("one", "hey")
            .with_header("three", "3");
        f(req).await.unwrap();
        let headers = captured.lock().unwrap();
        assert_eq!(headers.get("one").unwrap(), "1");
        assert_eq!(headers.get("two").unwrap(), "2");
        assert_eq!(headers.get("three").unwrap(), "3");
    }

    #[tokio::test]
    async fn add_effectful_headers_computed_values_win() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let effect = move || -> BoxFuture<'static, HeaderMap> {
            c.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                let mut h = HeaderMap::new();
                h.insert("x-auth-token", "abc123".parse().unwrap());
                h
            })
        };
        let captured = Arc::new(std::sync::Mutex::new(HeaderMap::new()));
        let c2 = captured.clone();
        let inner: RequestFn = Arc::new(move |req: Request| {
            *c2.lock().unwrap() = req.headers.clone();
            Box::pin(async move {
                Ok(RawResponse {
                    status: StatusCode::OK,
                    headers: HeaderMap::new(),
                    body: bytes::Bytes::new(),
                })
            })
        });
        let f = add_effectful_headers(effect, inner);
        let req = Request::get("u").with_header("x-auth-token", "fooey");
        f(req).await.unwrap();
        assert_eq!(
            captured.lock().unwrap().get("x-auth-token").unwrap(),
            "abc123"
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn add_error_handling_raises_api_error_on_unexpected_status() {
        let inner = stub(StatusCode::NOT_FOUND, "not found body");
        let mut success = HashSet::new();
        success.insert(StatusCode::OK);
        let f = add_error_handling(success, inner);
        let err = f(Request::get("u")).await.unwrap_err();
        match err {
            HttpError::Api(api) => {
                assert_eq!(api.code, StatusCode::NOT_FOUND);
                assert_eq!(&api.body[..], b"not found body");
            }
            _ => panic!("expected ApiError"),
        }
    }

    #[tokio::test]
    async fn add_error_handling_passes_through_on_success() {
        let inner = stub(StatusCode::OK, "ok");
        let mut success = HashSet::new();
        success.insert(StatusCode::OK);
        let f = add_error_handling(success, inner);
        let resp = f(Request::get("u")).await.unwrap();
        assert_eq!(resp.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn add_effect_on_response_invalidates_only_on_matching_code() {
        let invalidations = Arc::new(AtomicUsize::new(0));
        let c = invalidations.clone();
        let side_effect = move || -> BoxFuture<'static, ()> {
            c.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {})
        };
        let mut codes = HashSet::new();
        codes.insert(StatusCode::UNAUTHORIZED);

        let badauth = add_effect_on_response(
            codes.clone(),
            side_effect.clone(),
            stub(StatusCode::UNAUTHORIZED, "badauth!"),
        );
        badauth(Request::get("u")).await.unwrap();
        assert_eq!(invalidations.load(Ordering::SeqCst), 1);

        let good = add_effect_on_response(codes, side_effect, stub(StatusCode::OK, "okay!"));
        good(Request::get("u")).await.unwrap();
        assert_eq!(invalidations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn add_content_only_drops_response() {
        let f = stub(StatusCode::OK, "foo");
        let content = add_content_only(&f, Request::get("u")).await.unwrap();
        assert_eq!(&content[..], b"foo");
    }

    #[tokio::test]
    async fn add_json_response_decodes_body() {
        let f = stub(StatusCode::OK, r#"{"a":"b"}"#);
        #[derive(serde::Deserialize, Debug)]
        struct Payload {
            a: String,
        }
        let (_resp, parsed): (_, Payload) = add_json_response(&f, Request::get("u")).await.unwrap();
        assert_eq!(parsed.a, "b");
    }

    #[test]
    fn add_json_request_data_serializes_body() {
        #[derive(serde::Serialize)]
        struct Payload {
            a: String,
        }
        let req = Request::get("u");
        let req = add_json_request_data(
            req,
            &Payload {
                a: "b".to_owned(),
            },
        )
        .unwrap();
        assert_eq!(req.body.unwrap(), bytes::Bytes::from_static(br#"{"a":"b"}"#));
        assert_eq!(
            req.headers.get(http::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn error_handling_wraps_before_json_decode_canonical_order() {
        // Canonical order per the design's middleware-commutativity law:
        // add_error_handling must run before add_json_response is applied,
        // so an error body that is not valid JSON still surfaces as an
        // ApiError rather than a JSON-decode error.
        let inner = stub(StatusCode::INTERNAL_SERVER_ERROR, "not json at all");
        let mut success = HashSet::new();
        success.insert(StatusCode::OK);
        let wrapped = add_error_handling(success, inner);

        #[derive(serde::Deserialize, Debug)]
        struct Payload {
            #[allow(dead_code)]
            a: String,
        }
        let err = add_json_response::<Payload>(&wrapped, Request::get("u"))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Api(_)));
    }
}
