//! `wait_for_status` (§4.4), grounded in
//! `otter.worker.launch_server_v1.wait_for_status`. The original polls via a
//! `LoopingCall` with no timeout and an explicit `@TODO: Timeouts` comment;
//! this rework resolves that open item by bounding the poll with an overall
//! deadline, after which the server is reported for deletion rather than
//! waited on forever.

use std::time::Duration;

use autoscale_http::{HttpError, Request, RequestFn};
use serde::Deserialize;
use tokio::time::Instant;

#[derive(Debug, Deserialize)]
struct ServerDetailsEnvelope {
    server: ServerDetails,
}

#[derive(Debug, Deserialize)]
struct ServerDetails {
    status: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("server entered ERROR status while waiting for {expected:?}")]
    ServerErrored { expected: String },
    #[error("timed out after {0:?} waiting for expected status")]
    TimedOut(Duration),
}

/// Polls `GET {server_endpoint}/servers/{server_id}` every `interval` until
/// its status equals `expected`. Treats Nova's `ERROR` status as fatal
/// (original's second `@TODO`) and bounds the whole wait by `timeout`.
pub async fn wait_for_status(
    request_fn: &RequestFn,
    server_endpoint: &str,
    server_id: &str,
    expected: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<(), WaitError> {
    let start = Instant::now();
    loop {
        if start.elapsed() >= timeout {
            return Err(WaitError::TimedOut(timeout));
        }
        let req = Request::get(format!("{server_endpoint}/servers/{server_id}"));
        match fetch_status(request_fn, req).await {
            Ok(status) if status == expected => return Ok(()),
            Ok(status) if status.eq_ignore_ascii_case("ERROR") => {
                return Err(WaitError::ServerErrored {
                    expected: expected.to_owned(),
                })
            }
            _ => {}
        }
        tokio::time::sleep(interval).await;
    }
}

async fn fetch_status(request_fn: &RequestFn, req: Request) -> Result<String, HttpError> {
    let resp = request_fn(req).await?;
    let envelope: ServerDetailsEnvelope = serde_json::from_slice(&resp.body)?;
    Ok(envelope.server.status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn stub_sequence(statuses: &'static [&'static str]) -> RequestFn {
        let idx = Arc::new(AtomicUsize::new(0));
        Arc::new(move |_req: Request| {
            let idx = idx.clone();
            Box::pin(async move {
                let i = idx.fetch_add(1, Ordering::SeqCst).min(statuses.len() - 1);
                let body = serde_json::json!({"server": {"status": statuses[i]}});
                Ok(autoscale_http::RawResponse {
                    status: StatusCode::OK,
                    headers: http::HeaderMap::new(),
                    body: serde_json::to_vec(&body).unwrap().into(),
                })
            })
        })
    }

    #[tokio::test]
    async fn resolves_once_expected_status_is_observed() {
        let rf = stub_sequence(&["BUILD", "BUILD", "ACTIVE"]);
        let result = wait_for_status(
            &rf,
            "http://nova",
            "s1",
            "ACTIVE",
            Duration::from_millis(1),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn fails_fast_on_error_status() {
        let rf = stub_sequence(&["BUILD", "ERROR"]);
        let result = wait_for_status(
            &rf,
            "http://nova",
            "s1",
            "ACTIVE",
            Duration::from_millis(1),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(
            result,
            Err(WaitError::ServerErrored {
                expected: "ACTIVE".into()
            })
        );
    }

    #[tokio::test]
    async fn times_out_when_status_never_arrives() {
        let rf = stub_sequence(&["BUILD"]);
        let result = wait_for_status(
            &rf,
            "http://nova",
            "s1",
            "ACTIVE",
            Duration::from_millis(1),
            Duration::from_millis(5),
        )
        .await;
        assert!(matches!(result, Err(WaitError::TimedOut(_))));
    }
}
