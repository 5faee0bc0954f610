//! The worker binary: wires settings, logging, a store, the HTTP effect
//! stack, and the scheduler's tick loop together into a running process.
//! Grounded in `syncserver`'s `main.rs` -- settings load, `init_logging`,
//! then hand off to the long-running service -- generalized from serving
//! HTTP requests to running a `tokio::time::interval` tick loop, since this
//! binary has no inbound API surface (§1: "REST API surface ... out of
//! scope").

mod logging;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use autoscale_common::{Metrics, SystemClock};
use autoscale_controller::GroupControllerContext;
use autoscale_executor::{ExecutorContext, RetryConfig};
use autoscale_http::{add_error_handling, add_headers, bind_root, base, RequestFn};
use autoscale_scheduler::{Scheduler, SchedulerConfig, StaticPartitioner};
use autoscale_settings::Settings;
use autoscale_store::mock::MockStore;
use http::{HeaderMap, HeaderValue, StatusCode};

#[tokio::main]
async fn main() {
    let config_path = std::env::args().nth(1);
    let settings = Settings::with_env_and_config_file(config_path.as_deref())
        .expect("failed to load settings");
    logging::init_logging(settings.json_logs);
    slog_scope::info!("autoscale-worker starting"; "bucket_count" => settings.bucket_count);

    let metrics = build_metrics(&settings);
    let store = Arc::new(MockStore::new());
    let controller = GroupControllerContext {
        store: store.clone(),
        policies: store.clone(),
        executor: build_executor_context(&settings, metrics.clone()),
        clock: Arc::new(SystemClock),
        metrics: metrics.clone(),
        cycle_deadline: Duration::from_secs(settings.convergence_deadline_secs),
    };

    let scheduler = Arc::new(Scheduler::new(
        store,
        controller,
        Arc::new(StaticPartitioner::new(settings.bucket_count)),
        Arc::new(SystemClock),
        metrics,
        SchedulerConfig {
            batch_size: settings.scheduler_batch_size as usize,
            interval: Duration::from_secs(settings.scheduler_interval_secs),
        },
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let run_handle = tokio::spawn(scheduler.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl-c");
    slog_scope::info!("shutdown signal received");
    let _ = shutdown_tx.send(());
    let _ = run_handle.await;

    logging::reset_logging();
}

fn build_metrics(settings: &Settings) -> Metrics {
    let client = autoscale_common::metrics_from_opts(
        &settings.statsd_label,
        settings.statsd_host.as_deref(),
        settings.statsd_port,
    )
    .expect("failed to build statsd client");
    Metrics::new(client)
}

/// Composes each of the three cloud-service request functions the same way:
/// base `reqwest` client -> `bind_root` at the configured endpoint ->
/// the static auth-token header (standing in for the token-producing
/// effect, §1) -> status-code enforcement (§4.1).
fn build_executor_context(settings: &Settings, metrics: Metrics) -> ExecutorContext {
    let client = reqwest::Client::new();
    let compute = cloud_request_fn(client.clone(), &settings.compute_endpoint, &settings.auth_token);
    let clb = cloud_request_fn(client.clone(), &settings.clb_endpoint, &settings.auth_token);
    let rcv3 = cloud_request_fn(client, &settings.rcv3_endpoint, &settings.auth_token);

    ExecutorContext {
        compute,
        clb,
        rcv3,
        retry: RetryConfig {
            max_attempts: settings.retry_max_attempts,
            initial_delay: Duration::from_millis(settings.retry_base_delay_ms),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            deadline: Duration::from_secs(settings.convergence_deadline_secs),
        },
        wait_interval: Duration::from_secs(settings.wait_for_status_interval_secs),
        wait_timeout: Duration::from_secs(settings.wait_for_status_timeout_secs),
        metrics,
    }
}

fn cloud_request_fn(client: reqwest::Client, endpoint: &str, auth_token: &str) -> RequestFn {
    let mut fixed = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(auth_token) {
        fixed.insert("x-auth-token", value);
    }
    let success = HashSet::from([
        StatusCode::OK,
        StatusCode::CREATED,
        StatusCode::ACCEPTED,
        StatusCode::NO_CONTENT,
    ]);
    let f = base(client);
    let f = add_error_handling(success, f);
    let f = add_headers(fixed, f);
    bind_root(endpoint.to_owned(), f)
}
