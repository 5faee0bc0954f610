//! Configuration surface for the scheduler and controller binaries.
//!
//! Follows `tokenserver-settings`: a flat `serde::Deserialize` struct with a
//! `Default` impl giving sane local-dev values, loaded from environment
//! variables (prefixed `AUTOSCALE_`) layered over an optional config file.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Connection string for the backing wide-column store (C9).
    pub database_url: String,
    /// Connection string / host list for the coordination service
    /// (ZooKeeper-class) used for set partitioning.
    pub coordinator_hosts: String,
    /// The znode path under which the scheduler set-partitioner registers.
    pub coordinator_partition_path: String,
    /// Number of fixed buckets the event key space is sharded into.
    pub bucket_count: u32,
    /// Base URL of the compute (Nova-style) service this process targets.
    /// Ordinarily resolved per-request from a service catalog (C2) behind
    /// the authentication effect; fixed here since token acquisition and
    /// catalog fetch are external collaborators (§1) outside this core.
    pub compute_endpoint: String,
    /// Base URL of the CLB (load-balancer) service.
    pub clb_endpoint: String,
    /// Base URL of the RCv3 (load-balancer pool) service.
    pub rcv3_endpoint: String,
    /// Static bearer token stood in for the token-producing auth effect
    /// (§1: "accessed through a token-producing effect").
    pub auth_token: String,
    /// Number of events fetched per (bucket, tick) in `fetch_and_delete_events`.
    pub scheduler_batch_size: u32,
    /// Seconds between scheduler ticks.
    pub scheduler_interval_secs: u64,
    /// Max number of convergence cycles allowed in flight across this process.
    pub convergence_concurrency_limit: usize,
    /// Polling interval, in seconds, for `wait_for_status`.
    pub wait_for_status_interval_secs: u64,
    /// Overall timeout, in seconds, for `wait_for_status` before the server
    /// is marked for deletion instead.
    pub wait_for_status_timeout_secs: u64,
    /// Base delay, in milliseconds, for the executor's exponential backoff.
    pub retry_base_delay_ms: u64,
    /// Maximum number of retries per step before it is treated as a fatal
    /// failure.
    pub retry_max_attempts: u32,
    /// Wall-clock deadline, in seconds, for a single convergence cycle.
    pub convergence_deadline_secs: u64,
    /// The statsd label under which metrics are reported.
    pub statsd_label: String,
    /// statsd host; when absent metrics are a no-op sink.
    pub statsd_host: Option<String>,
    pub statsd_port: u16,
    /// Whether to emit structured JSON logs (production) or pretty human
    /// output (local dev).
    pub json_logs: bool,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            database_url: "store://127.0.0.1/autoscale".to_owned(),
            coordinator_hosts: "127.0.0.1:2181".to_owned(),
            coordinator_partition_path: "/autoscale/scheduler".to_owned(),
            bucket_count: 32,
            compute_endpoint: "http://127.0.0.1:8774/v2".to_owned(),
            clb_endpoint: "http://127.0.0.1:8080/v1.0".to_owned(),
            rcv3_endpoint: "http://127.0.0.1:8081/v1.0".to_owned(),
            auth_token: String::new(),
            scheduler_batch_size: 100,
            scheduler_interval_secs: 10,
            convergence_concurrency_limit: 64,
            wait_for_status_interval_secs: 5,
            wait_for_status_timeout_secs: 600,
            retry_base_delay_ms: 250,
            retry_max_attempts: 5,
            convergence_deadline_secs: 300,
            statsd_label: "autoscale".to_owned(),
            statsd_host: None,
            statsd_port: 8125,
            json_logs: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Config(#[from] config::ConfigError),
}

impl Settings {
    /// Loads settings from (in increasing precedence) built-in defaults, an
    /// optional config file, then `AUTOSCALE_*` environment variables.
    pub fn with_env_and_config_file(path: Option<&str>) -> Result<Self, SettingsError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Settings::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("AUTOSCALE")
                .separator("__")
                .try_parsing(true),
        );
        builder.build()?.try_deserialize().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let settings = Settings::default();
        assert!(settings.bucket_count > 0);
        assert!(settings.scheduler_batch_size > 0);
        assert!(settings.wait_for_status_timeout_secs > settings.wait_for_status_interval_secs);
    }
}
