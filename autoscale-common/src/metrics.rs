use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Instant;

use cadence::{
    BufferedUdpMetricSink, Counted, NopMetricSink, QueuingMetricSink, StatsdClient, Timed,
};

pub use cadence::MetricError;

#[derive(Debug, Clone)]
struct MetricTimer {
    label: String,
    start: Instant,
    tags: HashMap<String, String>,
}

/// A handle to the process-wide statsd client plus a set of tags that get
/// merged into every metric sent through this handle. Cloned cheaply per
/// convergence cycle / scheduler tick so call sites can tag metrics with
/// `tenant_id`/`group_id`/`bucket` without threading a tag map everywhere.
#[derive(Debug, Default, Clone)]
pub struct Metrics {
    client: Option<Arc<StatsdClient>>,
    tags: HashMap<String, String>,
    timer: Option<MetricTimer>,
}

impl Drop for Metrics {
    fn drop(&mut self) {
        let Some(timer) = self.timer.take() else {
            return;
        };
        let Some(client) = self.client.as_ref() else {
            return;
        };
        let label = timer.label.clone();
        let lapse = (Instant::now() - timer.start).as_millis() as u64;
        let mut tagged = client.time_with_tags(&timer.label, lapse);
        let mut all_tags = self.tags.clone();
        all_tags.extend(timer.tags);
        for (k, v) in &all_tags {
            tagged = tagged.with_tag(k, v);
        }
        if let Err(e) = tagged.try_send() {
            slog_scope::warn!("metric send error"; "label" => &label, "error" => format!("{e:?}"));
        }
    }
}

impl Metrics {
    pub fn new(client: Arc<StatsdClient>) -> Self {
        Self {
            client: Some(client),
            tags: HashMap::default(),
            timer: None,
        }
    }

    /// A metrics handle that discards everything; used in tests and for
    /// components that run without a configured statsd endpoint.
    pub fn noop() -> Self {
        Self::new(Arc::new(StatsdClient::builder("", NopMetricSink).build()))
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn start_timer(&mut self, label: &str, tags: Option<HashMap<String, String>>) {
        self.timer = Some(MetricTimer {
            label: label.to_owned(),
            start: Instant::now(),
            tags: tags.unwrap_or_default(),
        });
    }

    pub fn incr(&self, label: &str) {
        self.count(label, 1)
    }

    pub fn incr_with_tag(&self, label: &str, key: &str, value: &str) {
        let mut tags = HashMap::default();
        tags.insert(key.to_owned(), value.to_owned());
        self.count_with_tags(label, 1, tags);
    }

    pub fn count(&self, label: &str, count: i64) {
        self.count_with_tags(label, count, HashMap::default())
    }

    pub fn count_with_tags(&self, label: &str, count: i64, tags: HashMap<String, String>) {
        let Some(client) = self.client.as_ref() else {
            return;
        };
        let mut tagged = client.count_with_tags(label, count);
        let mut all_tags = self.tags.clone();
        all_tags.extend(tags);
        for (k, v) in &all_tags {
            tagged = tagged.with_tag(k, v);
        }
        if let Err(e) = tagged.try_send() {
            slog_scope::warn!("metric send error"; "label" => label, "error" => format!("{e:?}"));
        }
    }
}

pub fn metrics_from_opts(
    label: &str,
    host: Option<&str>,
    port: u16,
) -> Result<Arc<StatsdClient>, MetricError> {
    let builder = if let Some(statsd_host) = host {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;
        let udp_sink = BufferedUdpMetricSink::from((statsd_host, port), socket)?;
        let sink = QueuingMetricSink::from(udp_sink);
        StatsdClient::builder(label, sink)
    } else {
        StatsdClient::builder(label, NopMetricSink)
    };
    Ok(Arc::new(
        builder
            .with_error_handler(|err| {
                slog_scope::warn!("metric send error"; "error" => format!("{err:?}"));
            })
            .build(),
    ))
}
