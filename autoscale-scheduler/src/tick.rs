//! The partitioned scheduler's tick loop (C8, §4.7). Grounded in
//! `otter.scheduler.SchedulerService.check_for_events` /
//! `check_for_events_in_bucket` / `process_events` / `execute_event`,
//! generalized from Twisted deferred chains into straight-line async code
//! per Design Note 5.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use autoscale_common::{Clock, Metrics};
use autoscale_controller::{evaluate_and_converge, EvaluationError, GroupControllerContext, PolicyRejection, PolicyTrigger};
use autoscale_store::{Event, EventStore};
use futures::future::join_all;
use tokio::time::Instant;

use crate::cron::next_cron_occurrence;
use crate::partitioner::{PartitionState, Partitioner};

#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    pub interval: Duration,
}

/// The distributed scheduler (C8): ticks on `config.interval`, scans each
/// owned bucket for due events, dispatches them to the group controller,
/// and reschedules recurring ones.
pub struct Scheduler {
    events: Arc<dyn EventStore>,
    controller: GroupControllerContext,
    partitioner: Arc<dyn Partitioner>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    config: SchedulerConfig,
    /// Set when a tick overruns `interval / 2` (SPEC_FULL §4.7 [ADD]); the
    /// very next tick is skipped rather than queued, then the flag clears.
    skip_next_tick: AtomicBool,
    last_tick_duration: Mutex<Option<Duration>>,
}

impl Scheduler {
    pub fn new(
        events: Arc<dyn EventStore>,
        controller: GroupControllerContext,
        partitioner: Arc<dyn Partitioner>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            events,
            controller,
            partitioner,
            clock,
            metrics,
            config,
            skip_next_tick: AtomicBool::new(false),
            last_tick_duration: Mutex::new(None),
        }
    }

    pub fn last_tick_duration(&self) -> Option<Duration> {
        *self.last_tick_duration.lock().unwrap()
    }

    /// Runs one scheduler tick to completion (§4.7). No exception escapes
    /// this call -- every per-event and per-bucket failure is caught and
    /// logged at its own boundary (§7: "no exception is ever allowed to
    /// escape a scheduler tick").
    pub async fn tick(&self) {
        match self.partitioner.state() {
            PartitionState::Allocating => {
                slog_scope::debug!("partition allocating; tick is a no-op");
                return;
            }
            PartitionState::Failed => {
                slog_scope::warn!("partition failed; restarting partitioner");
                self.metrics.incr("scheduler.partition.failed");
                self.partitioner.restart();
                return;
            }
            PartitionState::Acquired | PartitionState::ReleaseRequested => {}
        }

        if self.skip_next_tick.swap(false, Ordering::SeqCst) {
            slog_scope::warn!("skipping tick: previous tick exceeded interval/2");
            self.metrics.incr("scheduler.tick.skipped");
            return;
        }

        let start = Instant::now();
        for bucket in self.partitioner.owned_buckets() {
            self.process_bucket(bucket).await;
            if self.partitioner.state() == PartitionState::ReleaseRequested {
                // §8 scenario 6: the bucket just processed finished its
                // fetched batch already; stop scanning further buckets
                // this tick rather than picking up new ones mid-release.
                break;
            }
        }
        if self.partitioner.state() == PartitionState::ReleaseRequested {
            self.partitioner.release_set();
        }

        let elapsed = start.elapsed();
        *self.last_tick_duration.lock().unwrap() = Some(elapsed);
        self.metrics
            .count("scheduler.tick.duration_ms", elapsed.as_millis() as i64);
        if elapsed > self.config.interval / 2 {
            self.skip_next_tick.store(true, Ordering::SeqCst);
        }
    }

    /// Fetches-and-deletes events from `bucket` in `batch_size` chunks
    /// until a short batch signals the bucket is drained (§4.7 step 4).
    async fn process_bucket(&self, bucket: u32) {
        loop {
            let now = self.clock.now();
            let events = match self
                .events
                .fetch_and_delete_events(bucket, now, self.config.batch_size)
                .await
            {
                Ok(events) => events,
                Err(e) => {
                    slog_scope::warn!("fetch_and_delete_events failed"; "bucket" => bucket, "error" => %e);
                    return;
                }
            };
            if events.is_empty() {
                return;
            }
            let full_batch = events.len() == self.config.batch_size;
            self.process_events(events).await;
            if !full_batch {
                return;
            }
        }
    }

    /// Dispatches every event independently (§4.7 step 2), then reschedules
    /// the recurring ones whose policy survived (step 3). Events whose
    /// group or policy has been deleted are tombstoned for the rest of this
    /// batch, per §4.7's "collected into a per-batch tombstone set".
    async fn process_events(&self, events: Vec<Event>) {
        let dispatches = join_all(events.iter().map(|event| self.dispatch_one(event))).await;
        let tombstoned: HashSet<String> = events
            .iter()
            .zip(&dispatches)
            .filter(|(_, outcome)| matches!(outcome, DispatchOutcome::Tombstone))
            .map(|(event, _)| event.policy_id.clone())
            .collect();

        let now = self.clock.now();
        let mut to_reschedule = Vec::new();
        for event in events {
            let Some(cron_expr) = event.cron.clone() else {
                continue;
            };
            if tombstoned.contains(&event.policy_id) {
                continue;
            }
            match next_cron_occurrence(&cron_expr, now) {
                Ok(trigger_time) => to_reschedule.push(Event {
                    trigger_time,
                    ..event
                }),
                Err(e) => {
                    slog_scope::warn!(
                        "failed to compute next cron occurrence";
                        "policy_id" => &event.policy_id, "error" => %e
                    );
                }
            }
        }

        if !to_reschedule.is_empty() {
            if let Err(e) = self.events.add_cron_events(to_reschedule).await {
                slog_scope::warn!("failed to persist rescheduled cron events"; "error" => %e);
            }
        }
    }

    async fn dispatch_one(&self, event: &Event) -> DispatchOutcome {
        let result = evaluate_and_converge(
            &self.controller,
            &event.tenant_id,
            &event.policy_id,
            PolicyTrigger::Scheduled,
        )
        .await;
        match result {
            Ok(_) => {
                self.metrics.incr("scheduler.event.executed");
                DispatchOutcome::Executed
            }
            Err(EvaluationError::Rejected(PolicyRejection::GroupNotFound))
            | Err(EvaluationError::Rejected(PolicyRejection::PolicyNotFound)) => {
                slog_scope::info!(
                    "tombstoning event for deleted group/policy";
                    "policy_id" => &event.policy_id, "group_id" => &event.group_id
                );
                self.metrics.incr("scheduler.event.tombstoned");
                DispatchOutcome::Tombstone
            }
            Err(EvaluationError::Rejected(rejection)) => {
                slog_scope::debug!("policy rejected"; "policy_id" => &event.policy_id, "reason" => %rejection);
                self.metrics.incr("scheduler.event.rejected");
                DispatchOutcome::Rejected
            }
            Err(EvaluationError::Controller(e)) => {
                slog_scope::warn!(
                    "scheduler failed to execute policy";
                    "policy_id" => &event.policy_id, "group_id" => &event.group_id, "error" => %e
                );
                self.metrics.incr("scheduler.event.failed");
                DispatchOutcome::Failed
            }
        }
    }

    /// Runs `tick` on `config.interval` until `shutdown` resolves. Uses
    /// `MissedTickBehavior::Skip` so a slow tick drops queued firings
    /// instead of bursting through them, matching §5's "the next tick is
    /// skipped (not queued)".
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = &mut shutdown => return,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchOutcome {
    Executed,
    Rejected,
    Tombstone,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoscale_convergence::{DesiredGroupState, GroupState};
    use autoscale_executor::{ExecutorContext, RetryConfig};
    use autoscale_http::{Request, RequestFn};
    use autoscale_store::mock::MockStore;
    use autoscale_store::GroupStore;
    use autoscale_store::{ChangeSpec, Policy};
    use chrono::{DateTime, TimeZone, Utc};
    use http::StatusCode;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug)]
    struct FixedClock(StdMutex<DateTime<Utc>>);
    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn t(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(offset_secs)
    }

    fn stub_ok(body: serde_json::Value) -> RequestFn {
        Arc::new(move |_req: Request| {
            let body = body.clone();
            Box::pin(async move {
                Ok(autoscale_http::RawResponse {
                    status: StatusCode::OK,
                    headers: http::HeaderMap::new(),
                    body: serde_json::to_vec(&body).unwrap().into(),
                })
            })
        })
    }

    fn test_scheduler(store: MockStore, clock: Arc<FixedClock>) -> Scheduler {
        let executor = ExecutorContext {
            compute: stub_ok(serde_json::json!({"servers": []})),
            clb: stub_ok(serde_json::json!({"nodes": []})),
            rcv3: stub_ok(serde_json::json!({})),
            retry: RetryConfig {
                max_attempts: 1,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
                multiplier: 2.0,
                deadline: Duration::from_secs(5),
            },
            wait_interval: Duration::from_millis(1),
            wait_timeout: Duration::from_millis(20),
            metrics: Metrics::noop(),
        };
        let controller = GroupControllerContext {
            store: Arc::new(store.clone()),
            policies: Arc::new(store.clone()),
            executor,
            clock: clock.clone(),
            metrics: Metrics::noop(),
            cycle_deadline: Duration::from_secs(5),
        };
        Scheduler::new(
            Arc::new(store),
            controller,
            Arc::new(crate::partitioner::StaticPartitioner::new(4)),
            clock,
            Metrics::noop(),
            SchedulerConfig {
                batch_size: 10,
                interval: Duration::from_secs(10),
            },
        )
    }

    fn seed_group_and_policy(store: &MockStore, cron: Option<&str>) {
        store.seed_group(
            "t1",
            "g1",
            DesiredGroupState::new(serde_json::json!({"server": {}}), 0, vec![], Duration::ZERO),
            GroupState::default(),
        );
        store.seed_policy(Policy {
            policy_id: "p1".into(),
            group_id: "g1".into(),
            cooldown: Duration::ZERO,
            change_spec: ChangeSpec::Change(1),
            schedule: cron.map(|c| autoscale_store::Schedule::Cron(c.to_owned())),
        });
    }

    fn bucket_of(policy_id: &str, bucket_count: u32) -> u32 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        policy_id.hash(&mut hasher);
        (hasher.finish() % bucket_count as u64) as u32
    }

    #[tokio::test]
    async fn due_event_is_executed_and_cron_rescheduled() {
        let store = MockStore::new();
        seed_group_and_policy(&store, Some("*/5 * * * *"));
        let clock = Arc::new(FixedClock(StdMutex::new(t(1))));
        let bucket = bucket_of("p1", 4);
        store
            .add_cron_events(vec![Event {
                tenant_id: "t1".into(),
                group_id: "g1".into(),
                policy_id: "p1".into(),
                trigger_time: t(0),
                cron: Some("*/5 * * * *".into()),
                bucket,
            }])
            .await
            .unwrap();

        let scheduler = test_scheduler(store.clone(), clock);
        scheduler.tick().await;

        assert_eq!(store.pending_event_count(), 1);
        let state = store
            .get_scaling_group("t1", "g1")
            .await
            .unwrap()
            .view_state()
            .await
            .unwrap();
        assert_eq!(state.desired_capacity, 1);
    }

    #[tokio::test]
    async fn deleted_policy_is_tombstoned_and_not_rescheduled() {
        let store = MockStore::new();
        seed_group_and_policy(&store, Some("* * * * *"));
        store.remove_policy("p1");
        let clock = Arc::new(FixedClock(StdMutex::new(t(1))));
        let bucket = bucket_of("p1", 4);
        store
            .add_cron_events(vec![Event {
                tenant_id: "t1".into(),
                group_id: "g1".into(),
                policy_id: "p1".into(),
                trigger_time: t(0),
                cron: Some("* * * * *".into()),
                bucket,
            }])
            .await
            .unwrap();

        let scheduler = test_scheduler(store.clone(), clock);
        scheduler.tick().await;

        assert_eq!(store.pending_event_count(), 0);
    }

    #[tokio::test]
    async fn allocating_partitioner_makes_tick_a_no_op() {
        let store = MockStore::new();
        seed_group_and_policy(&store, None);
        let clock = Arc::new(FixedClock(StdMutex::new(t(1))));
        let bucket = bucket_of("p1", 4);
        store
            .add_cron_events(vec![Event {
                tenant_id: "t1".into(),
                group_id: "g1".into(),
                policy_id: "p1".into(),
                trigger_time: t(0),
                cron: None,
                bucket,
            }])
            .await
            .unwrap();

        let mut scheduler = test_scheduler(store.clone(), clock);
        scheduler.partitioner = Arc::new(AllocatingPartitioner);
        scheduler.tick().await;

        // Still pending -- the partitioner never handed out any buckets.
        assert_eq!(store.pending_event_count(), 1);
    }

    #[derive(Debug)]
    struct AllocatingPartitioner;
    impl Partitioner for AllocatingPartitioner {
        fn state(&self) -> PartitionState {
            PartitionState::Allocating
        }
        fn owned_buckets(&self) -> Vec<u32> {
            Vec::new()
        }
        fn release_set(&self) {}
        fn restart(&self) {}
    }

    #[tokio::test]
    async fn second_tick_is_skipped_after_an_overrunning_tick() {
        let store = MockStore::new();
        let clock = Arc::new(FixedClock(StdMutex::new(t(0))));
        let scheduler = test_scheduler(store, clock);
        scheduler
            .skip_next_tick
            .store(false, Ordering::SeqCst);
        *scheduler.last_tick_duration.lock().unwrap() = None;
        // Simulate an overrun directly rather than sleeping in the test.
        scheduler.skip_next_tick.store(true, Ordering::SeqCst);
        scheduler.tick().await;
        assert_eq!(scheduler.skip_next_tick.load(Ordering::SeqCst), false);
        assert!(scheduler.last_tick_duration().is_none());
    }
}
