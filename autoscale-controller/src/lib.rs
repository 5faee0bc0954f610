//! The group controller (C6) and its policy-evaluation entry point (C7),
//! tying the planner/executor (C4/C5) to the store (C9) under the group's
//! serialization lock. Grounded in `otter.scheduler.execute_event`'s
//! dispatch to `otter.controller.maybe_execute_scaling_policy`, itself
//! referenced from (not present in) the pack -- the shape here is built
//! from the `otter.scheduler`/`otter.worker.launch_server_v1` pairing the
//! pack does contain.

pub mod error;
pub mod observe;
pub mod policy;

pub use error::{ControllerError, PolicyRejection};
pub use policy::{Accepted, PolicyTrigger};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use autoscale_common::{Clock, InternalError, Metrics};
use autoscale_convergence::{
    plan, CLBNodeCondition, GroupState, NovaServer, ServerState, Step,
};
use autoscale_executor::{execute_steps, ExecutedStep, ExecutorContext};
use autoscale_store::{GroupStore, PolicyStore};
use chrono::{DateTime, Utc};

/// Everything a convergence cycle needs to reach the cloud APIs and the
/// store. The three `RequestFn`s inside `executor` are expected to already
/// be composed with `bind_root`/`add_effectful_headers`/error-handling by
/// the binary that owns catalog resolution and token refresh (§4.1,
/// §4.5) -- this crate only sees the fully-wired result.
#[derive(Clone)]
pub struct GroupControllerContext {
    pub store: Arc<dyn GroupStore>,
    pub policies: Arc<dyn PolicyStore>,
    pub executor: ExecutorContext,
    pub clock: Arc<dyn Clock>,
    pub metrics: Metrics,
    /// Wall-clock deadline for one convergence cycle (§5: "each convergence
    /// cycle has a wall-clock deadline; on timeout, in-flight steps are
    /// cancelled, the lock is released").
    pub cycle_deadline: Duration,
}

/// What a convergence cycle did, for callers (the scheduler, tests) that
/// want to inspect results without re-deriving them from the store.
#[derive(Debug, Clone)]
pub struct ConvergenceOutcome {
    pub executed: Vec<ExecutedStep>,
    pub state: GroupState,
}

/// Runs one convergence cycle for `(tenant_id, group_id)` (§4.5): acquires
/// the group lock, observes, plans, executes, persists the resulting
/// `GroupState`, and releases the lock on every exit path (the lock is
/// scoped to `handle`, dropped at the end of this function regardless of
/// how it returns).
pub async fn converge(
    ctx: &GroupControllerContext,
    tenant_id: &str,
    group_id: &str,
) -> Result<ConvergenceOutcome, ControllerError> {
    let handle = match ctx.store.get_scaling_group(tenant_id, group_id).await {
        Ok(handle) => handle,
        Err(e) if e.is_group_busy() => return Err(ControllerError::busy(group_id)),
        Err(e) => return Err(e.into()),
    };

    let config = handle.view_config();
    let state = handle.view_state().await?;
    let now = ctx.clock.now();
    let desired = config.with_desired(state.desired_capacity);

    let cycle = async {
        let (servers, lb_nodes) = observe::observe(
            &ctx.executor.compute,
            &ctx.executor.clb,
            group_id,
            desired.desired_lbs(),
            &state,
            now,
        )
        .await?;
        let steps = plan(&desired, &servers, &lb_nodes, now);
        let executed = execute_steps(&ctx.executor, steps).await;
        Ok::<_, autoscale_http::HttpError>((servers, executed))
    };

    let (servers, executed) = match tokio::time::timeout(ctx.cycle_deadline, cycle).await {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            ctx.metrics.incr("controller.converge.observe_failed");
            return Err(ControllerError::internal_error(format!(
                "observation failed: {e}"
            )));
        }
        Err(_elapsed) => {
            // §5: cancellation leaves the world in whatever partial state
            // the in-flight steps reached; nothing here was applied, so the
            // next cycle re-observes and re-plans from scratch.
            slog_scope::warn!("convergence cycle exceeded its deadline"; "group_id" => group_id);
            ctx.metrics.incr("controller.converge.deadline_exceeded");
            (Vec::new(), Vec::new())
        }
    };

    let new_state = apply_outcomes(state, &servers, &executed, now);
    handle.update_state(new_state.clone()).await?;
    ctx.metrics.incr("controller.converge.cycle");
    Ok(ConvergenceOutcome {
        executed,
        state: new_state,
    })
}

/// Folds executed step outcomes (and the observation the cycle started
/// from) back into `GroupState`: `active_server_ids`/`pending_server_ids`
/// track the last-known snapshot; `node_draining_since` records when a
/// drain was first initiated so the next cycle's `is_done_draining` check
/// has something to measure against; `draining_server_ids` records which
/// servers a `SetServerDraining` step has already fired for, so the next
/// observation can re-tag them instead of seeing them as plain `ACTIVE`.
fn apply_outcomes(
    mut state: GroupState,
    servers: &[NovaServer],
    executed: &[ExecutedStep],
    now: DateTime<Utc>,
) -> GroupState {
    let mut active: BTreeSet<String> = servers
        .iter()
        .filter(|s| s.state == ServerState::Active)
        .map(|s| s.id.clone())
        .collect();
    let mut pending: BTreeSet<String> = servers
        .iter()
        .filter(|s| s.state == ServerState::Build)
        .map(|s| s.id.clone())
        .collect();

    for ExecutedStep { step, outcome } in executed {
        if !outcome.is_success() {
            continue;
        }
        match step {
            Step::DeleteServer { server_id } => {
                active.remove(server_id);
                pending.remove(server_id);
                state.draining_server_ids.remove(server_id);
            }
            Step::SetServerDraining { server_id } => {
                active.remove(server_id);
                state.draining_server_ids.insert(server_id.clone());
            }
            Step::ChangeNodeCondition {
                node_id,
                new_condition: CLBNodeCondition::Draining,
            } => {
                state.node_draining_since.entry(node_id.clone()).or_insert(now);
            }
            Step::RemoveNodes { node_ids, .. } => {
                for node_id in node_ids {
                    state.node_draining_since.remove(node_id);
                }
            }
            _ => {}
        }
    }

    state.active_server_ids = active;
    state.pending_server_ids = pending;
    state
}

/// Why a policy evaluation didn't result in a convergence attempt: either
/// it was rejected (§4.6's well-defined, non-failure outcome) or the
/// controller itself failed.
#[derive(Debug)]
pub enum EvaluationError {
    Rejected(PolicyRejection),
    Controller(ControllerError),
}

impl std::fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluationError::Rejected(r) => write!(f, "{r}"),
            EvaluationError::Controller(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EvaluationError {}

impl From<ControllerError> for EvaluationError {
    fn from(e: ControllerError) -> Self {
        EvaluationError::Controller(e)
    }
}

impl From<autoscale_store::StoreError> for EvaluationError {
    fn from(e: autoscale_store::StoreError) -> Self {
        EvaluationError::Controller(e.into())
    }
}

/// The single entry point all three trigger paths (§1: API, webhook,
/// schedule) converge on: evaluates `policy_id` against the group's current
/// state and, if accepted, persists the new desired capacity and the
/// cooldown bookkeeping, then runs a convergence cycle. Rejections never
/// reach the executor -- they are returned before any lock is taken beyond
/// the read needed to evaluate.
pub async fn evaluate_and_converge(
    ctx: &GroupControllerContext,
    tenant_id: &str,
    policy_id: &str,
    trigger: PolicyTrigger,
) -> Result<ConvergenceOutcome, EvaluationError> {
    let policy = ctx.policies.get_policy(policy_id).await.map_err(|e| {
        if e.is_no_such_policy() {
            EvaluationError::Rejected(PolicyRejection::PolicyNotFound)
        } else {
            EvaluationError::Controller(e.into())
        }
    })?;

    let handle = match ctx.store.get_scaling_group(tenant_id, &policy.group_id).await {
        Ok(handle) => handle,
        Err(e) if e.is_group_busy() => {
            return Err(EvaluationError::Controller(ControllerError::busy(&policy.group_id)))
        }
        Err(e) if e.is_no_such_scaling_group() => {
            return Err(EvaluationError::Rejected(PolicyRejection::GroupNotFound))
        }
        Err(e) => return Err(EvaluationError::Controller(e.into())),
    };

    let config = handle.view_config();
    let state = handle.view_state().await?;
    let now = ctx.clock.now();

    let accepted = policy::evaluate(
        &policy,
        &state,
        config.cooldown(),
        config.min_entities(),
        config.max_entities(),
        now,
    )
    .map_err(|rejection| {
        ctx.metrics
            .incr_with_tag("controller.policy.rejected", "trigger", trigger.as_tag());
        EvaluationError::Rejected(rejection)
    })?;

    let policy_id_owned = policy.policy_id.clone();
    handle
        .modify_state(Box::new(move |s: &mut GroupState| {
            s.desired_capacity = accepted.new_desired_capacity;
            s.last_policy_fire.insert(policy_id_owned, now);
            s.last_group_touch = Some(now);
        }))
        .await?;
    // The lock is per-cycle (§4.5 step 1), not held across the evaluate and
    // converge phases as one unit -- drop it explicitly so `converge` can
    // re-acquire cleanly rather than relying on scope-end ordering.
    drop(handle);

    ctx.metrics
        .incr_with_tag("controller.policy.accepted", "trigger", trigger.as_tag());

    converge(ctx, tenant_id, &policy.group_id)
        .await
        .map_err(EvaluationError::Controller)
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoscale_convergence::DesiredGroupState;
    use autoscale_executor::RetryConfig;
    use autoscale_http::{Request, RequestFn};
    use autoscale_store::mock::MockStore;
    use autoscale_store::ChangeSpec;
    use chrono::TimeZone;
    use http::StatusCode;
    use std::sync::Arc;

    fn t(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(offset_secs)
    }

    #[derive(Debug)]
    struct FixedClock(DateTime<Utc>);
    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
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

    /// Reports no pre-existing servers, and answers `POST /servers` with a
    /// freshly created id that the subsequent `wait_for_active` poll
    /// (`GET /servers/{id}`) immediately reports as `ACTIVE`.
    fn compute_stub_with_server_lifecycle() -> RequestFn {
        let next_id = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        Arc::new(move |req: Request| {
            let next_id = next_id.clone();
            Box::pin(async move {
                let body = if req.url.starts_with("/servers/detail") {
                    serde_json::json!({"servers": []})
                } else if req.method == http::Method::POST && req.url == "/servers" {
                    let id = next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    serde_json::json!({"server": {"id": format!("new-{id}")}})
                } else {
                    serde_json::json!({"server": {"status": "ACTIVE"}})
                };
                Ok(autoscale_http::RawResponse {
                    status: StatusCode::OK,
                    headers: http::HeaderMap::new(),
                    body: serde_json::to_vec(&body).unwrap().into(),
                })
            })
        })
    }

    fn ctx_at(now: DateTime<Utc>) -> (GroupControllerContext, MockStore) {
        let store = MockStore::new();
        let compute = compute_stub_with_server_lifecycle();
        let clb = stub_ok(serde_json::json!({"nodes": []}));
        let rcv3 = stub_ok(serde_json::json!({}));
        let executor = ExecutorContext {
            compute,
            clb,
            rcv3,
            retry: RetryConfig {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                multiplier: 2.0,
                deadline: Duration::from_secs(5),
            },
            wait_interval: Duration::from_millis(1),
            wait_timeout: Duration::from_millis(20),
            metrics: Metrics::noop(),
        };
        let ctx = GroupControllerContext {
            store: Arc::new(store.clone()),
            policies: Arc::new(store.clone()),
            executor,
            clock: Arc::new(FixedClock(now)),
            metrics: Metrics::noop(),
            cycle_deadline: Duration::from_secs(5),
        };
        (ctx, store)
    }

    #[tokio::test]
    async fn converge_rejects_busy_group() {
        let (ctx, store) = ctx_at(t(0));
        store.seed_group(
            "t1",
            "g1",
            DesiredGroupState::new(serde_json::json!({}), 0, vec![], Duration::ZERO),
            GroupState::default(),
        );
        let _held = store.get_scaling_group("t1", "g1").await.unwrap();
        let err = converge(&ctx, "t1", "g1").await.unwrap_err();
        assert!(err.is_busy());
    }

    #[tokio::test]
    async fn converge_creates_servers_and_releases_lock() {
        let (ctx, store) = ctx_at(t(0));
        store.seed_group(
            "t1",
            "g1",
            DesiredGroupState::new(serde_json::json!({"server": {}}), 2, vec![], Duration::ZERO),
            GroupState {
                desired_capacity: 2,
                ..Default::default()
            },
        );
        let outcome = converge(&ctx, "t1", "g1").await.unwrap();
        assert_eq!(outcome.executed.len(), 2);
        assert!(outcome.executed.iter().all(|e| e.outcome.is_success()));
        assert!(!store.is_locked("t1", "g1"));
    }

    #[tokio::test]
    async fn evaluate_and_converge_end_to_end_scenario_1() {
        // §8 scenario 1: group cooldown=3s, policy A change=2 cooldown=3s.
        let store = MockStore::new();
        store.seed_group(
            "t1",
            "g1",
            DesiredGroupState::new(serde_json::json!({"server": {}}), 0, vec![], Duration::ZERO)
                .with_cooldown(Duration::from_secs(3)),
            GroupState::default(),
        );
        store.seed_policy(autoscale_store::Policy {
            policy_id: "a".into(),
            group_id: "g1".into(),
            cooldown: Duration::from_secs(3),
            change_spec: ChangeSpec::Change(2),
            schedule: None,
        });

        let compute = compute_stub_with_server_lifecycle();
        let clb = stub_ok(serde_json::json!({"nodes": []}));
        let rcv3 = stub_ok(serde_json::json!({}));
        let executor = ExecutorContext {
            compute,
            clb,
            rcv3,
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

        let make_ctx = |now: DateTime<Utc>| GroupControllerContext {
            store: Arc::new(store.clone()),
            policies: Arc::new(store.clone()),
            executor: executor.clone(),
            clock: Arc::new(FixedClock(now)),
            metrics: Metrics::noop(),
            cycle_deadline: Duration::from_secs(5),
        };

        evaluate_and_converge(&make_ctx(t(0)), "t1", "a", PolicyTrigger::Api)
            .await
            .unwrap();
        assert_eq!(
            store
                .get_scaling_group("t1", "g1")
                .await
                .unwrap()
                .view_state()
                .await
                .unwrap()
                .desired_capacity,
            2
        );

        let err = evaluate_and_converge(&make_ctx(t(1)), "t1", "a", PolicyTrigger::Api)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::Rejected(PolicyRejection::CooldownNotMet)
        ));

        evaluate_and_converge(&make_ctx(t(4)), "t1", "a", PolicyTrigger::Api)
            .await
            .unwrap();
        assert_eq!(
            store
                .get_scaling_group("t1", "g1")
                .await
                .unwrap()
                .view_state()
                .await
                .unwrap()
                .desired_capacity,
            4
        );
    }

    #[tokio::test]
    async fn evaluate_and_converge_rejects_unknown_policy() {
        let (ctx, _store) = ctx_at(t(0));
        let err = evaluate_and_converge(&ctx, "t1", "missing", PolicyTrigger::Scheduled)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::Rejected(PolicyRejection::PolicyNotFound)
        ));
    }
}
