//! Translates `Step`s to composed HTTP effects and runs them with the
//! concurrency policy from §4.4: steps sharing a `resource_key()` are
//! serialized in plan order (same-LB mutations must not race); steps with
//! disjoint resource keys run concurrently. Grounded in
//! `otter.worker.launch_server_v1`'s `create_server`/`add_to_load_balancer(s)`
//! request shapes, generalized from per-call functions to a single
//! `Step -> StepOutcome` translation the way the planner (C4) generalizes
//! the original's scale-up/scale-down scripts into data.

use std::collections::BTreeMap;
use std::time::Duration;

use autoscale_common::Metrics;
use autoscale_convergence::Step;
use autoscale_http::{HttpError, Request, RequestFn};
use futures::future::join_all;
use serde::Deserialize;

use crate::outcome::{classify, ExecutedStep, StepOutcome};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::wait::{wait_for_status, WaitError};

/// The three upstream surfaces a step may call, already composed with
/// `bind_root`/auth/error-handling middleware by the caller (the group
/// controller owns catalog resolution and token refresh; this crate only
/// knows how to shape each API call).
#[derive(Clone)]
pub struct ExecutorContext {
    pub compute: RequestFn,
    pub clb: RequestFn,
    pub rcv3: RequestFn,
    pub retry: RetryConfig,
    pub wait_interval: Duration,
    pub wait_timeout: Duration,
    pub metrics: Metrics,
}

/// Runs every step in `steps`, grouping by `resource_key()` for
/// serialization and returning one `ExecutedStep` per input step, in the
/// same relative order group membership was first seen.
pub async fn execute_steps(ctx: &ExecutorContext, steps: Vec<Step>) -> Vec<ExecutedStep> {
    let mut groups: BTreeMap<String, Vec<Step>> = BTreeMap::new();
    let mut order: Vec<String> = Vec::new();
    for step in steps {
        let key = step.resource_key();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(step);
    }

    let futures = order.into_iter().map(|key| {
        let group = groups.remove(&key).unwrap_or_default();
        run_group_sequentially(ctx, group)
    });
    join_all(futures).await.into_iter().flatten().collect()
}

async fn run_group_sequentially(ctx: &ExecutorContext, steps: Vec<Step>) -> Vec<ExecutedStep> {
    let mut results = Vec::with_capacity(steps.len());
    for step in steps {
        let outcome = execute_one(ctx, &step).await;
        let stop = !outcome.is_success();
        results.push(ExecutedStep { step, outcome });
        if stop {
            // A batch's remaining same-resource steps are left unexecuted
            // this cycle; the next convergence cycle re-plans from the
            // observed (partially-applied) state.
            break;
        }
    }
    results
}

async fn execute_one(ctx: &ExecutorContext, step: &Step) -> StepOutcome {
    let mut metrics = ctx.metrics.clone();
    metrics.start_timer("executor.step", None);
    let result = retry_with_backoff(&ctx.retry, || async {
        run_step(ctx, step).await.map_err(|e| (e.is_retryable(), e))
    })
    .await;
    match result {
        Ok(()) => {
            metrics.incr_with_tag("executor.step.success", "kind", step_kind(step));
            StepOutcome::Success
        }
        Err(e) => {
            let outcome = classify(&e);
            metrics.incr_with_tag("executor.step.failure", "kind", step_kind(step));
            slog_scope::warn!("step execution failed"; "kind" => step_kind(step), "error" => %e);
            outcome
        }
    }
}

fn step_kind(step: &Step) -> &'static str {
    match step {
        Step::CreateServer { .. } => "create_server",
        Step::DeleteServer { .. } => "delete_server",
        Step::SetServerDraining { .. } => "set_server_draining",
        Step::AddNodes { .. } => "add_nodes",
        Step::RemoveNodes { .. } => "remove_nodes",
        Step::ChangeNodeCondition { .. } => "change_node_condition",
        Step::BulkAddToRCv3 { .. } => "bulk_add_rcv3",
        Step::BulkRemoveFromRCv3 { .. } => "bulk_remove_rcv3",
    }
}

#[derive(Debug, Deserialize)]
struct CreatedServerEnvelope {
    server: CreatedServer,
}

#[derive(Debug, Deserialize)]
struct CreatedServer {
    id: String,
}

async fn run_step(ctx: &ExecutorContext, step: &Step) -> Result<(), HttpError> {
    match step {
        Step::CreateServer { launch_config, .. } => {
            let req = autoscale_http::add_json_request_data(Request::post("/servers"), launch_config)?;
            let resp = (ctx.compute)(req).await?;
            let envelope: CreatedServerEnvelope = serde_json::from_slice(&resp.body)?;
            if let Err(wait_err) = wait_for_active(ctx, &envelope.server.id).await {
                slog_scope::warn!(
                    "newly created server did not reach ACTIVE, deleting it";
                    "server_id" => &envelope.server.id, "error" => %wait_err
                );
                (ctx.compute)(Request::delete(format!("/servers/{}", envelope.server.id))).await?;
                return Err(HttpError::Timeout(format!(
                    "server {} failed to activate: {wait_err}",
                    envelope.server.id
                )));
            }
            Ok(())
        }
        Step::DeleteServer { server_id } => {
            (ctx.compute)(Request::delete(format!("/servers/{server_id}"))).await?;
            Ok(())
        }
        Step::SetServerDraining { server_id: _ } => {
            // Draining is an autoscale-internal bookkeeping state, not a
            // Nova API call; the controller persists it in `GroupState`.
            Ok(())
        }
        Step::AddNodes { description, nodes } => {
            let lb_id = clb_id(description)?;
            let body = serde_json::json!({
                "nodes": nodes.iter().map(|n| serde_json::json!({
                    "address": n.address,
                    "port": clb_port(description).unwrap_or(80),
                    "condition": "ENABLED",
                })).collect::<Vec<_>>(),
            });
            let req =
                autoscale_http::add_json_request_data(Request::post(format!("/loadbalancers/{lb_id}/nodes")), &body)?;
            (ctx.clb)(req).await?;
            Ok(())
        }
        Step::RemoveNodes {
            description,
            node_ids,
        } => {
            let lb_id = clb_id(description)?;
            let ids = node_ids.join(",");
            (ctx.clb)(Request::delete(format!(
                "/loadbalancers/{lb_id}/nodes?id={ids}"
            )))
            .await?;
            Ok(())
        }
        Step::ChangeNodeCondition {
            node_id,
            new_condition,
        } => {
            let body = serde_json::json!({ "condition": format!("{new_condition:?}").to_uppercase() });
            let req = autoscale_http::add_json_request_data(
                Request::put(format!("/loadbalancers/nodes/{node_id}")),
                &body,
            )?;
            (ctx.clb)(req).await?;
            Ok(())
        }
        Step::BulkAddToRCv3 {
            pool_id,
            server_ids,
        } => {
            let body = serde_json::json!({ "server_ids": server_ids });
            let req = autoscale_http::add_json_request_data(
                Request::post(format!("/load_balancer_pools/{pool_id}/nodes")),
                &body,
            )?;
            (ctx.rcv3)(req).await?;
            Ok(())
        }
        Step::BulkRemoveFromRCv3 {
            pool_id,
            server_ids,
        } => {
            let body = serde_json::json!({ "server_ids": server_ids });
            let req = autoscale_http::add_json_request_data(
                Request::delete(format!("/load_balancer_pools/{pool_id}/nodes")),
                &body,
            )?;
            (ctx.rcv3)(req).await?;
            Ok(())
        }
    }
}

fn clb_id(description: &autoscale_convergence::LBDescription) -> Result<&str, HttpError> {
    match description {
        autoscale_convergence::LBDescription::Clb { lb_id, .. } => Ok(lb_id),
        autoscale_convergence::LBDescription::Rcv3Pool { .. } => {
            Err(HttpError::InvalidUrl("RCv3 pool has no CLB id".into()))
        }
    }
}

fn clb_port(description: &autoscale_convergence::LBDescription) -> Option<u16> {
    match description {
        autoscale_convergence::LBDescription::Clb { port, .. } => Some(*port),
        autoscale_convergence::LBDescription::Rcv3Pool { .. } => None,
    }
}

/// Polls a freshly created server up to `ACTIVE`, used by the
/// `Step::CreateServer` handler above before the server is considered part
/// of the group; also re-exported for callers that need the same wait
/// before attaching a server to a load balancer, per §4.4.
pub async fn wait_for_active(
    ctx: &ExecutorContext,
    server_id: &str,
) -> Result<(), WaitError> {
    wait_for_status(
        &ctx.compute,
        "",
        server_id,
        "ACTIVE",
        ctx.wait_interval,
        ctx.wait_timeout,
    )
    .await
}
