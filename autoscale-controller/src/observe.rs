//! Turns cloud-API responses into the convergence data model (§3, §4.5 step
//! 3). Grounded in the same REST shapes `autoscale-executor::executor`
//! issues effects against, read in reverse: `GET /servers/detail` for
//! servers, `GET /loadbalancers/{lb_id}/nodes` for CLB membership.
//!
//! Server status normalization (SPEC_FULL §3 [ADD]): Nova reports `BUILD`
//! at some API versions and `BUILDING` at others for the same underlying
//! state. Both fold to `ServerState::Build` here, at the observation
//! boundary, so the planner never has to know the distinction exists.

use std::collections::BTreeMap;

use autoscale_convergence::{
    CLBNodeCondition, CLBNodeType, ClbNode, GroupState, LBDescription, LBNode, NovaServer,
    ServerState,
};
use autoscale_http::{HttpError, Request, RequestFn};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ServerDetailEnvelope {
    servers: Vec<ServerDetail>,
}

#[derive(Debug, Deserialize)]
struct ServerDetail {
    id: String,
    status: String,
    created: DateTime<Utc>,
    #[serde(default)]
    addresses: Addresses,
}

#[derive(Debug, Default, Deserialize)]
struct Addresses {
    #[serde(rename = "private", default)]
    private: Vec<AddressEntry>,
}

#[derive(Debug, Deserialize)]
struct AddressEntry {
    addr: String,
}

fn normalize_status(status: &str) -> ServerState {
    match status.to_ascii_uppercase().as_str() {
        "ACTIVE" => ServerState::Active,
        "ERROR" => ServerState::Error,
        "BUILD" | "BUILDING" => ServerState::Build,
        "DRAINING" => ServerState::Draining,
        _ => ServerState::Build,
    }
}

/// Lists every server tagged as belonging to `group_id`. Nova never reports
/// a `DRAINING` status of its own, so any id in `state.draining_server_ids`
/// (set by a previously-executed `SetServerDraining` step, §4.3 step 3) is
/// overlaid onto the raw observation here -- otherwise the server comes
/// back `ACTIVE` and the planner re-counts it as active on the very next
/// cycle.
pub async fn observe_servers(
    compute: &RequestFn,
    group_id: &str,
    state: &GroupState,
) -> Result<Vec<NovaServer>, HttpError> {
    let req = Request::get(format!(
        "/servers/detail?metadata[rax:auto_scaling_group_id]={group_id}"
    ));
    let (_resp, envelope): (_, ServerDetailEnvelope) =
        autoscale_http::add_json_response(compute, req).await?;
    Ok(envelope
        .servers
        .into_iter()
        .map(|s| {
            let address = s
                .addresses
                .private
                .into_iter()
                .next()
                .map(|a| a.addr)
                .unwrap_or_default();
            let observed_state = if state.draining_server_ids.contains(&s.id) {
                ServerState::Draining
            } else {
                normalize_status(&s.status)
            };
            NovaServer::new(s.id, observed_state, s.created).with_servicenet_address(address)
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct ClbNodesEnvelope {
    nodes: Vec<ClbNodeWire>,
}

#[derive(Debug, Deserialize)]
struct ClbNodeWire {
    id: String,
    address: String,
    port: u16,
    #[serde(default)]
    weight: Option<u8>,
    condition: String,
    #[serde(rename = "type", default)]
    node_type: Option<String>,
}

fn parse_condition(s: &str) -> CLBNodeCondition {
    match s.to_ascii_uppercase().as_str() {
        "DRAINING" => CLBNodeCondition::Draining,
        "DISABLED" => CLBNodeCondition::Disabled,
        _ => CLBNodeCondition::Enabled,
    }
}

fn parse_node_type(s: Option<&str>) -> CLBNodeType {
    match s.map(str::to_ascii_uppercase).as_deref() {
        Some("SECONDARY") => CLBNodeType::Secondary,
        _ => CLBNodeType::Primary,
    }
}

/// A CLB node as reported by the load balancer, not yet correlated to a
/// server id (the LB API knows addresses, not server ids).
struct RawClbNode {
    lb_id: String,
    wire: ClbNodeWire,
}

/// Fetches raw node membership for every `LBDescription::Clb` in
/// `desired_lbs`. Has no dependency on the servers observation, so the
/// caller can run this concurrently with `observe_servers` (§4.5 step 3)
/// and correlate afterwards with `build_clb_nodes`.
async fn fetch_clb_nodes_raw(
    clb: &RequestFn,
    desired_lbs: &[LBDescription],
) -> Result<Vec<RawClbNode>, HttpError> {
    let mut out = Vec::new();
    for desired_lb in desired_lbs {
        let LBDescription::Clb { lb_id, .. } = desired_lb else {
            continue;
        };
        let req = Request::get(format!("/loadbalancers/{lb_id}/nodes"));
        let (_resp, envelope): (_, ClbNodesEnvelope) = autoscale_http::add_json_response(clb, req).await?;
        out.extend(envelope.nodes.into_iter().map(|wire| RawClbNode {
            lb_id: lb_id.clone(),
            wire,
        }));
    }
    Ok(out)
}

/// Correlates `raw`'s addresses back to server ids via `server_by_address`
/// and attaches draining-since bookkeeping from `state`. Nodes whose
/// address matches no currently-observed server are dropped (stale LB
/// membership for a server that no longer exists).
fn build_clb_nodes(
    raw: Vec<RawClbNode>,
    server_by_address: &BTreeMap<String, String>,
    state: &GroupState,
    now: DateTime<Utc>,
) -> Vec<LBNode> {
    raw.into_iter()
        .filter_map(|RawClbNode { lb_id, wire }| {
            let server_id = server_by_address.get(&wire.address).cloned()?;
            let condition = parse_condition(&wire.condition);
            let draining_since = if condition == CLBNodeCondition::Draining {
                Some(
                    state
                        .node_draining_since
                        .get(&wire.id)
                        .copied()
                        .unwrap_or(now),
                )
            } else {
                None
            };
            Some(LBNode::Clb(ClbNode {
                node_id: wire.id,
                server_id,
                description: LBDescription::Clb {
                    lb_id,
                    port: wire.port,
                    weight: wire.weight.unwrap_or(1),
                    condition,
                    node_type: parse_node_type(wire.node_type.as_deref()),
                },
                draining_since,
            }))
        })
        .collect()
}

/// Lists CLB node memberships for every `LBDescription::Clb` in
/// `desired_lbs`, correlating `address` back to the owning server via
/// `server_by_address`. `state.node_draining_since` supplies the
/// first-observed-draining timestamp for nodes already known to be
/// draining; nodes observed draining for the first time are stamped with
/// `now`. Convenience wrapper around `fetch_clb_nodes_raw` +
/// `build_clb_nodes` for callers that don't need the two phases run
/// concurrently with a servers fetch.
pub async fn observe_lb_nodes(
    clb: &RequestFn,
    desired_lbs: &[LBDescription],
    server_by_address: &BTreeMap<String, String>,
    state: &GroupState,
    now: DateTime<Utc>,
) -> Result<Vec<LBNode>, HttpError> {
    let raw = fetch_clb_nodes_raw(clb, desired_lbs).await?;
    Ok(build_clb_nodes(raw, server_by_address, state, now))
}

/// Runs the servers and LB-nodes fetches concurrently (§4.5 step 3: "list
/// servers and LB nodes for this group in parallel"), then correlates them.
pub async fn observe(
    compute: &RequestFn,
    clb: &RequestFn,
    group_id: &str,
    desired_lbs: &[LBDescription],
    state: &GroupState,
    now: DateTime<Utc>,
) -> Result<(Vec<NovaServer>, Vec<LBNode>), HttpError> {
    let (servers, raw_nodes) = tokio::try_join!(
        observe_servers(compute, group_id, state),
        fetch_clb_nodes_raw(clb, desired_lbs),
    )?;
    let server_by_address: BTreeMap<String, String> = servers
        .iter()
        .map(|s| (s.servicenet_address.clone(), s.id.clone()))
        .collect();
    let lb_nodes = build_clb_nodes(raw_nodes, &server_by_address, state, now);
    Ok((servers, lb_nodes))
}
