//! Convergence data model (C3): immutable value types shared across planner
//! and executor. Grounded in `otter.convergence.model`, whose `NamedConstant`
//! enumerations and `attributes`-based immutable classes translate directly
//! to Rust enums and plain structs with no `&mut self` methods, per Design
//! Note 1 ("forbid mutation after construction").

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Observed state of a compute instance, as reported by Nova (plus the
/// autoscale-internal `Draining` state, which is never returned by Nova
/// itself -- it is assigned by the planner via `SetServerDraining` and
/// observed back on the next cycle from the store, not from the cloud API).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerState {
    Active,
    Error,
    Build,
    Draining,
}

/// An observed compute instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NovaServer {
    pub id: String,
    pub state: ServerState,
    pub created: DateTime<Utc>,
    pub servicenet_address: String,
}

impl NovaServer {
    pub fn new(id: impl Into<String>, state: ServerState, created: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            state,
            created,
            servicenet_address: String::new(),
        }
    }

    pub fn with_servicenet_address(mut self, address: impl Into<String>) -> Self {
        self.servicenet_address = address.into();
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CLBNodeCondition {
    Enabled,
    Draining,
    Disabled,
}

impl Default for CLBNodeCondition {
    fn default() -> Self {
        Self::Enabled
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CLBNodeType {
    Primary,
    Secondary,
}

impl Default for CLBNodeType {
    fn default() -> Self {
        Self::Primary
    }
}

/// How a server should be attached to a load-balancing entity -- either a
/// Rackspace-style Cloud Load Balancer port mapping or an RCv3 pool
/// membership. Two descriptions are "equivalent by definition" (§3) when
/// they describe the same attachment point, irrespective of weight,
/// condition or type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LBDescription {
    Clb {
        lb_id: String,
        port: u16,
        weight: u8,
        condition: CLBNodeCondition,
        node_type: CLBNodeType,
    },
    Rcv3Pool {
        pool_id: String,
    },
}

impl LBDescription {
    pub fn clb(lb_id: impl Into<String>, port: u16) -> Self {
        Self::Clb {
            lb_id: lb_id.into(),
            port,
            weight: 1,
            condition: CLBNodeCondition::Enabled,
            node_type: CLBNodeType::Primary,
        }
    }

    pub fn rcv3(pool_id: impl Into<String>) -> Self {
        Self::Rcv3Pool {
            pool_id: pool_id.into(),
        }
    }

    pub fn with_weight(mut self, w: u8) -> Self {
        if let Self::Clb { weight, .. } = &mut self {
            *weight = w;
        }
        self
    }

    pub fn with_condition(mut self, c: CLBNodeCondition) -> Self {
        if let Self::Clb { condition, .. } = &mut self {
            *condition = c;
        }
        self
    }

    /// Whether both descriptions refer to the same logical attachment
    /// point: same (lb_id, port) for CLB, or same pool_id for RCv3. Weight,
    /// condition and type are deliberately excluded from this comparison.
    pub fn equivalent_definition(&self, other: &LBDescription) -> bool {
        match (self, other) {
            (
                LBDescription::Clb { lb_id, port, .. },
                LBDescription::Clb {
                    lb_id: o_id,
                    port: o_port,
                    ..
                },
            ) => lb_id == o_id && port == o_port,
            (LBDescription::Rcv3Pool { pool_id }, LBDescription::Rcv3Pool { pool_id: o_id }) => {
                pool_id == o_id
            }
            _ => false,
        }
    }

    /// A stable key identifying the LB entity itself (not a particular
    /// node), used to batch add/remove steps per LB per §4.3 step 8.
    pub fn lb_key(&self) -> String {
        match self {
            LBDescription::Clb { lb_id, port, .. } => format!("clb:{lb_id}:{port}"),
            LBDescription::Rcv3Pool { pool_id } => format!("rcv3:{pool_id}"),
        }
    }
}

/// A mapping between a server and an `LBDescription`, as observed from the
/// load balancer's API. CLB nodes additionally carry drain-tracking state
/// (when the LB first reported the node as `DRAINING`), which is what lets
/// `is_done_draining` be answered purely from the observation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LBNode {
    Clb(ClbNode),
    Rcv3(Rcv3Node),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClbNode {
    pub node_id: String,
    pub server_id: String,
    pub description: LBDescription,
    /// When this node was first observed in `DRAINING` condition. `None` if
    /// it has never drained.
    pub draining_since: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rcv3Node {
    pub node_id: String,
    pub server_id: String,
    pub pool_id: String,
}

impl LBNode {
    pub fn node_id(&self) -> &str {
        match self {
            LBNode::Clb(n) => &n.node_id,
            LBNode::Rcv3(n) => &n.node_id,
        }
    }

    pub fn server_id(&self) -> &str {
        match self {
            LBNode::Clb(n) => &n.server_id,
            LBNode::Rcv3(n) => &n.server_id,
        }
    }

    pub fn description(&self) -> LBDescription {
        match self {
            LBNode::Clb(n) => n.description.clone(),
            LBNode::Rcv3(n) => LBDescription::Rcv3Pool {
                pool_id: n.pool_id.clone(),
            },
        }
    }

    /// CLB nodes support draining; RCv3 pool memberships do not.
    pub fn currently_draining(&self) -> bool {
        match self {
            LBNode::Clb(n) => matches!(
                n.description,
                LBDescription::Clb {
                    condition: CLBNodeCondition::Draining,
                    ..
                }
            ),
            LBNode::Rcv3(_) => false,
        }
    }

    pub fn is_done_draining(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match self {
            LBNode::Clb(n) => match n.draining_since {
                Some(since) => {
                    let elapsed = (now - since).to_std().unwrap_or(Duration::ZERO);
                    elapsed >= timeout
                }
                None => false,
            },
            LBNode::Rcv3(_) => true,
        }
    }
}

/// The desired state for a scaling group, as read out of the store. Values,
/// not references: planner invocations get their own copy so a concurrent
/// mutation of the stored config cannot be observed mid-plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DesiredGroupState {
    launch_config: serde_json::Value,
    desired: u32,
    desired_lbs: Vec<LBDescription>,
    draining_timeout: Duration,
    min_entities: u32,
    max_entities: u32,
    /// The group-level policy cooldown (§4.6: "now - last_group_touch <
    /// group.cooldown"), distinct from each policy's own cooldown.
    cooldown: Duration,
}

impl DesiredGroupState {
    pub fn new(
        launch_config: serde_json::Value,
        desired: u32,
        desired_lbs: Vec<LBDescription>,
        draining_timeout: Duration,
    ) -> Self {
        Self {
            launch_config,
            desired,
            desired_lbs,
            draining_timeout,
            min_entities: 0,
            max_entities: u32::MAX,
            cooldown: Duration::ZERO,
        }
    }

    /// `groupConfiguration.minEntities`/`maxEntities` in the original. Not
    /// part of the planner's inputs -- only the policy evaluator clamps
    /// against these -- so they default wide open and are opted into via
    /// this builder, the same way `LBDescription::with_weight` opts into a
    /// non-default field.
    pub fn with_bounds(mut self, min_entities: u32, max_entities: u32) -> Self {
        self.min_entities = min_entities;
        self.max_entities = max_entities;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Overrides `desired` with the group's current `desired_capacity`
    /// (§3: `GroupState.desired_capacity` is the figure policies mutate;
    /// the planner must converge towards it, not towards whatever count
    /// this config snapshot was constructed with). The controller calls
    /// this once per cycle before invoking the planner.
    pub fn with_desired(mut self, desired: u32) -> Self {
        self.desired = desired;
        self
    }

    pub fn launch_config(&self) -> &serde_json::Value {
        &self.launch_config
    }

    pub fn desired(&self) -> u32 {
        self.desired
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn desired_lbs(&self) -> &[LBDescription] {
        &self.desired_lbs
    }

    pub fn draining_timeout(&self) -> Duration {
        self.draining_timeout
    }

    pub fn min_entities(&self) -> u32 {
        self.min_entities
    }

    pub fn max_entities(&self) -> u32 {
        self.max_entities
    }
}

/// Per-group mutable state, owned by the store and mutated only under the
/// group's serialization lock (C6).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GroupState {
    pub desired_capacity: u32,
    pub active_server_ids: BTreeSet<String>,
    pub pending_server_ids: BTreeSet<String>,
    pub last_policy_fire: BTreeMap<String, DateTime<Utc>>,
    pub last_group_touch: Option<DateTime<Utc>>,
    pub paused: bool,
    /// When each currently-draining CLB node was first observed draining.
    /// The CLB API itself reports no such timestamp, so the controller
    /// carries it here across cycles -- this is what lets `ClbNode`'s
    /// `draining_since` (and so `is_done_draining`) be populated at the next
    /// observation rather than reset to "just started" every cycle.
    pub node_draining_since: BTreeMap<String, DateTime<Utc>>,
    /// Servers marked draining by `Step::SetServerDraining` (§4.3 step 3).
    /// Nova never reports a `DRAINING` status itself, so this is what lets
    /// the next cycle's observation re-tag the server instead of seeing it
    /// as plain `ACTIVE` and re-entering the scale-up path.
    pub draining_server_ids: BTreeSet<String>,
}
