//! The planner's output alphabet (§4.3): an ordered list of effects to
//! apply. Each variant is a tagged step rather than a generic "do this HTTP
//! call" value, so the executor (C5) can decide concurrency/serialization
//! per step kind without inspecting request internals.

use crate::model::{CLBNodeCondition, LBDescription};

#[derive(Clone, Debug, PartialEq)]
pub struct NodeToAdd {
    pub server_id: String,
    pub address: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    CreateServer {
        launch_config: serde_json::Value,
        /// Position within the planner's batch of creates for this cycle.
        /// Each create is for a not-yet-existing server, so there is no
        /// natural id to key concurrency on until Nova assigns one -- this
        /// index stands in, so `resource_key` stays unique per step instead
        /// of forcing every create in the cycle into one serialized group.
        index: usize,
    },
    DeleteServer {
        server_id: String,
    },
    SetServerDraining {
        server_id: String,
    },
    /// Batched per LB ID (§4.3 step 8): one step adds every pending server
    /// to a given CLB in one request.
    AddNodes {
        description: LBDescription,
        nodes: Vec<NodeToAdd>,
    },
    RemoveNodes {
        description: LBDescription,
        node_ids: Vec<String>,
    },
    ChangeNodeCondition {
        node_id: String,
        new_condition: CLBNodeCondition,
    },
    BulkAddToRCv3 {
        pool_id: String,
        server_ids: Vec<String>,
    },
    BulkRemoveFromRCv3 {
        pool_id: String,
        server_ids: Vec<String>,
    },
}

impl Step {
    /// The resource this step mutates, used by the executor to decide which
    /// steps may run concurrently vs. must be serialized (§4.4: same-LB
    /// steps are serialized, everything else runs in parallel).
    pub fn resource_key(&self) -> String {
        match self {
            Step::CreateServer { index, .. } => format!("servers:create:{index}"),
            Step::DeleteServer { server_id } | Step::SetServerDraining { server_id } => {
                format!("server:{server_id}")
            }
            Step::AddNodes { description, .. } | Step::RemoveNodes { description, .. } => {
                description.lb_key()
            }
            Step::ChangeNodeCondition { node_id, .. } => format!("node:{node_id}"),
            Step::BulkAddToRCv3 { pool_id, .. } | Step::BulkRemoveFromRCv3 { pool_id, .. } => {
                format!("rcv3:{pool_id}")
            }
        }
    }
}
