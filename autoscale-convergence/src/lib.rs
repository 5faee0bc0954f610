//! Convergence data model and planner (C3 + C4).

mod model;
mod planner;
mod step;

pub use model::{
    CLBNodeCondition, CLBNodeType, ClbNode, DesiredGroupState, GroupState, LBDescription, LBNode,
    NovaServer, Rcv3Node, ServerState,
};
pub use planner::plan;
pub use step::{NodeToAdd, Step};
