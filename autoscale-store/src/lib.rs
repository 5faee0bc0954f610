//! The store interface (C9): narrow trait contracts for per-group state,
//! policies, and scheduler events, plus an in-memory mock implementation for
//! the controller and scheduler crates' own tests. Grounded in
//! `syncstorage-db-common`'s `DbPool`/`Db` split.

mod error;
pub mod mock;
mod models;
mod traits;

pub use error::StoreError;
pub use models::{ChangeSpec, Event, Policy, Schedule};
pub use traits::{EventStore, GroupStore, PolicyStore, ScalingGroupHandle};
