//! Narrow store interfaces (§4.8), split the way
//! `syncstorage-db-common::{DbPool, Db}` splits "get a handle" from "operate
//! on a handle", so the controller and scheduler can depend on a trait
//! object rather than a concrete backend.

use std::fmt::Debug;

use async_trait::async_trait;
use autoscale_convergence::{DesiredGroupState, GroupState};
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{Event, Policy};

/// A lock-scoped view onto one scaling group's config and mutable state.
/// `modify_state` is the only mutator: it is the atomic read-modify-write
/// the per-group serialization lock (§4.5) is built on.
#[async_trait]
pub trait ScalingGroupHandle: Send + Sync + Debug {
    fn tenant_id(&self) -> &str;
    fn group_id(&self) -> &str;

    /// A value copy of the group's desired state -- never a reference, so a
    /// concurrent mutation elsewhere cannot be observed mid-plan (§3).
    fn view_config(&self) -> DesiredGroupState;

    async fn view_state(&self) -> Result<GroupState, StoreError>;

    async fn update_state(&self, state: GroupState) -> Result<(), StoreError>;

    /// Atomically reads the current `GroupState`, applies `f`, persists the
    /// result, and returns it. Implementations must serialize concurrent
    /// calls for the same group (e.g. via a CAS loop or a held lock).
    async fn modify_state(
        &self,
        f: Box<dyn for<'a> FnOnce(&'a mut GroupState) + Send>,
    ) -> Result<GroupState, StoreError>;
}

#[async_trait]
pub trait GroupStore: Send + Sync + Debug {
    /// Acquires the group's lock and returns a handle, or `GroupBusyError`
    /// if another cycle already holds it (§4.5 step 1).
    async fn get_scaling_group(
        &self,
        tenant_id: &str,
        group_id: &str,
    ) -> Result<Box<dyn ScalingGroupHandle>, StoreError>;
}

#[async_trait]
pub trait PolicyStore: Send + Sync + Debug {
    async fn get_policy(&self, policy_id: &str) -> Result<Policy, StoreError>;
}

#[async_trait]
pub trait EventStore: Send + Sync + Debug {
    /// Atomically pops up to `batch_size` events in `bucket` whose
    /// `trigger_time <= now`, ordered by `trigger_time` (§4.7 step 1).
    async fn fetch_and_delete_events(
        &self,
        bucket: u32,
        now: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<Vec<Event>, StoreError>;

    /// Idempotent on `(bucket, trigger_time, policy_id)` (§4.8).
    async fn add_cron_events(&self, events: Vec<Event>) -> Result<(), StoreError>;
}
