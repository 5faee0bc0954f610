//! Bucket ownership via leader-partitioned coordination (§4.7), behind a
//! narrow trait so the tick loop is testable without a real coordination
//! service. Grounded in `otter.scheduler.SchedulerService`'s
//! `kz_partition` state machine (`allocating`/`release`/`failed`
//! properties on a Kazoo `SetPartitioner`), translated to an explicit Rust
//! enum per Design Note 1.

use std::fmt::Debug;

/// A scheduler instance's relationship to its assigned bucket set (§4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionState {
    /// Set not yet assigned; a tick is a no-op.
    Allocating,
    /// Tick processes the buckets in `owned_buckets()`.
    Acquired,
    /// Cluster membership changed; the tick in progress must finish its
    /// current work, then call `release_set` and stop scanning further
    /// buckets until re-`Acquired`.
    ReleaseRequested,
    /// The coordination session was lost; the partitioner must be
    /// restarted.
    Failed,
}

/// The coordination-service set-partition primitive (§6): assigns a
/// disjoint subset of `{0..bucket_count-1}` to each live scheduler
/// instance, stable across membership changes. The coordination service
/// itself is an external collaborator (§1) -- this trait is its interface
/// as consumed by the tick loop.
pub trait Partitioner: Send + Sync + Debug {
    fn state(&self) -> PartitionState;

    /// Buckets currently owned by this instance. Only meaningful while
    /// `state()` is `Acquired` or `ReleaseRequested` (a release in progress
    /// still finishes work already claimed from its last-known set).
    fn owned_buckets(&self) -> Vec<u32>;

    /// Relinquishes the current set once any in-flight work has drained
    /// (§8 scenario 6), transitioning back to `Allocating`.
    fn release_set(&self);

    /// Restarts the partitioner after `Failed`.
    fn restart(&self);
}

/// A single-instance partitioner that always owns every bucket. Used by the
/// worker binary when run without a coordination service and by this
/// crate's own tests, the same role `otter`'s tests give a partitioner
/// stub rather than a live Kazoo client.
#[derive(Debug)]
pub struct StaticPartitioner {
    bucket_count: u32,
}

impl StaticPartitioner {
    pub fn new(bucket_count: u32) -> Self {
        Self { bucket_count }
    }
}

impl Partitioner for StaticPartitioner {
    fn state(&self) -> PartitionState {
        PartitionState::Acquired
    }

    fn owned_buckets(&self) -> Vec<u32> {
        (0..self.bucket_count).collect()
    }

    fn release_set(&self) {}

    fn restart(&self) {}
}
