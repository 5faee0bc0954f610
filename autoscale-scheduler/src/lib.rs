//! The partitioned scheduler (C8, §4.7): wakes on an interval, scans the
//! buckets it owns for due scheduled-policy events, dispatches each to the
//! group controller (C6/C7), and reschedules recurring ones. Grounded in
//! `otter.scheduler.SchedulerService`, whose Twisted `LoopingCall` +
//! `TxKazooClient` set-partitioner pairing is generalized here into a plain
//! `tokio::time::interval` loop driving a `Partitioner` trait object.

pub mod cron;
pub mod partitioner;
mod tick;

pub use cron::{next_cron_occurrence, CronError};
pub use partitioner::{PartitionState, Partitioner, StaticPartitioner};
pub use tick::{Scheduler, SchedulerConfig};
