//! Persisted domain records consumed through the store interface (§3, §4.8):
//! `Policy` and `Event`. These live alongside the store trait rather than in
//! `autoscale-convergence`, the way `syncstorage-db-common::params`/`results`
//! hold the record shapes specific to a store's own operations.

use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Clone, Debug, PartialEq)]
pub enum ChangeSpec {
    Change(i64),
    ChangePercent(f64),
    DesiredCapacity(u32),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Schedule {
    At(DateTime<Utc>),
    Cron(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Policy {
    pub policy_id: String,
    pub group_id: String,
    pub cooldown: Duration,
    pub change_spec: ChangeSpec,
    pub schedule: Option<Schedule>,
}

/// A scheduler record, stored keyed by `(bucket, trigger_time, policy_id)`
/// per §3.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub tenant_id: String,
    pub group_id: String,
    pub policy_id: String,
    pub trigger_time: DateTime<Utc>,
    pub cron: Option<String>,
    pub bucket: u32,
}

impl Event {
    pub fn key(&self) -> (u32, DateTime<Utc>, String) {
        (self.bucket, self.trigger_time, self.policy_id.clone())
    }
}
