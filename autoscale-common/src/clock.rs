use chrono::{DateTime, Utc};

/// A source of the current time, injected rather than called directly so
/// planner/scheduler/controller logic can be driven by fixed timestamps in
/// tests. The `otter` scheduler takes an analogous `clock` constructor
/// argument for the same reason.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
