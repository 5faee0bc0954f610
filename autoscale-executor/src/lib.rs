//! The step executor (C5): turns planner output into HTTP effects against
//! compute/CLB/RCv3 endpoints and runs them with the serialization policy
//! from §4.4. Grounded in `otter.worker.launch_server_v1`.

mod executor;
mod outcome;
mod retry;
mod wait;

pub use executor::{execute_steps, wait_for_active, ExecutorContext};
pub use outcome::{classify, ExecutedStep, StepOutcome};
pub use retry::RetryConfig;
pub use wait::{wait_for_status, WaitError};
