//! Error-reporting, metrics and time primitives shared by every autoscale crate.
//!
//! Mirrors the shape of `syncserver-common`: a `ReportableError`/`InternalError`
//! trait pair that lets a binary uniformly decide how to surface an error, and a
//! `Metrics` handle that wraps a `cadence::StatsdClient` with tag propagation and
//! an RAII timer.

mod clock;
mod metrics;

pub use clock::{Clock, SystemClock};
pub use metrics::{metrics_from_opts, MetricError, Metrics};

use std::fmt;

/// Types that can describe themselves for Sentry/log reporting without the
/// caller needing to match on the concrete error type.
pub trait ReportableError: fmt::Debug {
    /// Human-readable backtrace or context string for logging.
    fn error_backtrace(&self) -> String {
        String::new()
    }

    /// Whether this error is worth forwarding to an error-tracking service.
    fn is_sentry_event(&self) -> bool {
        true
    }

    /// Optional metrics label to increment when this error occurs.
    fn metric_label(&self) -> Option<String> {
        None
    }
}

/// Types that can represent an internal ("this should never happen") error.
pub trait InternalError {
    fn internal_error(message: String) -> Self;
}

/// Forwards an error wrapper's `Display` to its private `kind` field, for
/// the `struct Error { kind: ErrorKind, .. }` shape used by `autoscale-store`
/// and `autoscale-controller`.
#[macro_export]
macro_rules! impl_fmt_display {
    ($error:ty, $kind:ty) => {
        impl std::fmt::Display for $error {
            fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.kind, formatter)
            }
        }
    };
}
