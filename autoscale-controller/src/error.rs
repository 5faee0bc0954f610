//! Controller-level error kinds (§7). `ControllerError` wraps fatal and
//! recoverable failures of a convergence cycle; `PolicyRejection` (§3's
//! [ADD]) is kept separate because a rejected evaluation is not a failure --
//! it is a well-defined outcome that does not count as a policy fire.

use autoscale_common::{impl_fmt_display, InternalError, ReportableError};
use autoscale_store::StoreError;
use backtrace::Backtrace;
use thiserror::Error;

#[derive(Debug)]
pub struct ControllerError {
    kind: ControllerErrorKind,
    pub backtrace: Backtrace,
}

#[derive(Debug, Error)]
enum ControllerErrorKind {
    #[error("group is busy: {0}")]
    Busy(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal controller error: {0}")]
    Internal(String),
}

impl ControllerError {
    pub fn busy(group_id: impl Into<String>) -> Self {
        ControllerErrorKind::Busy(group_id.into()).into()
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.kind, ControllerErrorKind::Busy(_))
    }

    pub fn is_store_error(&self) -> bool {
        matches!(self.kind, ControllerErrorKind::Store(_))
    }
}

impl From<ControllerErrorKind> for ControllerError {
    fn from(kind: ControllerErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::new(),
        }
    }
}

impl From<StoreError> for ControllerError {
    fn from(err: StoreError) -> Self {
        ControllerErrorKind::Store(err).into()
    }
}

impl_fmt_display!(ControllerError, ControllerErrorKind);

impl std::error::Error for ControllerError {}

impl InternalError for ControllerError {
    fn internal_error(message: String) -> Self {
        ControllerErrorKind::Internal(message).into()
    }
}

impl ReportableError for ControllerError {
    fn error_backtrace(&self) -> String {
        format!("{:?}", self.backtrace)
    }

    fn is_sentry_event(&self) -> bool {
        !matches!(self.kind, ControllerErrorKind::Busy(_))
    }

    fn metric_label(&self) -> Option<String> {
        match &self.kind {
            ControllerErrorKind::Busy(_) => Some("controller.group_busy".to_owned()),
            ControllerErrorKind::Store(_) => Some("controller.store_error".to_owned()),
            ControllerErrorKind::Internal(_) => None,
        }
    }
}

/// Distinct from `ControllerError` (§3 [ADD], §4.6, §7): a rejected
/// evaluation is an expected outcome of cooldown/lookup checks, not a
/// failure, and must not be retried or alerted on the way a failure would.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyRejection {
    #[error("cooldown not met")]
    CooldownNotMet,
    #[error("scaling group not found")]
    GroupNotFound,
    #[error("policy not found")]
    PolicyNotFound,
    #[error("malformed change spec")]
    MalformedChangeSpec,
}
