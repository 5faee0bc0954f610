//! Store error kinds (§4.8, §7): `NoSuchScalingGroupError`, `NoSuchPolicyError`,
//! `GroupBusyError`, plus an internal catch-all. Shaped after
//! `syncstorage-db-common::error::CommonDbError` -- a private `kind` field
//! behind a public wrapper, so future fields (backtrace, status) can be
//! added without breaking callers who only match via the `is_*` helpers.

use autoscale_common::{impl_fmt_display, InternalError, ReportableError};
use backtrace::Backtrace;
use thiserror::Error;

#[derive(Debug)]
pub struct StoreError {
    kind: StoreErrorKind,
    pub backtrace: Backtrace,
}

#[derive(Debug, Error)]
enum StoreErrorKind {
    #[error("no such scaling group: tenant={tenant_id} group={group_id}")]
    NoSuchScalingGroup { tenant_id: String, group_id: String },

    #[error("no such policy: {0}")]
    NoSuchPolicy(String),

    #[error("group is busy: {0}")]
    GroupBusy(String),

    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn no_such_scaling_group(tenant_id: impl Into<String>, group_id: impl Into<String>) -> Self {
        StoreErrorKind::NoSuchScalingGroup {
            tenant_id: tenant_id.into(),
            group_id: group_id.into(),
        }
        .into()
    }

    pub fn no_such_policy(policy_id: impl Into<String>) -> Self {
        StoreErrorKind::NoSuchPolicy(policy_id.into()).into()
    }

    pub fn group_busy(group_id: impl Into<String>) -> Self {
        StoreErrorKind::GroupBusy(group_id.into()).into()
    }

    pub fn is_no_such_scaling_group(&self) -> bool {
        matches!(self.kind, StoreErrorKind::NoSuchScalingGroup { .. })
    }

    pub fn is_no_such_policy(&self) -> bool {
        matches!(self.kind, StoreErrorKind::NoSuchPolicy(_))
    }

    pub fn is_group_busy(&self) -> bool {
        matches!(self.kind, StoreErrorKind::GroupBusy(_))
    }
}

impl From<StoreErrorKind> for StoreError {
    fn from(kind: StoreErrorKind) -> Self {
        Self {
            kind,
            backtrace: Backtrace::new(),
        }
    }
}

impl_fmt_display!(StoreError, StoreErrorKind);

impl std::error::Error for StoreError {}

impl InternalError for StoreError {
    fn internal_error(message: String) -> Self {
        StoreErrorKind::Internal(message).into()
    }
}

impl ReportableError for StoreError {
    fn error_backtrace(&self) -> String {
        format!("{:?}", self.backtrace)
    }

    fn is_sentry_event(&self) -> bool {
        // GroupBusy is an expected, frequent outcome of lock contention, not
        // a condition worth alerting on.
        !matches!(self.kind, StoreErrorKind::GroupBusy(_))
    }

    fn metric_label(&self) -> Option<String> {
        match self.kind {
            StoreErrorKind::GroupBusy(_) => Some("store.group_busy".to_owned()),
            StoreErrorKind::NoSuchScalingGroup { .. } => Some("store.no_such_group".to_owned()),
            StoreErrorKind::NoSuchPolicy(_) => Some("store.no_such_policy".to_owned()),
            StoreErrorKind::Internal(_) => None,
        }
    }
}
