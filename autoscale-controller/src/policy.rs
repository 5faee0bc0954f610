//! Policy evaluator (C7, §4.6): computes a new desired capacity from a
//! policy body and enforces group/policy cooldowns. Grounded in
//! `otter.scheduler.execute_event`'s dispatch to
//! `otter.controller.maybe_execute_scaling_policy` (referenced from
//! original_source, not present in the pack as `controller.py` itself).

use autoscale_convergence::GroupState;
use autoscale_store::{ChangeSpec, Policy};
use chrono::{DateTime, Utc};

use crate::error::PolicyRejection;

/// Why a policy evaluation was invoked, carried through only for metrics
/// tagging (SPEC_FULL §4.6 [ADD]) -- it has no bearing on cooldown or
/// capacity math.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyTrigger {
    Scheduled,
    Api,
    Webhook,
}

impl PolicyTrigger {
    pub fn as_tag(&self) -> &'static str {
        match self {
            PolicyTrigger::Scheduled => "scheduled",
            PolicyTrigger::Api => "api",
            PolicyTrigger::Webhook => "webhook",
        }
    }
}

/// The outcome of a successful evaluation: the new desired capacity to
/// write, plus the cooldown bookkeeping the caller must persist alongside
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub new_desired_capacity: u32,
}

/// Pure function: given a policy, the group's current mutable state, its
/// cooldown and bounds, and `now`, either accepts (returning the new
/// capacity) or rejects per §4.6's cooldown rule (policy cooldown OR group
/// cooldown, either alone enough to reject). Does not touch the store --
/// the caller (the group controller) is responsible for persisting
/// `last_policy_fire`/`last_group_touch`/`desired_capacity` on acceptance
/// and for invoking C6 afterwards.
pub fn evaluate(
    policy: &Policy,
    state: &GroupState,
    group_cooldown: std::time::Duration,
    min_entities: u32,
    max_entities: u32,
    now: DateTime<Utc>,
) -> Result<Accepted, PolicyRejection> {
    if let Some(last_fire) = state.last_policy_fire.get(&policy.policy_id) {
        if now.signed_duration_since(*last_fire) < chrono_duration(policy.cooldown) {
            return Err(PolicyRejection::CooldownNotMet);
        }
    }
    if let Some(last_touch) = state.last_group_touch {
        if now.signed_duration_since(last_touch) < chrono_duration(group_cooldown) {
            return Err(PolicyRejection::CooldownNotMet);
        }
    }

    let current = state.desired_capacity;
    let new_desired_capacity = match &policy.change_spec {
        ChangeSpec::Change(delta) => clamp_signed(current, *delta, min_entities, max_entities),
        ChangeSpec::ChangePercent(percent) => clamp_signed(
            current,
            nontrivial_percent_delta(current, *percent),
            min_entities,
            max_entities,
        ),
        ChangeSpec::DesiredCapacity(target) => (*target).clamp(min_entities, max_entities),
    };

    Ok(Accepted {
        new_desired_capacity,
    })
}

fn chrono_duration(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}

fn clamp_signed(current: u32, delta: i64, min: u32, max: u32) -> u32 {
    let proposed = current as i64 + delta;
    proposed.clamp(min as i64, max as i64) as u32
}

/// `round_toward_zero(current * percent / 100)`, nudged to +/-1 when the
/// truncated result would be zero but `percent` itself is nonzero (§4.6:
/// "guarantees nontrivial effect").
fn nontrivial_percent_delta(current: u32, percent: f64) -> i64 {
    let raw = (current as f64) * percent / 100.0;
    let truncated = raw.trunc() as i64;
    if truncated == 0 && percent != 0.0 {
        if percent > 0.0 {
            1
        } else {
            -1
        }
    } else {
        truncated
    }
}
