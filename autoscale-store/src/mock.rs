//! An in-memory store, grounded in `syncstorage-db::mock`'s
//! `MockDbPool`/`MockDb` pattern. Unlike that mock (whose methods just
//! return defaults, since a real backend is exercised elsewhere in that
//! repo), this one is a genuinely working implementation -- §4.8 documents
//! this interface as "not implemented here", so this mock is what the
//! controller and scheduler crates' own tests run against.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use autoscale_convergence::{DesiredGroupState, GroupState};
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{Event, Policy};
use crate::traits::{EventStore, GroupStore, PolicyStore, ScalingGroupHandle};

type GroupKey = (String, String);

#[derive(Debug, Default)]
struct Inner {
    groups: HashMap<GroupKey, (DesiredGroupState, GroupState)>,
    locked: HashSet<GroupKey>,
    policies: HashMap<String, Policy>,
    events: BTreeMap<(u32, DateTime<Utc>, String), Event>,
}

#[derive(Debug, Default, Clone)]
pub struct MockStore(Arc<Mutex<Inner>>);

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_group(
        &self,
        tenant_id: impl Into<String>,
        group_id: impl Into<String>,
        config: DesiredGroupState,
        state: GroupState,
    ) {
        let mut inner = self.0.lock().unwrap();
        inner
            .groups
            .insert((tenant_id.into(), group_id.into()), (config, state));
    }

    pub fn seed_policy(&self, policy: Policy) {
        let mut inner = self.0.lock().unwrap();
        inner.policies.insert(policy.policy_id.clone(), policy);
    }

    pub fn remove_policy(&self, policy_id: &str) {
        self.0.lock().unwrap().policies.remove(policy_id);
    }

    pub fn is_locked(&self, tenant_id: &str, group_id: &str) -> bool {
        self.0
            .lock()
            .unwrap()
            .locked
            .contains(&(tenant_id.to_owned(), group_id.to_owned()))
    }

    pub fn pending_event_count(&self) -> usize {
        self.0.lock().unwrap().events.len()
    }
}

#[async_trait]
impl GroupStore for MockStore {
    async fn get_scaling_group(
        &self,
        tenant_id: &str,
        group_id: &str,
    ) -> Result<Box<dyn ScalingGroupHandle>, StoreError> {
        let key = (tenant_id.to_owned(), group_id.to_owned());
        let mut inner = self.0.lock().unwrap();
        if !inner.groups.contains_key(&key) {
            return Err(StoreError::no_such_scaling_group(tenant_id, group_id));
        }
        if inner.locked.contains(&key) {
            return Err(StoreError::group_busy(group_id));
        }
        inner.locked.insert(key.clone());
        Ok(Box::new(MockScalingGroupHandle {
            store: self.clone(),
            key,
        }))
    }
}

#[async_trait]
impl PolicyStore for MockStore {
    async fn get_policy(&self, policy_id: &str) -> Result<Policy, StoreError> {
        self.0
            .lock()
            .unwrap()
            .policies
            .get(policy_id)
            .cloned()
            .ok_or_else(|| StoreError::no_such_policy(policy_id))
    }
}

#[async_trait]
impl EventStore for MockStore {
    async fn fetch_and_delete_events(
        &self,
        bucket: u32,
        now: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<Vec<Event>, StoreError> {
        let mut inner = self.0.lock().unwrap();
        // BTreeMap keys sort (bucket, trigger_time, policy_id) lexicographically,
        // so filtering down to one bucket preserves trigger_time order.
        let due: Vec<_> = inner
            .events
            .iter()
            .filter(|(key, event)| key.0 == bucket && event.trigger_time <= now)
            .map(|(key, _)| key.clone())
            .take(batch_size)
            .collect();
        Ok(due
            .into_iter()
            .filter_map(|key| inner.events.remove(&key))
            .collect())
    }

    async fn add_cron_events(&self, events: Vec<Event>) -> Result<(), StoreError> {
        let mut inner = self.0.lock().unwrap();
        for event in events {
            inner.events.insert(event.key(), event);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct MockScalingGroupHandle {
    store: MockStore,
    key: GroupKey,
}

impl Drop for MockScalingGroupHandle {
    fn drop(&mut self) {
        self.store.0.lock().unwrap().locked.remove(&self.key);
    }
}

#[async_trait]
impl ScalingGroupHandle for MockScalingGroupHandle {
    fn tenant_id(&self) -> &str {
        &self.key.0
    }

    fn group_id(&self) -> &str {
        &self.key.1
    }

    fn view_config(&self) -> DesiredGroupState {
        self.store
            .0
            .lock()
            .unwrap()
            .groups
            .get(&self.key)
            .expect("group removed while lock held")
            .0
            .clone()
    }

    async fn view_state(&self) -> Result<GroupState, StoreError> {
        Ok(self
            .store
            .0
            .lock()
            .unwrap()
            .groups
            .get(&self.key)
            .expect("group removed while lock held")
            .1
            .clone())
    }

    async fn update_state(&self, state: GroupState) -> Result<(), StoreError> {
        self.store
            .0
            .lock()
            .unwrap()
            .groups
            .get_mut(&self.key)
            .expect("group removed while lock held")
            .1 = state;
        Ok(())
    }

    async fn modify_state(
        &self,
        f: Box<dyn for<'a> FnOnce(&'a mut GroupState) + Send>,
    ) -> Result<GroupState, StoreError> {
        let mut inner = self.store.0.lock().unwrap();
        let entry = inner
            .groups
            .get_mut(&self.key)
            .expect("group removed while lock held");
        f(&mut entry.1);
        let result = entry.1.clone();
        Ok(result)
    }
}
