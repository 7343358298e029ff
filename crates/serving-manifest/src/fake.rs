//! In-memory cluster for tests
//!
//! Behaves like an API server for the operations the engine uses: objects
//! are keyed by identity, creates of existing objects conflict, deletes of
//! missing objects report not-found, and every write bumps
//! `metadata.resourceVersion`. Writes are recorded so tests can assert on
//! exactly what reached the cluster.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::client::ClusterClient;
use crate::resource::{Resource, ResourceKey};
use serving_common::{Error, Result};

/// A write that reached the fake cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Write {
    /// Object created
    Create(ResourceKey),
    /// Object replaced
    Update(ResourceKey),
    /// Object deleted
    Delete(ResourceKey),
}

/// In-memory [`ClusterClient`]
#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<BTreeMap<ResourceKey, Resource>>,
    writes: Mutex<Vec<Write>>,
    served: Mutex<BTreeSet<(String, String)>>,
    failures: Mutex<BTreeMap<ResourceKey, String>>,
    next_version: Mutex<u64>,
}

impl FakeCluster {
    /// An empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without recording a write
    pub fn insert(&self, resource: Resource) {
        self.objects.lock().insert(resource.key(), resource);
    }

    /// Current state of an object
    pub fn object(&self, key: &ResourceKey) -> Option<Resource> {
        self.objects.lock().get(key).cloned()
    }

    /// Every object currently stored
    pub fn objects(&self) -> Vec<Resource> {
        self.objects.lock().values().cloned().collect()
    }

    /// Writes in the order they happened
    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().clone()
    }

    /// Forget recorded writes
    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }

    /// Serve a kind even when no object of that kind exists
    pub fn serve_kind(&self, api_version: &str, kind: &str) {
        self.served
            .lock()
            .insert((api_version.to_string(), kind.to_string()));
    }

    /// Make every write to `key` fail with `message`
    pub fn fail_on(&self, key: ResourceKey, message: &str) {
        self.failures.lock().insert(key, message.to_string());
    }

    /// Stop failing writes to `key`
    pub fn heal(&self, key: &ResourceKey) {
        self.failures.lock().remove(key);
    }

    fn check_failure(&self, key: &ResourceKey) -> Result<()> {
        match self.failures.lock().get(key) {
            Some(message) => Err(Error::internal_with_context("fake-cluster", message.clone())),
            None => Ok(()),
        }
    }

    fn stamp(&self, resource: &mut Resource) {
        let mut next = self.next_version.lock();
        *next += 1;
        let metadata = crate::resource::object_field(resource.as_object_mut(), "metadata");
        metadata.insert(
            "resourceVersion".to_string(),
            Value::String(next.to_string()),
        );
        metadata
            .entry("uid")
            .or_insert_with(|| Value::String(format!("uid-{next}")));
    }

    fn record(&self, write: Write) {
        self.writes.lock().push(write);
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get(&self, key: &ResourceKey) -> Result<Option<Resource>> {
        Ok(self.object(key))
    }

    async fn create(&self, resource: &Resource) -> Result<()> {
        let key = resource.key();
        self.check_failure(&key)?;
        if self.objects.lock().contains_key(&key) {
            return Err(Error::conflict(
                key.kind.clone(),
                key.to_string(),
                "already exists",
            ));
        }
        let mut stored = resource.clone();
        self.stamp(&mut stored);
        self.objects.lock().insert(key.clone(), stored);
        self.record(Write::Create(key));
        Ok(())
    }

    async fn update(&self, resource: &Resource) -> Result<()> {
        let key = resource.key();
        self.check_failure(&key)?;
        if !self.objects.lock().contains_key(&key) {
            return Err(Error::not_found(key.kind.clone(), key.to_string()));
        }
        let mut stored = resource.clone();
        self.stamp(&mut stored);
        self.objects.lock().insert(key.clone(), stored);
        self.record(Write::Update(key));
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> Result<()> {
        self.check_failure(key)?;
        if self.objects.lock().remove(key).is_none() {
            return Err(Error::not_found(key.kind.clone(), key.to_string()));
        }
        self.record(Write::Delete(key.clone()));
        Ok(())
    }

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<String>,
    ) -> Result<Vec<Resource>> {
        Ok(self
            .objects
            .lock()
            .values()
            .filter(|r| r.api_version() == api_version && r.kind() == kind)
            .filter(|r| namespace.is_none() || r.namespace() == namespace.as_deref())
            .cloned()
            .collect())
    }

    async fn kind_exists(&self, api_version: &str, kind: &str) -> Result<bool> {
        if self
            .served
            .lock()
            .contains(&(api_version.to_string(), kind.to_string()))
        {
            return Ok(true);
        }
        Ok(self
            .objects
            .lock()
            .values()
            .any(|r| r.api_version() == api_version && r.kind() == kind))
    }
}
