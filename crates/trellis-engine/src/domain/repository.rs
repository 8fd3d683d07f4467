//! Persistence of the durable model surface.
//!
//! A [`ModelSnapshot`] captures everything saved for a model instance: its
//! uid, class, props, the `flow key → step key → params` mapping, and the
//! sub-model tree. The storage medium is external; the engine only speaks
//! to [`ModelRepository`].

use crate::error::EngineError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// The serializable durable surface of one model instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSnapshot {
    /// Unique model id
    pub uid: String,

    /// Registered class name
    #[serde(rename = "use")]
    pub class: String,

    /// Props object; `null` when the model carries none
    #[serde(default)]
    pub props: Value,

    /// Persisted step params, `flow key → step key → params`
    #[serde(rename = "stepParams", default)]
    pub step_params: HashMap<String, HashMap<String, Value>>,

    /// Nested sub-model snapshots, keyed as in the live tree
    #[serde(rename = "subModels", default)]
    pub sub_models: BTreeMap<String, SubModelSnapshot>,
}

/// A sub-model slot: a single child or an ordered list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SubModelSnapshot {
    /// Exactly one child model
    One(Box<ModelSnapshot>),
    /// An ordered list of child models
    Many(Vec<ModelSnapshot>),
}

impl ModelSnapshot {
    /// Create an empty snapshot for `uid` of class `class`.
    pub fn new(uid: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            class: class.into(),
            props: Value::Null,
            step_params: HashMap::new(),
            sub_models: BTreeMap::new(),
        }
    }
}

/// Saves and restores model snapshots.
#[async_trait]
pub trait ModelRepository: Send + Sync {
    /// Persist a snapshot (upsert by uid).
    async fn save(&self, snapshot: &ModelSnapshot) -> Result<(), EngineError>;

    /// Load the snapshot stored under `uid`, if any.
    async fn load(&self, uid: &str) -> Result<Option<ModelSnapshot>, EngineError>;

    /// Remove the snapshot stored under `uid`.
    async fn delete(&self, uid: &str) -> Result<(), EngineError>;

    /// List the uids of all stored root snapshots.
    async fn list_uids(&self) -> Result<Vec<String>, EngineError>;
}

/// In-memory repository for tests and single-process embedding.
#[derive(Debug, Default)]
pub struct InMemoryModelRepository {
    store: DashMap<String, ModelSnapshot>,
}

impl InMemoryModelRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModelRepository for InMemoryModelRepository {
    async fn save(&self, snapshot: &ModelSnapshot) -> Result<(), EngineError> {
        self.store.insert(snapshot.uid.clone(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, uid: &str) -> Result<Option<ModelSnapshot>, EngineError> {
        Ok(self.store.get(uid).map(|entry| entry.clone()))
    }

    async fn delete(&self, uid: &str) -> Result<(), EngineError> {
        self.store.remove(uid);
        Ok(())
    }

    async fn list_uids(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.store.iter().map(|entry| entry.key().clone()).collect())
    }
}
