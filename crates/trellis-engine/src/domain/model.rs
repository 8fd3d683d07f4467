//! Model instances and the ownership tree.
//!
//! A `FlowModel` is a configurable node in the UI composition tree. It owns
//! its props, its sub-models (exclusively — the graph is a strict tree), a
//! context frame layered on its parent's, and its persisted step params.
//! Mutation is always routed through the owning model's API; no locks are
//! shared across models.

use crate::application::engine::{DispatchedEvent, EngineInner, FlowEngine, FlowInvocation};
use crate::domain::context::Context;
use crate::domain::repository::{ModelSnapshot, SubModelSnapshot};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock, Weak};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

/// A sub-model slot: exactly one child or an ordered list of children.
#[derive(Clone)]
pub enum SubModelSlot {
    /// A single child model
    One(Arc<FlowModel>),
    /// An ordered list of child models
    Many(Vec<Arc<FlowModel>>),
}

impl SubModelSlot {
    fn children(&self) -> Vec<Arc<FlowModel>> {
        match self {
            SubModelSlot::One(model) => vec![model.clone()],
            SubModelSlot::Many(models) => models.clone(),
        }
    }
}

/// A configurable node in the model tree.
pub struct FlowModel {
    uid: String,
    class_name: String,
    props: RwLock<Map<String, Value>>,
    sub_models: RwLock<BTreeMap<String, SubModelSlot>>,
    /// Persisted configuration: flow key → step key → params object.
    step_params: RwLock<BTreeMap<String, BTreeMap<String, Value>>>,
    /// Transient per-instance runtime state, never persisted.
    state: RwLock<HashMap<String, Value>>,
    context: Arc<Context>,
    engine: Weak<EngineInner>,
    parent: RwLock<Weak<FlowModel>>,
    destroyed: AtomicBool,
    /// Single-flight gates, one per flow key: a second `set_step_params`
    /// on the same (model, flow) pair must not interleave with an
    /// in-flight re-execution.
    flow_gates: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    created_at: DateTime<Utc>,
    updated_at: RwLock<DateTime<Utc>>,
}

impl std::fmt::Debug for FlowModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowModel")
            .field("uid", &self.uid)
            .field("class_name", &self.class_name)
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

impl FlowModel {
    pub(crate) fn new(
        uid: String,
        class_name: String,
        context: Arc<Context>,
        engine: Weak<EngineInner>,
    ) -> Arc<Self> {
        let now = Utc::now();
        Arc::new(Self {
            uid,
            class_name,
            props: RwLock::new(Map::new()),
            sub_models: RwLock::new(BTreeMap::new()),
            step_params: RwLock::new(BTreeMap::new()),
            state: RwLock::new(HashMap::new()),
            context,
            engine,
            parent: RwLock::new(Weak::new()),
            destroyed: AtomicBool::new(false),
            flow_gates: StdMutex::new(HashMap::new()),
            created_at: now,
            updated_at: RwLock::new(now),
        })
    }

    /// Unique id of this model.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Registered class name this model was created from.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// This model's context frame (parented on the owner's frame).
    pub fn context(&self) -> Arc<Context> {
        self.context.clone()
    }

    /// Creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Timestamp of the last prop or params mutation.
    pub fn updated_at(&self) -> DateTime<Utc> {
        *self.updated_at.read().expect("model timestamp poisoned")
    }

    fn touch(&self) {
        *self.updated_at.write().expect("model timestamp poisoned") = Utc::now();
    }

    /// The owning engine, if it is still alive.
    pub fn engine(&self) -> Option<FlowEngine> {
        self.engine.upgrade().map(FlowEngine::from_inner)
    }

    /// The parent model, if this is not a root.
    pub fn parent(&self) -> Option<Arc<FlowModel>> {
        self.parent.read().expect("model parent poisoned").upgrade()
    }

    pub(crate) fn set_parent(&self, parent: &Arc<FlowModel>) {
        *self.parent.write().expect("model parent poisoned") = Arc::downgrade(parent);
    }

    /// Whether this model has been removed from the tree. Writes to a
    /// destroyed model's props are no-ops.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }

    // ---- props ----

    /// Clone of the props object.
    pub fn props(&self) -> Value {
        Value::Object(self.props.read().expect("model props poisoned").clone())
    }

    /// A single prop by name.
    pub fn prop(&self, name: &str) -> Option<Value> {
        self.props
            .read()
            .expect("model props poisoned")
            .get(name)
            .cloned()
    }

    /// Merge the given object's entries into this model's props.
    ///
    /// Step handlers use this to drive what gets rendered. No-op once the
    /// model is destroyed, so in-flight handlers of a torn-down model have
    /// no observable effect.
    pub fn set_props(&self, props: Value) {
        if self.is_destroyed() {
            debug!(model = %self.uid, "ignoring set_props on destroyed model");
            return;
        }
        match props {
            Value::Object(entries) => {
                let mut current = self.props.write().expect("model props poisoned");
                for (key, value) in entries {
                    current.insert(key, value);
                }
            }
            other => {
                warn!(model = %self.uid, ?other, "set_props expects an object");
                return;
            }
        }
        self.touch();
    }

    /// Set a single prop.
    pub fn set_prop(&self, name: &str, value: Value) {
        let mut entries = Map::new();
        entries.insert(name.to_string(), value);
        self.set_props(Value::Object(entries));
    }

    // ---- sub-models ----

    /// The single child model under `key`.
    pub fn sub_model(&self, key: &str) -> Option<Arc<FlowModel>> {
        match self.sub_models.read().expect("sub models poisoned").get(key) {
            Some(SubModelSlot::One(model)) => Some(model.clone()),
            _ => None,
        }
    }

    /// The ordered child list under `key`.
    pub fn sub_model_list(&self, key: &str) -> Option<Vec<Arc<FlowModel>>> {
        match self.sub_models.read().expect("sub models poisoned").get(key) {
            Some(SubModelSlot::Many(models)) => Some(models.clone()),
            _ => None,
        }
    }

    /// Keys of all sub-model slots.
    pub fn sub_model_keys(&self) -> Vec<String> {
        self.sub_models
            .read()
            .expect("sub models poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub(crate) fn attach_sub_model(&self, key: &str, slot: SubModelSlot) {
        self.sub_models
            .write()
            .expect("sub models poisoned")
            .insert(key.to_string(), slot);
    }

    /// Drop the child with `uid` from whichever slot holds it.
    pub(crate) fn detach_child(&self, uid: &str) {
        let mut slots = self.sub_models.write().expect("sub models poisoned");
        let mut emptied: Option<String> = None;
        for (key, slot) in slots.iter_mut() {
            match slot {
                SubModelSlot::One(model) => {
                    if model.uid() == uid {
                        emptied = Some(key.clone());
                        break;
                    }
                }
                SubModelSlot::Many(models) => {
                    let before = models.len();
                    models.retain(|model| model.uid() != uid);
                    if models.len() != before {
                        if models.is_empty() {
                            emptied = Some(key.clone());
                        }
                        break;
                    }
                }
            }
        }
        if let Some(key) = emptied {
            slots.remove(&key);
        }
    }

    /// Collect every descendant model, depth first.
    pub(crate) fn collect_descendants(&self, out: &mut Vec<Arc<FlowModel>>) {
        let children: Vec<Arc<FlowModel>> = self
            .sub_models
            .read()
            .expect("sub models poisoned")
            .values()
            .flat_map(|slot| slot.children())
            .collect();
        for child in children {
            child.collect_descendants(out);
            out.push(child);
        }
    }

    // ---- persisted step params ----

    /// Persisted params for one (flow, step) pair.
    pub fn get_step_params(&self, flow_key: &str, step_key: &str) -> Option<Value> {
        self.step_params
            .read()
            .expect("step params poisoned")
            .get(flow_key)
            .and_then(|steps| steps.get(step_key))
            .cloned()
    }

    /// First persisted params found under `step_key`, scanning flows in
    /// key order. Used where the step key is well known but the flow key
    /// is not (e.g. the `openView` params behind a popup).
    pub fn find_step_params(&self, step_key: &str) -> Option<Value> {
        self.step_params
            .read()
            .expect("step params poisoned")
            .values()
            .find_map(|steps| steps.get(step_key))
            .cloned()
    }

    pub(crate) fn persist_step_params(&self, flow_key: &str, step_key: &str, params: Value) {
        self.step_params
            .write()
            .expect("step params poisoned")
            .entry(flow_key.to_string())
            .or_default()
            .insert(step_key.to_string(), params);
        self.touch();
    }

    // ---- transient runtime state ----

    /// Read a transient state entry (never persisted).
    pub fn state(&self, key: &str) -> Option<Value> {
        self.state
            .read()
            .expect("model state poisoned")
            .get(key)
            .cloned()
    }

    /// Write a transient state entry.
    pub fn set_state(&self, key: &str, value: Value) {
        self.state
            .write()
            .expect("model state poisoned")
            .insert(key.to_string(), value);
    }

    fn flow_gate(&self, flow_key: &str) -> Arc<AsyncMutex<()>> {
        let mut gates = self.flow_gates.lock().expect("flow gates poisoned");
        gates
            .entry(flow_key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    // ---- flow invocation ----

    /// Persist `params` under (flow, step), then re-execute that flow with
    /// the updated persisted params merged into each step's view of its
    /// parameters.
    ///
    /// This is the primary mutation entry point used by configuration UIs.
    /// Idempotent under repeated identical calls; other steps' persisted
    /// params are untouched. Calls on the same (model, flow) pair are
    /// serialized; a handler failure propagates without reverting the
    /// params persisted by this call.
    pub async fn set_step_params(
        self: &Arc<Self>,
        flow_key: &str,
        step_key: &str,
        params: Value,
    ) -> Result<(), EngineError> {
        if self.is_destroyed() {
            return Ok(());
        }
        let Some(engine) = self.engine() else {
            return Ok(());
        };
        let flow = engine
            .flow(&self.class_name, flow_key)
            .ok_or_else(|| EngineError::FlowNotFound(flow_key.to_string()))?;

        let gate = self.flow_gate(flow_key);
        let _serialized = gate.lock().await;

        self.persist_step_params(flow_key, step_key, params);
        engine
            .execute_flow(self, &flow, &FlowInvocation::Persisted)
            .await
    }

    /// Manually invoke a flow, passing per-step params keyed by step key,
    /// merged over declared defaults and persisted params.
    pub async fn apply_flow(
        self: &Arc<Self>,
        flow_key: &str,
        extra: Value,
    ) -> Result<(), EngineError> {
        if self.is_destroyed() {
            return Ok(());
        }
        let Some(engine) = self.engine() else {
            return Ok(());
        };
        let flow = engine
            .flow(&self.class_name, flow_key)
            .ok_or_else(|| EngineError::FlowNotFound(flow_key.to_string()))?;

        let gate = self.flow_gate(flow_key);
        let _serialized = gate.lock().await;

        engine
            .execute_flow(self, &flow, &FlowInvocation::Manual(extra))
            .await
    }

    /// Dispatch a completed external action to this model.
    ///
    /// Every registered non-manual flow of the class bound to this event
    /// runs, strictly after the triggering action (the caller awaits) and
    /// before the next render observes the model.
    pub async fn dispatch_event(
        self: &Arc<Self>,
        event: &str,
        payload: Value,
    ) -> Result<(), EngineError> {
        if self.is_destroyed() {
            return Ok(());
        }
        let Some(engine) = self.engine() else {
            return Ok(());
        };
        let dispatched = DispatchedEvent {
            name: event.to_string(),
            payload,
        };
        for flow in engine.flows_for(&self.class_name) {
            if flow.reacts_to(event) {
                let gate = self.flow_gate(&flow.key);
                let _serialized = gate.lock().await;
                engine
                    .execute_flow(self, &flow, &FlowInvocation::Event(dispatched.clone()))
                    .await?;
            }
        }
        Ok(())
    }

    /// Run every automatic (non-manual, non-event) flow of this model's
    /// class in registration order. The rendering layer calls this once
    /// collaborators are bound to the context.
    pub async fn apply_auto_flows(self: &Arc<Self>) -> Result<(), EngineError> {
        if self.is_destroyed() {
            return Ok(());
        }
        let Some(engine) = self.engine() else {
            return Ok(());
        };
        for flow in engine.flows_for(&self.class_name) {
            if flow.is_auto() {
                let gate = self.flow_gate(&flow.key);
                let _serialized = gate.lock().await;
                engine
                    .execute_flow(self, &flow, &FlowInvocation::Persisted)
                    .await?;
            }
        }
        Ok(())
    }

    // ---- persistence ----

    /// Capture the durable surface of this model and its sub-tree.
    pub fn snapshot(&self) -> ModelSnapshot {
        let mut snapshot = ModelSnapshot::new(self.uid.clone(), self.class_name.clone());

        let props = self.props.read().expect("model props poisoned");
        if !props.is_empty() {
            snapshot.props = Value::Object(props.clone());
        }
        drop(props);

        for (flow_key, steps) in self.step_params.read().expect("step params poisoned").iter() {
            snapshot.step_params.insert(
                flow_key.clone(),
                steps
                    .iter()
                    .map(|(step_key, params)| (step_key.clone(), params.clone()))
                    .collect(),
            );
        }

        for (key, slot) in self.sub_models.read().expect("sub models poisoned").iter() {
            let entry = match slot {
                SubModelSlot::One(model) => SubModelSnapshot::One(Box::new(model.snapshot())),
                SubModelSlot::Many(models) => {
                    SubModelSnapshot::Many(models.iter().map(|model| model.snapshot()).collect())
                }
            };
            snapshot.sub_models.insert(key.clone(), entry);
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn orphan_model(uid: &str) -> Arc<FlowModel> {
        FlowModel::new(
            uid.to_string(),
            "TestModel".to_string(),
            Context::root(),
            Weak::new(),
        )
    }

    #[test]
    fn test_props_merge() {
        let model = orphan_model("m1");
        model.set_props(json!({"name": "nickname", "pattern": "editable"}));
        model.set_props(json!({"pattern": "readPretty"}));

        assert_eq!(model.prop("name"), Some(json!("nickname")));
        assert_eq!(model.prop("pattern"), Some(json!("readPretty")));
        assert_eq!(
            model.props(),
            json!({"name": "nickname", "pattern": "readPretty"})
        );
    }

    #[test]
    fn test_set_props_noop_after_destroy() {
        let model = orphan_model("m1");
        model.set_props(json!({"name": "nickname"}));
        model.mark_destroyed();
        model.set_props(json!({"name": "changed"}));

        assert_eq!(model.prop("name"), Some(json!("nickname")));
    }

    #[test]
    fn test_set_props_rejects_non_object() {
        let model = orphan_model("m1");
        model.set_props(json!("not an object"));
        assert_eq!(model.props(), json!({}));
    }

    #[test]
    fn test_step_params_addressing() {
        let model = orphan_model("m1");
        model.persist_step_params("formItemSettings", "initialValue", json!({"defaultValue": "a"}));
        model.persist_step_params("formItemSettings", "label", json!({"text": "Nickname"}));
        model.persist_step_params("popupSettings", "openView", json!({"collectionName": "posts"}));

        assert_eq!(
            model.get_step_params("formItemSettings", "initialValue"),
            Some(json!({"defaultValue": "a"}))
        );
        assert_eq!(model.get_step_params("formItemSettings", "openView"), None);
        assert_eq!(
            model.find_step_params("openView"),
            Some(json!({"collectionName": "posts"}))
        );
    }

    #[test]
    fn test_transient_state_is_not_in_snapshot() {
        let model = orphan_model("m1");
        model.set_state("lastAppliedDefault.nickname", json!("a"));
        model.persist_step_params("formItemSettings", "initialValue", json!({"defaultValue": "a"}));

        let snapshot = model.snapshot();
        assert!(snapshot.step_params.contains_key("formItemSettings"));
        assert_eq!(
            serde_json::to_string(&snapshot)
                .unwrap()
                .contains("lastAppliedDefault"),
            false
        );
    }

    #[test]
    fn test_detach_child() {
        let parent = orphan_model("parent");
        let one = orphan_model("one");
        let a = orphan_model("a");
        let b = orphan_model("b");
        parent.attach_sub_model("field", SubModelSlot::One(one));
        parent.attach_sub_model("items", SubModelSlot::Many(vec![a, b]));

        parent.detach_child("a");
        assert_eq!(parent.sub_model_list("items").unwrap().len(), 1);

        parent.detach_child("one");
        assert!(parent.sub_model("field").is_none());
        assert_eq!(parent.sub_model_keys(), vec!["items".to_string()]);
    }

    #[test]
    fn test_detach_last_list_child_drops_slot() {
        let parent = orphan_model("parent");
        let only = orphan_model("only");
        parent.attach_sub_model("items", SubModelSlot::Many(vec![only]));

        parent.detach_child("only");
        // An emptied list slot disappears like an emptied single slot
        assert!(parent.sub_model_list("items").is_none());
        assert!(parent.sub_model_keys().is_empty());
    }

    #[test]
    fn test_collect_descendants_depth_first() {
        let root = orphan_model("root");
        let mid = orphan_model("mid");
        let leaf = orphan_model("leaf");
        mid.attach_sub_model("field", SubModelSlot::One(leaf));
        root.attach_sub_model("field", SubModelSlot::One(mid));

        let mut all = Vec::new();
        root.collect_descendants(&mut all);
        let uids: Vec<&str> = all.iter().map(|m| m.uid()).collect();
        assert_eq!(uids, vec!["leaf", "mid"]);
    }

    #[tokio::test]
    async fn test_flow_calls_without_engine_are_noops() {
        // A model whose engine is gone must not error out of teardown paths
        let model = orphan_model("m1");
        model
            .set_step_params("formItemSettings", "initialValue", json!({}))
            .await
            .unwrap();
        model.dispatch_event("selectField", json!({})).await.unwrap();
        model.apply_auto_flows().await.unwrap();
    }
}
