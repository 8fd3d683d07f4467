//! The flow engine: class registry, flow registry, and the model tree.
//!
//! Flow definitions are held in an engine-scoped registry keyed by
//! (class name, flow key) and populated before instances are created;
//! nothing lives in mutable statics, so each engine (and each test) is
//! fully isolated.

use crate::domain::context::Context;
use crate::domain::flow::FlowDefinition;
use crate::domain::model::{FlowModel, SubModelSlot};
use crate::domain::repository::{ModelSnapshot, SubModelSnapshot};
use crate::error::EngineError;
use crate::types::StepParams;
use crate::StepContext;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// A registered model class.
///
/// Classes carry no behavior of their own; flows attached to the class via
/// [`FlowEngine::register_flow`] define what instances do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelClass {
    /// Name instances reference through `ModelSpec::use_class`
    pub name: String,
}

impl ModelClass {
    /// Declare a class with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Declarative creation spec for a model and its nested sub-models.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSpec {
    /// Name of the registered class to instantiate
    #[serde(rename = "use")]
    pub use_class: String,

    /// Explicit uid; generated when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Initial props object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub props: Option<Value>,

    /// Persisted step params to restore, `flow key → step key → params`
    #[serde(rename = "stepParams", default, skip_serializing_if = "HashMap::is_empty")]
    pub step_params: HashMap<String, HashMap<String, Value>>,

    /// Nested sub-model specs
    #[serde(rename = "subModels", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sub_models: BTreeMap<String, SubModelSpec>,
}

/// A sub-model slot spec: one child or an ordered list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SubModelSpec {
    /// Exactly one child
    One(Box<ModelSpec>),
    /// An ordered list of children
    Many(Vec<ModelSpec>),
}

impl ModelSpec {
    /// Spec for an instance of `class`.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            use_class: class.into(),
            uid: None,
            props: None,
            step_params: HashMap::new(),
            sub_models: BTreeMap::new(),
        }
    }

    /// Pin the uid instead of generating one.
    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    /// Set the initial props object.
    pub fn with_props(mut self, props: Value) -> Self {
        self.props = Some(props);
        self
    }

    /// Restore persisted params for one (flow, step) pair.
    pub fn with_step_params(
        mut self,
        flow_key: impl Into<String>,
        step_key: impl Into<String>,
        params: Value,
    ) -> Self {
        self.step_params
            .entry(flow_key.into())
            .or_default()
            .insert(step_key.into(), params);
        self
    }

    /// Attach a single sub-model under `key`.
    pub fn with_sub_model(mut self, key: impl Into<String>, spec: ModelSpec) -> Self {
        self.sub_models
            .insert(key.into(), SubModelSpec::One(Box::new(spec)));
        self
    }

    /// Attach an ordered sub-model list under `key`.
    pub fn with_sub_model_list(mut self, key: impl Into<String>, specs: Vec<ModelSpec>) -> Self {
        self.sub_models.insert(key.into(), SubModelSpec::Many(specs));
        self
    }
}

impl From<ModelSnapshot> for ModelSpec {
    fn from(snapshot: ModelSnapshot) -> Self {
        let props = match snapshot.props {
            Value::Null => None,
            other => Some(other),
        };
        let sub_models = snapshot
            .sub_models
            .into_iter()
            .map(|(key, sub)| {
                let spec = match sub {
                    SubModelSnapshot::One(child) => {
                        SubModelSpec::One(Box::new(ModelSpec::from(*child)))
                    }
                    SubModelSnapshot::Many(children) => {
                        SubModelSpec::Many(children.into_iter().map(ModelSpec::from).collect())
                    }
                };
                (key, spec)
            })
            .collect();
        Self {
            use_class: snapshot.class,
            uid: Some(snapshot.uid),
            props,
            step_params: snapshot.step_params,
            sub_models,
        }
    }
}

/// A completed external action delivered to event-bound flows.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedEvent {
    /// Event name, matched against `FlowDefinition::on`
    pub name: String,

    /// Arbitrary payload describing the completed action
    pub payload: Value,
}

/// How a flow execution was triggered; decides which extra params each
/// step sees on top of its declared defaults and persisted params.
#[derive(Debug, Clone)]
pub(crate) enum FlowInvocation {
    /// Re-execution from persisted params only (`set_step_params`, auto flows)
    Persisted,
    /// Manual invocation with per-step params keyed by step key
    Manual(Value),
    /// Dispatch of a completed external action
    Event(DispatchedEvent),
}

pub(crate) struct EngineInner {
    classes: DashMap<String, ModelClass>,
    /// Flow definitions per class, in registration order.
    flows: DashMap<String, Vec<Arc<FlowDefinition>>>,
    models: DashMap<String, Arc<FlowModel>>,
    root_context: Arc<Context>,
}

/// A non-owning engine reference bound into context frames.
///
/// The engine owns its root context, and every model frame chains up to
/// it; the handle holds a `Weak` so that binding the engine into its own
/// context does not keep it alive forever. `upgrade` yields the engine
/// only while an owning [`FlowEngine`] handle still exists.
#[derive(Clone)]
pub struct EngineHandle {
    inner: std::sync::Weak<EngineInner>,
}

impl EngineHandle {
    /// The engine behind this handle, if it is still alive.
    pub fn upgrade(&self) -> Option<FlowEngine> {
        self.inner.upgrade().map(FlowEngine::from_inner)
    }
}

/// The model/flow execution engine for one UI session.
#[derive(Clone)]
pub struct FlowEngine {
    inner: Arc<EngineInner>,
}

impl Default for FlowEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowEngine {
    /// Create an engine with an empty registry and a root context that
    /// carries a weak [`EngineHandle`] under the `engine` name.
    pub fn new() -> Self {
        let inner = Arc::new(EngineInner {
            classes: DashMap::new(),
            flows: DashMap::new(),
            models: DashMap::new(),
            root_context: Context::root(),
        });
        let engine = Self { inner };
        engine
            .inner
            .root_context
            .define_service("engine", Arc::new(engine.handle()))
            .expect("fresh root context");
        engine
    }

    /// A non-owning handle suitable for binding into context frames.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn from_inner(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<EngineInner> {
        Arc::downgrade(&self.inner)
    }

    /// The root context every root model's frame is parented on.
    pub fn root_context(&self) -> Arc<Context> {
        self.inner.root_context.clone()
    }

    // ---- class registry ----

    /// Register model classes. Re-registering a name replaces the class
    /// for subsequent creations; existing instances are not migrated.
    pub fn register_models(&self, classes: impl IntoIterator<Item = ModelClass>) {
        for class in classes {
            self.register_model(class);
        }
    }

    /// Register a single model class.
    pub fn register_model(&self, class: ModelClass) {
        self.inner.classes.insert(class.name.clone(), class);
    }

    /// Whether `name` is a registered class.
    pub fn has_class(&self, name: &str) -> bool {
        self.inner.classes.contains_key(name)
    }

    // ---- flow registry ----

    /// Attach a flow definition to a model class, shared by all its
    /// instances. Re-registering a flow key replaces the definition in
    /// place, keeping registration order.
    pub fn register_flow(&self, class: &str, flow: FlowDefinition) -> Result<(), EngineError> {
        flow.validate()?;
        let flow = Arc::new(flow);
        let mut flows = self.inner.flows.entry(class.to_string()).or_default();
        match flows.iter_mut().find(|existing| existing.key == flow.key) {
            Some(slot) => *slot = flow,
            None => flows.push(flow),
        }
        Ok(())
    }

    /// Flow definitions attached to `class`, in registration order.
    pub fn flows_for(&self, class: &str) -> Vec<Arc<FlowDefinition>> {
        self.inner
            .flows
            .get(class)
            .map(|flows| flows.clone())
            .unwrap_or_default()
    }

    /// The flow registered under (class, key), if any.
    pub fn flow(&self, class: &str, key: &str) -> Option<Arc<FlowDefinition>> {
        self.inner
            .flows
            .get(class)?
            .iter()
            .find(|flow| flow.key == key)
            .cloned()
    }

    // ---- model tree ----

    /// Construct a model instance from a spec, recursively instantiating
    /// nested sub-models; each child's context inherits from its parent's.
    ///
    /// Fails with [`EngineError::UnknownModelType`] when any class in the
    /// spec is unregistered; models created by the failing call are rolled
    /// back, existing models are untouched.
    pub fn create_model(&self, spec: ModelSpec) -> Result<Arc<FlowModel>, EngineError> {
        let mut created = Vec::new();
        match self.build_model(spec, &self.inner.root_context.clone(), None, &mut created) {
            Ok(model) => Ok(model),
            Err(err) => {
                for uid in created {
                    self.inner.models.remove(&uid);
                }
                Err(err)
            }
        }
    }

    fn build_model(
        &self,
        spec: ModelSpec,
        parent_ctx: &Arc<Context>,
        parent: Option<&Arc<FlowModel>>,
        created: &mut Vec<String>,
    ) -> Result<Arc<FlowModel>, EngineError> {
        if !self.has_class(&spec.use_class) {
            return Err(EngineError::UnknownModelType(spec.use_class));
        }

        let uid = spec.uid.unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.inner.models.contains_key(&uid) {
            return Err(EngineError::ValidationError(format!(
                "Model uid already in use: {}",
                uid
            )));
        }

        let context = parent_ctx.child();
        let model = FlowModel::new(uid.clone(), spec.use_class, context, self.downgrade());
        if let Some(parent) = parent {
            model.set_parent(parent);
        }
        if let Some(props) = spec.props {
            model.set_props(props);
        }
        for (flow_key, steps) in spec.step_params {
            for (step_key, params) in steps {
                model.persist_step_params(&flow_key, &step_key, params);
            }
        }

        self.inner.models.insert(uid.clone(), model.clone());
        created.push(uid);

        for (key, sub) in spec.sub_models {
            match sub {
                SubModelSpec::One(child_spec) => {
                    let child =
                        self.build_model(*child_spec, &model.context(), Some(&model), created)?;
                    model.attach_sub_model(&key, SubModelSlot::One(child));
                }
                SubModelSpec::Many(child_specs) => {
                    let mut children = Vec::with_capacity(child_specs.len());
                    for child_spec in child_specs {
                        children.push(self.build_model(
                            child_spec,
                            &model.context(),
                            Some(&model),
                            created,
                        )?);
                    }
                    model.attach_sub_model(&key, SubModelSlot::Many(children));
                }
            }
        }

        Ok(model)
    }

    /// Restore a model tree from its persisted snapshot. Flows are not
    /// executed; the restored params take effect on the next invocation.
    pub fn load_model(&self, snapshot: ModelSnapshot) -> Result<Arc<FlowModel>, EngineError> {
        self.create_model(snapshot.into())
    }

    /// Resolve a previously created model by uid.
    ///
    /// Absence is a normal state, not an invariant violation: models may
    /// be looked up lazily before creation completes in some call patterns.
    pub fn get_model(&self, uid: &str) -> Option<Arc<FlowModel>> {
        self.inner.models.get(uid).map(|entry| entry.clone())
    }

    /// Remove a model from the tree, cascading to its descendants.
    ///
    /// Destroyed models stop accepting prop writes, so effects of handlers
    /// still in flight are unobservable. Returns whether a model was
    /// removed.
    pub fn remove_model(&self, uid: &str) -> bool {
        let Some(model) = self.get_model(uid) else {
            return false;
        };

        if let Some(parent) = model.parent() {
            parent.detach_child(uid);
        }

        let mut doomed = Vec::new();
        model.collect_descendants(&mut doomed);
        doomed.push(model);
        for model in doomed {
            model.mark_destroyed();
            self.inner.models.remove(model.uid());
        }
        debug!(model = %uid, "model removed");
        true
    }

    // ---- flow execution ----

    /// Execute a flow's steps in declaration order, awaiting each handler
    /// before its successor starts.
    ///
    /// Each step sees its declared defaults, overlaid with its persisted
    /// params, overlaid with invocation-time params (manual flows only).
    /// The first failing handler aborts the run; there is no rollback, so
    /// props reflect the last successful step.
    pub(crate) async fn execute_flow(
        &self,
        model: &Arc<FlowModel>,
        flow: &FlowDefinition,
        invocation: &FlowInvocation,
    ) -> Result<(), EngineError> {
        debug!(flow = %flow.key, model = %model.uid(), "executing flow");

        for step in &flow.steps {
            let mut params = step.default_params.clone();
            if let Some(persisted) = model.get_step_params(&flow.key, &step.key) {
                params = StepParams::new(persisted).merged_over(&params);
            }
            let mut event = None;
            match invocation {
                FlowInvocation::Manual(extra) => {
                    if let Some(step_extra) = extra.get(&step.key) {
                        params = StepParams::new(step_extra.clone()).merged_over(&params);
                    }
                }
                FlowInvocation::Event(dispatched) => event = Some(dispatched.clone()),
                FlowInvocation::Persisted => {}
            }

            let ctx = StepContext {
                model: model.clone(),
                engine: self.clone(),
                params,
                event,
            };

            if let Err(err) = step.handler.handle(ctx).await {
                warn!(
                    flow = %flow.key,
                    step = %step.key,
                    model = %model.uid(),
                    error = %err,
                    "step handler failed"
                );
                return Err(match err {
                    failure @ EngineError::StepHandlerFailure { .. } => failure,
                    other => EngineError::StepHandlerFailure {
                        flow: flow.key.clone(),
                        step: step.key.clone(),
                        message: other.to_string(),
                    },
                });
            }
        }

        Ok(())
    }
}
