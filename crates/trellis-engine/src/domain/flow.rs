//! Flow and step definitions.
//!
//! A flow is a named, ordered sequence of steps attached to a model class.
//! Definitions are registered once per class on the engine's registry and
//! shared by every instance of that class; per-instance configuration lives
//! in the models' persisted step params, not here.

use crate::error::EngineError;
use crate::types::StepParams;
use crate::StepHandler;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// A parsed and validated flow definition.
pub struct FlowDefinition {
    /// Key identifying the flow within its model class
    pub key: String,

    /// Manual flows only run when explicitly invoked (e.g. by a settings
    /// UI); automatic flows run on model lifecycle or dispatched events
    pub manual: bool,

    /// Event name that triggers this flow through `dispatch_event`
    pub on: Option<String>,

    /// The steps in this flow, in declaration order
    pub steps: Vec<StepDefinition>,
}

/// A step within a flow.
pub struct StepDefinition {
    /// Key identifying the step within its flow
    pub key: String,

    /// Declared parameter defaults, merged under persisted params
    pub default_params: StepParams,

    /// Handler executed when the flow runs
    pub handler: Arc<dyn StepHandler>,
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("key", &self.key)
            .field("default_params", &self.default_params)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for FlowDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowDefinition")
            .field("key", &self.key)
            .field("manual", &self.manual)
            .field("on", &self.on)
            .field("steps", &self.steps)
            .finish()
    }
}

impl FlowDefinition {
    /// Create an empty automatic flow.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            manual: false,
            on: None,
            steps: Vec::new(),
        }
    }

    /// Mark the flow as manual-only.
    pub fn manual(mut self) -> Self {
        self.manual = true;
        self
    }

    /// Trigger the flow when the named event is dispatched on a model.
    pub fn on_event(mut self, event: impl Into<String>) -> Self {
        self.on = Some(event.into());
        self
    }

    /// Append a step with empty default params.
    pub fn step(self, key: impl Into<String>, handler: Arc<dyn StepHandler>) -> Self {
        self.step_with_defaults(key, Value::Object(serde_json::Map::new()), handler)
    }

    /// Append a step with declared parameter defaults.
    pub fn step_with_defaults(
        mut self,
        key: impl Into<String>,
        default_params: Value,
        handler: Arc<dyn StepHandler>,
    ) -> Self {
        self.steps.push(StepDefinition {
            key: key.into(),
            default_params: StepParams::new(default_params),
            handler,
        });
        self
    }

    /// Look up a step definition by key.
    pub fn step_def(&self, key: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|step| step.key == key)
    }

    /// Whether `dispatch_event(name)` should run this flow.
    pub fn reacts_to(&self, event: &str) -> bool {
        !self.manual && self.on.as_deref() == Some(event)
    }

    /// Whether this flow runs on the plain lifecycle pass
    /// (`apply_auto_flows`): automatic and not event-bound.
    pub fn is_auto(&self) -> bool {
        !self.manual && self.on.is_none()
    }

    /// Validate the definition.
    ///
    /// Steps execute in declaration order, so the only structural rule is
    /// key uniqueness; an empty step list is legal (a flow can exist purely
    /// as a persisted-params namespace).
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.key.is_empty() {
            return Err(EngineError::ValidationError(
                "Flow key must not be empty".to_string(),
            ));
        }

        let mut step_keys = HashSet::new();
        for step in &self.steps {
            if !step_keys.insert(step.key.as_str()) {
                return Err(EngineError::ValidationError(format!(
                    "Duplicate step key: {}",
                    step.key
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step_fn;
    use serde_json::json;

    fn noop() -> Arc<dyn StepHandler> {
        step_fn(|_ctx| Box::pin(async move { Ok(()) }))
    }

    #[test]
    fn test_flow_definition_builder() {
        let flow = FlowDefinition::new("formItemSettings")
            .manual()
            .step_with_defaults("initialValue", json!({"defaultValue": null}), noop())
            .step("label", noop());

        assert_eq!(flow.key, "formItemSettings");
        assert!(flow.manual);
        assert_eq!(flow.on, None);
        assert_eq!(flow.steps.len(), 2);
        assert_eq!(flow.steps[0].key, "initialValue");
        assert_eq!(flow.steps[1].key, "label");
        assert!(flow.validate().is_ok());
    }

    #[test]
    fn test_step_lookup_and_declared_order() {
        let flow = FlowDefinition::new("selectSettings")
            .step("fieldNames", noop())
            .step("options", noop());

        assert!(flow.step_def("fieldNames").is_some());
        assert!(flow.step_def("missing").is_none());

        let keys: Vec<&str> = flow.steps.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["fieldNames", "options"]);
    }

    #[test]
    fn test_validate_duplicate_step_keys() {
        let flow = FlowDefinition::new("eventSettings")
            .step("fieldNames", noop())
            .step("fieldNames", noop());

        match flow.validate() {
            Err(EngineError::ValidationError(msg)) => {
                assert!(msg.contains("Duplicate step key"));
                assert!(msg.contains("fieldNames"));
            }
            other => panic!("Expected ValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_flow_is_legal() {
        let flow = FlowDefinition::new("eventSettings").manual();
        assert!(flow.validate().is_ok());
        assert!(flow.steps.is_empty());
    }

    #[test]
    fn test_empty_key_rejected() {
        let flow = FlowDefinition::new("");
        assert!(matches!(
            flow.validate(),
            Err(EngineError::ValidationError(_))
        ));
    }

    #[test]
    fn test_trigger_classification() {
        let auto = FlowDefinition::new("render");
        assert!(auto.is_auto());
        assert!(!auto.reacts_to("selectField"));

        let event = FlowDefinition::new("selection").on_event("selectField");
        assert!(!event.is_auto());
        assert!(event.reacts_to("selectField"));
        assert!(!event.reacts_to("otherEvent"));

        let manual = FlowDefinition::new("settings").manual();
        assert!(!manual.is_auto());
        assert!(!manual.reacts_to("selectField"));
    }
}
