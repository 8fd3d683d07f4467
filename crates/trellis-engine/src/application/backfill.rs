//! Safe backfill of configured default values into live form fields.
//!
//! A configurator may change a field's default while an end user already
//! has the form open. The backfill rule is: write the new default when
//! the field is still in its pristine state or still holds the default
//! this engine last applied; never clobber a value the user typed, and
//! never write an unresolved default.

use crate::domain::bindings::FormBinding;
use crate::domain::model::FlowModel;
use crate::error::EngineError;
use crate::{application::variables, StepContext, StepHandler};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// What [`apply_default`] did with the resolved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillOutcome {
    /// The default was written into the form field
    Applied,
    /// The field held a user-entered value and was left alone
    KeptUserValue,
    /// There was no concrete default to apply
    NoDefault,
}

fn last_applied_key(field: &str) -> String {
    format!("lastAppliedDefault.{}", field)
}

fn is_empty_value(value: &Option<Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

/// Apply a resolved default to one form field under the backfill rule.
///
/// The model carries per-field transient state recording the last default
/// this engine wrote, so a field that still shows an earlier default is
/// recognized as unmodified even after the form is marked touched.
pub fn apply_default(
    model: &Arc<FlowModel>,
    form: &Arc<dyn FormBinding>,
    field: &str,
    resolved: Option<Value>,
) -> BackfillOutcome {
    let Some(default) = resolved else {
        return BackfillOutcome::NoDefault;
    };

    let current = form.field_value(field);
    let last_applied = model.state(&last_applied_key(field));

    let writable = !form.is_fields_touched()
        || is_empty_value(&current)
        || (last_applied.is_some() && current == last_applied);

    if !writable {
        debug!(field = %field, "keeping user-entered value");
        return BackfillOutcome::KeptUserValue;
    }

    form.set_field_value(field, default.clone());
    model.set_state(&last_applied_key(field), default);
    BackfillOutcome::Applied
}

/// Step handler that backfills a configured default into the bound form.
///
/// The target field name comes from the model's `name` prop; the raw
/// default comes from the step's `defaultValue` param and may be a
/// constant or a `{{...}}` template resolved against the model's context.
/// Without a bound form the step is a no-op.
pub struct DefaultValueStep;

#[async_trait]
impl StepHandler for DefaultValueStep {
    async fn handle(&self, ctx: StepContext) -> Result<(), EngineError> {
        let context = ctx.model.context();
        let Some(form) = context.form() else {
            return Ok(());
        };
        let Some(field) = ctx.model.prop("name").and_then(|v| match v {
            Value::String(s) => Some(s),
            _ => None,
        }) else {
            return Ok(());
        };

        let raw = ctx.params.get("defaultValue");
        let resolved = variables::resolve_default_value(&context, raw).await?;
        apply_default(&ctx.model, &form, &field, resolved);
        Ok(())
    }
}
