//! Template resolution against a context chain.
//!
//! Templates are `{{path.to.value}}` strings. Resolution is two-tier: a
//! `resolveJsonTemplate` method bound anywhere on the context chain gets
//! the first word, and a plain dotted-path walk over context bindings is
//! the fallback when no resolver is bound or the resolver declines.

use crate::domain::context::Context;
use crate::error::EngineError;
use serde_json::{json, Value};
use std::sync::Arc;

/// Whether a raw value is a `{{...}}` template string.
pub fn is_template(raw: &Value) -> bool {
    template_path(raw).is_some()
}

/// The inner path of a template string, with surrounding whitespace
/// trimmed; `None` when `raw` is not a template.
pub fn template_path(raw: &Value) -> Option<&str> {
    let text = raw.as_str()?;
    let inner = text.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    Some(inner.trim())
}

/// Resolve a template string against `ctx`.
///
/// A `resolveJsonTemplate` context method takes precedence when it yields
/// a value; otherwise the template path is walked segment by segment,
/// starting from the context binding named by the first segment. A
/// leading `ctx.` segment is stripped before the walk. Unresolvable
/// templates yield `None` rather than an error.
pub async fn resolve_template(ctx: &Arc<Context>, raw: &Value) -> Result<Option<Value>, EngineError> {
    let Some(path) = template_path(raw) else {
        return Ok(None);
    };

    if let Some(resolved) = ctx.call_method("resolveJsonTemplate", json!(raw)).await? {
        return Ok(Some(resolved));
    }

    Ok(resolve_path(ctx, path))
}

/// Walk a dotted path over the context chain. The first segment names a
/// context binding; the rest index into it. A leading `ctx.` is ignored.
pub fn resolve_path(ctx: &Arc<Context>, path: &str) -> Option<Value> {
    let path = path.strip_prefix("ctx.").unwrap_or(path);
    let mut segments = path.split('.').filter(|s| !s.is_empty());

    let root = segments.next()?;
    let mut current = ctx.value_of(root)?;
    for segment in segments {
        current = current.get(segment)?.clone();
    }
    Some(current)
}

/// Resolve a configured default value to the concrete value to apply.
///
/// `None` means "no default": absent or null configuration, or a
/// template that did not resolve. Constants pass through unchanged.
pub async fn resolve_default_value(
    ctx: &Arc<Context>,
    raw: Option<&Value>,
) -> Result<Option<Value>, EngineError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    if is_template(raw) {
        return resolve_template(ctx, raw).await;
    }
    Ok(Some(raw.clone()))
}
