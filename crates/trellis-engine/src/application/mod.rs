//! Application services built on the domain model.

/// Engine, registries, model creation and flow execution
pub mod engine;

/// Template strings resolved against the context chain
pub mod variables;

/// Safe default-value backfill into live forms
pub mod backfill;

/// Popup-record variable metadata for views
pub mod popup_meta;
