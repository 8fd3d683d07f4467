//! Contracts for external collaborators.
//!
//! The engine consumes these through narrow seams: a form owned by the
//! surrounding UI (the backfill target) and a provider of collection field
//! metadata. Neither is implemented here beyond test stubs.

use crate::error::EngineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An externally-owned form, the target of the default-value backfill
/// policy. Reads and writes are keyed by field name.
pub trait FormBinding: Send + Sync {
    /// Current value of a field, if any has been set.
    fn field_value(&self, name: &str) -> Option<Value>;

    /// Write a field value. Only the backfill policy calls this from
    /// inside the engine.
    fn set_field_value(&self, name: &str, value: Value);

    /// Whether the form reports any field as user-modified.
    fn is_fields_touched(&self) -> bool;

    /// Force the touched flag (used by the surrounding UI, not the engine).
    fn set_touched(&self, touched: bool);
}

/// Field metadata surfaced by a collection provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldMeta {
    /// Field name within its collection
    pub name: String,

    /// Storage-level type, e.g. `string`, `belongsTo`, `belongsToMany`
    #[serde(rename = "type")]
    pub field_type: String,

    /// UI interface, e.g. `input`, `m2o`, `m2m`
    pub interface: String,

    /// Whether the field holds multiple related records
    #[serde(default)]
    pub multiple: bool,
}

impl FieldMeta {
    /// Association cardinality: to-many storage types carry multiple records.
    pub fn is_to_many(&self) -> bool {
        self.multiple || matches!(self.field_type.as_str(), "belongsToMany" | "hasMany")
    }
}

/// Provider of collection field definitions.
///
/// Lookups may involve I/O, so the method is async; the popup record node
/// calls this lazily, only when expanded.
#[async_trait]
pub trait CollectionProvider: Send + Sync {
    /// Fetch the field definitions of `collection` within `data_source`.
    async fn collection_fields(
        &self,
        data_source: &str,
        collection: &str,
    ) -> Result<Vec<FieldMeta>, EngineError>;
}
