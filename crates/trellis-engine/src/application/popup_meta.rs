//! Variable metadata for the current popup record.
//!
//! When a view sits on top of a popup opened from a record, expressions
//! inside that view may reference the popup's record as a variable. The
//! metadata built here describes that variable: which collection the
//! record belongs to, how to fetch it, and a lazily-expanded property
//! tree for variable pickers.

use crate::application::engine::EngineHandle;
use crate::domain::bindings::FieldMeta;
use crate::domain::context::Context;
use crate::domain::view::View;
use crate::error::EngineError;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const POPUP_RECORD_TITLE: &str = "Current popup record";

/// Builder for popup-record variable metadata.
///
/// The anchor view is captured at creation time, so the metadata keeps
/// describing the popup the expression lives in even when evaluated under
/// a context whose ambient view has moved on (a settings drawer opened on
/// top, for example).
pub struct PopupMetaFactory {
    ctx: Arc<Context>,
    anchor: Arc<View>,
}

/// Create the factory for `anchor`'s popup-record variable.
pub fn create_popup_meta(ctx: Arc<Context>, anchor: Arc<View>) -> PopupMetaFactory {
    PopupMetaFactory { ctx, anchor }
}

impl PopupMetaFactory {
    /// Build the metadata, or `None` when the anchor view has no popup
    /// record behind it.
    ///
    /// `None` covers every absence along the chain: an empty navigation
    /// stack, a missing engine or popup model, and a popup whose params
    /// never configured an `openView` step or a collection name.
    pub async fn build(&self) -> Result<Option<PopupMeta>, EngineError> {
        let Some(entry) = self.anchor.navigation().top() else {
            return Ok(None);
        };
        let Some(engine) = self
            .ctx
            .service::<EngineHandle>("engine")
            .and_then(|handle| handle.upgrade())
        else {
            return Ok(None);
        };
        let Some(model) = engine.get_model(&entry.view_uid) else {
            debug!(view_uid = %entry.view_uid, "popup model not found");
            return Ok(None);
        };
        let Some(open_view) = model.find_step_params("openView") else {
            return Ok(None);
        };
        let Some(collection) = open_view
            .get("collectionName")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return Ok(None);
        };
        let data_source_key = open_view
            .get("dataSourceKey")
            .and_then(Value::as_str)
            .unwrap_or("main")
            .to_string();

        let title = self
            .ctx
            .call_method("t", json!(POPUP_RECORD_TITLE))
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| POPUP_RECORD_TITLE.to_string());

        let mut properties = HashMap::new();
        properties.insert(
            "record".to_string(),
            record_node(self.ctx.clone(), data_source_key.clone(), collection.clone(), title),
        );

        Ok(Some(PopupMeta {
            collection,
            data_source_key,
            filter_by_tk: entry.filter_by_tk.clone(),
            properties,
        }))
    }
}

fn record_node(
    ctx: Arc<Context>,
    data_source_key: String,
    collection: String,
    title: String,
) -> PropertyNode {
    PropertyNode {
        title,
        has_children: true,
        loader: Arc::new(move || {
            let ctx = ctx.clone();
            let data_source_key = data_source_key.clone();
            let collection = collection.clone();
            Box::pin(async move {
                let Some(provider) = ctx.collections() else {
                    return Ok(Vec::new());
                };
                provider
                    .collection_fields(&data_source_key, &collection)
                    .await
            })
        }),
    }
}

/// Metadata describing the popup-record variable available to a view.
pub struct PopupMeta {
    /// Collection the popup record belongs to
    pub collection: String,

    /// Data source the collection lives in
    pub data_source_key: String,

    /// Target key of the record the popup was opened from
    pub filter_by_tk: Option<Value>,

    /// Property tree exposed to variable pickers, keyed by variable name
    pub properties: HashMap<String, PropertyNode>,
}

impl PopupMeta {
    /// Runtime fetch parameters for resolving the record's value.
    pub fn build_variables_params(&self) -> Value {
        json!({
            "record": {
                "collection": self.collection,
                "dataSourceKey": self.data_source_key,
                "filterByTk": self.filter_by_tk,
            }
        })
    }
}

/// One node of the variable property tree. Children are fetched only
/// when [`expand`](PropertyNode::expand) is called; building the node
/// itself performs no collection lookups.
pub struct PropertyNode {
    /// Display title, already localized
    pub title: String,

    /// Whether the node can be expanded further
    pub has_children: bool,

    loader: Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<FieldMeta>, EngineError>> + Send + Sync>,
}

impl PropertyNode {
    /// Fetch the node's child fields from the bound collection provider.
    /// Without a provider on the context chain the node expands to nothing.
    pub async fn expand(&self) -> Result<Vec<FieldMeta>, EngineError> {
        (self.loader)().await
    }
}

impl std::fmt::Debug for PropertyNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyNode")
            .field("title", &self.title)
            .field("has_children", &self.has_children)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::engine::{FlowEngine, ModelClass, ModelSpec};
    use crate::domain::bindings::CollectionProvider;
    use crate::domain::view::{ViewStackEntry, ViewType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CollectionProvider for CountingProvider {
        async fn collection_fields(
            &self,
            _data_source: &str,
            collection: &str,
        ) -> Result<Vec<FieldMeta>, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![FieldMeta {
                name: format!("{}_title", collection),
                field_type: "string".to_string(),
                interface: "input".to_string(),
                multiple: false,
            }])
        }
    }

    fn engine_with_popup(uid: &str, collection: &str) -> FlowEngine {
        let engine = FlowEngine::new();
        engine.register_model(ModelClass::new("PopupActionModel"));
        engine
            .create_model(ModelSpec::new("PopupActionModel").with_uid(uid).with_step_params(
                "popup",
                "openView",
                json!({"collectionName": collection, "dataSourceKey": "main"}),
            ))
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_no_navigation_entry_yields_none() {
        let engine = FlowEngine::new();
        let anchor = Arc::new(View::new(ViewType::Modal, json!({})));
        let meta = create_popup_meta(engine.root_context(), anchor)
            .build()
            .await
            .unwrap();
        assert!(meta.is_none());
    }

    #[tokio::test]
    async fn test_builds_from_anchor_top_entry() {
        let engine = engine_with_popup("popup-uid", "posts");
        let anchor = Arc::new(View::new(ViewType::Modal, json!({})));
        anchor
            .navigation()
            .push(ViewStackEntry::new("popup-uid").with_filter_by_tk(json!(111)));

        let meta = create_popup_meta(engine.root_context(), anchor)
            .build()
            .await
            .unwrap()
            .expect("popup meta");

        assert_eq!(meta.collection, "posts");
        assert_eq!(meta.data_source_key, "main");
        assert_eq!(meta.filter_by_tk, Some(json!(111)));
        assert_eq!(
            meta.build_variables_params(),
            json!({
                "record": {
                    "collection": "posts",
                    "dataSourceKey": "main",
                    "filterByTk": 111,
                }
            })
        );
    }

    #[tokio::test]
    async fn test_anchor_beats_ambient_view() {
        let engine = engine_with_popup("popup-uid", "posts");
        engine
            .create_model(ModelSpec::new("PopupActionModel").with_uid("settings-uid").with_step_params(
                "popup",
                "openView",
                json!({"collectionName": "comments"}),
            ))
            .unwrap();

        let popup = Arc::new(View::new(ViewType::Modal, json!({})));
        popup
            .navigation()
            .push(ViewStackEntry::new("popup-uid").with_filter_by_tk(json!(111)));
        let settings_drawer = Arc::new(View::new(ViewType::Drawer, json!({})));
        settings_drawer
            .navigation()
            .push(ViewStackEntry::new("settings-uid"));

        // The drawer is the ambient view now, but the factory was anchored
        // on the popup and keeps describing the popup's record.
        let ctx = engine.root_context().child();
        ctx.define_service("view", settings_drawer).unwrap();

        let meta = create_popup_meta(ctx, popup).build().await.unwrap().expect("popup meta");
        assert_eq!(meta.collection, "posts");
        assert_eq!(meta.filter_by_tk, Some(json!(111)));
    }

    #[tokio::test]
    async fn test_property_tree_is_lazy() {
        let engine = engine_with_popup("popup-uid", "posts");
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let ctx = engine.root_context().child();
        ctx.define_collections(provider.clone()).unwrap();

        let anchor = Arc::new(View::new(ViewType::Modal, json!({})));
        anchor.navigation().push(ViewStackEntry::new("popup-uid"));

        let meta = create_popup_meta(ctx, anchor).build().await.unwrap().expect("popup meta");
        let record = meta.properties.get("record").expect("record node");

        assert_eq!(record.title, "Current popup record");
        assert!(record.has_children);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

        let fields = record.expand().await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fields[0].name, "posts_title");
    }

    #[tokio::test]
    async fn test_localized_title_via_context_method() {
        use crate::domain::context::method_fn;

        let engine = engine_with_popup("popup-uid", "posts");
        let ctx = engine.root_context().child();
        ctx.define_method(
            "t",
            method_fn(|_args| Box::pin(async move { Ok(Some(json!("Aktueller Popup-Datensatz"))) })),
        )
        .unwrap();

        let anchor = Arc::new(View::new(ViewType::Modal, json!({})));
        anchor.navigation().push(ViewStackEntry::new("popup-uid"));

        let meta = create_popup_meta(ctx, anchor).build().await.unwrap().expect("popup meta");
        assert_eq!(
            meta.properties.get("record").unwrap().title,
            "Aktueller Popup-Datensatz"
        );
    }

    #[tokio::test]
    async fn test_missing_collection_name_yields_none() {
        let engine = FlowEngine::new();
        engine.register_model(ModelClass::new("PopupActionModel"));
        engine
            .create_model(ModelSpec::new("PopupActionModel").with_uid("popup-uid").with_step_params(
                "popup",
                "openView",
                json!({"dataSourceKey": "main"}),
            ))
            .unwrap();

        let anchor = Arc::new(View::new(ViewType::Modal, json!({})));
        anchor.navigation().push(ViewStackEntry::new("popup-uid"));

        let meta = create_popup_meta(engine.root_context(), anchor)
            .build()
            .await
            .unwrap();
        assert!(meta.is_none());
    }
}
