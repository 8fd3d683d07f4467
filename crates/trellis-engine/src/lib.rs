//! Trellis engine - the model and flow execution runtime behind a
//! declarative UI builder.
//!
//! A page is a tree of [`FlowModel`] instances. Behavior lives in
//! [`FlowDefinition`]s attached to model classes: ordered async steps
//! that run against a model when configuration changes, when a manual
//! flow is invoked, or when an external action completes. Each model
//! carries a hierarchical [`Context`] used for dependency lookup and
//! `{{...}}` template resolution.
//!
//! ```
//! use serde_json::json;
//! use trellis_engine::{FlowDefinition, FlowEngine, ModelClass, ModelSpec, step_fn};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), trellis_engine::EngineError> {
//! let engine = FlowEngine::new();
//! engine.register_model(ModelClass::new("InputFieldModel"));
//! engine.register_flow(
//!     "InputFieldModel",
//!     FlowDefinition::new("setup").step(
//!         "title",
//!         step_fn(|ctx| {
//!             Box::pin(async move {
//!                 if let Some(title) = ctx.params.get("title") {
//!                     ctx.model.set_prop("title", title.clone());
//!                 }
//!                 Ok(())
//!             })
//!         }),
//!     ),
//! )?;
//!
//! let field = engine.create_model(ModelSpec::new("InputFieldModel"))?;
//! field
//!     .set_step_params("setup", "title", json!({"title": "Nickname"}))
//!     .await?;
//! assert_eq!(field.prop("title"), Some(json!("Nickname")));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Application services: engine, variables, backfill, popup metadata
pub mod application;

/// Domain model: contexts, models, flows, views, persistence
pub mod domain;

/// Error types
pub mod error;

/// Shared value types
pub mod types;

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

pub use application::backfill::{apply_default, BackfillOutcome, DefaultValueStep};
pub use application::engine::{
    DispatchedEvent, EngineHandle, FlowEngine, ModelClass, ModelSpec, SubModelSpec,
};
pub use application::popup_meta::{create_popup_meta, PopupMeta, PopupMetaFactory, PropertyNode};
pub use application::variables::{is_template, resolve_path, resolve_template, template_path};
pub use domain::bindings::{CollectionProvider, FieldMeta, FormBinding};
pub use domain::context::{method_fn, Context, ContextBinding, ContextMethod};
pub use domain::flow::{FlowDefinition, StepDefinition};
pub use domain::model::{FlowModel, SubModelSlot};
pub use domain::repository::{InMemoryModelRepository, ModelRepository, ModelSnapshot, SubModelSnapshot};
pub use domain::view::{Navigation, View, ViewStackEntry, ViewType};
pub use error::EngineError;
pub use types::StepParams;

/// Everything a step handler sees for one step execution.
#[derive(Clone)]
pub struct StepContext {
    /// The model the flow runs against
    pub model: Arc<FlowModel>,

    /// The engine that scheduled the execution
    pub engine: FlowEngine,

    /// Effective params: declared defaults overlaid with persisted and
    /// invocation-time params
    pub params: StepParams,

    /// The triggering event, for event-bound flows only
    pub event: Option<DispatchedEvent>,
}

impl StepContext {
    /// The model's context frame.
    pub fn context(&self) -> Arc<Context> {
        self.model.context()
    }
}

/// Handler for one step of a flow.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Run the step. Errors abort the remaining steps of the flow.
    async fn handle(&self, ctx: StepContext) -> Result<(), EngineError>;
}

/// Adapter turning an async closure into a [`StepHandler`].
pub struct FnStep<F>(pub F);

#[async_trait]
impl<F> StepHandler for FnStep<F>
where
    F: Fn(StepContext) -> BoxFuture<'static, Result<(), EngineError>> + Send + Sync,
{
    async fn handle(&self, ctx: StepContext) -> Result<(), EngineError> {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a shareable step handler.
pub fn step_fn<F>(f: F) -> Arc<dyn StepHandler>
where
    F: Fn(StepContext) -> BoxFuture<'static, Result<(), EngineError>> + Send + Sync + 'static,
{
    Arc::new(FnStep(f))
}
