//! Hierarchical context frames.
//!
//! A `Context` is a key/binding store with an explicit parent pointer: a
//! lookup that misses locally is retried on the parent, recursively to the
//! root. A name is defined at most once per frame; a child may define the
//! same name again to shadow the parent without mutating it. Frames carry
//! the ambient collaborators (engine, form, view, translation method,
//! metadata providers) injected by surrounding infrastructure.

use crate::domain::bindings::{CollectionProvider, FormBinding};
use crate::error::EngineError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// An async callable bound into a context frame.
///
/// Methods are looked up through the same fallback chain as properties.
/// `Ok(None)` means the method declined to produce a value (callers fall
/// back), which is distinct from an error.
#[async_trait]
pub trait ContextMethod: Send + Sync {
    /// Invoke the method with a JSON argument payload.
    async fn call(&self, args: Value) -> Result<Option<Value>, EngineError>;
}

/// Adapter turning a closure returning a boxed future into a [`ContextMethod`].
pub struct FnMethod<F>(pub F);

#[async_trait]
impl<F> ContextMethod for FnMethod<F>
where
    F: Fn(Value) -> BoxFuture<'static, Result<Option<Value>, EngineError>> + Send + Sync,
{
    async fn call(&self, args: Value) -> Result<Option<Value>, EngineError> {
        (self.0)(args).await
    }
}

/// Convenience constructor for closure-backed context methods.
pub fn method_fn<F>(f: F) -> Arc<dyn ContextMethod>
where
    F: Fn(Value) -> BoxFuture<'static, Result<Option<Value>, EngineError>> + Send + Sync + 'static,
{
    Arc::new(FnMethod(f))
}

/// A single binding held by a context frame.
pub enum ContextBinding {
    /// A static JSON value
    Value(Value),
    /// A lazily computed JSON value
    Getter(Arc<dyn Fn() -> Value + Send + Sync>),
    /// A type-erased shared collaborator (form binding, view, engine, ...)
    Service(Arc<dyn Any + Send + Sync>),
    /// An async callable
    Method(Arc<dyn ContextMethod>),
}

impl Clone for ContextBinding {
    fn clone(&self) -> Self {
        match self {
            ContextBinding::Value(v) => ContextBinding::Value(v.clone()),
            ContextBinding::Getter(f) => ContextBinding::Getter(f.clone()),
            ContextBinding::Service(s) => ContextBinding::Service(s.clone()),
            ContextBinding::Method(m) => ContextBinding::Method(m.clone()),
        }
    }
}

impl fmt::Debug for ContextBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextBinding::Value(v) => f.debug_tuple("Value").field(v).finish(),
            ContextBinding::Getter(_) => f.write_str("Getter(..)"),
            ContextBinding::Service(_) => f.write_str("Service(..)"),
            ContextBinding::Method(_) => f.write_str("Method(..)"),
        }
    }
}

/// A frame in the context chain.
pub struct Context {
    parent: Option<Arc<Context>>,
    bindings: RwLock<HashMap<String, ContextBinding>>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .bindings
            .read()
            .expect("context frame poisoned")
            .keys()
            .cloned()
            .collect();
        f.debug_struct("Context")
            .field("bindings", &names)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

impl Context {
    /// Create a root frame with no parent.
    pub fn root() -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            bindings: RwLock::new(HashMap::new()),
        })
    }

    /// Create a child frame whose lookups fall back to `self`.
    ///
    /// The parent pointer is fixed at creation.
    pub fn child(self: &Arc<Self>) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(self.clone()),
            bindings: RwLock::new(HashMap::new()),
        })
    }

    fn define(&self, name: &str, binding: ContextBinding) -> Result<(), EngineError> {
        let mut bindings = self.bindings.write().expect("context frame poisoned");
        if bindings.contains_key(name) {
            return Err(EngineError::DuplicateBinding(name.to_string()));
        }
        bindings.insert(name.to_string(), binding);
        Ok(())
    }

    /// Bind a static JSON value at this frame.
    pub fn define_value(&self, name: &str, value: Value) -> Result<(), EngineError> {
        self.define(name, ContextBinding::Value(value))
    }

    /// Bind a lazily computed value at this frame.
    pub fn define_getter<F>(&self, name: &str, getter: F) -> Result<(), EngineError>
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.define(name, ContextBinding::Getter(Arc::new(getter)))
    }

    /// Bind a type-erased shared collaborator at this frame.
    pub fn define_service(
        &self,
        name: &str,
        service: Arc<dyn Any + Send + Sync>,
    ) -> Result<(), EngineError> {
        self.define(name, ContextBinding::Service(service))
    }

    /// Bind an async callable at this frame.
    pub fn define_method(
        &self,
        name: &str,
        method: Arc<dyn ContextMethod>,
    ) -> Result<(), EngineError> {
        self.define(name, ContextBinding::Method(method))
    }

    /// Whether this frame itself defines `name` (ignores the parent chain).
    pub fn has_local(&self, name: &str) -> bool {
        self.bindings
            .read()
            .expect("context frame poisoned")
            .contains_key(name)
    }

    /// Resolve `name` from this frame toward the root; the first frame
    /// defining it wins. Lookup never mutates ancestor frames.
    pub fn lookup(&self, name: &str) -> Option<ContextBinding> {
        if let Some(binding) = self
            .bindings
            .read()
            .expect("context frame poisoned")
            .get(name)
        {
            return Some(binding.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.lookup(name))
    }

    /// Resolve `name` to a JSON value (static values and getters only).
    pub fn value_of(&self, name: &str) -> Option<Value> {
        match self.lookup(name)? {
            ContextBinding::Value(v) => Some(v),
            ContextBinding::Getter(f) => Some(f()),
            _ => None,
        }
    }

    /// Resolve `name` to a typed shared collaborator.
    pub fn service<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        match self.lookup(name)? {
            ContextBinding::Service(s) => s.downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Resolve `name` to a callable.
    pub fn method(&self, name: &str) -> Option<Arc<dyn ContextMethod>> {
        match self.lookup(name)? {
            ContextBinding::Method(m) => Some(m),
            _ => None,
        }
    }

    /// Invoke the method bound under `name`, if any.
    ///
    /// An unbound name resolves to `Ok(None)` so callers can fall back,
    /// matching the resolution-miss policy.
    pub async fn call_method(&self, name: &str, args: Value) -> Result<Option<Value>, EngineError> {
        match self.method(name) {
            Some(method) => method.call(args).await,
            None => Ok(None),
        }
    }

    /// Bind the externally-owned form at this frame under `form`.
    pub fn define_form(&self, form: Arc<dyn FormBinding>) -> Result<(), EngineError> {
        self.define_service("form", Arc::new(form))
    }

    /// Resolve the ambient form binding, if one was injected.
    pub fn form(&self) -> Option<Arc<dyn FormBinding>> {
        self.service::<Arc<dyn FormBinding>>("form")
            .map(|form| (*form).clone())
    }

    /// Bind the collection metadata provider at this frame under
    /// `dataSourceManager`.
    pub fn define_collections(
        &self,
        provider: Arc<dyn CollectionProvider>,
    ) -> Result<(), EngineError> {
        self.define_service("dataSourceManager", Arc::new(provider))
    }

    /// Resolve the ambient collection metadata provider, if any.
    pub fn collections(&self) -> Option<Arc<dyn CollectionProvider>> {
        self.service::<Arc<dyn CollectionProvider>>("dataSourceManager")
            .map(|provider| (*provider).clone())
    }
}
