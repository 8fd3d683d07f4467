//! Views and the navigation stack.
//!
//! A view is a presentation surface (modal, dialog, drawer, embed) with a
//! navigation stack of entries recording the popups opened within it. The
//! stack is ordered; entries are pushed when a popup/embed view opens,
//! immutable once pushed, and removed only by an explicit pop or close.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// Kind of presentation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewType {
    /// Full modal view
    Modal,
    /// Dialog box
    Dialog,
    /// Side drawer
    Drawer,
    /// Embedded popup
    Embed,
}

/// One entry in a view's navigation stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewStackEntry {
    /// Uid of the model registered for the opened view
    #[serde(rename = "viewUid")]
    pub view_uid: String,

    /// Primary-key filter of the record the popup was opened on
    #[serde(rename = "filterByTk", skip_serializing_if = "Option::is_none")]
    pub filter_by_tk: Option<Value>,

    /// Id of the source record for association popups
    #[serde(rename = "sourceId", skip_serializing_if = "Option::is_none")]
    pub source_id: Option<Value>,
}

impl ViewStackEntry {
    /// Create an entry for the view model `view_uid`.
    pub fn new(view_uid: impl Into<String>) -> Self {
        Self {
            view_uid: view_uid.into(),
            filter_by_tk: None,
            source_id: None,
        }
    }

    /// Attach a primary-key filter.
    pub fn with_filter_by_tk(mut self, tk: Value) -> Self {
        self.filter_by_tk = Some(tk);
        self
    }

    /// Attach a source record id.
    pub fn with_source_id(mut self, source_id: Value) -> Self {
        self.source_id = Some(source_id);
        self
    }
}

/// Ordered navigation history of nested popup/modal entries.
#[derive(Debug, Default)]
pub struct Navigation {
    stack: RwLock<Vec<ViewStackEntry>>,
}

impl Navigation {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an entry; called when a popup/embed view opens.
    pub fn push(&self, entry: ViewStackEntry) {
        self.stack.write().expect("view stack poisoned").push(entry);
    }

    /// Pop the topmost entry; called on close.
    pub fn pop(&self) -> Option<ViewStackEntry> {
        self.stack.write().expect("view stack poisoned").pop()
    }

    /// The topmost entry, if any.
    pub fn top(&self) -> Option<ViewStackEntry> {
        self.stack
            .read()
            .expect("view stack poisoned")
            .last()
            .cloned()
    }

    /// Snapshot of the whole stack, bottom first.
    pub fn entries(&self) -> Vec<ViewStackEntry> {
        self.stack.read().expect("view stack poisoned").clone()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.stack.read().expect("view stack poisoned").len()
    }

    /// Whether the stack is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A live view instance.
#[derive(Debug)]
pub struct View {
    view_type: ViewType,
    input_args: RwLock<Value>,
    navigation: Navigation,
    closed: AtomicBool,
}

impl View {
    /// Create an open view with the given input arguments.
    pub fn new(view_type: ViewType, input_args: Value) -> Self {
        Self {
            view_type,
            input_args: RwLock::new(input_args),
            navigation: Navigation::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Kind of surface this view renders as.
    pub fn view_type(&self) -> ViewType {
        self.view_type
    }

    /// Current input arguments.
    pub fn input_args(&self) -> Value {
        self.input_args.read().expect("view args poisoned").clone()
    }

    /// Replace the input arguments; no-op once the view is closed.
    pub fn update(&self, input_args: Value) {
        if self.is_closed() {
            return;
        }
        *self.input_args.write().expect("view args poisoned") = input_args;
    }

    /// The view's own navigation stack.
    pub fn navigation(&self) -> &Navigation {
        &self.navigation
    }

    /// Close the view, popping its topmost stack entry.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.navigation.pop();
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
