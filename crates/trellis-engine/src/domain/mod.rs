//! Domain layer - core business models, entities, and rules

/// Contracts for external collaborators (forms, collection metadata)
pub mod bindings;

/// Hierarchical context frames with parent fallback
pub mod context;

/// Flow and step definitions
pub mod flow;

/// Model instances and the ownership tree
pub mod model;

/// Persistence of the durable model surface
pub mod repository;

/// Views and the navigation stack
pub mod view;
