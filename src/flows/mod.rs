//! Execution engine interface and the in-process engine.

pub mod engine;
pub mod registry;
pub mod tasks;
pub mod types;

pub use engine::LocalFlowEngine;
pub use registry::FlowRegistry;
pub use types::{FlowCompletion, FlowContext, FlowEngine, FlowTask, FlowTypeRegistry};
