//! Schema-validated tools and the per-chain tool registry.

mod entity;
mod registry;

pub use entity::{ParameterSpec, ParameterType, Tool, ToolHandler, ToolParameters};
pub use registry::ToolRegistry;
