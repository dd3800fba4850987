//! Core types: tracing setup and the Workspace scope registry

pub mod scopes;
pub mod tracing;

pub use scopes::{ScopeError, ScopeRegistry, BASE_SCOPES};
pub use tracing::{init_tracing, TracingConfig, TracingError, TracingOutputFormat};
