pub mod builtin;
pub mod executor;
pub mod registry;
pub mod validate;

pub use executor::{ExecutionOutcome, ToolExecutor};
pub use registry::ToolRegistry;
