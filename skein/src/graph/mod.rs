//! Graph construction: the fluent builder, node options, and compilation.

pub mod builder;
pub mod compile;
pub mod options;

pub use builder::Graph;
pub use options::{CallOptions, CompileOptions, NodeOptions};
