//! simba-lib: build-description-to-build-graph engine
//!
//! Recipes declare typed targets on a [`Registry`], referencing each other
//! freely, even before definition. The crate provides:
//! - `registry`: declaration, forward references and finalize-time validation
//! - `environment`: variable, include and link-generator inheritance
//! - `dispatch`: generator selection and command template rendering
//! - `graph`: the acyclic dependency graph and its stable order
//! - `execute`: the concurrent engine driving builder and finder hooks
//! - `builtin`: default recipes, a `PATH` finder and a shell-command builder

pub mod builtin;
pub mod discover;
pub mod dispatch;
pub mod environment;
pub mod execute;
pub mod graph;
pub mod hooks;
pub mod registry;
pub mod target;

pub use execute::{BuildReport, Engine, EngineConfig, ExecuteError, TargetState, run};
pub use graph::{Graph, build_graph, load_complete};
pub use registry::{ConfigError, Registry};
pub use target::{TargetId, TargetKind};
