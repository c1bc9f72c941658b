//! kiln-lib: a rule-based, multi-language build-graph engine.
//!
//! The crate is organized leaves first:
//! - `toolchain`: (language, triple) → compiler metadata
//! - `graph`: validated, immutable target DAG
//! - `plan`: expansion of targets into toolchain actions (including schema fanout)
//! - `store`: content-addressed artifact cache
//! - `execute`: dependency-ordered, bounded-concurrency action execution
//! - `engine`: the `build` / `test` entry points used by outside automation
//! - `workspace`: `kiln.toml` loading

pub mod build_lock;
pub mod consts;
pub mod engine;
pub mod execute;
pub mod graph;
pub mod plan;
pub mod platform;
pub mod store;
pub mod toolchain;
pub mod util;
pub mod workspace;

pub use engine::{BuildReport, BuildStatus, Engine, TestReport};
pub use graph::{BuildGraph, GraphError};
pub use toolchain::{Toolchain, ToolchainRegistry};
pub use workspace::Workspace;
