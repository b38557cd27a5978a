//! jfb-lib: incremental build engine and dependency pipeline for C/C++ projects
//!
//! This crate provides the core of jfb:
//! - `Project`: the resolved project description, loaded from `jfb.toml` by `config`
//! - `graph`: source scanning into an acyclic file → header graph
//! - `stale` and `record`: staleness classification against the persisted build record
//! - `schedule` and `toolchain`: bounded parallel compile dispatch and tool invocation
//! - `deps`: git fetch, CMake build and the machine-global dependency cache
//! - `engine`: the orchestrator tying the above together

pub mod compile_commands;
pub mod config;
pub mod consts;
pub mod deps;
pub mod engine;
pub mod graph;
pub mod platform;
pub mod process;
pub mod project;
pub mod record;
pub mod report;
pub mod schedule;
pub mod splice;
pub mod stale;
pub mod toolchain;
pub mod util;
