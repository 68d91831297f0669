#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod asset;
mod blueprint;
mod core;
mod engine;
mod error;
mod fileset;
mod io;
mod pipeline;

#[cfg(feature = "cli")]
pub mod cli;
#[cfg(feature = "logging")]
pub mod logging;
pub mod plugin;
pub mod preset;
pub mod transform;

pub use crate::asset::{Asset, Dest, SourceMap};
pub use crate::blueprint::{Blueprint, Runner, WatchBinding};
pub use crate::core::{Env, ErrorPolicy, RunContext, TaskContext};
pub use crate::engine::{ExecMode, Flow, Report, Task, TaskExecution, TaskReport, TaskStatus};
pub use crate::error::*;
pub use crate::fileset::{Entry, FileSet};
pub use crate::pipeline::{BuiltChain, Bundle, Chain, Outcome, Step, Transform};
