use std::process::ExitStatus;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Graph construction and resolution failures. These are fatal and are
/// always reported before any task runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("Task '{0}' is not registered")]
    UnknownTask(String),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Cyclic dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("Task '{task}' is repeated in series '{flow}'")]
    RepeatedStep { task: String, flow: String },
}

/// A delegated compiler, packer or encoder reported a failure.
#[derive(Debug, Error)]
pub enum ExternalToolError {
    #[error("Couldn't start '{tool}': {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while talking to '{tool}': {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{tool}' exited with {status}:\n{stderr}")]
    Failed {
        tool: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// A single file failed a single transform step.
#[derive(Debug, Error)]
#[error("[{step}] {path}: {source}")]
pub struct TransformError {
    /// The source file the failing record originated from.
    pub path: Utf8PathBuf,
    /// Name of the failing step.
    pub step: String,
    #[source]
    pub source: anyhow::Error,
}

impl TransformError {
    pub fn new(path: impl Into<Utf8PathBuf>, step: impl Into<String>, err: impl Into<anyhow::Error>) -> Self {
        Self {
            path: path.into(),
            step: step.into(),
            source: err.into(),
        }
    }
}

/// Errors that can occur when resolving a file set.
#[derive(Debug, Error)]
pub enum FileSetError {
    #[error("Couldn't compile glob pattern.\n{0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised while writing artifacts to a destination tree.
#[derive(Debug, Error)]
#[error("Couldn't write '{path}': {source}")]
pub struct WriteError {
    pub path: Utf8PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Error)]
pub enum ClearError {
    #[error("Couldn't remove '{0}': {1}")]
    Remove(Utf8PathBuf, std::io::Error),
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error("Couldn't resolve watch path '{0}'")]
    Resolve(String),
}

/// Top-level error returned by the runner entry points.
#[derive(Debug, Error)]
pub enum AssetlineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("{0} task(s) failed, first: '{1}'")]
    Failed(usize, String),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message() {
        let err = GraphError::CyclicDependency(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Cyclic dependency: a -> b -> a");
    }

    #[test]
    fn test_transform_error_context() {
        let err = TransformError::new("app/styles/style.scss", "sass", anyhow::anyhow!("expected \";\""));
        let msg = err.to_string();
        assert!(msg.contains("app/styles/style.scss"));
        assert!(msg.contains("sass"));
        assert!(msg.contains("expected"));
    }
}
