use std::collections::HashSet;

use crate::core::RunContext;
use crate::engine::plan::compile;
use crate::engine::{Flow, Registry, Report, Task};
use crate::error::GraphError;

/// The blueprint of a build.
///
/// `Blueprint` is used to declare the task graph: tasks are registered one
/// by one or in batches, and watch patterns are bound to flows. Once
/// configured, [`Blueprint::finish`] validates the whole graph and turns it
/// into a [`Runner`].
///
/// # Example
///
/// ```rust,no_run
/// use assetline::{Blueprint, Env, Flow, Outcome, RunContext, Task};
///
/// # fn main() -> anyhow::Result<()> {
/// let mut blueprint = Blueprint::new();
/// blueprint
///     .register(Task::new("clean", |_| Ok(Outcome::default())))?
///     .register(Task::new("styles", |_| Ok(Outcome::default())).depends_on(["clean"]))?
///     .watch("styles/**/*.scss", Flow::task("styles"));
///
/// let runner = blueprint.finish()?;
/// let report = runner.run(&RunContext::new(Env::Dev), ["styles"])?;
/// assert!(report.is_success());
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct Blueprint {
    registry: Registry,
    watches: Vec<WatchBinding>,
}

/// A file pattern bound to the flow a change should trigger.
#[derive(Debug, Clone)]
pub struct WatchBinding {
    /// Glob pattern; relative patterns are resolved against the source root.
    pub pattern: String,
    pub flow: Flow,
}

impl Blueprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a single task. Every id the task refers to must already be
    /// registered.
    pub fn register(&mut self, task: Task) -> Result<&mut Self, GraphError> {
        self.register_batch([task])
    }

    /// Registers several tasks at once. Tasks of the batch may refer to each
    /// other. On error the blueprint is left unchanged.
    pub fn register_batch(
        &mut self,
        tasks: impl IntoIterator<Item = Task>,
    ) -> Result<&mut Self, GraphError> {
        let tasks: Vec<Task> = tasks.into_iter().collect();

        let mut batch = HashSet::new();
        for task in &tasks {
            if self.registry.contains(task.id()) || !batch.insert(task.id()) {
                return Err(GraphError::DuplicateTask(task.id().to_string()));
            }
        }

        for task in &tasks {
            for reference in task.references() {
                if !self.registry.contains(reference) && !batch.contains(reference) {
                    return Err(GraphError::UnknownDependency {
                        task: task.id().to_string(),
                        dependency: reference.to_string(),
                    });
                }
            }
        }

        for task in tasks {
            tracing::trace!(task = task.id(), "registered");
            self.registry.insert(task);
        }

        Ok(self)
    }

    /// Binds a file pattern to a flow. In watch mode a change to a matching
    /// file enqueues a run of the flow.
    pub fn watch(&mut self, pattern: impl Into<String>, flow: impl Into<Flow>) -> &mut Self {
        self.watches.push(WatchBinding {
            pattern: pattern.into(),
            flow: flow.into(),
        });
        self
    }

    /// Validates the graph and returns a runner. Fails on cycles and on
    /// watch bindings naming unknown tasks.
    pub fn finish(self) -> Result<Runner, GraphError> {
        let everything = Flow::Parallel(self.registry.iter().map(|t| Flow::task(t.id())).collect());
        compile(&self.registry, &everything)?;

        for binding in &self.watches {
            for id in binding.flow.ids() {
                if !self.registry.contains(id) {
                    return Err(GraphError::UnknownTask(id.to_string()));
                }
            }
        }

        tracing::debug!(tasks = self.registry.len(), watches = self.watches.len(), "graph ready");

        Ok(Runner {
            registry: self.registry,
            watches: self.watches,
        })
    }
}

/// A validated task graph, ready to run.
///
/// A [`Runner`] is created from a [`Blueprint`] and is the primary interface
/// for executing tasks.
pub struct Runner {
    registry: Registry,
    watches: Vec<WatchBinding>,
}

impl Runner {
    /// Runs the named tasks as a parallel group. Dependencies run first, and
    /// every task of the resolved plan runs at most once.
    pub fn run<I, S>(&self, ctx: &RunContext, ids: I) -> Result<Report, GraphError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let flow = Flow::parallel(ids.into_iter().map(|id| Flow::task(id.as_ref())));
        self.run_flow(ctx, &flow)
    }

    /// Runs an arbitrary composition of registered tasks.
    pub fn run_flow(&self, ctx: &RunContext, flow: &Flow) -> Result<Report, GraphError> {
        let plan = compile(&self.registry, flow)?;

        tracing::debug!(%flow, tasks = plan.len(), env = %ctx.env, "running");

        Ok(crate::engine::execute(&plan, ctx))
    }

    /// Registered tasks, in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.registry.iter()
    }

    pub fn watches(&self) -> &[WatchBinding] {
        &self.watches
    }

    /// Starts watch mode: every change to a file matching a binding pattern
    /// runs the bound flow, followed by a live-reload signal. With `serve`,
    /// the destination tree is also served over HTTP.
    ///
    /// This blocks for as long as the watcher is alive.
    #[cfg(feature = "live")]
    pub fn watch(&self, ctx: RunContext, serve: bool) -> Result<(), crate::AssetlineError> {
        crate::engine::watch(self, ctx, serve)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::pipeline::Outcome;

    fn counted(id: &str, counter: &Arc<AtomicUsize>) -> Task {
        let counter = counter.clone();
        Task::new(id, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Outcome::default())
        })
    }

    #[test]
    fn test_run_all_exactly_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut blueprint = Blueprint::new();
        blueprint
            .register_batch([
                counted("clean", &counter),
                counted("styles", &counter).depends_on(["clean", "sprite"]),
                counted("sprite", &counter).depends_on(["clean"]),
                counted("scripts", &counter).depends_on(["clean"]),
            ])
            .unwrap()
            .register(Task::flow("build", Flow::parallel(["styles", "scripts"])))
            .unwrap();

        let runner = blueprint.finish().unwrap();
        let ids: Vec<String> = runner.tasks().map(|t| t.id().to_string()).collect();
        let report = runner.run(&RunContext::default(), &ids).unwrap();

        assert!(report.is_success());
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(report.tasks().len(), 5);
    }

    #[test]
    fn test_duplicate_task() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut blueprint = Blueprint::new();
        blueprint.register(counted("a", &counter)).unwrap();

        assert_eq!(
            blueprint.register(counted("a", &counter)).err(),
            Some(GraphError::DuplicateTask("a".into()))
        );
        assert_eq!(
            blueprint
                .register_batch([counted("b", &counter), counted("b", &counter)])
                .err(),
            Some(GraphError::DuplicateTask("b".into()))
        );

        // The failed batch left nothing behind.
        let runner = blueprint.finish().unwrap();
        assert_eq!(runner.tasks().count(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_dependency() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut blueprint = Blueprint::new();

        let err = blueprint
            .register(counted("styles", &counter).depends_on(["sprite"]))
            .err();

        assert_eq!(
            err,
            Some(GraphError::UnknownDependency {
                task: "styles".into(),
                dependency: "sprite".into()
            })
        );
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cycle_runs_nothing() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut blueprint = Blueprint::new();
        blueprint
            .register_batch([
                counted("a", &counter).depends_on(["b"]),
                counted("b", &counter).depends_on(["a"]),
            ])
            .unwrap();

        assert!(matches!(
            blueprint.finish(),
            Err(GraphError::CyclicDependency(_))
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_watch_binding_unknown_task() {
        let mut blueprint = Blueprint::new();
        blueprint.watch("styles/**/*.scss", Flow::task("styles"));

        assert_eq!(
            blueprint.finish().err(),
            Some(GraphError::UnknownTask("styles".into()))
        );
    }

    #[test]
    fn test_run_unknown_task() {
        let runner = Blueprint::new().finish().unwrap();
        assert!(matches!(
            runner.run(&RunContext::default(), ["missing"]),
            Err(GraphError::UnknownTask(_))
        ));
    }
}
