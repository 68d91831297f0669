pub(crate) mod plan;
mod runner;

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::TaskContext;
use crate::core::ArcStr;
use crate::pipeline::Outcome;

pub use runner::{Report, TaskExecution, TaskReport, TaskStatus};

pub(crate) use runner::execute;
#[cfg(feature = "live")]
pub(crate) use runner::watch;

/// The unit of work of a task.
pub(crate) type Work = Arc<dyn Fn(&TaskContext<'_>) -> anyhow::Result<Outcome> + Send + Sync>;

/// How the members of a task body are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// One after the other, each step starting once the previous one is done.
    Sequential,
    /// All at once.
    Parallel,
}

impl Display for ExecMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecMode::Sequential => f.write_str("sequential"),
            ExecMode::Parallel => f.write_str("parallel"),
        }
    }
}

/// A composition of tasks.
///
/// ```rust
/// use assetline::Flow;
///
/// let build = Flow::series([
///     Flow::task("clean"),
///     Flow::parallel(["sprite", "iconfont"]),
///     Flow::task("styles"),
/// ]);
///
/// assert_eq!(build.ids(), vec!["clean", "sprite", "iconfont", "styles"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Task(String),
    Series(Vec<Flow>),
    Parallel(Vec<Flow>),
}

impl Flow {
    pub fn task(id: impl Into<String>) -> Self {
        Flow::Task(id.into())
    }

    pub fn series<I, F>(steps: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Flow>,
    {
        Flow::Series(steps.into_iter().map(Into::into).collect())
    }

    pub fn parallel<I, F>(members: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Flow>,
    {
        Flow::Parallel(members.into_iter().map(Into::into).collect())
    }

    /// The mode of the outermost composition.
    pub fn mode(&self) -> ExecMode {
        match self {
            Flow::Parallel(_) => ExecMode::Parallel,
            Flow::Task(_) | Flow::Series(_) => ExecMode::Sequential,
        }
    }

    /// Every task id referenced by this flow, in order of appearance.
    pub fn ids(&self) -> Vec<&str> {
        let mut acc = Vec::new();
        self.collect_ids(&mut acc);
        acc
    }

    fn collect_ids<'a>(&'a self, acc: &mut Vec<&'a str>) {
        match self {
            Flow::Task(id) => acc.push(id),
            Flow::Series(flows) | Flow::Parallel(flows) => {
                for flow in flows {
                    flow.collect_ids(acc);
                }
            }
        }
    }
}

impl From<&str> for Flow {
    fn from(id: &str) -> Self {
        Flow::Task(id.to_string())
    }
}

impl From<String> for Flow {
    fn from(id: String) -> Self {
        Flow::Task(id)
    }
}

impl Display for Flow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let (name, flows) = match self {
            Flow::Task(id) => return f.write_str(id),
            Flow::Series(flows) => ("series", flows),
            Flow::Parallel(flows) => ("parallel", flows),
        };

        write!(f, "{name}(")?;
        for (i, flow) in flows.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{flow}")?;
        }
        f.write_str(")")
    }
}

#[derive(Clone)]
pub(crate) enum Body {
    Work(Work),
    Flow(Flow),
}

/// A named node of the task graph.
///
/// A task either does some work itself or composes other tasks with a
/// [`Flow`]. Either way it can declare dependencies, which complete before
/// the task starts.
#[derive(Clone)]
pub struct Task {
    pub(crate) id: ArcStr,
    pub(crate) dependencies: Vec<ArcStr>,
    pub(crate) body: Body,
}

impl Task {
    /// A task running a closure.
    pub fn new<F>(id: impl AsRef<str>, work: F) -> Self
    where
        F: Fn(&TaskContext<'_>) -> anyhow::Result<Outcome> + Send + Sync + 'static,
    {
        Self {
            id: id.as_ref().into(),
            dependencies: Vec::new(),
            body: Body::Work(Arc::new(work)),
        }
    }

    /// A task composing other tasks.
    pub fn flow(id: impl AsRef<str>, flow: Flow) -> Self {
        Self {
            id: id.as_ref().into(),
            dependencies: Vec::new(),
            body: Body::Flow(flow),
        }
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(|dep| ArcStr::from(dep.as_ref())));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(AsRef::as_ref)
    }

    /// The composition of the body, if this task is a composition.
    pub fn body(&self) -> Option<&Flow> {
        match &self.body {
            Body::Flow(flow) => Some(flow),
            Body::Work(_) => None,
        }
    }

    pub fn mode(&self) -> ExecMode {
        match &self.body {
            Body::Work(_) => ExecMode::Sequential,
            Body::Flow(flow) => flow.mode(),
        }
    }

    /// Every id this task refers to: its dependencies and its body members.
    pub(crate) fn references(&self) -> impl Iterator<Item = &str> {
        let members = self.body().map(Flow::ids).unwrap_or_default();
        self.dependencies().chain(members)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("body", &self.body().map(ToString::to_string))
            .finish()
    }
}

/// Registered tasks, in registration order.
#[derive(Clone, Default)]
pub(crate) struct Registry {
    tasks: Vec<Task>,
    index: HashMap<ArcStr, usize>,
}

impl Registry {
    pub(crate) fn get(&self, id: &str) -> Option<&Task> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub(crate) fn insert(&mut self, task: Task) {
        self.index.insert(task.id.clone(), self.tasks.len());
        self.tasks.push(task);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }
}
