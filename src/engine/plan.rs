//! Compiles a requested [`Flow`] into an execution plan.
//!
//! The plan is a directed acyclic graph with one node per task reachable from
//! the request. An edge `a -> b` means `b` can't start before `a` completed.
//! Edges come from two sources:
//!
//! * declared dependencies, pointing from the dependency to the dependent;
//! * sequential composition, pointing from the tails of step N to the heads
//!   of step N+1.
//!
//! A task whose body is a composition is expanded in place. Its members form
//! the heads of the task, and an extra join node completes when every member
//! tail completed. Each task id maps to exactly one node, so a task referenced
//! from several places in one plan still runs once.

use std::collections::{HashMap, HashSet};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::core::ArcStr;
use crate::engine::{Body, Flow, Registry, Work};
use crate::error::GraphError;

pub(crate) enum Node {
    /// A task doing work.
    Work { id: ArcStr, work: Work },
    /// Completion of a composed task.
    Join { id: ArcStr },
}

impl Node {
    pub(crate) fn id(&self) -> &str {
        match self {
            Node::Work { id, .. } | Node::Join { id } => id,
        }
    }
}

pub(crate) struct Plan {
    pub(crate) graph: DiGraph<Node, ()>,
}

impl Plan {
    pub(crate) fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Task ids in a valid execution order.
    #[cfg(test)]
    pub(crate) fn order(&self) -> Vec<&str> {
        toposort(&self.graph, None)
            .unwrap_or_default()
            .into_iter()
            .map(|i| self.graph[i].id())
            .collect()
    }
}

#[derive(Clone)]
struct Span {
    heads: Vec<NodeIndex>,
    exit: NodeIndex,
}

enum Mark {
    Visiting,
    Done(Span),
}

struct Compiler<'a> {
    registry: &'a Registry,
    graph: DiGraph<Node, ()>,
    marks: HashMap<ArcStr, Mark>,
    stack: Vec<ArcStr>,
}

pub(crate) fn compile(registry: &Registry, flow: &Flow) -> Result<Plan, GraphError> {
    let mut compiler = Compiler {
        registry,
        graph: DiGraph::new(),
        marks: HashMap::new(),
        stack: Vec::new(),
    };

    compiler.expand(flow)?;

    let graph = compiler.graph;

    // Ordering edges can close a cycle that the traversal alone can't see,
    // e.g. `series(a, b)` where `a` depends on `b`.
    if let Err(cycle) = toposort(&graph, None) {
        let node = cycle.node_id();
        let mut names: Vec<String> = tarjan_scc(&graph)
            .into_iter()
            .find(|scc| scc.contains(&node))
            .unwrap_or_else(|| vec![node])
            .into_iter()
            .rev()
            .map(|i| graph[i].id().to_string())
            .collect();

        if let Some(first) = names.first().cloned() {
            names.push(first);
        }

        return Err(GraphError::CyclicDependency(names));
    }

    Ok(Plan { graph })
}

impl Compiler<'_> {
    fn link(&mut self, from: NodeIndex, to: NodeIndex) {
        if from != to {
            self.graph.update_edge(from, to, ());
        }
    }

    /// Returns the heads and the tails of a composition.
    fn expand(&mut self, flow: &Flow) -> Result<(Vec<NodeIndex>, Vec<NodeIndex>), GraphError> {
        match flow {
            Flow::Task(id) => {
                let span = self.visit(id)?;
                Ok((span.heads, vec![span.exit]))
            }
            Flow::Series(steps) => {
                let mut heads = None;
                let mut tails: Vec<NodeIndex> = Vec::new();
                let mut seen = HashSet::new();

                for step in steps {
                    let ids: HashSet<&str> = step.ids().into_iter().collect();
                    if let Some(task) = ids.iter().find(|id| seen.contains(*id)) {
                        return Err(GraphError::RepeatedStep {
                            task: task.to_string(),
                            flow: flow.to_string(),
                        });
                    }
                    seen.extend(ids);

                    let (step_heads, step_tails) = self.expand(step)?;
                    if step_tails.is_empty() {
                        continue;
                    }

                    for &tail in &tails {
                        for &head in &step_heads {
                            self.link(tail, head);
                        }
                    }

                    heads.get_or_insert(step_heads);
                    tails = step_tails;
                }

                Ok((heads.unwrap_or_default(), tails))
            }
            Flow::Parallel(members) => {
                let mut heads = Vec::new();
                let mut tails = Vec::new();

                for member in members {
                    let (member_heads, member_tails) = self.expand(member)?;
                    extend_unique(&mut heads, member_heads);
                    extend_unique(&mut tails, member_tails);
                }

                Ok((heads, tails))
            }
        }
    }

    fn visit(&mut self, id: &str) -> Result<Span, GraphError> {
        match self.marks.get(id) {
            Some(Mark::Done(span)) => return Ok(span.clone()),
            Some(Mark::Visiting) => {
                let start = self.stack.iter().position(|s| &**s == id).unwrap_or(0);
                let mut cycle: Vec<String> =
                    self.stack[start..].iter().map(ToString::to_string).collect();
                cycle.push(id.to_string());
                return Err(GraphError::CyclicDependency(cycle));
            }
            None => {}
        }

        let registry = self.registry;
        let task = registry
            .get(id)
            .ok_or_else(|| GraphError::UnknownTask(id.to_string()))?;

        self.marks.insert(task.id.clone(), Mark::Visiting);
        self.stack.push(task.id.clone());

        let mut dependencies = Vec::with_capacity(task.dependencies.len());
        for dependency in &task.dependencies {
            if !registry.contains(dependency) {
                return Err(GraphError::UnknownDependency {
                    task: id.to_string(),
                    dependency: dependency.to_string(),
                });
            }
            dependencies.push(self.visit(dependency)?.exit);
        }

        let span = match &task.body {
            Body::Work(work) => {
                let node = self.graph.add_node(Node::Work {
                    id: task.id.clone(),
                    work: work.clone(),
                });
                Span {
                    heads: vec![node],
                    exit: node,
                }
            }
            Body::Flow(flow) => {
                let (heads, tails) = self.expand(flow)?;
                let exit = self.graph.add_node(Node::Join { id: task.id.clone() });
                for tail in tails {
                    self.link(tail, exit);
                }
                Span {
                    heads: if heads.is_empty() { vec![exit] } else { heads },
                    exit,
                }
            }
        };

        for dependency in dependencies {
            for &head in &span.heads {
                self.link(dependency, head);
            }
        }

        self.stack.pop();
        self.marks.insert(task.id.clone(), Mark::Done(span.clone()));

        Ok(span)
    }
}

fn extend_unique(acc: &mut Vec<NodeIndex>, items: Vec<NodeIndex>) {
    for item in items {
        if !acc.contains(&item) {
            acc.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Task;
    use crate::pipeline::Outcome;

    fn noop(id: &str) -> Task {
        Task::new(id, |_| Ok(Outcome::default()))
    }

    fn registry(tasks: impl IntoIterator<Item = Task>) -> Registry {
        let mut registry = Registry::default();
        for task in tasks {
            registry.insert(task);
        }
        registry
    }

    fn position(order: &[&str], id: &str) -> usize {
        order.iter().position(|x| *x == id).unwrap()
    }

    #[test]
    fn test_dependencies_come_first() {
        let registry = registry([
            noop("a"),
            noop("b").depends_on(["a"]),
            noop("c").depends_on(["a", "b"]),
        ]);

        let plan = compile(&registry, &Flow::task("c")).unwrap();
        let order = plan.order();

        assert_eq!(plan.len(), 3);
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_shared_task_gets_one_node() {
        let registry = registry([
            noop("clean"),
            noop("styles").depends_on(["clean"]),
            noop("scripts").depends_on(["clean"]),
        ]);

        let plan = compile(&registry, &Flow::parallel(["styles", "scripts", "clean"])).unwrap();
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_series_orders_steps() {
        let registry = registry([
            noop("clean"),
            noop("sprite"),
            noop("iconfont"),
            noop("styles"),
            Task::flow(
                "build",
                Flow::series([
                    Flow::task("clean"),
                    Flow::parallel(["sprite", "iconfont"]),
                    Flow::task("styles"),
                ]),
            ),
        ]);

        let plan = compile(&registry, &Flow::task("build")).unwrap();
        let order = plan.order();

        // four work nodes and one join
        assert_eq!(plan.len(), 5);
        assert!(position(&order, "clean") < position(&order, "sprite"));
        assert!(position(&order, "clean") < position(&order, "iconfont"));
        assert!(position(&order, "iconfont") < position(&order, "styles"));
        assert!(position(&order, "sprite") < position(&order, "styles"));
        assert_eq!(order.last(), Some(&"build"));
    }

    #[test]
    fn test_dependency_cycle() {
        let registry = registry([noop("a").depends_on(["b"]), noop("b").depends_on(["a"])]);

        let err = compile(&registry, &Flow::task("a")).err().unwrap();
        assert_eq!(
            err,
            GraphError::CyclicDependency(vec!["a".into(), "b".into(), "a".into()])
        );
    }

    #[test]
    fn test_flow_body_cycle() {
        let registry = registry([Task::flow("loop", Flow::series(["loop"]))]);

        assert!(matches!(
            compile(&registry, &Flow::task("loop")),
            Err(GraphError::CyclicDependency(_))
        ));
    }

    #[test]
    fn test_ordering_cycle() {
        // `a` must run after `b`, yet the series puts `a` first.
        let registry = registry([noop("a").depends_on(["b"]), noop("b")]);

        let err = compile(&registry, &Flow::series(["a", "b"])).err().unwrap();
        let GraphError::CyclicDependency(cycle) = err else {
            panic!("expected a cycle");
        };
        assert!(cycle.contains(&"a".to_string()));
        assert!(cycle.contains(&"b".to_string()));
    }

    #[test]
    fn test_repeated_series_step() {
        let registry = registry([noop("a"), noop("b")]);

        let err = compile(&registry, &Flow::series(["a", "b", "a"])).err().unwrap();
        assert_eq!(
            err,
            GraphError::RepeatedStep {
                task: "a".into(),
                flow: "series(a, b, a)".into()
            }
        );
        assert!(err.to_string().contains("repeated"));

        // Repeating a task inside one parallel step is harmless.
        let flow = Flow::series([Flow::parallel(["a", "a"]), Flow::task("b")]);
        let plan = compile(&registry, &flow).unwrap();
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn test_unknown_task() {
        let registry = registry([noop("a")]);
        assert_eq!(
            compile(&registry, &Flow::parallel(["a", "nope"])).err(),
            Some(GraphError::UnknownTask("nope".into()))
        );
    }
}
