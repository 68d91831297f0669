#[cfg(feature = "server")]
mod http;
#[cfg(feature = "live")]
mod queue;
mod report;
#[cfg(feature = "live")]
mod watch;

use std::collections::HashMap;
use std::sync::LazyLock;
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use console::style;
use indicatif::ProgressStyle;
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::visit::Dfs;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::{RunContext, TaskContext};
use crate::engine::plan::{Node, Plan};
use crate::io::as_overhead;
use crate::pipeline::Outcome;

pub use report::{Report, TaskExecution, TaskReport, TaskStatus};

#[cfg(feature = "live")]
pub(crate) use watch::watch;

static STYLE_RUN: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::with_template(
        "{spinner:.green} {elapsed:>4} {bar:30.cyan/blue} {pos}/{len} tasks {wide_msg:.dim}",
    )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
});

static STYLE_TASK: LazyLock<ProgressStyle> =
    LazyLock::new(|| ProgressStyle::with_template("  {spinner:.green} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()));

type Message = (NodeIndex, anyhow::Result<Outcome>, Instant, Duration);

/// Executes a plan, starting each task as soon as everything before it in the
/// plan has completed.
///
/// The algorithm works as follows:
/// 1. The number of unfinished predecessors is computed for every node.
/// 2. Nodes without predecessors are spawned on the rayon pool.
/// 3. The calling thread waits for results on a channel. When a node
///    completes, the counters of its successors are decremented and every
///    successor reaching zero is spawned.
/// 4. When a node fails, every node reachable from it is marked as skipped
///    and never spawned. Unrelated nodes keep running.
/// 5. The loop ends when every node has either finished or been skipped.
pub(crate) fn execute(plan: &Plan, ctx: &RunContext) -> Report {
    let graph = &plan.graph;
    let total = graph.node_count();
    let mut report = Report::default();

    if total == 0 {
        return report;
    }

    let mut pending: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|i| (i, graph.neighbors_directed(i, Direction::Incoming).count()))
        .collect();

    let root_span = tracing::span!(Level::INFO, "run");
    root_span.pb_set_length(total as u64);
    root_span.pb_set_style(&STYLE_RUN);
    root_span.pb_set_message(&ctx.env.to_string());
    let _enter = root_span.enter();

    let started = Instant::now();
    let mut finished = 0;

    // The control loop runs on the calling thread, which is not a pool
    // worker, so blocking on the channel never starves the pool.
    rayon::in_place_scope(|s| {
        let (sender, receiver) = channel::<Message>();

        let spawn = |index: NodeIndex| {
            let sender = sender.clone();

            match &graph[index] {
                Node::Join { .. } => {
                    let now = Instant::now();
                    let _ = sender.send((index, Ok(Outcome::default()), now, Duration::ZERO));
                }
                Node::Work { id, work } => {
                    let work = work.clone();
                    let id = id.clone();

                    s.spawn(move |_| {
                        let span = tracing::span!(Level::INFO, "task", name = %id);
                        span.pb_set_style(&STYLE_TASK);
                        span.pb_set_message(&id);
                        let _enter = span.enter();

                        let context = TaskContext {
                            ctx,
                            name: &id,
                            span: span.clone(),
                        };

                        let start = Instant::now();

                        // A panicking task is reported as a failure; the task
                        // only holds shared references to immutable data.
                        let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(
                            || work(&context),
                        )) {
                            Ok(result) => result.and_then(|outcome| outcome.check(ctx.policy)),
                            Err(panic) => {
                                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                                    format!("Task panicked: {s}")
                                } else if let Some(s) = panic.downcast_ref::<String>() {
                                    format!("Task panicked: {s}")
                                } else {
                                    String::from("Task panicked with unknown payload")
                                };

                                Err(anyhow::anyhow!(msg))
                            }
                        };

                        let _ = sender.send((index, result, start, start.elapsed()));
                    });
                }
            }
        };

        for index in graph.node_indices() {
            if pending[&index] == 0 {
                spawn(index);
            }
        }

        while finished < total {
            let Ok((index, result, start, duration)) = receiver.recv() else {
                break;
            };

            finished += 1;
            root_span.pb_inc(1);

            let id = graph[index].id();
            let execution = TaskExecution { start, duration };

            match result {
                Ok(outcome) => {
                    if let Node::Work { .. } = &graph[index] {
                        tracing::info!(
                            "{} {} {}",
                            style("done").green(),
                            id,
                            as_overhead(start)
                        );
                    }

                    report.push(TaskReport {
                        name: id.to_string(),
                        status: TaskStatus::Done(outcome),
                        execution: Some(execution),
                    });

                    for next in graph.neighbors_directed(index, Direction::Outgoing) {
                        if let Some(count) = pending.get_mut(&next) {
                            *count -= 1;
                            if *count == 0 {
                                spawn(next);
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(task = id, "{err:#}");

                    report.push(TaskReport {
                        name: id.to_string(),
                        status: TaskStatus::Failed(format!("{err:#}")),
                        execution: Some(execution),
                    });

                    // Everything downstream can never start.
                    let mut dfs = Dfs::new(graph, index);
                    while let Some(next) = dfs.next(graph) {
                        if next == index || pending.remove(&next).is_none() {
                            continue;
                        }

                        let skipped = graph[next].id();
                        tracing::warn!(task = skipped, cause = id, "skipped");

                        report.push(TaskReport {
                            name: skipped.to_string(),
                            status: TaskStatus::Skipped { cause: id.to_string() },
                            execution: None,
                        });

                        finished += 1;
                        root_span.pb_inc(1);
                    }
                }
            }

            pending.remove(&index);
        }
    });

    report.elapsed = started.elapsed();
    report
}
