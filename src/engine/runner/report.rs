use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use console::style;

use crate::error::AssetlineError;
use crate::pipeline::Outcome;

#[derive(Debug, Clone, Copy)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// The final state of one task in a run.
#[derive(Debug)]
pub enum TaskStatus {
    /// The task completed; per-file failures tolerated by the error policy
    /// are kept in the outcome.
    Done(Outcome),
    /// The task returned an error or panicked.
    Failed(String),
    /// The task never started because a task before it failed.
    Skipped { cause: String },
}

#[derive(Debug)]
pub struct TaskReport {
    pub name: String,
    pub status: TaskStatus,
    /// Timing, for tasks that ran.
    pub execution: Option<TaskExecution>,
}

/// The result of running a plan: one entry per task in the plan, in the
/// order the tasks finished.
#[derive(Debug, Default)]
pub struct Report {
    tasks: Vec<TaskReport>,
    pub elapsed: Duration,
}

impl Report {
    pub(crate) fn push(&mut self, task: TaskReport) {
        self.tasks.push(task);
    }

    pub fn tasks(&self) -> &[TaskReport] {
        &self.tasks
    }

    pub fn get(&self, name: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// True when no task failed or was skipped.
    pub fn is_success(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| matches!(t.status, TaskStatus::Done(_)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tasks.iter().filter_map(|t| match &t.status {
            TaskStatus::Failed(msg) => Some((t.name.as_str(), msg.as_str())),
            _ => None,
        })
    }

    /// Fails with the number of failed tasks and the name of the first one.
    pub fn check(&self) -> Result<(), AssetlineError> {
        let mut failures = self.failures();
        match failures.next() {
            Some((first, _)) => Err(AssetlineError::Failed(failures.count() + 1, first.to_string())),
            None => Ok(()),
        }
    }

    pub fn skipped(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().filter_map(|t| match &t.status {
            TaskStatus::Skipped { .. } => Some(t.name.as_str()),
            _ => None,
        })
    }

    /// Number of per-file failures tolerated across all completed tasks.
    pub fn file_failures(&self) -> usize {
        self.tasks
            .iter()
            .map(|t| match &t.status {
                TaskStatus::Done(outcome) => outcome.failures.len(),
                _ => 0,
            })
            .sum()
    }

    pub fn written(&self) -> usize {
        self.tasks
            .iter()
            .map(|t| match &t.status {
                TaskStatus::Done(outcome) => outcome.written.len(),
                _ => 0,
            })
            .sum()
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut ran: Vec<_> = self.tasks.iter().collect();
        ran.sort_by_key(|t| t.execution.map(|e| e.start));

        for task in ran {
            let (mark, detail) = match &task.status {
                TaskStatus::Done(outcome) => (
                    style("ok").green(),
                    format!("{} file(s)", outcome.written.len()),
                ),
                TaskStatus::Failed(msg) => (style("failed").red(), msg.clone()),
                TaskStatus::Skipped { cause } => {
                    (style("skipped").yellow(), format!("after '{cause}' failed"))
                }
            };

            let time = task
                .execution
                .map(|e| format!("{:.2?}", e.duration))
                .unwrap_or_default();

            writeln!(f, "{mark:>8} {:<24} {time:>10}  {detail}", task.name)?;
        }

        write!(
            f,
            "{} task(s), {} file(s) written, {} file error(s) in {:.2?}",
            self.tasks.len(),
            self.written(),
            self.file_failures(),
            self.elapsed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, status: TaskStatus) -> TaskReport {
        TaskReport {
            name: name.into(),
            status,
            execution: None,
        }
    }

    #[test]
    fn test_check_names_first_failure() {
        let mut report = Report::default();
        report.push(task("styles", TaskStatus::Done(Outcome::default())));
        assert!(report.check().is_ok());

        report.push(task("sprite", TaskStatus::Failed("no images".into())));
        report.push(task("iconfont", TaskStatus::Failed("bad svg".into())));
        report.push(task("build", TaskStatus::Skipped { cause: "sprite".into() }));

        let err = report.check().unwrap_err();
        assert!(matches!(&err, AssetlineError::Failed(2, first) if first == "sprite"));
        assert_eq!(err.to_string(), "2 task(s) failed, first: 'sprite'");
    }
}
