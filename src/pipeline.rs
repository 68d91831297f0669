//! Transform chains.
//!
//! A [`Chain`] is an ordered list of [`Step`] descriptors. Each step wraps
//! either a per-record [`Transform`] or a whole-stream [`Bundle`] and may
//! carry a predicate over the [`RunContext`]. Predicates are evaluated once,
//! when the chain is built for a context with [`Chain::build`], so the chain
//! that processes files contains only the steps that apply.
//!
//! ```rust,no_run
//! use assetline::{Chain, Env, FileSet, RunContext, Step};
//! use assetline::transform::{Rename, SourceMaps};
//! use assetline::plugin::{MinifyCss, Sass};
//!
//! # fn main() -> anyhow::Result<()> {
//! let ctx = RunContext::new(Env::Prod);
//! let chain = Chain::new()
//!     .step(Step::each(SourceMaps).when(Env::Dev))
//!     .step(Step::each(Sass::new()))
//!     .step(Step::each(Rename::suffix(".min")).when(Env::Prod))
//!     .step(Step::each(MinifyCss).when(Env::Prod));
//!
//! let files = FileSet::new(["app/styles/style.scss"])?;
//! let outcome = chain.build(&ctx).run(&files, "public/styles")?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, LazyLock};

use camino::Utf8PathBuf;
use indicatif::ProgressStyle;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::asset::{Asset, Dest};
use crate::core::{Env, ErrorPolicy, RunContext};
use crate::error::{FileSetError, TransformError};
use crate::fileset::FileSet;

static STYLE_FILES: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::with_template("  {spinner:.green} {msg} {bar:20.cyan/blue} {pos}/{len} files")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
});

/// A per-record transform step: one asset in, one asset out.
pub trait Transform: Send + Sync {
    /// Name used in logs and error reports.
    fn name(&self) -> &str;

    fn apply(&self, asset: Asset) -> anyhow::Result<Asset>;
}

/// A whole-stream step: every surviving asset in, at most one asset out.
pub trait Bundle: Send + Sync {
    fn name(&self) -> &str;

    fn bundle(&self, assets: Vec<Asset>) -> anyhow::Result<Option<Asset>>;
}

#[derive(Clone)]
enum Stage {
    Each(Arc<dyn Transform>),
    All(Arc<dyn Bundle>),
}

impl Stage {
    fn name(&self) -> &str {
        match self {
            Stage::Each(t) => t.name(),
            Stage::All(b) => b.name(),
        }
    }
}

type Predicate = Arc<dyn Fn(&RunContext) -> bool + Send + Sync>;

/// A transform step descriptor with an optional predicate.
#[derive(Clone)]
pub struct Step {
    stage: Stage,
    predicate: Option<Predicate>,
}

impl Step {
    /// A step applied to every record independently.
    pub fn each(transform: impl Transform + 'static) -> Self {
        Self {
            stage: Stage::Each(Arc::new(transform)),
            predicate: None,
        }
    }

    /// A step applied to all records at once.
    pub fn all(bundle: impl Bundle + 'static) -> Self {
        Self {
            stage: Stage::All(Arc::new(bundle)),
            predicate: None,
        }
    }

    /// Apply this step only in the given environment mode.
    pub fn when(self, env: Env) -> Self {
        self.only_if(move |ctx| ctx.env == env)
    }

    /// Apply this step only when the predicate holds for the run context.
    pub fn only_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RunContext) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    fn applies(&self, ctx: &RunContext) -> bool {
        self.predicate.as_ref().is_none_or(|p| p(ctx))
    }
}

/// An ordered list of step descriptors.
#[derive(Clone, Default)]
pub struct Chain {
    steps: Vec<Step>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Evaluates every predicate against the context and keeps the steps that
    /// apply.
    pub fn build(&self, ctx: &RunContext) -> BuiltChain {
        let stages = self
            .steps
            .iter()
            .filter(|step| step.applies(ctx))
            .map(|step| step.stage.clone())
            .collect();

        BuiltChain {
            stages,
            policy: ctx.policy,
            progress: tracing::Span::none(),
        }
    }
}

/// The result of processing a file set through a chain.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Paths written to disk.
    pub written: Vec<Utf8PathBuf>,
    /// Per-file failures, already reported through the log.
    pub failures: Vec<TransformError>,
}

impl Outcome {
    pub fn merge(&mut self, other: Outcome) {
        self.written.extend(other.written);
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Applies the per-file error policy: under [`ErrorPolicy::Fail`] an
    /// outcome with failures turns into a task error.
    pub fn check(self, policy: ErrorPolicy) -> anyhow::Result<Outcome> {
        match policy {
            ErrorPolicy::Fail if !self.failures.is_empty() => Err(anyhow::anyhow!(
                "{} file(s) failed, first: {}",
                self.failures.len(),
                self.failures[0]
            )),
            _ => Ok(self),
        }
    }
}

impl From<Vec<Utf8PathBuf>> for Outcome {
    fn from(written: Vec<Utf8PathBuf>) -> Self {
        Self {
            written,
            failures: Vec::new(),
        }
    }
}

/// A chain specialised for one run context.
pub struct BuiltChain {
    stages: Vec<Stage>,
    policy: ErrorPolicy,
    progress: tracing::Span,
}

impl BuiltChain {
    /// Counts the files read by [`BuiltChain::run`] on the progress bar of
    /// `span`.
    pub fn progress(mut self, span: tracing::Span) -> Self {
        self.progress = span;
        self
    }

    /// Names of the steps that survived predicate evaluation.
    pub fn step_names(&self) -> Vec<&str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Runs assets through every stage. Records failing a step are reported,
    /// recorded in `failures` and dropped from the rest of the chain.
    pub fn process(&self, mut assets: Vec<Asset>, failures: &mut Vec<TransformError>) -> Vec<Asset> {
        for stage in &self.stages {
            assets = match stage {
                Stage::Each(transform) => {
                    let results: Vec<_> = assets
                        .into_par_iter()
                        .map(|asset| {
                            let origin = asset.origin.clone();
                            transform
                                .apply(asset)
                                .map_err(|e| TransformError::new(origin, transform.name(), e))
                        })
                        .collect();

                    let mut survivors = Vec::with_capacity(results.len());
                    for result in results {
                        match result {
                            Ok(asset) => survivors.push(asset),
                            Err(err) => failures.push(report(err)),
                        }
                    }
                    survivors
                }
                Stage::All(bundle) => {
                    if assets.is_empty() {
                        continue;
                    }

                    let origin = assets[0].origin.clone();
                    match bundle.bundle(assets) {
                        Ok(merged) => merged.into_iter().collect(),
                        Err(e) => {
                            failures.push(report(TransformError::new(origin, bundle.name(), e)));
                            Vec::new()
                        }
                    }
                }
            };
        }

        assets
    }

    /// Reads the file set, processes it and writes the results below `dest`.
    pub fn run(&self, files: &FileSet, dest: impl Into<Utf8PathBuf>) -> Result<Outcome, FileSetError> {
        let dest = Dest::new(dest);
        let mut failures = Vec::new();

        let entries = files.resolve()?;
        let total = entries.len() as u64;
        self.progress.pb_set_style(&STYLE_FILES);
        self.progress.pb_inc_length(total);

        let mut assets = Vec::new();
        for entry in entries {
            match Asset::read(&entry) {
                Ok(asset) => assets.push(asset),
                Err(e) => failures.push(report(TransformError::new(&entry.path, "read", e))),
            }
        }

        let assets = self.process(assets, &mut failures);
        let mut written = Vec::new();

        for asset in &assets {
            match dest.write(asset) {
                Ok(paths) => written.extend(paths),
                Err(e) => failures.push(report(TransformError::new(&asset.origin, "dest", e))),
            }
        }
        self.progress.pb_inc(total);

        tracing::debug!(
            dest = %dest.root(),
            written = written.len(),
            failed = failures.len(),
            "chain finished"
        );

        Ok(Outcome { written, failures })
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }
}

/// The reporting channel for per-file failures.
pub(crate) fn report(err: TransformError) -> TransformError {
    tracing::error!(path = %err.path, step = %err.step, "{:#}", err.source);
    err
}
