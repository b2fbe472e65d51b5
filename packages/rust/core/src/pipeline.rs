//! End-to-end `generate` pipeline: fetch → index → resolve includes → stages.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use protogen_fetch::{Checkouts, Fetcher, fetch_dependencies};
use protogen_shared::{
    DependencySource, FailurePolicy, InputSource, PackageGroup, PackageIndex, ProtogenError,
    Result, RunConfig, matches_prefix,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::includes::{IncludeSet, resolve_includes};
use crate::runner::GeneratorRunner;
use crate::stage::{StageContext, StageDescriptor, StageResult, enabled_stages, run_stage};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Outcome of generation for one package group.
#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub package: String,
    pub files: usize,
    pub includes: Vec<PathBuf>,
    /// Stages that ran, in order. A failed stage is the last entry.
    pub stages: Vec<StageResult>,
}

impl GroupReport {
    pub fn failed(&self) -> bool {
        self.stages.iter().any(|s| s.error.is_some())
    }
}

/// Summary of a pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub input_root: PathBuf,
    pub dependencies: Vec<String>,
    pub indexed_files: usize,
    pub skipped_groups: usize,
    pub groups: Vec<GroupReport>,
    #[serde(skip)]
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before the stages of a package group run.
    fn group_started(&self, package: &str, current: usize, total: usize);
    /// Called before a stage is invoked.
    fn stage_started(&self, package: &str, stage: &str);
    /// Called when the pipeline completes, successfully or not.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn group_started(&self, _package: &str, _current: usize, _total: usize) {}
    fn stage_started(&self, _package: &str, _stage: &str) {}
    fn done(&self, _report: &RunReport) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Collaborators the pipeline drives.
pub struct Pipeline<'a> {
    pub config: &'a RunConfig,
    pub fetcher: Arc<dyn Fetcher>,
    pub runner: &'a dyn GeneratorRunner,
    pub progress: &'a dyn ProgressReporter,
}

impl Pipeline<'_> {
    /// Run the full pipeline.
    ///
    /// 1. Fetch every dependency source (and the input repository, if any)
    /// 2. Index the input tree
    /// 3. For each group matching the prefix: resolve includes, run stages
    ///
    /// Checkouts are added to `checkouts` so the caller decides when they are
    /// removed. Any fetch, walk or parse failure aborts before generation.
    #[instrument(skip_all, fields(prefix = %self.config.prefix))]
    pub async fn run(&self, checkouts: &mut Checkouts) -> Result<RunReport> {
        let start = Instant::now();
        let mut report = RunReport::default();
        let result = self.execute(checkouts, &mut report).await;
        report.elapsed = start.elapsed();
        self.progress.done(&report);

        result?;
        info!(
            groups = report.groups.len(),
            skipped = report.skipped_groups,
            elapsed_ms = report.elapsed.as_millis(),
            "generation complete"
        );
        Ok(report)
    }

    async fn execute(&self, checkouts: &mut Checkouts, report: &mut RunReport) -> Result<()> {
        let config = self.config;

        // --- Phase 1: Fetch ---
        self.progress.phase("Fetching dependencies");
        let deps =
            fetch_dependencies(Arc::clone(&self.fetcher), &config.dependencies, checkouts).await?;
        report.dependencies = deps.iter().map(|d| d.name.clone()).collect();

        let input_root = match &config.input {
            InputSource::Local(dir) => dir.clone(),
            InputSource::Repository(repo) => {
                self.progress.phase("Fetching input repository");
                let checkout = self.fetcher.fetch(repo).await?;
                let root = checkout.path().to_path_buf();
                checkouts.push(checkout);
                root
            }
        };
        report.input_root = input_root.clone();

        // --- Phase 2: Index ---
        self.progress.phase("Indexing definition files");
        let index = protogen_index::index(&input_root)?;
        report.indexed_files = index.file_count();

        // --- Phase 3: Generate ---
        self.generate(&index, &deps, &input_root, report).await
    }

    async fn generate(
        &self,
        index: &PackageIndex,
        deps: &[DependencySource],
        input_root: &Path,
        report: &mut RunReport,
    ) -> Result<()> {
        let config = self.config;
        let prefix = config.prefix.as_str();
        let stages: Vec<&StageDescriptor> = enabled_stages(&config.stages).collect();
        let ctx = StageContext {
            protoc: &config.protoc,
            output_root: &config.output_root,
            options: &config.stages,
        };

        for group in index.groups().filter(|g| !matches_prefix(&g.package, prefix)) {
            debug!(package = %group.package, files = group.files.len(), "skipping group outside prefix");
        }
        report.skipped_groups = index.len() - index.matching(prefix).count();

        let selected: Vec<&PackageGroup> = index.matching(prefix).collect();
        let total = selected.len();
        let mut failures = Vec::new();

        for (i, group) in selected.into_iter().enumerate() {
            self.progress.group_started(&group.package, i + 1, total);
            let includes = resolve_includes(deps, input_root, &config.output_root, &group.files);

            let (group_report, failure) = self.run_group(&ctx, &stages, group, includes).await;
            report.groups.push(group_report);

            if let Some(err) = failure {
                match config.failure_policy {
                    FailurePolicy::Abort => return Err(err),
                    FailurePolicy::Continue => {
                        warn!(package = %group.package, error = %err, "group failed, continuing");
                        failures.push(err);
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ProtogenError::GroupFailures(failures))
        }
    }

    /// Run `stages` in order for one group, stopping at the first failure.
    async fn run_group(
        &self,
        ctx: &StageContext<'_>,
        stages: &[&StageDescriptor],
        group: &PackageGroup,
        includes: IncludeSet,
    ) -> (GroupReport, Option<ProtogenError>) {
        let mut report = GroupReport {
            package: group.package.clone(),
            files: group.files.len(),
            includes: includes.as_slice().to_vec(),
            stages: Vec::with_capacity(stages.len()),
        };

        for stage in stages {
            self.progress.stage_started(&group.package, stage.name);
            match run_stage(stage, ctx, self.runner, group, &includes).await {
                Ok(result) => report.stages.push(result),
                Err(err) => {
                    let output = match &err {
                        ProtogenError::StageExecution { output, .. } => output.clone().into_bytes(),
                        _ => Vec::new(),
                    };
                    report.stages.push(StageResult {
                        stage: stage.name.to_string(),
                        output,
                        error: Some(err.to_string()),
                    });
                    return (report, Some(err));
                }
            }
        }

        (report, None)
    }
}
