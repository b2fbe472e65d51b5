//! Generation stages as data.
//!
//! Each stage is a [`StageDescriptor`]: which plugin to drive, how to render
//! its output flag, where it writes and when it is enabled. A single
//! function, [`run_stage`], composes and invokes any descriptor, so adding a
//! stage means adding an entry to [`STAGES`].

use std::path::{Path, PathBuf};

use protogen_shared::{PackageGroup, ProtogenError, Result, StageOptions};
use serde::{Serialize, Serializer};
use tracing::{debug, info, instrument};

use crate::includes::IncludeSet;
use crate::runner::{GeneratorRunner, Invocation};

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Root directory a stage writes under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRoot {
    Output,
    Docs,
    ApiDescription,
}

/// Where a stage's output flag points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The root itself. The plugin lays files out by package path.
    Root(TargetRoot),
    /// `<root>/<package>`, created before the plugin runs.
    PackageDir(TargetRoot),
}

/// Option string placed before the `:` of the output flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginOptions {
    None,
    Fixed(&'static str),
    /// `markdown,<last package segment>.md`
    MarkdownDocFile,
}

impl PluginOptions {
    fn render(self, package: &str) -> String {
        match self {
            Self::None => String::new(),
            Self::Fixed(opts) => opts.to_string(),
            Self::MarkdownDocFile => {
                let leaf = package.rsplit('/').find(|s| !s.is_empty()).unwrap_or("index");
                format!("markdown,{leaf}.md")
            }
        }
    }
}

/// One external generation step.
#[derive(Debug, Clone, Copy)]
pub struct StageDescriptor {
    pub name: &'static str,
    /// Plugin identifier; the flag is `--<plugin>_out` and the binary
    /// `protoc-gen-<plugin>`.
    pub plugin: &'static str,
    pub options: PluginOptions,
    pub target: Target,
    pub enabled: fn(&StageOptions) -> bool,
}

impl StageDescriptor {
    pub fn is_enabled(&self, options: &StageOptions) -> bool {
        (self.enabled)(options)
    }

    /// Executable that must be on `PATH` for this stage.
    pub fn plugin_binary(&self) -> String {
        format!("protoc-gen-{}", self.plugin)
    }

    /// Output flag for the given target directory.
    pub fn output_flag(&self, package: &str, target: &Path) -> String {
        let options = self.options.render(package);
        if options.is_empty() {
            format!("--{}_out={}", self.plugin, target.display())
        } else {
            format!("--{}_out={}:{}", self.plugin, options, target.display())
        }
    }
}

/// Stages in execution order.
pub const STAGES: &[StageDescriptor] = &[
    StageDescriptor {
        name: "go",
        plugin: "go",
        options: PluginOptions::Fixed("plugins=grpc"),
        target: Target::Root(TargetRoot::Output),
        enabled: |_| true,
    },
    // the gateway plugin does not follow the package path, so it gets the
    // exact package directory
    StageDescriptor {
        name: "gateway",
        plugin: "grpc-gateway",
        options: PluginOptions::Fixed("allow_delete_body=true,logtostderr=true"),
        target: Target::PackageDir(TargetRoot::Output),
        enabled: |_| true,
    },
    StageDescriptor {
        name: "validator",
        plugin: "validate",
        options: PluginOptions::Fixed("lang=go"),
        target: Target::Root(TargetRoot::Output),
        enabled: |opts| opts.validator,
    },
    StageDescriptor {
        name: "docs",
        plugin: "doc",
        options: PluginOptions::MarkdownDocFile,
        target: Target::PackageDir(TargetRoot::Docs),
        enabled: |opts| opts.docs_output.is_some(),
    },
    StageDescriptor {
        name: "api-description",
        plugin: "openapiv2",
        options: PluginOptions::Fixed("logtostderr=true"),
        target: Target::PackageDir(TargetRoot::ApiDescription),
        enabled: |opts| opts.api_description_output.is_some(),
    },
];

/// Stages enabled by `options`, in execution order.
pub fn enabled_stages(options: &StageOptions) -> impl Iterator<Item = &'static StageDescriptor> + '_ {
    STAGES.iter().filter(move |s| s.is_enabled(options))
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Shared, read-only inputs for every stage of a run.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub protoc: &'a str,
    pub output_root: &'a Path,
    pub options: &'a StageOptions,
}

impl StageContext<'_> {
    fn root(&self, root: TargetRoot) -> Option<&Path> {
        match root {
            TargetRoot::Output => Some(self.output_root),
            TargetRoot::Docs => self.options.docs_output.as_deref(),
            TargetRoot::ApiDescription => self.options.api_description_output.as_deref(),
        }
    }

    /// Directory a stage writes to for `package`.
    pub fn target_dir(&self, stage: &StageDescriptor, package: &str) -> Option<PathBuf> {
        match stage.target {
            Target::Root(root) => self.root(root).map(Path::to_path_buf),
            Target::PackageDir(root) => self.root(root).map(|r| r.join(package)),
        }
    }
}

/// Outcome of one stage for one package group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageResult {
    pub stage: String,
    /// Combined stdout and stderr of the generator.
    #[serde(serialize_with = "lossy_utf8")]
    pub output: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn lossy_utf8<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

/// Argument list: output flag, `-I <dir>` per include, then file base names.
pub fn compose_args(output_flag: String, includes: &IncludeSet, file_names: &[String]) -> Vec<String> {
    let mut args = Vec::with_capacity(1 + includes.len() * 2 + file_names.len());
    args.push(output_flag);
    for dir in includes.iter() {
        args.push("-I".to_string());
        args.push(dir.to_string_lossy().into_owned());
    }
    args.extend(file_names.iter().cloned());
    args
}

/// Build the invocation of `stage` for `group`, creating its target
/// directory when the stage needs one.
pub fn prepare_stage(
    stage: &StageDescriptor,
    ctx: &StageContext<'_>,
    group: &PackageGroup,
    includes: &IncludeSet,
) -> Result<Invocation> {
    let target = ctx.target_dir(stage, &group.package).ok_or_else(|| {
        ProtogenError::config(format!("stage {} has no output directory configured", stage.name))
    })?;

    if matches!(stage.target, Target::PackageDir(_)) {
        std::fs::create_dir_all(&target).map_err(|source| ProtogenError::StageSetup {
            stage: stage.name.to_string(),
            path: target.clone(),
            source,
        })?;
    }

    let flag = stage.output_flag(&group.package, &target);
    Ok(Invocation {
        program: ctx.protoc.to_string(),
        args: compose_args(flag, includes, &group.file_names()),
    })
}

/// Run one stage for one package group.
///
/// Returns `Ok` only when the generator exited successfully. A spawn failure
/// or non-zero exit is a `StageExecution` error carrying the captured output.
#[instrument(skip_all, fields(stage = stage.name, package = %group.package))]
pub async fn run_stage(
    stage: &StageDescriptor,
    ctx: &StageContext<'_>,
    runner: &dyn GeneratorRunner,
    group: &PackageGroup,
    includes: &IncludeSet,
) -> Result<StageResult> {
    let invocation = prepare_stage(stage, ctx, group, includes)?;
    debug!(command = %invocation, "invoking generator");

    let execution_error = |message: String, output: &[u8]| ProtogenError::StageExecution {
        stage: stage.name.to_string(),
        package: group.package.clone(),
        message,
        output: String::from_utf8_lossy(output).into_owned(),
    };

    let output = runner
        .run(&invocation)
        .await
        .map_err(|e| execution_error(format!("failed to run {}: {e}", invocation.program), &[]))?;

    if !output.success {
        return Err(execution_error(
            format!("{} exited with {}", invocation.program, output.status),
            &output.combined,
        ));
    }

    info!(files = group.files.len(), "stage complete");
    Ok(StageResult {
        stage: stage.name.to_string(),
        output: output.combined,
        error: None,
    })
}
