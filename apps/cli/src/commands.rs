//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use protogen_core::pipeline::{Pipeline, ProgressReporter, RunReport};
use protogen_core::runner::ProcessRunner;
use protogen_core::toolchain;
use protogen_fetch::{Checkouts, Fetcher, GitFetcher};
use protogen_shared::{
    AppConfig, FailurePolicy, ReferenceKind, RepoRef, RunConfig, init_config, load_config,
    load_config_from,
};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Generate bindings for every package in a tree of definition files.
#[derive(Parser)]
#[command(
    name = "protogen",
    version,
    about = "Generate gRPC, gateway, validator, documentation and API description code from protocol buffer definitions.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.protogen/protogen.toml.
    #[arg(long, global = true, env = "PROTOGEN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Output format for reports.
#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
pub(crate) enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch dependencies, index definitions and run every generator.
    Generate(GenerateArgs),

    /// List the package groups found in a definition tree.
    Index {
        /// Directory containing definition files.
        input: PathBuf,

        /// Only list groups whose package starts with this prefix.
        #[arg(long)]
        prefix: Option<String>,

        /// Output format.
        #[arg(long, default_value = "text")]
        format: ReportFormat,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags of `protogen generate`. Each one overrides the config file.
#[derive(Args, Debug, Default)]
pub(crate) struct GenerateArgs {
    /// Local directory containing definition files.
    #[arg(short, long, conflicts_with = "input_repo")]
    pub input: Option<String>,

    /// Repository containing definition files, fetched for this run.
    #[arg(long)]
    pub input_repo: Option<String>,

    /// Branch of the input repository.
    #[arg(long, default_value = "master", requires = "input_repo")]
    pub input_ref: String,

    /// Treat --input-ref as a tag instead of a branch.
    #[arg(long, requires = "input_repo")]
    pub input_tag: bool,

    /// Base output path for generated source code. Defaults to $GOPATH/src.
    #[arg(short, long)]
    pub output: Option<String>,

    /// Package prefix selecting which definition files are generated.
    #[arg(long)]
    pub prefix: Option<String>,

    /// Compiler executable.
    #[arg(long)]
    pub protoc: Option<String>,

    /// Git executable used for fetching.
    #[arg(long, default_value = "git")]
    pub git: String,

    /// Override a dependency reference: NAME=REF (repeatable).
    #[arg(long = "dep-ref", value_name = "NAME=REF")]
    pub dep_refs: Vec<String>,

    /// Skip the validator stage.
    #[arg(long)]
    pub no_validator: bool,

    /// Generate markdown documentation into this directory.
    #[arg(long, value_name = "DIR")]
    pub docs: Option<String>,

    /// Generate OpenAPI descriptions into this directory.
    #[arg(long, value_name = "DIR")]
    pub api_description: Option<String>,

    /// Keep generating other packages after a package fails.
    #[arg(long)]
    pub keep_going: bool,

    /// Leave fetched repositories on disk after the run.
    #[arg(long)]
    pub keep_checkouts: bool,

    /// Report format printed after a successful run.
    #[arg(long, default_value = "text")]
    pub report: ReportFormat,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Crates whose events are shown by default.
const LOG_TARGETS: &[&str] = &[
    "protogen",
    "protogen_core",
    "protogen_fetch",
    "protogen_index",
    "protogen_shared",
];

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = LOG_TARGETS
        .iter()
        .map(|t| format!("{t}={level}"))
        .collect::<Vec<_>>()
        .join(",");

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    match cli.command {
        Command::Generate(args) => cmd_generate(config_path, args).await,
        Command::Index {
            input,
            prefix,
            format,
        } => cmd_index(&input, prefix.as_deref(), format),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn load(config_path: Option<PathBuf>) -> Result<AppConfig> {
    Ok(match config_path {
        Some(path) => load_config_from(&path)?,
        None => load_config()?,
    })
}

/// Apply command-line overrides on top of the file config.
fn apply_overrides(config: &mut AppConfig, args: &GenerateArgs) -> Result<()> {
    if let Some(input) = &args.input {
        config.generate.input = Some(input.clone());
    }
    if let Some(url) = &args.input_repo {
        config.generate.input = None;
        let kind = if args.input_tag {
            ReferenceKind::Tag
        } else {
            ReferenceKind::Branch
        };
        config.input_repo = Some(RepoRef::new(url, &args.input_ref, kind));
    }
    if let Some(output) = &args.output {
        config.generate.output = Some(output.clone());
    }
    if let Some(prefix) = &args.prefix {
        config.generate.prefix = prefix.clone();
    }
    if let Some(protoc) = &args.protoc {
        config.generate.protoc = protoc.clone();
    }
    for entry in &args.dep_refs {
        let (name, reference) = entry
            .split_once('=')
            .ok_or_else(|| eyre!("invalid --dep-ref '{entry}': expected NAME=REF"))?;
        let dep = config
            .dependencies
            .iter_mut()
            .find(|d| d.name == name)
            .ok_or_else(|| eyre!("--dep-ref names unknown dependency '{name}'"))?;
        dep.reference = reference.to_string();
    }
    if args.no_validator {
        config.stages.validator = false;
    }
    if let Some(dir) = &args.docs {
        config.stages.docs = true;
        config.stages.docs_output = Some(dir.clone());
    }
    if let Some(dir) = &args.api_description {
        config.stages.api_description = true;
        config.stages.api_description_output = Some(dir.clone());
    }
    if args.keep_going {
        config.generate.failure_policy = FailurePolicy::Continue;
    }
    Ok(())
}

async fn cmd_generate(config_path: Option<PathBuf>, args: GenerateArgs) -> Result<()> {
    let mut app = load(config_path)?;
    apply_overrides(&mut app, &args)?;
    let config = RunConfig::try_from(&app)?;

    let fetcher = Arc::new(GitFetcher::new(&args.git));
    toolchain::verify(&config, fetcher.program())?;

    info!(
        output = %config.output_root.display(),
        prefix = %config.prefix,
        dependencies = config.dependencies.len(),
        "starting generation"
    );

    let reporter = CliProgress::new();
    let mut checkouts = Checkouts::new();
    let result = Pipeline {
        config: &config,
        fetcher,
        runner: &ProcessRunner,
        progress: &reporter,
    }
    .run(&mut checkouts)
    .await;

    if args.keep_checkouts {
        for (repo, path) in checkouts.keep_all() {
            warn!(repo = %repo, path = %path.display(), "kept checkout");
        }
    }

    let report = result?;
    print_report(&report, args.report)?;
    Ok(())
}

fn print_report(report: &RunReport, format: ReportFormat) -> Result<()> {
    match format {
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        ReportFormat::Text => {
            println!();
            println!("  Generation complete!");
            println!("  Input:     {}", report.input_root.display());
            println!("  Files:     {}", report.indexed_files);
            println!("  Packages:  {}", report.groups.len());
            println!("  Skipped:   {}", report.skipped_groups);
            for group in &report.groups {
                let stages: Vec<_> = group.stages.iter().map(|s| s.stage.as_str()).collect();
                println!("    {} ({} files): {}", group.package, group.files, stages.join(", "));
            }
            println!("  Time:      {:.1}s", report.elapsed.as_secs_f64());
            println!();
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn group_started(&self, package: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Generating [{current}/{total}] {package}"));
    }

    fn stage_started(&self, package: &str, stage: &str) {
        self.spinner.set_message(format!("{stage}: {package}"));
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Other commands
// ---------------------------------------------------------------------------

fn cmd_index(input: &std::path::Path, prefix: Option<&str>, format: ReportFormat) -> Result<()> {
    let index = protogen_index::index(input)?;
    let prefix = prefix.unwrap_or("");

    match format {
        ReportFormat::Json => {
            let groups: Vec<_> = index.matching(prefix).collect();
            println!("{}", serde_json::to_string_pretty(&groups)?);
        }
        ReportFormat::Text => {
            for group in index.matching(prefix) {
                let name = if group.package.is_empty() {
                    "(no go_package)"
                } else {
                    group.package.as_str()
                };
                println!("{name}");
                for file in &group.files {
                    println!("  {}", file.display());
                }
            }
        }
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<PathBuf>) -> Result<()> {
    let config = load(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
