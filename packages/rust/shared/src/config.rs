//! Application configuration for protogen.
//!
//! User config lives at `~/.protogen/protogen.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ProtogenError, Result};
use crate::types::{FailurePolicy, ReferenceKind, RepoRef};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "protogen.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".protogen";

/// Go package prefix selected when none is configured.
pub const DEFAULT_PREFIX: &str = "github.com/dictyBase/go-genproto";

// ---------------------------------------------------------------------------
// Config structs (matching protogen.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Input, output and filtering.
    #[serde(default)]
    pub generate: GenerateConfig,

    /// Repository holding the definition tree, used when no local input is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_repo: Option<RepoRef>,

    /// External schema repositories added to the include path, in order.
    #[serde(default = "default_dependencies")]
    pub dependencies: Vec<DependencyConfig>,

    /// Optional generation stages.
    #[serde(default)]
    pub stages: StagesConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            generate: GenerateConfig::default(),
            input_repo: None,
            dependencies: default_dependencies(),
            stages: StagesConfig::default(),
        }
    }
}

/// `[generate]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateConfig {
    /// Local directory containing definition files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,

    /// Base output path. Defaults to `$GOPATH/src`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Package prefix selecting which groups are generated.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Compiler executable.
    #[serde(default = "default_protoc")]
    pub protoc: String,

    /// Behavior after a stage fails.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            input: None,
            output: None,
            prefix: default_prefix(),
            protoc: default_protoc(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.into()
}
fn default_protoc() -> String {
    "protoc".into()
}

/// `[[dependencies]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyConfig {
    /// Short name used in logs and CLI overrides.
    pub name: String,
    /// Clone URL.
    pub url: String,
    /// Branch or tag name.
    pub reference: String,
    /// Whether `reference` is a branch or a tag.
    #[serde(default)]
    pub kind: ReferenceKind,
    /// Subdirectory of the checkout used as include root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_subdir: Option<String>,
}

impl DependencyConfig {
    pub fn repo(&self) -> RepoRef {
        RepoRef::new(&self.url, &self.reference, self.kind)
    }
}

fn default_dependencies() -> Vec<DependencyConfig> {
    vec![
        DependencyConfig {
            name: "googleapis".into(),
            url: "https://github.com/googleapis/googleapis".into(),
            reference: "master".into(),
            kind: ReferenceKind::Branch,
            include_subdir: None,
        },
        DependencyConfig {
            name: "protobuf".into(),
            url: "https://github.com/protocolbuffers/protobuf".into(),
            reference: "main".into(),
            kind: ReferenceKind::Branch,
            include_subdir: Some("src".into()),
        },
        DependencyConfig {
            name: "validator".into(),
            url: "https://github.com/bufbuild/protoc-gen-validate".into(),
            reference: "v1.0.4".into(),
            kind: ReferenceKind::Tag,
            include_subdir: None,
        },
    ]
}

/// `[stages]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagesConfig {
    /// Run the validator plugin.
    #[serde(default = "default_true")]
    pub validator: bool,

    /// Generate documentation.
    #[serde(default)]
    pub docs: bool,

    /// Documentation output root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_output: Option<String>,

    /// Generate API descriptions.
    #[serde(default)]
    pub api_description: bool,

    /// API description output root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_description_output: Option<String>,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            validator: true,
            docs: false,
            docs_output: None,
            api_description: false,
            api_description_output: None,
        }
    }
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Where the definition tree comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// An existing local directory.
    Local(PathBuf),
    /// A repository fetched for this run.
    Repository(RepoRef),
}

/// Output targets of the optional stages. `None` means disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOptions {
    pub validator: bool,
    pub docs_output: Option<PathBuf>,
    pub api_description_output: Option<PathBuf>,
}

/// Immutable configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub input: InputSource,
    pub output_root: PathBuf,
    pub prefix: String,
    pub protoc: String,
    pub dependencies: Vec<DependencyConfig>,
    pub stages: StageOptions,
    pub failure_policy: FailurePolicy,
}

impl TryFrom<&AppConfig> for RunConfig {
    type Error = ProtogenError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        let input = match (&config.generate.input, &config.input_repo) {
            (Some(dir), _) => InputSource::Local(PathBuf::from(dir)),
            (None, Some(repo)) => {
                validate_repo(repo)?;
                InputSource::Repository(repo.clone())
            }
            (None, None) => {
                return Err(ProtogenError::config(
                    "no input given: set generate.input or input_repo",
                ));
            }
        };

        let output_root = match &config.generate.output {
            Some(dir) => PathBuf::from(dir),
            None => default_output_root()?,
        };

        let mut seen = HashSet::new();
        for dep in &config.dependencies {
            if !seen.insert(dep.name.as_str()) {
                return Err(ProtogenError::config(format!(
                    "dependency '{}' is declared more than once",
                    dep.name
                )));
            }
            validate_repo(&dep.repo())?;
        }

        let stages = &config.stages;
        let docs_output = optional_output(stages.docs, stages.docs_output.as_deref(), "docs")?;
        let api_description_output = optional_output(
            stages.api_description,
            stages.api_description_output.as_deref(),
            "api_description",
        )?;

        Ok(Self {
            input,
            output_root,
            prefix: config.generate.prefix.clone(),
            protoc: config.generate.protoc.clone(),
            dependencies: config.dependencies.clone(),
            stages: StageOptions {
                validator: stages.validator,
                docs_output,
                api_description_output,
            },
            failure_policy: config.generate.failure_policy,
        })
    }
}

fn optional_output(enabled: bool, dir: Option<&str>, stage: &str) -> Result<Option<PathBuf>> {
    match (enabled, dir) {
        (false, _) => Ok(None),
        (true, Some(dir)) => Ok(Some(PathBuf::from(dir))),
        (true, None) => Err(ProtogenError::config(format!(
            "stage {stage} is enabled but stages.{stage}_output is not set"
        ))),
    }
}

fn validate_repo(repo: &RepoRef) -> Result<()> {
    Url::parse(&repo.url)
        .map_err(|e| ProtogenError::config(format!("invalid repository URL '{}': {e}", repo.url)))?;
    if repo.reference.trim().is_empty() {
        return Err(ProtogenError::config(format!(
            "repository {} has an empty reference",
            repo.url
        )));
    }
    Ok(())
}

/// `$GOPATH/src`, or `~/go/src` when `GOPATH` is unset.
pub fn default_output_root() -> Result<PathBuf> {
    if let Some(gopath) = std::env::var_os("GOPATH").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(gopath).join("src"));
    }
    let home = dirs::home_dir()
        .ok_or_else(|| ProtogenError::config("could not determine home directory"))?;
    Ok(home.join("go").join("src"))
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.protogen/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ProtogenError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.protogen/protogen.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ProtogenError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ProtogenError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ProtogenError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| ProtogenError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ProtogenError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
