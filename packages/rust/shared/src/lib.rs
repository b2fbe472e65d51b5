//! Shared types, error model, and configuration for protogen.
//!
//! This crate is the foundation depended on by all other protogen crates.
//! It provides:
//! - [`ProtogenError`]: the unified error type
//! - Domain types ([`DependencySource`], [`PackageIndex`], [`PackageGroup`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DEFAULT_PREFIX, DependencyConfig, GenerateConfig, InputSource, RunConfig,
    StageOptions, StagesConfig, config_dir, config_file_path, default_output_root, init_config,
    load_config, load_config_from,
};
pub use error::{ProtogenError, Result};
pub use types::{
    DefinitionFile, DependencySource, FailurePolicy, PackageGroup, PackageIndex, ReferenceKind,
    RepoRef, matches_prefix,
};
