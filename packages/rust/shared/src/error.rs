//! Error types for protogen.
//!
//! Library crates use [`ProtogenError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all protogen operations.
#[derive(Debug, thiserror::Error)]
pub enum ProtogenError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A dependency or input repository could not be fetched at the given reference.
    #[error("unable to fetch {url} at {reference}: {message}")]
    Fetch {
        url: String,
        reference: String,
        message: String,
    },

    /// The definition tree could not be walked.
    #[error("{root:?} directory walking error: {message}")]
    Walk { root: PathBuf, message: String },

    /// A definition file carries a malformed package directive.
    #[error("parse error in {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    /// An output location for a stage could not be prepared.
    #[error("stage {stage} could not prepare {path:?}: {source}")]
    StageSetup {
        stage: String,
        path: PathBuf,
        source: std::io::Error,
    },

    /// An external generator failed. `output` is its combined stdout and stderr.
    #[error("stage {stage} failed for package {package:?}: {message}\n{output}")]
    StageExecution {
        stage: String,
        package: String,
        message: String,
        output: String,
    },

    /// A required external executable is not on `PATH`.
    #[error("command {name} not found in PATH")]
    MissingBinary { name: String },

    /// One or more package groups failed under the continue-on-failure policy.
    #[error("{} package group(s) failed:\n{}", .0.len(), render_failures(.0))]
    GroupFailures(Vec<ProtogenError>),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ProtogenError>;

impl ProtogenError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error for the given file.
    pub fn parse(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a fetch error for a repository reference.
    pub fn fetch(
        url: impl Into<String>,
        reference: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Fetch {
            url: url.into(),
            reference: reference.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

fn render_failures(failures: &[ProtogenError]) -> String {
    failures
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ProtogenError::config("missing input root");
        assert_eq!(err.to_string(), "config error: missing input root");

        let err = ProtogenError::fetch("https://example.com/repo", "v9", "unknown tag");
        assert_eq!(
            err.to_string(),
            "unable to fetch https://example.com/repo at v9: unknown tag"
        );
    }

    #[test]
    fn stage_execution_carries_output() {
        let err = ProtogenError::StageExecution {
            stage: "go".into(),
            package: "github.com/org/pkg".into(),
            message: "exit status 1".into(),
            output: "foo.proto:3:1: Expected \";\".".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("stage go failed"));
        assert!(msg.contains("foo.proto:3:1"));
    }

    #[test]
    fn group_failures_lists_each_failure() {
        let err = ProtogenError::GroupFailures(vec![
            ProtogenError::MissingBinary {
                name: "protoc".into(),
            },
            ProtogenError::config("bad"),
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("2 package group(s) failed"));
        assert!(msg.contains("  - command protoc not found in PATH"));
        assert!(msg.contains("  - config error: bad"));
    }
}
