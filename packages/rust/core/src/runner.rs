//! External generator invocation.

use std::fmt;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// A fully composed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// What an external generator produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorOutput {
    /// Whether the process exited with status zero.
    pub success: bool,
    /// Human-readable exit status.
    pub status: String,
    /// Stdout followed by stderr.
    pub combined: Vec<u8>,
}

/// Runs generator invocations. Transport failures (the process could not be
/// started or waited on) are `Err`; a non-zero exit is a successful run with
/// `success == false`.
#[async_trait]
pub trait GeneratorRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> std::io::Result<GeneratorOutput>;
}

/// [`GeneratorRunner`] that spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl GeneratorRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> std::io::Result<GeneratorOutput> {
        debug!(command = %invocation, "running generator");
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .kill_on_drop(true)
            .output()
            .await?;

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        Ok(GeneratorOutput {
            success: output.status.success(),
            status: output.status.to_string(),
            combined,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_display_joins_arguments() {
        let inv = Invocation {
            program: "protoc".into(),
            args: vec!["--go_out=/out".into(), "-I".into(), "/in".into(), "a.proto".into()],
        };
        assert_eq!(inv.to_string(), "protoc --go_out=/out -I /in a.proto");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_runner_captures_output_and_status() {
        let ok = Invocation {
            program: "sh".into(),
            args: vec!["-c".into(), "echo out; echo err >&2".into()],
        };
        let result = ProcessRunner.run(&ok).await.unwrap();
        assert!(result.success);
        assert_eq!(String::from_utf8_lossy(&result.combined), "out\nerr\n");

        let failing = Invocation {
            program: "sh".into(),
            args: vec!["-c".into(), "echo broken >&2; exit 3".into()],
        };
        let result = ProcessRunner.run(&failing).await.unwrap();
        assert!(!result.success);
        assert_eq!(String::from_utf8_lossy(&result.combined), "broken\n");
    }

    #[tokio::test]
    async fn missing_program_is_transport_error() {
        let inv = Invocation {
            program: "protogen-definitely-not-installed".into(),
            args: vec![],
        };
        assert!(ProcessRunner.run(&inv).await.is_err());
    }
}
