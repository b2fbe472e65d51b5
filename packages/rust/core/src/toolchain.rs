//! Preflight check for required external executables.

use std::path::PathBuf;

use protogen_shared::{InputSource, ProtogenError, Result, RunConfig};
use tracing::debug;

use crate::stage::enabled_stages;

/// Locate `program` the way a shell would.
///
/// Names containing a path separator are checked directly; bare names are
/// searched for in every `PATH` entry. Only executable files count.
pub fn find_program(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

/// Executables a run of `config` needs: the compiler, one plugin per enabled
/// stage, and `fetch_program` when anything is fetched.
pub fn required_programs(config: &RunConfig, fetch_program: Option<&str>) -> Vec<String> {
    let mut programs = vec![config.protoc.clone()];
    programs.extend(enabled_stages(&config.stages).map(|s| s.plugin_binary()));

    let fetches = !config.dependencies.is_empty()
        || matches!(config.input, InputSource::Repository(_));
    if let (true, Some(program)) = (fetches, fetch_program) {
        programs.push(program.to_string());
    }
    programs
}

/// Fail with `MissingBinary` for the first required program not found.
pub fn verify(config: &RunConfig, fetch_program: Option<&str>) -> Result<()> {
    for program in required_programs(config, fetch_program) {
        match find_program(&program) {
            Some(path) => debug!(program = %program, path = %path.display(), "found executable"),
            None => return Err(ProtogenError::MissingBinary { name: program }),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use protogen_shared::{FailurePolicy, ReferenceKind, RepoRef, StageOptions};

    use super::*;

    fn config(protoc: &str) -> RunConfig {
        RunConfig {
            input: InputSource::Local(PathBuf::from("/in")),
            output_root: PathBuf::from("/out"),
            prefix: String::new(),
            protoc: protoc.into(),
            dependencies: vec![],
            stages: StageOptions {
                validator: true,
                docs_output: None,
                api_description_output: Some("/api".into()),
            },
            failure_policy: FailurePolicy::Abort,
        }
    }

    #[test]
    fn required_programs_follow_enabled_stages() {
        let programs = required_programs(&config("protoc"), Some("git"));
        assert_eq!(
            programs,
            vec![
                "protoc",
                "protoc-gen-go",
                "protoc-gen-grpc-gateway",
                "protoc-gen-validate",
                "protoc-gen-openapiv2",
            ]
        );
    }

    #[test]
    fn fetch_program_required_only_when_fetching() {
        let mut cfg = config("protoc");
        assert!(!required_programs(&cfg, Some("git")).contains(&"git".to_string()));

        cfg.input = InputSource::Repository(RepoRef::new(
            "https://example.com/apis",
            "main",
            ReferenceKind::Branch,
        ));
        assert!(required_programs(&cfg, Some("git")).contains(&"git".to_string()));
    }

    #[cfg(unix)]
    fn write_tool(dir: &std::path::Path, name: &str, mode: u32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let tool = dir.join(name);
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(mode)).unwrap();
        tool
    }

    #[cfg(unix)]
    #[test]
    fn explicit_path_is_checked_directly() {
        let dir = tempfile::tempdir().unwrap();
        let tool = write_tool(dir.path(), "protoc", 0o755);
        assert!(find_program(tool.to_str().unwrap()).is_some());
        assert_eq!(find_program(dir.path().join("absent").to_str().unwrap()), None);
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_file_is_not_a_program() {
        let dir = tempfile::tempdir().unwrap();
        let tool = write_tool(dir.path(), "protoc", 0o644);
        assert_eq!(find_program(tool.to_str().unwrap()), None);

        let err = verify(&config(tool.to_str().unwrap()), None).unwrap_err();
        assert!(matches!(err, ProtogenError::MissingBinary { .. }));
    }

    #[test]
    fn missing_compiler_is_reported() {
        let err = verify(&config("/nonexistent/protogen-protoc"), None).unwrap_err();
        match err {
            ProtogenError::MissingBinary { name } => assert_eq!(name, "/nonexistent/protogen-protoc"),
            other => panic!("expected missing binary, got {other}"),
        }
    }
}
