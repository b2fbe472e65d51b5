//! Fetching external schema repositories into disposable checkouts.
//!
//! Every fetch lands in a freshly created, uniquely named temporary
//! directory; prior checkouts are never reused or updated. The returned
//! [`Checkout`] owns that directory and removes it when dropped unless it is
//! explicitly kept.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use protogen_shared::{DependencyConfig, DependencySource, ProtogenError, RepoRef, Result};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, instrument};
use url::Url;

// ---------------------------------------------------------------------------
// Checkout
// ---------------------------------------------------------------------------

/// A repository tree fetched into its own temporary directory.
#[derive(Debug)]
pub struct Checkout {
    repo: RepoRef,
    dir: TempDir,
}

impl Checkout {
    pub fn new(repo: RepoRef, dir: TempDir) -> Self {
        Self { repo, dir }
    }

    /// Root of the fetched tree.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }

    /// Persist the directory past the lifetime of this value.
    pub fn keep(self) -> PathBuf {
        self.dir.keep()
    }
}

/// All checkouts made during one run. Dropping it removes them from disk.
#[derive(Debug, Default)]
pub struct Checkouts {
    items: Vec<Checkout>,
}

impl Checkouts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, checkout: Checkout) {
        self.items.push(checkout);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.items.iter().map(Checkout::path)
    }

    /// Persist every checkout and return where they live.
    pub fn keep_all(self) -> Vec<(RepoRef, PathBuf)> {
        self.items
            .into_iter()
            .map(|c| (c.repo.clone(), c.keep()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Retrieves a repository at a branch or tag.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `repo` into a new temporary directory.
    async fn fetch(&self, repo: &RepoRef) -> Result<Checkout>;

    /// External executable this fetcher shells out to, if any.
    fn program(&self) -> Option<&str> {
        None
    }
}

/// [`Fetcher`] backed by the `git` command line.
///
/// Fetches exactly one ref at depth 1 and checks it out detached, so a tag
/// and a branch of the same name can never be confused.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    git: String,
}

impl GitFetcher {
    pub fn new(git: impl Into<String>) -> Self {
        Self { git: git.into() }
    }

    async fn git(&self, repo: &RepoRef, dir: &Path, args: &[&str]) -> Result<()> {
        debug!(dir = %dir.display(), ?args, "running git");
        let output = Command::new(&self.git)
            .arg("-C")
            .arg(dir)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ProtogenError::fetch(&repo.url, &repo.reference, format!("failed to spawn {}: {e}", self.git))
            })?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(ProtogenError::fetch(
                &repo.url,
                &repo.reference,
                format!("git {} exited with {}: {}", args[0], output.status, combined.trim()),
            ));
        }
        Ok(())
    }
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self::new("git")
    }
}

#[async_trait]
impl Fetcher for GitFetcher {
    #[instrument(skip_all, fields(url = %repo.url, reference = %repo.reference, kind = %repo.kind))]
    async fn fetch(&self, repo: &RepoRef) -> Result<Checkout> {
        let dir = tempfile::Builder::new()
            .prefix(&checkout_prefix(&repo.url))
            .tempdir()
            .map_err(|e| {
                ProtogenError::fetch(&repo.url, &repo.reference, format!("error in creating temp dir: {e}"))
            })?;

        let refspec = repo.kind.qualify(&repo.reference);
        self.git(repo, dir.path(), &["init", "--quiet"]).await?;
        self.git(
            repo,
            dir.path(),
            &["fetch", "--quiet", "--depth", "1", &repo.url, &refspec],
        )
        .await?;
        self.git(repo, dir.path(), &["checkout", "--quiet", "FETCH_HEAD"])
            .await?;

        info!(path = %dir.path().display(), "fetched repository");
        Ok(Checkout::new(repo.clone(), dir))
    }

    fn program(&self) -> Option<&str> {
        Some(&self.git)
    }
}

/// Temp directory prefix derived from the repository name.
fn checkout_prefix(url: &str) -> String {
    let name = Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segs| segs.rfind(|s| !s.is_empty()).map(str::to_string))
        })
        .map(|s| s.trim_end_matches(".git").to_string())
        .filter(|s| !s.is_empty());

    match name {
        Some(name) => format!("gclone-{name}-"),
        None => "gclone-".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Dependency fetching
// ---------------------------------------------------------------------------

/// Fetch every dependency concurrently.
///
/// Sources come back in declaration order and their checkouts are added to
/// `checkouts`, which the caller owns. The first failure in declaration order
/// is returned; fetches still in flight are cancelled.
#[instrument(skip_all, fields(count = deps.len()))]
pub async fn fetch_dependencies(
    fetcher: Arc<dyn Fetcher>,
    deps: &[DependencyConfig],
    checkouts: &mut Checkouts,
) -> Result<Vec<DependencySource>> {
    let mut handles = deps
        .iter()
        .map(|dep| {
            let fetcher = Arc::clone(&fetcher);
            let repo = dep.repo();
            tokio::spawn(async move { fetcher.fetch(&repo).await })
        })
        .collect::<Vec<_>>()
        .into_iter();

    let mut sources = Vec::with_capacity(deps.len());
    for dep in deps {
        let Some(handle) = handles.next() else { break };
        let joined = handle.await.map_err(|e| {
            ProtogenError::fetch(&dep.url, &dep.reference, format!("fetch task failed: {e}"))
        });
        let checkout = match joined.and_then(|r| r) {
            Ok(checkout) => checkout,
            Err(e) => {
                for rest in handles.by_ref() {
                    rest.abort();
                }
                return Err(e);
            }
        };

        info!(name = %dep.name, path = %checkout.path().display(), "dependency ready");
        sources.push(DependencySource {
            name: dep.name.clone(),
            repo: dep.repo(),
            include_subdir: dep.include_subdir.as_ref().map(PathBuf::from),
            local_path: checkout.path().to_path_buf(),
        });
        checkouts.push(checkout);
    }

    Ok(sources)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use protogen_shared::ReferenceKind;

    use super::*;

    /// Fetcher that creates an empty checkout, failing for refs named `missing`.
    struct FakeFetcher;

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(&self, repo: &RepoRef) -> Result<Checkout> {
            if repo.reference == "missing" {
                return Err(ProtogenError::fetch(&repo.url, &repo.reference, "unknown ref"));
            }
            let dir = tempfile::tempdir().map_err(|e| ProtogenError::io("tmp", e))?;
            std::fs::write(dir.path().join("REF"), &repo.reference)
                .map_err(|e| ProtogenError::io(dir.path(), e))?;
            Ok(Checkout::new(repo.clone(), dir))
        }
    }

    fn dep(name: &str, reference: &str, subdir: Option<&str>) -> DependencyConfig {
        DependencyConfig {
            name: name.into(),
            url: format!("https://example.com/{name}"),
            reference: reference.into(),
            kind: ReferenceKind::Branch,
            include_subdir: subdir.map(String::from),
        }
    }

    #[test]
    fn checkout_prefix_uses_repo_name() {
        assert_eq!(checkout_prefix("https://github.com/googleapis/googleapis"), "gclone-googleapis-");
        assert_eq!(checkout_prefix("https://github.com/google/protobuf.git/"), "gclone-protobuf-");
        assert_eq!(checkout_prefix("not a url"), "gclone-");
    }

    #[tokio::test]
    async fn fetches_in_declaration_order() {
        let deps = vec![
            dep("googleapis", "master", None),
            dep("protobuf", "main", Some("src")),
            dep("validator", "v1", None),
        ];

        let mut checkouts = Checkouts::new();
        let sources = fetch_dependencies(Arc::new(FakeFetcher), &deps, &mut checkouts)
            .await
            .unwrap();

        let names: Vec<_> = sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["googleapis", "protobuf", "validator"]);
        assert_eq!(checkouts.len(), 3);

        let unique: HashSet<_> = sources.iter().map(|s| s.local_path.clone()).collect();
        assert_eq!(unique.len(), 3, "every fetch gets its own directory");

        let protobuf = &sources[1];
        assert_eq!(protobuf.include_dir(), protobuf.local_path.join("src"));
        let stored = std::fs::read_to_string(protobuf.local_path.join("REF")).unwrap();
        assert_eq!(stored, "main");
    }

    #[tokio::test]
    async fn dropping_checkouts_removes_directories() {
        let deps = vec![dep("a", "main", None)];
        let mut checkouts = Checkouts::new();
        let sources = fetch_dependencies(Arc::new(FakeFetcher), &deps, &mut checkouts)
            .await
            .unwrap();
        assert!(sources[0].local_path.exists());
        drop(checkouts);
        assert!(!sources[0].local_path.exists());
    }

    #[tokio::test]
    async fn kept_checkouts_survive() {
        let deps = vec![dep("a", "main", None)];
        let mut checkouts = Checkouts::new();
        fetch_dependencies(Arc::new(FakeFetcher), &deps, &mut checkouts)
            .await
            .unwrap();
        let kept = checkouts.keep_all();
        assert_eq!(kept.len(), 1);
        assert!(kept[0].1.exists());
        std::fs::remove_dir_all(&kept[0].1).unwrap();
    }

    // -- real git ----------------------------------------------------------

    fn has_git() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    fn run_git(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .arg("-C")
            .arg(dir)
            .args([
                "-c",
                "user.name=protogen",
                "-c",
                "user.email=protogen@example.com",
                "-c",
                "commit.gpgsign=false",
                "-c",
                "tag.gpgsign=false",
            ])
            .args(args)
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    /// Repository with `v1` tagged at the first commit and `main` one commit ahead.
    fn upstream() -> (TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        run_git(root, &["init", "--quiet"]);
        run_git(root, &["checkout", "--quiet", "-b", "main"]);
        std::fs::write(root.join("VERSION"), "one").unwrap();
        run_git(root, &["add", "VERSION"]);
        run_git(root, &["commit", "--quiet", "-m", "one"]);
        run_git(root, &["tag", "v1"]);
        std::fs::write(root.join("VERSION"), "two").unwrap();
        run_git(root, &["commit", "--quiet", "-am", "two"]);
        let url = format!("file://{}", root.display());
        (dir, url)
    }

    #[tokio::test]
    async fn git_fetcher_checks_out_branch_and_tag() {
        if !has_git() {
            return;
        }
        let (_upstream, url) = upstream();
        let fetcher = GitFetcher::default();

        let branch = fetcher
            .fetch(&RepoRef::new(&url, "main", ReferenceKind::Branch))
            .await
            .unwrap();
        let tag = fetcher
            .fetch(&RepoRef::new(&url, "v1", ReferenceKind::Tag))
            .await
            .unwrap();

        assert_ne!(branch.path(), tag.path());
        assert_eq!(std::fs::read_to_string(branch.path().join("VERSION")).unwrap(), "two");
        assert_eq!(std::fs::read_to_string(tag.path().join("VERSION")).unwrap(), "one");
    }

    #[tokio::test]
    async fn git_fetcher_unknown_tag_is_fetch_error() {
        if !has_git() {
            return;
        }
        let (_upstream, url) = upstream();
        let err = GitFetcher::default()
            .fetch(&RepoRef::new(&url, "v9", ReferenceKind::Tag))
            .await
            .unwrap_err();

        match err {
            ProtogenError::Fetch { url: failed, reference, .. } => {
                assert_eq!(failed, url);
                assert_eq!(reference, "v9");
            }
            other => panic!("expected fetch error, got {other}"),
        }
    }

    /// The pid's process is gone or only a zombie awaiting reaping.
    #[cfg(target_os = "linux")]
    fn exited(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
            Err(_) => true,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn cancelled_fetch_kills_git() {
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = dir.path().join("slow-git");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho $$ > {}\nexec sleep 30\n", pid_file.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let fetcher = GitFetcher::new(script.to_string_lossy());
        let repo = RepoRef::new("https://example.com/slow", "main", ReferenceKind::Branch);
        let task = tokio::spawn(async move { fetcher.fetch(&repo).await });

        let mut pid = String::new();
        for _ in 0..100 {
            if let Ok(s) = std::fs::read_to_string(&pid_file) {
                if !s.trim().is_empty() {
                    pid = s.trim().to_string();
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!pid.is_empty(), "git stand-in never started");

        task.abort();
        let _ = task.await;

        let mut gone = false;
        for _ in 0..100 {
            if exited(&pid) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(gone, "git child {pid} outlived its cancelled fetch");
    }

    #[tokio::test]
    async fn unresolvable_reference_fails() {
        let deps = vec![dep("a", "main", None), dep("b", "missing", None)];
        let mut checkouts = Checkouts::new();
        let err = fetch_dependencies(Arc::new(FakeFetcher), &deps, &mut checkouts)
            .await
            .unwrap_err();
        // sources fetched before the failure stay with the caller
        assert_eq!(checkouts.len(), 1);
        match err {
            ProtogenError::Fetch { url, reference, .. } => {
                assert_eq!(url, "https://example.com/b");
                assert_eq!(reference, "missing");
            }
            other => panic!("expected fetch error, got {other}"),
        }
    }
}
