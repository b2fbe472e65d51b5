//! Core domain types shared by the indexer, fetcher and pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Repository references
// ---------------------------------------------------------------------------

/// Whether a repository reference names a branch (moving) or a tag (fixed).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    #[default]
    Branch,
    Tag,
}

impl ReferenceKind {
    /// Fully qualified git ref name for `reference`.
    pub fn qualify(self, reference: &str) -> String {
        match self {
            Self::Branch => format!("refs/heads/{reference}"),
            Self::Tag => format!("refs/tags/{reference}"),
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Branch => f.write_str("branch"),
            Self::Tag => f.write_str("tag"),
        }
    }
}

/// A repository pinned to a branch or tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    /// Clone URL.
    pub url: String,
    /// Branch or tag name.
    pub reference: String,
    /// How `reference` is resolved.
    #[serde(default)]
    pub kind: ReferenceKind,
}

impl RepoRef {
    pub fn new(url: impl Into<String>, reference: impl Into<String>, kind: ReferenceKind) -> Self {
        Self {
            url: url.into(),
            reference: reference.into(),
            kind,
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.url, self.reference, self.kind)
    }
}

// ---------------------------------------------------------------------------
// DependencySource
// ---------------------------------------------------------------------------

/// An external schema repository that has been fetched to disk.
///
/// Immutable once created. The checkout directory is owned by whoever holds
/// the fetch guard, not by this value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySource {
    /// Short name used in logs (e.g. `googleapis`).
    pub name: String,
    /// Where and at which reference it was fetched from.
    pub repo: RepoRef,
    /// Optional subdirectory of the checkout that acts as the include root.
    pub include_subdir: Option<PathBuf>,
    /// Root of the fetched tree.
    pub local_path: PathBuf,
}

impl DependencySource {
    /// Directory handed to the compiler as a search path.
    pub fn include_dir(&self) -> PathBuf {
        match &self.include_subdir {
            Some(sub) => self.local_path.join(sub),
            None => self.local_path.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Definition files and package groups
// ---------------------------------------------------------------------------

/// A definition file together with the package it declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefinitionFile {
    pub path: PathBuf,
    /// Empty when the file carries no package directive.
    pub declared_package: String,
}

/// All definition files sharing one declared package, in walk order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageGroup {
    pub package: String,
    pub files: Vec<PathBuf>,
}

impl PackageGroup {
    /// Directory of the first file in the group.
    pub fn first_dir(&self) -> Option<&Path> {
        self.files.first().and_then(|f| f.parent())
    }

    /// Base names of every file, in group order.
    pub fn file_names(&self) -> Vec<String> {
        self.files
            .iter()
            .map(|f| {
                f.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| f.to_string_lossy().into_owned())
            })
            .collect()
    }
}

/// Whether a package name is selected by the configured prefix.
///
/// An empty prefix selects everything, including the empty package.
pub fn matches_prefix(package: &str, prefix: &str) -> bool {
    package.starts_with(prefix)
}

/// Partition of the discovered definition files by declared package.
///
/// Groups iterate in package-name order; files inside a group keep the order
/// in which they were inserted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PackageIndex {
    groups: BTreeMap<String, PackageGroup>,
}

impl PackageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a file to the group for its declared package.
    pub fn insert(&mut self, file: DefinitionFile) {
        let DefinitionFile {
            path,
            declared_package,
        } = file;
        self.groups
            .entry(declared_package.clone())
            .or_insert_with(|| PackageGroup {
                package: declared_package,
                files: Vec::new(),
            })
            .files
            .push(path);
    }

    pub fn get(&self, package: &str) -> Option<&PackageGroup> {
        self.groups.get(package)
    }

    pub fn groups(&self) -> impl Iterator<Item = &PackageGroup> {
        self.groups.values()
    }

    /// Groups whose package name starts with `prefix`.
    pub fn matching<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a PackageGroup> + 'a {
        self.groups
            .values()
            .filter(move |g| matches_prefix(&g.package, prefix))
    }

    /// Number of package groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of indexed files across all groups.
    pub fn file_count(&self) -> usize {
        self.groups.values().map(|g| g.files.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Failure policy
// ---------------------------------------------------------------------------

/// What the pipeline does after a stage fails for one package group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop the whole run at the first failure.
    #[default]
    Abort,
    /// Skip the failing group's remaining stages, process the other groups,
    /// then fail with every collected error.
    Continue,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, package: &str) -> DefinitionFile {
        DefinitionFile {
            path: PathBuf::from(path),
            declared_package: package.into(),
        }
    }

    #[test]
    fn reference_kind_qualifies_refs() {
        assert_eq!(ReferenceKind::Branch.qualify("main"), "refs/heads/main");
        assert_eq!(ReferenceKind::Tag.qualify("v1.0.4"), "refs/tags/v1.0.4");
    }

    #[test]
    fn include_dir_honours_subdir() {
        let mut dep = DependencySource {
            name: "protobuf".into(),
            repo: RepoRef::new("https://github.com/google/protobuf", "main", ReferenceKind::Branch),
            include_subdir: None,
            local_path: PathBuf::from("/tmp/gclone1"),
        };
        assert_eq!(dep.include_dir(), PathBuf::from("/tmp/gclone1"));
        dep.include_subdir = Some(PathBuf::from("src"));
        assert_eq!(dep.include_dir(), PathBuf::from("/tmp/gclone1/src"));
    }

    #[test]
    fn index_preserves_insertion_order_within_group() {
        let mut index = PackageIndex::new();
        index.insert(file("/in/b/z.proto", "github.com/org/a"));
        index.insert(file("/in/a/y.proto", "github.com/org/b"));
        index.insert(file("/in/a/x.proto", "github.com/org/a"));

        let group = index.get("github.com/org/a").expect("group a");
        assert_eq!(
            group.files,
            vec![PathBuf::from("/in/b/z.proto"), PathBuf::from("/in/a/x.proto")]
        );
        assert_eq!(group.first_dir(), Some(Path::new("/in/b")));
        assert_eq!(group.file_names(), vec!["z.proto", "x.proto"]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.file_count(), 3);
    }

    #[test]
    fn prefix_filter_is_pure_predicate() {
        let mut index = PackageIndex::new();
        index.insert(file("/in/a.proto", "github.com/org/a"));
        index.insert(file("/in/b.proto", "example.com/other"));
        index.insert(file("/in/c.proto", ""));

        let names: Vec<_> = index
            .matching("github.com/org")
            .map(|g| g.package.as_str())
            .collect();
        assert_eq!(names, vec!["github.com/org/a"]);

        assert_eq!(index.matching("").count(), 3);
        assert!(matches_prefix("", ""));
        assert!(!matches_prefix("", "github.com"));
    }

    #[test]
    fn failure_policy_deserializes_kebab_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: FailurePolicy,
        }
        let w: Wrapper = toml::from_str("policy = \"continue\"").expect("parse");
        assert_eq!(w.policy, FailurePolicy::Continue);
        assert_eq!(FailurePolicy::default(), FailurePolicy::Abort);
    }
}
