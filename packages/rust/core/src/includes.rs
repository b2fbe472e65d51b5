//! Compiler include-path resolution for a package group.
//!
//! Generators resolve imports by searching include directories in order, so
//! the order here is part of the contract: dependency sources first (well
//! known imports must not be shadowed by local forks), then the input root,
//! the output root, and finally the group's own directory for same-package
//! imports written relative to that directory.

use std::path::{Path, PathBuf};

use protogen_shared::DependencySource;

/// Ordered list of include directories with no repeats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncludeSet {
    dirs: Vec<PathBuf>,
}

impl IncludeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `dir` unless it is already present. Returns whether it was added.
    pub fn push(&mut self, dir: impl Into<PathBuf>) -> bool {
        let dir = dir.into();
        if self.dirs.contains(&dir) {
            return false;
        }
        self.dirs.push(dir);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.dirs.iter().map(PathBuf::as_path)
    }

    pub fn as_slice(&self) -> &[PathBuf] {
        &self.dirs
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }
}

impl<P: Into<PathBuf>> FromIterator<P> for IncludeSet {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        let mut set = Self::new();
        for dir in iter {
            set.push(dir);
        }
        set
    }
}

/// Resolve the include set for one package group.
///
/// Order: each dependency's include dir in declaration order, `input_root`,
/// `output_root`, then the directory of the group's first file. Duplicates
/// keep their first position.
pub fn resolve_includes(
    deps: &[DependencySource],
    input_root: &Path,
    output_root: &Path,
    group_files: &[PathBuf],
) -> IncludeSet {
    let first_dir = group_files
        .first()
        .and_then(|f| f.parent())
        .map(Path::to_path_buf);

    deps.iter()
        .map(DependencySource::include_dir)
        .chain([input_root.to_path_buf(), output_root.to_path_buf()])
        .chain(first_dir)
        .collect()
}
