//! Definition-file discovery and grouping by declared package.
//!
//! Walks an input tree, reads every `.proto` file, extracts its
//! `option go_package` directive and partitions the files into
//! [`PackageGroup`](protogen_shared::PackageGroup)s. Files without a directive
//! land in the empty-string group.

mod directive;

use std::path::Path;

use protogen_shared::{DefinitionFile, PackageIndex, ProtogenError, Result};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

pub use directive::declared_package;

/// File suffix of definition files.
pub const DEFINITION_SUFFIX: &str = ".proto";

/// Read one definition file and extract its declared package.
pub fn read_definition(path: &Path) -> Result<DefinitionFile> {
    let content = std::fs::read(path).map_err(|e| ProtogenError::io(path, e))?;
    Ok(DefinitionFile {
        path: path.to_path_buf(),
        declared_package: declared_package(path, &content)?,
    })
}

/// Index every definition file under `root`.
///
/// The walk is sorted by file name so group order is reproducible. A
/// malformed directive or an unreadable entry aborts the whole walk.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn index(root: &Path) -> Result<PackageIndex> {
    let mut index = PackageIndex::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| ProtogenError::Walk {
            root: root.to_path_buf(),
            message: e.to_string(),
        })?;

        if !entry.file_type().is_file() || !entry.path().to_string_lossy().ends_with(DEFINITION_SUFFIX) {
            continue;
        }

        let file = read_definition(entry.path())?;
        debug!(path = %file.path.display(), package = %file.declared_package, "indexed definition");
        index.insert(file);
    }

    info!(
        groups = index.len(),
        files = index.file_count(),
        "definition tree indexed"
    );

    Ok(index)
}
