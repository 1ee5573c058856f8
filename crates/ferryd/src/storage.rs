//! Persist completed artifacts to the download directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use ferry_services::Artifact;

/// Reduce a peer-declared name to a bare file name. Directory components
/// and traversal segments are dropped.
fn safe_file_name(declared: &str) -> String {
    let last = declared
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty() && *part != "." && *part != "..")
        .unwrap_or("");
    if last.is_empty() {
        "unnamed".to_string()
    } else {
        last.to_string()
    }
}

/// Write `artifact` into `dir`. An existing file of the same name is left
/// alone; the new one gets the transfer id appended.
pub fn store_artifact(dir: &Path, artifact: &Artifact) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create download dir: {}", dir.display()))?;

    let name = safe_file_name(&artifact.name);
    let mut path = dir.join(&name);
    if path.exists() {
        path = dir.join(format!("{}.{}", name, artifact.transfer_id.short()));
    }

    std::fs::write(&path, &artifact.data)
        .with_context(|| format!("failed to write artifact: {}", path.display()))?;
    Ok(path)
}
