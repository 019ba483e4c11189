use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};
use walkdir::WalkDir;

use crate::error::{CoreError, CoreResult};

/// Find the directory that directly contains `manifest_file`.
///
/// The extraction root wins if it holds the manifest. Otherwise the tree is
/// walked depth-first with siblings in file-name order, and the first match
/// ends the search. Symlinks are never taken for the manifest.
pub fn find_extension_root(dir: &Path, manifest_file: &str) -> CoreResult<PathBuf> {
    let at_root = fs::symlink_metadata(dir.join(manifest_file));
    if at_root.is_ok_and(|meta| meta.file_type().is_file()) {
        debug!("locate: {manifest_file} at extraction root");
        return Ok(dir.to_path_buf());
    }

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            CoreError::io(format!("searching {}", dir.display()), io::Error::from(e))
        })?;
        if entry.file_type().is_file() && entry.file_name() == manifest_file {
            let root = entry
                .path()
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| dir.to_path_buf());
            info!("locate: extension root {}", root.display());
            return Ok(root);
        }
    }

    Err(CoreError::ManifestNotFound {
        manifest: manifest_file.to_owned(),
    })
}
