use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::env;
use crate::manifest::{EXPECTED_NAME, InjectionPolicy, MANIFEST_FILE, Manifest};

#[derive(Clone, Debug)]
pub struct RepackOptions {
    pub expected_name: String,
    pub manifest_file: String,
    pub policy: InjectionPolicy,
    pub work_dir: PathBuf,
    pub keep_work_dir: bool,
}

impl Default for RepackOptions {
    fn default() -> Self {
        Self {
            expected_name: EXPECTED_NAME.into(),
            manifest_file: MANIFEST_FILE.into(),
            policy: InjectionPolicy::default(),
            work_dir: env::unique_work_dir(),
            keep_work_dir: false,
        }
    }
}

/// An archive that has been unpacked and whose manifest passed the identity
/// check, waiting for a portal URL.
#[derive(Debug)]
pub struct PreparedExtension {
    pub(super) work_dir: PathBuf,
    pub(super) root: PathBuf,
    pub(super) manifest_path: PathBuf,
    pub(super) manifest: Manifest,
}

impl PreparedExtension {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version(&self) -> Option<&str> {
        self.manifest.get("version").and_then(|v| v.as_str())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SuccessSummary {
    pub http_pattern: String,
    pub https_pattern: String,
    pub output: PathBuf,
    pub extension_root: String,
    pub entries: usize,
    pub policy: InjectionPolicy,
}
