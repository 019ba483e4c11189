use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process;

use chrono::Utc;

const WORK_DIR_PREFIX: &str = "bitrix_repack";

/// File name suggested for the rebuilt archive.
pub const DEFAULT_OUTPUT_NAME: &str = "B24AD-custom-url.zip";

/// A working directory under the system temp dir that no other invocation
/// will pick: the process id plus a millisecond timestamp.
pub fn unique_work_dir() -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d%H%M%S%3f");
    env::temp_dir().join(format!("{WORK_DIR_PREFIX}-{}-{stamp}", process::id()))
}

/// True for directories shaped like [`unique_work_dir`] output: directly in
/// the system temp dir and carrying the tool prefix. Only these are wiped
/// when they already exist.
pub fn is_generated_work_dir(path: &Path) -> bool {
    let named = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(&format!("{WORK_DIR_PREFIX}-")));
    named && path.parent() == Some(env::temp_dir().as_path())
}

pub fn default_output_path() -> PathBuf {
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(DEFAULT_OUTPUT_NAME)
}

/// Append `.zip` unless the path already ends with it (any case).
pub fn ensure_zip_extension(path: PathBuf) -> PathBuf {
    let has_zip = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
    if has_zip || path.as_os_str().is_empty() {
        return path;
    }
    let mut raw: OsString = path.into_os_string();
    raw.push(".zip");
    PathBuf::from(raw)
}
