use std::path::Path;

#[derive(Clone, Debug)]
pub struct ProgressUpdate {
    pub stage: &'static str,
    pub progress: f32,
    pub message: String,
    pub current_file: Option<String>,
}

pub type ProgressCallback<'a> = Option<&'a mut (dyn FnMut(ProgressUpdate) + Send)>;

pub fn emit_progress(cb: &mut ProgressCallback<'_>, update: ProgressUpdate) {
    if let Some(callback) = cb.as_deref_mut() {
        callback(update);
    }
}

/// Compute how far through a list of `total` items we are, as a percentage.
#[must_use]
pub fn progress_percent(done: usize, total: usize) -> f32 {
    if total == 0 {
        return 100.0;
    }
    (done as f32 / total as f32) * 100.0
}

/// Archive entry name for `path` relative to `root`: components joined with
/// `/` regardless of platform. `None` when `path` is not under `root` or is
/// `root` itself.
pub fn relative_entry_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}
