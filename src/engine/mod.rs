use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::archive::{extract_zip, zip_directory};
use crate::engine::models::{PreparedExtension, RepackOptions, SuccessSummary};
use crate::engine::state::Stage;
use crate::env::is_generated_work_dir;
use crate::error::{CoreError, CoreResult};
use crate::locator::find_extension_root;
use crate::manifest::{Manifest, UrlPatterns, normalize_url};
use crate::util::{ProgressCallback, ProgressUpdate, emit_progress, relative_entry_name};

pub mod models;
pub mod state;

/// Runs extract → locate → validate → transform → rebuild on one archive.
///
/// The working directory is removed after a successful run and left in place
/// when anything fails, so it can be inspected. An existing directory is only
/// wiped when it is one of ours (see [`is_generated_work_dir`]); any other
/// directory must be empty, and never contain the input or the output.
pub struct Repackager {
    options: RepackOptions,
}

impl Repackager {
    pub fn new(options: RepackOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RepackOptions {
        &self.options
    }

    /// Whole pipeline in one call. Inputs are checked before anything touches
    /// the disk.
    pub fn process_archive(
        &self,
        input: &Path,
        url_input: &str,
        output: &Path,
        progress: &mut ProgressCallback<'_>,
    ) -> CoreResult<SuccessSummary> {
        require_path(input, "input archive path")?;
        require_path(output, "output archive path")?;
        let patterns = normalize_url(url_input)?;
        ensure_outside(&self.options.work_dir, output, "output archive")?;

        let prepared = self.prepare(input, progress)?;
        self.finish(prepared, &patterns, output, progress)
    }

    /// Unpack `input` into the working directory, find the manifest and check
    /// that it belongs to the expected extension.
    pub fn prepare(
        &self,
        input: &Path,
        progress: &mut ProgressCallback<'_>,
    ) -> CoreResult<PreparedExtension> {
        require_path(input, "input archive path")?;
        let result = self.try_prepare(input, progress);
        if let Err(err) = &result {
            self.report_failure("prepare", err);
        }
        result
    }

    /// Inject `patterns` into the prepared manifest, write it back and zip the
    /// extension root to `output`.
    pub fn finish(
        &self,
        prepared: PreparedExtension,
        patterns: &UrlPatterns,
        output: &Path,
        progress: &mut ProgressCallback<'_>,
    ) -> CoreResult<SuccessSummary> {
        require_path(output, "output archive path")?;
        let result = self.try_finish(prepared, patterns, output, progress);
        if let Err(err) = &result {
            self.report_failure("finish", err);
        }
        result
    }

    fn try_prepare(
        &self,
        input: &Path,
        progress: &mut ProgressCallback<'_>,
    ) -> CoreResult<PreparedExtension> {
        let work_dir = self.options.work_dir.clone();
        ensure_outside(&work_dir, input, "input archive")?;
        reset_work_dir(&work_dir)?;

        enter(progress, Stage::Extracting);
        extract_zip(input, &work_dir, progress)?;

        enter(progress, Stage::Locating);
        let root = find_extension_root(&work_dir, &self.options.manifest_file)?;
        let manifest_path = root.join(&self.options.manifest_file);

        enter(progress, Stage::Validating);
        let manifest = Manifest::load(&manifest_path)?;
        manifest.validate(&self.options.expected_name)?;
        info!(
            "repack: {} accepted ({})",
            manifest_path.display(),
            self.options.expected_name
        );

        Ok(PreparedExtension {
            work_dir,
            root,
            manifest_path,
            manifest,
        })
    }

    fn try_finish(
        &self,
        prepared: PreparedExtension,
        patterns: &UrlPatterns,
        output: &Path,
        progress: &mut ProgressCallback<'_>,
    ) -> CoreResult<SuccessSummary> {
        let PreparedExtension {
            work_dir,
            root,
            manifest_path,
            mut manifest,
        } = prepared;
        ensure_outside(&work_dir, output, "output archive")?;

        enter(progress, Stage::Transforming);
        manifest.apply_patterns(patterns, self.options.policy);
        manifest.save(&manifest_path)?;

        enter(progress, Stage::Building);
        let entries = zip_directory(&root, output, progress)?;

        let extension_root =
            relative_entry_name(&work_dir, &root).unwrap_or_else(|| ".".to_owned());

        if self.options.keep_work_dir {
            info!("repack: keeping working directory {}", work_dir.display());
        } else {
            enter(progress, Stage::CleaningUp);
            // The archive is already written; a leftover temp dir is not a failure.
            if let Err(err) = fs::remove_dir_all(&work_dir) {
                warn!(
                    "repack: could not remove working directory {}: {err}",
                    work_dir.display()
                );
            }
        }

        info!("repack: done, {} entries in {}", entries, output.display());
        Ok(SuccessSummary {
            http_pattern: patterns.http_pattern(),
            https_pattern: patterns.https_pattern(),
            output: output.to_path_buf(),
            extension_root,
            entries,
            policy: self.options.policy,
        })
    }

    fn report_failure(&self, step: &str, err: &CoreError) {
        // The shell prints the error itself.
        debug!("repack: {step} failed: {err}");
        if self.options.work_dir.exists() {
            warn!(
                "repack: working directory left at {}",
                self.options.work_dir.display()
            );
        }
    }
}

fn require_path(path: &Path, field: &'static str) -> CoreResult<()> {
    if path.as_os_str().is_empty() {
        return Err(CoreError::EmptyInput { field });
    }
    Ok(())
}

fn reset_work_dir(work_dir: &Path) -> CoreResult<()> {
    let context = || format!("preparing working directory {}", work_dir.display());
    match fs::symlink_metadata(work_dir) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(CoreError::io(context(), err)),
        Ok(meta) if meta.is_dir() && is_generated_work_dir(work_dir) => {
            info!("repack: clearing leftover {}", work_dir.display());
            fs::remove_dir_all(work_dir).map_err(|e| CoreError::io(context(), e))?;
        }
        Ok(meta) if meta.is_dir() => {
            let mut entries = fs::read_dir(work_dir).map_err(|e| CoreError::io(context(), e))?;
            if entries.next().is_some() {
                return Err(CoreError::io(
                    context(),
                    io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        "directory is not empty and was not created by this tool",
                    ),
                ));
            }
        }
        Ok(_) => {
            return Err(CoreError::io(
                context(),
                io::Error::new(io::ErrorKind::AlreadyExists, "path exists and is not a directory"),
            ));
        }
    }
    fs::create_dir_all(work_dir).map_err(|e| CoreError::io(context(), e))
}

/// Refuse paths the work dir lifecycle would clobber: everything under it is
/// extracted over and removed on success.
fn ensure_outside(work_dir: &Path, path: &Path, what: &str) -> CoreResult<()> {
    if resolve(path).starts_with(resolve(work_dir)) {
        return Err(CoreError::io(
            format!(
                "checking {what} {} against working directory {}",
                path.display(),
                work_dir.display()
            ),
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "it lies inside the working directory",
            ),
        ));
    }
    Ok(())
}

/// Absolute form of `path` with symlinks resolved as far as the path exists.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(real) = fs::canonicalize(path) {
        return real;
    }
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => resolve(parent).join(name),
        _ => absolute,
    }
}

fn enter(progress: &mut ProgressCallback<'_>, stage: Stage) {
    info!("repack: {}", stage.label());
    emit_progress(
        progress,
        ProgressUpdate {
            stage: stage.key(),
            progress: 0.0,
            message: stage.label().into(),
            current_file: None,
        },
    );
}
