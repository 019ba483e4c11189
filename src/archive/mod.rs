use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use walkdir::WalkDir;
use zip::read::ZipArchive;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::error::{CoreError, CoreResult};
use crate::util::{
    ProgressCallback, ProgressUpdate, emit_progress, progress_percent, relative_entry_name,
};

/// Unpack every entry of `archive_path` under `dest`, keeping relative paths
/// and (on Unix) permission bits. Returns the number of entries processed.
///
/// A failed extraction leaves whatever was already written; the caller owns
/// `dest`.
pub fn extract_zip(
    archive_path: &Path,
    dest: &Path,
    progress: &mut ProgressCallback<'_>,
) -> CoreResult<usize> {
    info!(
        "extract: {} -> {}",
        archive_path.display(),
        dest.display()
    );
    let file = fs::File::open(archive_path)
        .map_err(|e| CoreError::archive_read(archive_path, format!("open error: {e}")))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| CoreError::archive_read(archive_path, format!("zip parse error: {e}")))?;
    fs::create_dir_all(dest)
        .map_err(|e| CoreError::io(format!("creating {}", dest.display()), e))?;

    let total = archive.len();
    // Directory modes go on last so a read-only directory cannot block its children.
    let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();

    for i in 0..total {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| CoreError::archive_read(archive_path, format!("zip entry error: {e}")))?;
        let name = entry.name().to_owned();
        let rel = entry.enclosed_name().ok_or_else(|| {
            CoreError::archive_read(archive_path, format!("unsafe entry path {name:?}"))
        })?;
        let out_path = dest.join(rel);

        emit_progress(
            progress,
            ProgressUpdate {
                stage: "extract",
                progress: progress_percent(i, total),
                message: "Extracting archive...".into(),
                current_file: Some(name.clone()),
            },
        );

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(|e| CoreError::io(format!("creating directory {name}"), e))?;
            if let Some(mode) = entry.unix_mode() {
                dir_modes.push((out_path, mode));
            }
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CoreError::io(format!("creating parent of {name}"), e))?;
        }
        let mut out_file = fs::File::create(&out_path)
            .map_err(|e| CoreError::io(format!("creating {name}"), e))?;
        io::copy(&mut entry, &mut out_file)
            .map_err(|e| CoreError::io(format!("writing {name}"), e))?;
        drop(out_file);

        if let Some(mode) = entry.unix_mode() {
            apply_mode(&out_path, mode)?;
        }
        debug!("extract: wrote {name}");
    }

    for (path, mode) in dir_modes.iter().rev() {
        apply_mode(path, *mode)?;
    }

    emit_progress(
        progress,
        ProgressUpdate {
            stage: "extract",
            progress: 100.0,
            message: "Archive extracted".into(),
            current_file: None,
        },
    );
    info!("extract: {total} entries unpacked");
    Ok(total)
}

/// Write every file and directory below `source` into a new zip at `target`.
/// Entry names are relative to `source` and `/`-separated; directories end in
/// `/`. Entries are written in lexicographic depth-first order. Returns the
/// number of entries written.
pub fn zip_directory(
    source: &Path,
    target: &Path,
    progress: &mut ProgressCallback<'_>,
) -> CoreResult<usize> {
    info!("build: {} -> {}", source.display(), target.display());
    let entries = collect_entries(source)?;

    let result = write_entries(source, target, &entries, progress);
    if result.is_err() && target.exists() {
        warn!("build: removing incomplete archive {}", target.display());
        let _ = fs::remove_file(target);
    }
    result
}

struct SourceEntry {
    path: PathBuf,
    name: String,
    is_dir: bool,
}

fn collect_entries(source: &Path) -> CoreResult<Vec<SourceEntry>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            CoreError::io(format!("walking {}", source.display()), io::Error::from(e))
        })?;
        let file_type = entry.file_type();
        if !file_type.is_dir() && !file_type.is_file() {
            warn!("build: skipping special file {}", entry.path().display());
            continue;
        }
        let Some(name) = relative_entry_name(source, entry.path()) else {
            continue;
        };
        entries.push(SourceEntry {
            path: entry.into_path(),
            name,
            is_dir: file_type.is_dir(),
        });
    }
    Ok(entries)
}

fn write_entries(
    source: &Path,
    target: &Path,
    entries: &[SourceEntry],
    progress: &mut ProgressCallback<'_>,
) -> CoreResult<usize> {
    let out = fs::File::create(target)
        .map_err(|e| CoreError::io(format!("creating {}", target.display()), e))?;
    let mut zip = ZipWriter::new(out);
    let total = entries.len();

    for (i, entry) in entries.iter().enumerate() {
        emit_progress(
            progress,
            ProgressUpdate {
                stage: "build",
                progress: progress_percent(i, total),
                message: "Building archive...".into(),
                current_file: Some(entry.name.clone()),
            },
        );

        let metadata = fs::metadata(&entry.path)
            .map_err(|e| CoreError::io(format!("reading metadata of {}", entry.name), e))?;
        let options = entry_options(&metadata, entry.is_dir);

        if entry.is_dir {
            zip.add_directory(format!("{}/", entry.name), options)
                .map_err(|e| zip_write_error(&entry.name, e))?;
            continue;
        }

        zip.start_file(entry.name.as_str(), options)
            .map_err(|e| zip_write_error(&entry.name, e))?;
        let mut file = fs::File::open(&entry.path)
            .map_err(|e| CoreError::io(format!("opening {}", entry.path.display()), e))?;
        io::copy(&mut file, &mut zip)
            .map_err(|e| CoreError::io(format!("compressing {}", entry.name), e))?;
        debug!("build: added {}", entry.name);
    }

    zip.finish()
        .map_err(|e| zip_write_error(&target.display().to_string(), e))?;

    emit_progress(
        progress,
        ProgressUpdate {
            stage: "build",
            progress: 100.0,
            message: "Archive built".into(),
            current_file: None,
        },
    );
    info!(
        "build: wrote {total} entries from {} to {}",
        source.display(),
        target.display()
    );
    Ok(total)
}

fn entry_options(metadata: &fs::Metadata, is_dir: bool) -> SimpleFileOptions {
    let method = if is_dir {
        CompressionMethod::Stored
    } else {
        CompressionMethod::Deflated
    };
    let options = SimpleFileOptions::default().compression_method(method);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        options.unix_permissions(metadata.permissions().mode() & 0o7777)
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        options
    }
}

fn zip_write_error(name: &str, err: zip::result::ZipError) -> CoreError {
    match err {
        zip::result::ZipError::Io(source) => CoreError::io(format!("writing {name}"), source),
        other => CoreError::io(
            format!("writing {name}"),
            io::Error::other(other.to_string()),
        ),
    }
}

fn apply_mode(path: &Path, mode: u32) -> CoreResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
            .map_err(|e| CoreError::io(format!("setting mode of {}", path.display()), e))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
    Ok(())
}
