use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Everything the repack pipeline can fail with. None of these abort the
/// process; the shell reports them and lets the user start over.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("cannot read archive {}: {reason}", .path.display())]
    ArchiveRead { path: PathBuf, reason: String },
    #[error("{manifest} not found in archive")]
    ManifestNotFound { manifest: String },
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),
    #[error("not the expected extension: name is {}, expected {expected:?}", display_found(.found))]
    IdentityMismatch {
        expected: String,
        found: Option<String>,
    },
    #[error("{field} is empty")]
    EmptyInput { field: &'static str },
    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl CoreError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        CoreError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn archive_read(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        CoreError::ArchiveRead {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

fn display_found(found: &Option<String>) -> String {
    match found {
        Some(name) => format!("{name:?}"),
        None => "missing".into(),
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_mismatch_names_both_sides() {
        let err = CoreError::IdentityMismatch {
            expected: "Bitrix24: Bad Advice".into(),
            found: Some("Other".into()),
        };
        assert_eq!(
            err.to_string(),
            "not the expected extension: name is \"Other\", expected \"Bitrix24: Bad Advice\""
        );

        let missing = CoreError::IdentityMismatch {
            expected: "X".into(),
            found: None,
        };
        assert!(missing.to_string().contains("name is missing"));
    }

    #[test]
    fn io_errors_keep_their_source() {
        let err = CoreError::io(
            "writing manifest",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "I/O error while writing manifest: denied");
        assert!(std::error::Error::source(&err).is_some());
    }
}
