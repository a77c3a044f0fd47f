/// Error type for catalog operations
///
/// "Not found" conditions (see [`Error::is_not_found`]) are fatal to the operation that hit
/// them. Transfer problems only ever surface as [`Error::Transfer`], raised at the sync
/// boundary after the remote session has been closed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("path does not exist: {0:?}")]
    MissingPath(std::path::PathBuf),
    #[error("database is not valid: {0:?} (no MSIResearch directory)")]
    InvalidRoot(std::path::PathBuf),
    #[error("no such dataset: '{0}'")]
    UnknownDataset(String),
    #[error("failed to parse manifest {path:?}")]
    Manifest {
        path: std::path::PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid pattern '{pattern}'")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("I/O error on {path:?}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("remote host and remote path must both be configured to sync")]
    RemoteNotConfigured,
    #[error("failed to sync '{name}'")]
    Transfer {
        name: String,
        #[source]
        source: remote::Error,
    },
    #[error("prompt failed: {0:#}")]
    Prompt(#[source] anyhow::Error),
}

impl Error {
    pub(crate) fn io(path: &std::path::Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                Error::MissingPath(path.to_path_buf())
            } else {
                Error::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::MissingPath(_) | Error::InvalidRoot(_) | Error::UnknownDataset(_)
        )
    }
}
