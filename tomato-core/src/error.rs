use std::{io, path::PathBuf};
use thiserror::Error;
use zip::result::ZipError;

/// Failures while fetching and unpacking the dataset archive.
#[derive(Error, Debug)]
pub enum AcquireError {
    /// The server answered, but not with a 2xx status.
    #[error("download of {url} failed with status {status}")]
    Status { url: String, status: u16 },

    /// The request never got a response (DNS, TLS, timeout, ...).
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: Box<ureq::Transport>,
    },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Missing, truncated or otherwise unreadable zip archive.
    #[error("cannot extract {}: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: ZipError,
    },
}

impl AcquireError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum SplitError {
    #[error("batch size must be greater than zero")]
    BatchSize,

    #[error("{name} must be within [0, 1], got {value}")]
    Ratio { name: &'static str, value: f64 },

    #[error("no class directories found in {}", .0.display())]
    NoClasses(PathBuf),

    #[error("no images found in {}", .0.display())]
    Empty(PathBuf),
}
