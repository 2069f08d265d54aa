use thiserror::Error;
use std::io;
use std::path::PathBuf;

#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Failed to open {path} for monitoring: {source}")]
    Initialization {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to allocate {resource}: {source}")]
    Resource {
        resource: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Failed to start monitor thread: {0}")]
    Thread(#[source] io::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl WatcherError {
    pub(crate) fn initialization(path: impl Into<PathBuf>, source: io::Error) -> Self {
        WatcherError::Initialization {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn resource(resource: &'static str, source: io::Error) -> Self {
        WatcherError::Resource { resource, source }
    }
}

pub type WatcherResult<T> = Result<T, WatcherError>;
