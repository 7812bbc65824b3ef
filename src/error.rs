use std::path::PathBuf;

/// All errors that can occur in the clustering and recall engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cluster index corrupted at {}: {message}", path.display())]
    StoreCorrupted { path: PathBuf, message: String },

    #[error("failed to write cluster index to {}: {message}", path.display())]
    StoreIo { path: PathBuf, message: String },

    #[error("regex generator failed: {0}")]
    WorkerFatal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("logging initialization failed: {0}")]
    Logging(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
