//! Error types for toolshub.

use std::path::PathBuf;

use thiserror::Error;

/// Why a launch request was refused before anything was spawned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchRejection {
    /// The working directory does not exist.
    #[error("working directory does not exist: {}", .0.display())]
    WorkingDirectoryMissing(PathBuf),

    /// The command names a file by path and that file does not exist.
    #[error("command file does not exist: {}", .0.display())]
    CommandFileMissing(PathBuf),

    /// The command line is blank.
    #[error("command is empty")]
    EmptyCommand,
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures of the tool/category store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error while reading or writing the store file.
    #[error("failed to access store {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The store file is not valid TOML for the expected schema.
    #[error("failed to parse store {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The store could not be serialized.
    #[error("failed to serialize store: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// No tool with the given id.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// No category with the given id.
    #[error("unknown category: {0}")]
    UnknownCategory(String),
}
