use thiserror::Error;

#[derive(Debug, Error)]
pub enum FatarcError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Out of space: {needed} bytes needed, {free} free")]
    OutOfSpace { needed: u64, free: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Path conflict: {0}")]
    PathConflict(String),

    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("Root directory is full")]
    RootDirectoryFull,

    #[error("Operation cancelled by user")]
    UserCancelled,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
