use thiserror::Error;

#[derive(Error, Debug)]
pub enum EntityError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("Unsupported capability: {0}")]
    UnsupportedCapability(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Entity type '{0}' not found")]
    EntityTypeNotFound(String),

    #[error("Config '{0}' already exists")]
    ConfigExists(String),

    #[error("Config '{0}' not found")]
    ConfigNotFound(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl EntityError {
    /// Faults raised by the backing store, as opposed to caller mistakes.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::ConcurrentModification(_) | Self::Schema(_) | Self::IoError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EntityError>;

impl<T> From<std::sync::PoisonError<T>> for EntityError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for EntityError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for EntityError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}
