use thiserror::Error;

use hrflow_core::errors::CapabilityError;

pub mod context;
pub mod directory;
pub mod memory;

pub use context::SqlMemoryStore;
pub use directory::InMemoryHrDirectory;
pub use memory::InMemoryMemoryStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for CapabilityError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(sqlx::Error::RowNotFound) => {
                CapabilityError::NotFound("row not found".to_string())
            }
            RepositoryError::Database(sqlx::Error::PoolTimedOut) => {
                CapabilityError::Unavailable("database pool timed out".to_string())
            }
            RepositoryError::Database(other) => CapabilityError::Unavailable(other.to_string()),
            RepositoryError::Decode(message) => CapabilityError::Decode(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use hrflow_core::errors::CapabilityError;

    use super::RepositoryError;

    #[test]
    fn repository_errors_map_onto_capability_errors() {
        let missing = CapabilityError::from(RepositoryError::Database(sqlx::Error::RowNotFound));
        assert!(matches!(missing, CapabilityError::NotFound(_)));

        let decode = CapabilityError::from(RepositoryError::Decode("bad json".to_string()));
        assert_eq!(decode, CapabilityError::Decode("bad json".to_string()));

        let pool = CapabilityError::from(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        assert!(matches!(pool, CapabilityError::Unavailable(_)));
    }
}
