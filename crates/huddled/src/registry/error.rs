//! Registry errors.

use thiserror::Error;

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Another session already holds the name.
    #[error("name already in use: {0}")]
    NameConflict(String),

    /// No session is registered under the name.
    #[error("name not registered: {0}")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::NameConflict("Alice".to_string());
        assert_eq!(err.to_string(), "name already in use: Alice");

        let err = RegistryError::NotFound("Bob".to_string());
        assert_eq!(err.to_string(), "name not registered: Bob");
    }
}
