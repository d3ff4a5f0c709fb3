//! Shield Error Types
//!
//! Errors that abort a single admission request. Quota denials are not
//! errors: they come back as a `stop` [`Cost`](super::cost::Cost).

/// Result type alias for shield operations
pub type ShieldResult<T> = Result<T, ShieldError>;

/// Error types for shield operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShieldError {
    /// Caller passed an empty role list, an empty user id or similar
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Role id not present in the loaded configuration
    #[error("Unknown role '{0}'")]
    UnknownRole(String),

    /// Endpoint id not present in the loaded configuration
    #[error("The endpoint '{0}' does not exist")]
    UnknownEndpoint(String),

    /// Internal bookkeeping reached a state that should be unreachable
    #[error("Internal invariant violated: {0}")]
    InvariantViolation(String),
}

impl ShieldError {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ShieldError::InvalidInput(_) => "invalid_input",
            ShieldError::UnknownRole(_) => "unknown_role",
            ShieldError::UnknownEndpoint(_) => "unknown_endpoint",
            ShieldError::InvariantViolation(_) => "invariant_violation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ShieldError::UnknownRole("guest".to_string()).to_string(),
            "Unknown role 'guest'"
        );
        assert_eq!(
            ShieldError::UnknownEndpoint("books".to_string()).to_string(),
            "The endpoint 'books' does not exist"
        );
        assert!(ShieldError::InvalidInput("no roles".to_string())
            .to_string()
            .contains("no roles"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(ShieldError::InvalidInput(String::new()).kind(), "invalid_input");
        assert_eq!(
            ShieldError::InvariantViolation(String::new()).kind(),
            "invariant_violation"
        );
    }
}
