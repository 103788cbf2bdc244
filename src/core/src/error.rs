use thiserror::Error;

/// ACR Sweep error types
#[derive(Error, Debug)]
pub enum SweepError {
    /// The registry's repositories could not be listed at all
    #[error("Repository enumeration failed: {registry} - {message}")]
    RepositoryEnumeration { registry: String, message: String },

    /// The hosts of the target scope could not be listed at all
    #[error("Host enumeration failed: {scope} - {message}")]
    HostEnumeration { scope: String, message: String },

    /// No usable control-plane login
    #[error("Authentication unavailable: {0}")]
    Authentication(String),

    /// A single registry call failed
    #[error("Registry error: {registry} - {message}")]
    Registry { registry: String, message: String },

    /// A single host or slot configuration read failed
    #[error("Host error: {host} - {message}")]
    Host { host: String, message: String },

    /// Deletion mode outside the two accepted values
    #[error("Invalid deletion mode: {0}")]
    InvalidMode(String),

    /// Operator declined or mistyped a confirmation
    #[error("Confirmation rejected: {0}")]
    ConfirmationRejected(String),

    /// Deletion state machine asked to make an illegal move
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Image reference could not be parsed
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// External command failed to run or exited unsuccessfully
    #[error("Command failed: {program} - {message}")]
    Command { program: String, message: String },

    /// Audit record could not be written
    #[error("Audit error: {0}")]
    Audit(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl SweepError {
    /// Errors that stop the run before any deletion decision is made.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SweepError::RepositoryEnumeration { .. }
                | SweepError::HostEnumeration { .. }
                | SweepError::Authentication(_)
                | SweepError::ConfigError(_)
        )
    }

    /// Operator input rejections. No remote state has been touched.
    pub fn is_user_reject(&self) -> bool {
        matches!(
            self,
            SweepError::InvalidMode(_) | SweepError::ConfirmationRejected(_)
        )
    }
}

impl From<serde_json::Error> for SweepError {
    fn from(err: serde_json::Error) -> Self {
        SweepError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for SweepError {
    fn from(err: serde_yaml::Error) -> Self {
        SweepError::SerializationError(err.to_string())
    }
}

/// Result type alias for ACR Sweep operations
pub type Result<T> = std::result::Result<T, SweepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_enumeration_display() {
        let error = SweepError::RepositoryEnumeration {
            registry: "myacr".to_string(),
            message: "forbidden".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Repository enumeration failed: myacr - forbidden"
        );
        assert!(error.is_fatal());
    }

    #[test]
    fn test_host_enumeration_is_fatal() {
        let error = SweepError::HostEnumeration {
            scope: "sub-1".to_string(),
            message: "timeout".to_string(),
        };
        assert!(error.is_fatal());
        assert!(!error.is_user_reject());
    }

    #[test]
    fn test_authentication_display() {
        let error = SweepError::Authentication("run 'az login'".to_string());
        assert_eq!(error.to_string(), "Authentication unavailable: run 'az login'");
        assert!(error.is_fatal());
    }

    #[test]
    fn test_degraded_errors_are_not_fatal() {
        let registry = SweepError::Registry {
            registry: "myacr".to_string(),
            message: "throttled".to_string(),
        };
        let host = SweepError::Host {
            host: "web-app/staging".to_string(),
            message: "not found".to_string(),
        };
        assert!(!registry.is_fatal());
        assert!(!host.is_fatal());
        assert_eq!(host.to_string(), "Host error: web-app/staging - not found");
    }

    #[test]
    fn test_user_rejects() {
        let mode = SweepError::InvalidMode("3".to_string());
        let confirm = SweepError::ConfirmationRejected("token mismatch".to_string());
        assert!(mode.is_user_reject());
        assert!(confirm.is_user_reject());
        assert!(!mode.is_fatal());
        assert_eq!(mode.to_string(), "Invalid deletion mode: 3");
    }

    #[test]
    fn test_invalid_transition_display() {
        let error = SweepError::InvalidTransition {
            from: "mode-selected(commit)".to_string(),
            to: "executing".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid transition: mode-selected(commit) -> executing"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: SweepError = io_error.into();
        assert!(matches!(error, SweepError::IoError(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope");
        let error: SweepError = result.unwrap_err().into();
        assert!(matches!(error, SweepError::SerializationError(_)));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let error: SweepError = result.unwrap_err().into();
        assert!(matches!(error, SweepError::SerializationError(_)));
    }
}
