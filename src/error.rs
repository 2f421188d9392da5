use thiserror::Error;

/// Unified error type for the egress broker
#[derive(Error, Debug)]
pub enum BrokerError {
    // Adapter lifecycle errors
    #[error("{vendor} adapter not initialized")]
    NotInitialized { vendor: String },

    #[error("{vendor} API error: {message}")]
    VendorApi { vendor: String, message: String },

    #[error("No proxies available from {vendor}")]
    NoProxiesAvailable { vendor: String },

    // Transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Operation timed out")]
    Timeout,

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    // Provider configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to decrypt provider config: {0}")]
    Decryption(String),

    #[error("Unknown provider type: {0}")]
    UnknownProviderType(String),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

impl BrokerError {
    /// Build a "not initialized" error for the named vendor
    pub fn not_initialized(vendor: impl Into<String>) -> Self {
        BrokerError::NotInitialized {
            vendor: vendor.into(),
        }
    }

    /// Build a vendor API error
    pub fn vendor(vendor: impl Into<String>, message: impl Into<String>) -> Self {
        BrokerError::VendorApi {
            vendor: vendor.into(),
            message: message.into(),
        }
    }

    /// Whether the caller may reasonably retry the failed operation
    pub fn is_retryable(&self) -> bool {
        match self {
            BrokerError::Http(_)
            | BrokerError::Timeout
            | BrokerError::VendorApi { .. }
            | BrokerError::NoProxiesAvailable { .. }
            | BrokerError::DatabaseConnection(_)
            | BrokerError::Io(_) => true,

            BrokerError::NotInitialized { .. }
            | BrokerError::InvalidUrl(_)
            | BrokerError::Database(_)
            | BrokerError::InvalidConfig(_)
            | BrokerError::Decryption(_)
            | BrokerError::UnknownProviderType(_)
            | BrokerError::Json(_)
            | BrokerError::Internal(_) => false,
        }
    }

    /// Whether this error stems from provider configuration rather than runtime conditions
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            BrokerError::InvalidConfig(_)
                | BrokerError::Decryption(_)
                | BrokerError::UnknownProviderType(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_initialized_message_names_vendor() {
        let err = BrokerError::not_initialized("Oxylabs");
        assert_eq!(err.to_string(), "Oxylabs adapter not initialized");
    }

    #[test]
    fn test_vendor_error_message() {
        let err = BrokerError::vendor("IPIDEA", "ret=1001");
        assert_eq!(err.to_string(), "IPIDEA API error: ret=1001");
    }

    #[test]
    fn test_error_retryable_classification() {
        assert!(BrokerError::Timeout.is_retryable());
        assert!(BrokerError::vendor("Kookeey", "bad gateway").is_retryable());
        assert!(BrokerError::NoProxiesAvailable {
            vendor: "Kookeey".to_string()
        }
        .is_retryable());

        assert!(!BrokerError::not_initialized("BrightData").is_retryable());
        assert!(!BrokerError::InvalidConfig("missing zone".to_string()).is_retryable());
        assert!(!BrokerError::UnknownProviderType("acme".to_string()).is_retryable());
    }

    #[test]
    fn test_error_config_helpers() {
        assert!(BrokerError::Decryption("bad iv".to_string()).is_config_error());
        assert!(BrokerError::UnknownProviderType("acme".to_string()).is_config_error());
        assert!(!BrokerError::Timeout.is_config_error());
    }
}
