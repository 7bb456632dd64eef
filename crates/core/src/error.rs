use thiserror::Error;

pub type DynamisResult<T> = Result<T, DynamisError>;

#[derive(Error, Debug)]
pub enum DynamisError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Encryption provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DynamisError {
    pub fn config(message: impl Into<String>) -> Self {
        DynamisError::Configuration(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        DynamisError::Authentication(message.into())
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, DynamisError::Authentication(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, DynamisError::Configuration(_))
    }

    pub fn is_provider(&self) -> bool {
        matches!(self, DynamisError::Provider(_))
    }
}

/// Failure reported by an external service (key management or log service).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("key management `{operation}` failed: {message}")]
    KeyManagement {
        operation: &'static str,
        message: String,
    },

    #[error("log service call on stream `{stream}` failed: {message}")]
    LogService { stream: String, message: String },
}

impl ProviderError {
    pub fn kms(operation: &'static str, message: impl Into<String>) -> Self {
        ProviderError::KeyManagement {
            operation,
            message: message.into(),
        }
    }

    pub fn log(stream: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderError::LogService {
            stream: stream.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_is_distinguishable() {
        let err: DynamisError = ProviderError::kms("encrypt", "throttled").into();
        assert!(err.is_provider());
        assert!(!err.is_configuration());
        assert_eq!(
            err.to_string(),
            "Encryption provider error: key management `encrypt` failed: throttled"
        );

        let err = DynamisError::config("unknown role: guest");
        assert!(err.is_configuration());
        assert_eq!(err.to_string(), "Configuration error: unknown role: guest");

        let err = DynamisError::auth("ExpiredSignature");
        assert!(err.is_authentication());
        assert!(!err.is_configuration());
    }
}
