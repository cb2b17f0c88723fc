use std::io;

/// Error type for every stage of the deploy pipeline
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("HTTP header 'X-Hub-Signature-256' is missing.")]
    MissingSignature,

    #[error("Missing hash support to check the secret code validity.")]
    MissingCapability,

    #[error("Hash algorithm '{0}' is not supported.")]
    UnsupportedAlgorithm(String),

    #[error("Hook secret does not match.")]
    SignatureMismatch,

    #[error("Missing HTTP 'Content-Type' header.")]
    MissingContentType,

    #[error("Missing HTTP 'X-GitHub-Event' header.")]
    MissingEventType,

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Command '{command}' failed ({status}):\n{output}")]
    CommandExecutionFailure {
        command: String,
        status: String,
        output: String,
    },

    #[error("Delivery to {provider} failed: {message}")]
    ProviderDeliveryFailure { provider: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

impl DeployError {
    pub fn delivery(provider: impl Into<String>, message: impl ToString) -> Self {
        DeployError::ProviderDeliveryFailure {
            provider: provider.into(),
            message: message.to_string(),
        }
    }
}

/// Helper type for Results that use DeployError
pub type Result<T> = std::result::Result<T, DeployError>;
