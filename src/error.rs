//! Error types for the WeCom gateway.

/// Top-level error type for the gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("XML error: {0}")]
    Xml(#[from] XmlError),

    #[error("Platform API error: {0}")]
    Api(#[from] ApiError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Envelope codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Corp ID, token and EncodingAESKey must all be configured")]
    ConfigurationMissing,

    #[error("Message signature does not match")]
    SignatureMismatch,

    #[error("Failed to decrypt message: {0}")]
    Decryption(String),

    #[error("Failed to encrypt message: {0}")]
    Encryption(String),

    #[error("Receiver mismatch: expected {expected}, got {actual}")]
    ReceiverMismatch { expected: String, actual: String },
}

/// XML parsing and serialization errors.
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("Malformed XML: {0}")]
    Malformed(String),

    #[error("Missing element <{0}>")]
    MissingElement(&'static str),

    #[error("Failed to write XML: {0}")]
    Write(String),
}

impl From<quick_xml::Error> for XmlError {
    fn from(e: quick_xml::Error) -> Self {
        XmlError::Malformed(e.to_string())
    }
}

/// Outbound platform API errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Platform credentials not configured: {0}")]
    ConfigurationMissing(&'static str),

    #[error("Failed to get access token: errcode {errcode}, {errmsg}")]
    Credential { errcode: i64, errmsg: String },

    #[error("Failed to send message: errcode {errcode}, {errmsg}")]
    Send { errcode: i64, errmsg: String },

    #[error("Invalid response from platform: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("No messages supplied to {provider}")]
    EmptyConversation { provider: String },
}

/// Result type alias for the gateway.
pub type Result<T> = std::result::Result<T, Error>;
