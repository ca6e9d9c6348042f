//! Error types for the runtime support library

/// Error type for runtime operations that can fail
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// JSON encoding or decoding failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON output was not valid UTF-8
    #[error("json output is not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Discriminator string is not of the form `package.Enum.VALUE`
    #[error("malformed enum discriminator: {0:?}")]
    MalformedDiscriminator(String),

    /// Discriminator names an enum or value missing from the pool
    #[error("unknown enum discriminator: {0}")]
    UnknownDiscriminator(String),
}
