//! Error types for the Plain compiler
//!
//! `GeneratorError` covers the plugin surface, `BuildError` the IR builder and
//! `ConvertError` the reference converter.

use crate::collision::CollisionError;
use crate::ir::Diagnostic;

/// Error type for code generation
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    /// Code generation failed
    #[error("code generation error: {0}")]
    CodeGenError(String),

    /// Plugin parameter string could not be parsed
    #[error("invalid parameter: {0}")]
    Config(String),

    /// Failed to decode protobuf message
    #[error("decode error: {0}")]
    DecodeError(#[from] prost::DecodeError),

    /// Descriptors could not be loaded into a pool
    #[error("descriptor error: {0}")]
    Descriptor(#[from] prost_reflect::DescriptorError),

    /// IR construction failed
    #[error(transparent)]
    Build(#[from] BuildError),

    /// IR could not be serialized
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<String> for GeneratorError {
    fn from(s: String) -> Self {
        GeneratorError::CodeGenError(s)
    }
}

/// Error returned when the IR cannot be built
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Validation produced error-level diagnostics
    #[error("invalid options: {}", summarize(.0))]
    InvalidOptions(Vec<Diagnostic>),

    /// Final field numbers clash or are not usable
    #[error("invalid field numbers: {}", summarize(.0))]
    InvalidNumbers(Vec<Diagnostic>),

    /// Flattening produced a name clash that cannot be merged
    #[error(transparent)]
    Collision(#[from] CollisionError),
}

impl BuildError {
    /// Every diagnostic that explains this failure
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            BuildError::InvalidOptions(diagnostics) | BuildError::InvalidNumbers(diagnostics) => {
                diagnostics.clone()
            }
            BuildError::Collision(err) => vec![err.to_diagnostic()],
        }
    }
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .filter(|d| d.is_error())
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Boxed error returned by fallible casters
pub type CastError = Box<dyn std::error::Error + Send + Sync>;

/// Error returned by the fallible conversion variants
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// No Plain counterpart is known for a message type
    #[error("no conversion registered for message {0}")]
    UnknownMessage(String),

    /// An overridden field has no caster
    #[error("missing caster for {message}.{field}")]
    MissingCaster {
        /// Plain message full name
        message: String,
        /// Plain field name
        field: String,
    },

    /// A caster failed
    #[error("caster for {field} failed: {source}")]
    Cast {
        /// Plain field name
        field: String,
        /// Error returned by the caster
        source: CastError,
    },

    /// A value does not fit the field it is written to
    #[error("value for {field} does not match the field type")]
    InvalidValue {
        /// Field name
        field: String,
    },

    /// A serialized payload could not be decoded
    #[error("failed to decode payload for {field}: {source}")]
    Payload {
        /// Plain field name
        field: String,
        /// Decode error
        source: prost::DecodeError,
    },

    /// The dispatch tag names a different variant than the populated one
    #[error("oneof {oneof}: discriminator selects {expected} but {found} is populated")]
    DispatchMismatch {
        /// Oneof name
        oneof: String,
        /// Variant selected by the tag
        expected: String,
        /// Variant whose fields hold values
        found: String,
    },

    /// Two members of a oneof inside an embedded message hold values
    #[error("oneof {oneof}: {found} conflicts with {existing}, which is already set")]
    MemberConflict {
        /// Oneof full name
        oneof: String,
        /// Member written first
        existing: String,
        /// Member that could not be written
        found: String,
    },

    /// A dispatch tag or discriminator names no variant
    #[error("oneof {oneof}: unknown discriminator {value}")]
    UnknownDiscriminator {
        /// Oneof name
        oneof: String,
        /// Offending tag
        value: String,
    },

    /// An enum name does not exist in the target enum
    #[error("unknown enum value {value} for {field}")]
    UnknownEnumValue {
        /// Plain field name
        field: String,
        /// Offending name
        value: String,
    },

    /// A value could not be written back through its path
    #[error("cannot write {field} through path {path}")]
    Unwritable {
        /// Plain field name
        field: String,
        /// Slash-joined path
        path: String,
    },
}
