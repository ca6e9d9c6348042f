//! plain-runtime
//!
//! Execution-time support for code generated by protoc-gen-plain:
//!
//! - [`path`]: reflection-driven get/set through a chain of field names
//! - [`crf`]: collision resolution path strings and their markers
//! - [`discriminator`]: fully-qualified enum value tags for oneof payloads
//! - [`json`]: JSON encoding of Plain messages

#![deny(missing_docs)]

pub mod crf;
pub mod discriminator;
mod error;
pub mod json;
pub mod path;

pub use crf::{CrfPath, PathSegment, parse_crf_path};
pub use discriminator::EnumDiscriminator;
pub use error::RuntimeError;
pub use json::{JsonCodec, JsonStyle};
pub use path::{EnumNumber, PathValue};
