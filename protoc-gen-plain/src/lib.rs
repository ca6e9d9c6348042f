//! protoc-gen-plain
//!
//! A protoc plugin that derives flattened "Plain" counterparts of annotated
//! protobuf messages. The pipeline is:
//!
//! 1. [`options`] and [`descriptor`] normalize the request's descriptors and
//!    their `plain.*` options into a [`descriptor::Schema`].
//! 2. [`validate`] collects diagnostics; any error stops the build.
//! 3. [`builder`] plans every generated message into the [`ir::Ir`], using
//!    [`alias`], [`flatten`], [`oneof`], [`collision`], [`numbering`] and
//!    [`rename`].
//! 4. [`apply`] rewrites the descriptors into the Plain descriptor set,
//!    [`contract`] renders the conversion traits and [`convert`] executes
//!    the same contract over dynamic messages.
//!
//! Usage:
//!   protoc --plain_out=enable_crf=true:./gen proto/*.proto

pub mod alias;
pub mod apply;
pub mod builder;
pub mod collision;
pub mod config;
pub mod contract;
pub mod convert;
pub mod descriptor;
mod error;
pub mod flatten;
pub mod generator;
pub mod ir;
pub mod numbering;
pub mod oneof;
pub mod options;
pub mod rename;
pub mod validate;

#[cfg(test)]
mod testing;

pub use config::PluginConfig;
pub use convert::{Caster, Casters, Converter, FallibleCaster};
pub use error::{BuildError, CastError, ConvertError, GeneratorError};
pub use generator::generate_from_bytes;
