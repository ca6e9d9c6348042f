//! Plain options
//!
//! This module contains the Rust types generated from `plain/options.proto`
//! and reads them out of descriptor option messages.
//!
//! Custom options are extension fields on the descriptor option messages.
//! prost drops extensions when decoding descriptors, so options are read
//! through prost-reflect: the plugin request is decoded against a pool that
//! knows the plugin protocol, and the user's files are re-loaded into their
//! own pool where the `plain.*` extensions resolve.

use once_cell::sync::Lazy;
use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, ExtensionDescriptor, Value};
use prost_types::compiler::CodeGeneratorRequest;

use crate::GeneratorError;

pub mod plain {
    //! Types generated from `plain/options.proto`
    #![allow(missing_docs)]
    include!(concat!(env!("OUT_DIR"), "/plain.rs"));
}

pub use plain::{
    FieldOptions, FileOptions, MessageOptions, OneofOptions, OverrideType, Selector, TypeOverride,
    VirtualField, VirtualType,
};

/// File descriptor set bytes generated at build time
static FILE_DESCRIPTOR_SET_BYTES: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/file_descriptor_set.bin"));

/// Extension names for plain options
pub const FILE_EXTENSION_NAME: &str = "plain.file";
/// Message-level options extension
pub const MESSAGE_EXTENSION_NAME: &str = "plain.message";
/// Field-level options extension
pub const FIELD_EXTENSION_NAME: &str = "plain.field";
/// Oneof-level options extension
pub const ONEOF_EXTENSION_NAME: &str = "plain.oneof";

/// Descriptor pool with the plain options and the plugin protocol types
static DESCRIPTOR_POOL: Lazy<Result<DescriptorPool, String>> = Lazy::new(|| {
    DescriptorPool::decode(FILE_DESCRIPTOR_SET_BYTES)
        .map_err(|e| format!("Failed to decode file descriptor set: {}", e))
});

/// The built-in descriptor pool
pub fn descriptor_pool() -> Result<&'static DescriptorPool, GeneratorError> {
    DESCRIPTOR_POOL
        .as_ref()
        .map_err(|e| GeneratorError::CodeGenError(e.clone()))
}

/// Decode raw CodeGeneratorRequest bytes.
///
/// Returns the request and a pool holding its `proto_file` entries with
/// option extensions intact.
pub fn decode_request(bytes: &[u8]) -> Result<(CodeGeneratorRequest, DescriptorPool), GeneratorError> {
    let request = CodeGeneratorRequest::decode(bytes)?;

    let builtin = descriptor_pool()?;
    let request_desc = builtin
        .get_message_by_name("google.protobuf.compiler.CodeGeneratorRequest")
        .ok_or("CodeGeneratorRequest not found in descriptor pool".to_string())?;
    let set_desc = builtin
        .get_message_by_name("google.protobuf.FileDescriptorSet")
        .ok_or("FileDescriptorSet not found in descriptor pool".to_string())?;

    // Decode as a DynamicMessage so option extensions survive re-encoding
    let dynamic = DynamicMessage::decode(request_desc, bytes)?;
    let files = dynamic
        .get_field_by_name("proto_file")
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|| Value::List(Vec::new()));

    let mut set = DynamicMessage::new(set_desc);
    set.try_set_field_by_name("file", files)
        .map_err(|e| format!("Failed to collect request files: {}", e))?;
    let pool = DescriptorPool::decode(set.encode_to_vec().as_slice())?;

    Ok((request, pool))
}

/// Extension descriptors for the plain options within one pool.
///
/// A pool whose files never import `plain/options.proto` has no extensions,
/// and every option bag reads as its default.
#[derive(Debug, Clone, Default)]
pub struct OptionExtensions {
    file: Option<ExtensionDescriptor>,
    message: Option<ExtensionDescriptor>,
    field: Option<ExtensionDescriptor>,
    oneof: Option<ExtensionDescriptor>,
}

impl OptionExtensions {
    /// Look up the plain extensions in a pool
    pub fn new(pool: &DescriptorPool) -> Self {
        Self {
            file: pool.get_extension_by_name(FILE_EXTENSION_NAME),
            message: pool.get_extension_by_name(MESSAGE_EXTENSION_NAME),
            field: pool.get_extension_by_name(FIELD_EXTENSION_NAME),
            oneof: pool.get_extension_by_name(ONEOF_EXTENSION_NAME),
        }
    }

    /// Options attached to a file
    pub fn file_options(
        &self,
        file: &prost_reflect::FileDescriptor,
    ) -> Result<FileOptions, prost::DecodeError> {
        read_extension(&file.options(), self.file.as_ref())
    }

    /// Options attached to a message
    pub fn message_options(
        &self,
        message: &prost_reflect::MessageDescriptor,
    ) -> Result<MessageOptions, prost::DecodeError> {
        read_extension(&message.options(), self.message.as_ref())
    }

    /// Options attached to a field
    pub fn field_options(
        &self,
        field: &prost_reflect::FieldDescriptor,
    ) -> Result<FieldOptions, prost::DecodeError> {
        read_extension(&field.options(), self.field.as_ref())
    }

    /// Options attached to a oneof
    pub fn oneof_options(
        &self,
        oneof: &prost_reflect::OneofDescriptor,
    ) -> Result<OneofOptions, prost::DecodeError> {
        read_extension(&oneof.options(), self.oneof.as_ref())
    }
}

fn read_extension<T>(
    options: &DynamicMessage,
    extension: Option<&ExtensionDescriptor>,
) -> Result<T, prost::DecodeError>
where
    T: Message + Default,
{
    let Some(extension) = extension else {
        return Ok(T::default());
    };
    if !options.has_extension(extension) {
        return Ok(T::default());
    }
    match options.get_extension(extension).as_ref() {
        Value::Message(msg) => msg.transcode_to::<T>(),
        _ => Ok(T::default()),
    }
}

impl OverrideType {
    /// Path of the type in generated Rust code
    pub fn rust_path(&self) -> String {
        let import = self.import_path.trim_matches(':');
        if import.is_empty() {
            self.name.clone()
        } else {
            format!("{}::{}", import.replace(['/', '.'], "::"), self.name)
        }
    }
}

impl MessageOptions {
    /// Name of the wrapped field of a type alias
    pub fn alias_field(&self) -> &str {
        if self.type_alias_field.is_empty() {
            "value"
        } else {
            &self.type_alias_field
        }
    }
}

impl FieldOptions {
    /// Whether the field is inlined into its parent
    pub fn embeds(&self) -> bool {
        self.embed || self.embed_with_prefix
    }
}

impl OneofOptions {
    /// Whether member fields are inlined into the parent
    pub fn embeds(&self) -> bool {
        self.embed || self.embed_with_prefix
    }

    /// Whether an explicit dispatch enum is generated
    pub fn dispatches(&self) -> bool {
        self.enum_dispatched || self.enum_dispatched_with_prefix
    }
}
