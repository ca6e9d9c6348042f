//! Normalized descriptor model
//!
//! A flat, owned view of the messages, fields and oneofs of a descriptor pool
//! together with their plain options. The IR builder works only on this
//! model, so it never touches prost-reflect or global state.

use std::collections::HashMap;

use prost_reflect::{Cardinality as ReflectCardinality, DescriptorPool, Kind};
use prost_types::field_descriptor_proto::{Label, Type};
use serde::Serialize;

use crate::options::{
    FieldOptions, FileOptions, MessageOptions, OneofOptions, OptionExtensions,
};

/// Field kind, with every signed and fixed variant kept apart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Double,
    Float,
    Int64,
    Uint64,
    Int32,
    Fixed64,
    Fixed32,
    Bool,
    String,
    Group,
    Message,
    Bytes,
    Uint32,
    Enum,
    Sfixed32,
    Sfixed64,
    Sint32,
    Sint64,
}

impl FieldKind {
    /// Every kind, for name lookups
    const ALL: [FieldKind; 18] = [
        FieldKind::Double,
        FieldKind::Float,
        FieldKind::Int64,
        FieldKind::Uint64,
        FieldKind::Int32,
        FieldKind::Fixed64,
        FieldKind::Fixed32,
        FieldKind::Bool,
        FieldKind::String,
        FieldKind::Group,
        FieldKind::Message,
        FieldKind::Bytes,
        FieldKind::Uint32,
        FieldKind::Enum,
        FieldKind::Sfixed32,
        FieldKind::Sfixed64,
        FieldKind::Sint32,
        FieldKind::Sint64,
    ];

    /// Kind name as written in `.proto` files
    pub fn name(self) -> &'static str {
        match self {
            FieldKind::Double => "double",
            FieldKind::Float => "float",
            FieldKind::Int64 => "int64",
            FieldKind::Uint64 => "uint64",
            FieldKind::Int32 => "int32",
            FieldKind::Fixed64 => "fixed64",
            FieldKind::Fixed32 => "fixed32",
            FieldKind::Bool => "bool",
            FieldKind::String => "string",
            FieldKind::Group => "group",
            FieldKind::Message => "message",
            FieldKind::Bytes => "bytes",
            FieldKind::Uint32 => "uint32",
            FieldKind::Enum => "enum",
            FieldKind::Sfixed32 => "sfixed32",
            FieldKind::Sfixed64 => "sfixed64",
            FieldKind::Sint32 => "sint32",
            FieldKind::Sint64 => "sint64",
        }
    }

    /// Parse a kind name
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Whether the kind is a scalar (not a message, group or enum)
    pub fn is_scalar(self) -> bool {
        !matches!(self, FieldKind::Message | FieldKind::Group | FieldKind::Enum)
    }

    /// Whether values of this kind reference a named type
    pub fn has_type_ref(self) -> bool {
        matches!(self, FieldKind::Message | FieldKind::Group | FieldKind::Enum)
    }

    /// Map from prost-reflect's kind
    pub fn from_reflect(kind: &Kind, is_group: bool) -> Self {
        match kind {
            Kind::Double => FieldKind::Double,
            Kind::Float => FieldKind::Float,
            Kind::Int64 => FieldKind::Int64,
            Kind::Uint64 => FieldKind::Uint64,
            Kind::Int32 => FieldKind::Int32,
            Kind::Fixed64 => FieldKind::Fixed64,
            Kind::Fixed32 => FieldKind::Fixed32,
            Kind::Bool => FieldKind::Bool,
            Kind::String => FieldKind::String,
            Kind::Bytes => FieldKind::Bytes,
            Kind::Uint32 => FieldKind::Uint32,
            Kind::Sfixed32 => FieldKind::Sfixed32,
            Kind::Sfixed64 => FieldKind::Sfixed64,
            Kind::Sint32 => FieldKind::Sint32,
            Kind::Sint64 => FieldKind::Sint64,
            Kind::Enum(_) => FieldKind::Enum,
            Kind::Message(_) if is_group => FieldKind::Group,
            Kind::Message(_) => FieldKind::Message,
        }
    }

    /// Map to the descriptor proto type
    pub fn to_proto(self) -> Type {
        match self {
            FieldKind::Double => Type::Double,
            FieldKind::Float => Type::Float,
            FieldKind::Int64 => Type::Int64,
            FieldKind::Uint64 => Type::Uint64,
            FieldKind::Int32 => Type::Int32,
            FieldKind::Fixed64 => Type::Fixed64,
            FieldKind::Fixed32 => Type::Fixed32,
            FieldKind::Bool => Type::Bool,
            FieldKind::String => Type::String,
            FieldKind::Group => Type::Group,
            FieldKind::Message => Type::Message,
            FieldKind::Bytes => Type::Bytes,
            FieldKind::Uint32 => Type::Uint32,
            FieldKind::Enum => Type::Enum,
            FieldKind::Sfixed32 => Type::Sfixed32,
            FieldKind::Sfixed64 => Type::Sfixed64,
            FieldKind::Sint32 => Type::Sint32,
            FieldKind::Sint64 => Type::Sint64,
        }
    }
}

/// Field cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    /// Implicit presence
    #[default]
    Singular,
    /// Explicit presence (`optional`)
    Optional,
    /// proto2 `required`
    Required,
    /// `repeated`, maps included
    Repeated,
}

impl Cardinality {
    /// Label used in descriptor protos
    pub fn to_label(self) -> Label {
        match self {
            Cardinality::Singular | Cardinality::Optional => Label::Optional,
            Cardinality::Required => Label::Required,
            Cardinality::Repeated => Label::Repeated,
        }
    }

    /// Name used by type override selectors
    pub fn selector_name(self) -> &'static str {
        match self {
            Cardinality::Singular | Cardinality::Optional => "optional",
            Cardinality::Required => "required",
            Cardinality::Repeated => "repeated",
        }
    }
}

/// A field of a message
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub number: i32,
    pub kind: FieldKind,
    pub cardinality: Cardinality,
    /// Fully qualified name (leading dot) for message and enum kinds
    pub type_ref: Option<String>,
    /// Index into the parent's oneofs
    pub oneof_index: Option<usize>,
    pub proto3_optional: bool,
    pub is_map: bool,
    pub options: FieldOptions,
}

impl FieldDescriptor {
    /// Whether the field is repeated (maps included)
    pub fn is_repeated(&self) -> bool {
        self.cardinality == Cardinality::Repeated
    }
}

/// A oneof of a message
#[derive(Debug, Clone, PartialEq)]
pub struct OneofDescriptor {
    pub name: String,
    /// Member field names in declaration order
    pub fields: Vec<String>,
    /// Synthetic oneofs back proto3 `optional` fields
    pub synthetic: bool,
    pub options: OneofOptions,
}

/// A message type
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDescriptor {
    /// Fully qualified name with a leading dot
    pub full_name: String,
    pub name: String,
    pub file: String,
    pub parent: Option<String>,
    pub fields: Vec<FieldDescriptor>,
    /// Full names of nested messages
    pub nested: Vec<String>,
    pub oneofs: Vec<OneofDescriptor>,
    pub is_map_entry: bool,
    pub options: MessageOptions,
}

impl MessageDescriptor {
    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Members of a oneof, in declaration order
    pub fn oneof_fields(&self, index: usize) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields
            .iter()
            .filter(move |f| f.oneof_index == Some(index))
    }
}

/// An enum type
#[derive(Debug, Clone, PartialEq)]
pub struct EnumDescriptor {
    pub full_name: String,
    pub values: Vec<(String, i32)>,
}

/// A `.proto` file
#[derive(Debug, Clone, PartialEq)]
pub struct FileDescriptor {
    pub name: String,
    pub package: String,
    /// Full names of every message declared in the file, nested included,
    /// parents before children
    pub messages: Vec<String>,
    pub options: FileOptions,
}

/// The full descriptor set handed to the builder
#[derive(Debug, Clone, Default)]
pub struct Schema {
    files: Vec<FileDescriptor>,
    messages: Vec<MessageDescriptor>,
    message_index: HashMap<String, usize>,
    enums: HashMap<String, EnumDescriptor>,
    files_to_generate: Vec<String>,
}

/// Build a fully qualified name with a leading dot
pub fn full_name(package: &str, parent: Option<&str>, name: &str) -> String {
    match parent {
        Some(parent) => format!("{}.{}", parent, name),
        None if package.is_empty() => format!(".{}", name),
        None => format!(".{}.{}", package, name),
    }
}

impl Schema {
    /// Assemble a schema from parts
    pub fn new(
        files: Vec<FileDescriptor>,
        messages: Vec<MessageDescriptor>,
        enums: Vec<EnumDescriptor>,
        files_to_generate: Vec<String>,
    ) -> Self {
        let message_index = messages
            .iter()
            .enumerate()
            .map(|(i, m)| (m.full_name.clone(), i))
            .collect();
        let enums = enums.into_iter().map(|e| (e.full_name.clone(), e)).collect();
        Self {
            files,
            messages,
            message_index,
            enums,
            files_to_generate,
        }
    }

    /// Normalize every file of a descriptor pool
    pub fn from_pool(
        pool: &DescriptorPool,
        files_to_generate: &[String],
    ) -> Result<Self, prost::DecodeError> {
        let extensions = OptionExtensions::new(pool);
        let mut files = Vec::new();
        let mut messages = Vec::new();
        let mut enums = Vec::new();

        for file in pool.files() {
            let mut names = Vec::new();
            let mut stack: Vec<_> = file.messages().collect();
            stack.reverse();
            while let Some(message) = stack.pop() {
                let normalized = normalize_message(&extensions, &message, file.name())?;
                names.push(normalized.full_name.clone());
                messages.push(normalized);
                for child in message.child_enums() {
                    enums.push(normalize_enum(&child));
                }
                let mut children: Vec<_> = message.child_messages().collect();
                children.reverse();
                stack.extend(children);
            }
            for e in file.enums() {
                enums.push(normalize_enum(&e));
            }

            files.push(FileDescriptor {
                name: file.name().to_string(),
                package: file.package_name().to_string(),
                messages: names,
                options: extensions.file_options(&file)?,
            });
        }

        Ok(Self::new(files, messages, enums, files_to_generate.to_vec()))
    }

    /// Every file, in pool order
    pub fn files(&self) -> &[FileDescriptor] {
        &self.files
    }

    /// Look up a file by name
    pub fn file(&self, name: &str) -> Option<&FileDescriptor> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Every message, in file and declaration order
    pub fn messages(&self) -> &[MessageDescriptor] {
        &self.messages
    }

    /// Look up a message by full name (leading dot optional)
    pub fn message(&self, full_name: &str) -> Option<&MessageDescriptor> {
        self.message_index
            .get(&dotted(full_name))
            .map(|&i| &self.messages[i])
    }

    /// Look up an enum by full name (leading dot optional)
    pub fn enum_type(&self, full_name: &str) -> Option<&EnumDescriptor> {
        self.enums.get(&dotted(full_name))
    }

    /// Whether a fully qualified enum value such as `pkg.Kind.KIND_A` exists
    pub fn has_enum_value(&self, qualified: &str) -> bool {
        qualified
            .rsplit_once('.')
            .and_then(|(enum_name, value)| {
                self.enum_type(enum_name)
                    .map(|e| e.values.iter().any(|(name, _)| name == value))
            })
            .unwrap_or(false)
    }

    /// Files the request asked to generate
    pub fn files_to_generate(&self) -> &[String] {
        &self.files_to_generate
    }
}

fn dotted(name: &str) -> String {
    if name.starts_with('.') {
        name.to_string()
    } else {
        format!(".{}", name)
    }
}

fn normalize_message(
    extensions: &OptionExtensions,
    message: &prost_reflect::MessageDescriptor,
    file: &str,
) -> Result<MessageDescriptor, prost::DecodeError> {
    let oneofs = message
        .oneofs()
        .map(|oneof| {
            Ok(OneofDescriptor {
                name: oneof.name().to_string(),
                fields: oneof.fields().map(|f| f.name().to_string()).collect(),
                synthetic: oneof.is_synthetic(),
                options: extensions.oneof_options(&oneof)?,
            })
        })
        .collect::<Result<Vec<_>, prost::DecodeError>>()?;

    let fields = message
        .fields()
        .map(|field| {
            let kind = field.kind();
            let proto3_optional = field.field_descriptor_proto().proto3_optional();
            let cardinality = match field.cardinality() {
                ReflectCardinality::Repeated => Cardinality::Repeated,
                ReflectCardinality::Required => Cardinality::Required,
                ReflectCardinality::Optional
                    if proto3_optional
                        || (field.supports_presence()
                            && field.containing_oneof().is_none()
                            && !matches!(kind, Kind::Message(_))) =>
                {
                    Cardinality::Optional
                }
                ReflectCardinality::Optional => Cardinality::Singular,
            };
            let type_ref = match &kind {
                Kind::Message(m) => Some(format!(".{}", m.full_name())),
                Kind::Enum(e) => Some(format!(".{}", e.full_name())),
                _ => None,
            };
            let oneof_index = field
                .containing_oneof()
                .and_then(|o| oneofs.iter().position(|d| d.name == o.name()));

            Ok(FieldDescriptor {
                name: field.name().to_string(),
                number: field.number() as i32,
                kind: FieldKind::from_reflect(&kind, field.is_group()),
                cardinality,
                type_ref,
                oneof_index,
                proto3_optional,
                is_map: field.is_map(),
                options: extensions.field_options(&field)?,
            })
        })
        .collect::<Result<Vec<_>, prost::DecodeError>>()?;

    let parent = message.parent_message().map(|p| format!(".{}", p.full_name()));

    Ok(MessageDescriptor {
        full_name: format!(".{}", message.full_name()),
        name: message.name().to_string(),
        file: file.to_string(),
        parent,
        fields,
        nested: message
            .child_messages()
            .map(|m| format!(".{}", m.full_name()))
            .collect(),
        oneofs,
        is_map_entry: message.is_map_entry(),
        options: extensions.message_options(message)?,
    })
}

fn normalize_enum(e: &prost_reflect::EnumDescriptor) -> EnumDescriptor {
    EnumDescriptor {
        full_name: format!(".{}", e.full_name()),
        values: e
            .values()
            .map(|v| (v.name().to_string(), v.number()))
            .collect(),
    }
}

/// `OneofDescriptor::is_synthetic` for prost-reflect versions that lack it
pub(crate) trait OneofSyntheticExt {
    /// Whether this oneof was synthesized by protoc for a proto3 `optional` field
    fn is_synthetic(&self) -> bool;
}

impl OneofSyntheticExt for prost_reflect::OneofDescriptor {
    fn is_synthetic(&self) -> bool {
        self.fields()
            .all(|f| f.field_descriptor_proto().proto3_optional())
    }
}
