//! Intermediate Representation for Plain message generation
//!
//! The IR is the fully resolved flattening plan for a descriptor set. It is
//! built once by [`crate::builder::build`], never mutated afterwards, and read
//! by the descriptor applier, the contract renderer and the converter.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::collision::CrfEntry;
use crate::descriptor::{Cardinality, FieldKind};
use crate::oneof::OneofStrategy;
use crate::rename::RenameIndex;

/// Flattening plan for a whole descriptor set
#[derive(Debug, Clone, Default, Serialize)]
pub struct Ir {
    /// Suffix appended to Plain message names
    pub suffix: String,
    /// One entry per message in the schema, in file and declaration order
    pub messages: Vec<MessageIr>,
    /// Old to new full names
    pub renames: RenameIndex,
    /// Non-fatal diagnostics from validation
    pub diagnostics: Vec<Diagnostic>,
}

impl Ir {
    /// Look up a message plan by original full name
    pub fn message(&self, full_name: &str) -> Option<&MessageIr> {
        self.messages.iter().find(|m| m.full_name == full_name)
    }

    /// Look up a message plan by Plain full name
    pub fn message_by_plain_name(&self, new_full_name: &str) -> Option<&MessageIr> {
        self.messages
            .iter()
            .find(|m| m.generate && m.new_full_name == new_full_name)
    }

    /// Messages with a Plain counterpart
    pub fn generated(&self) -> impl Iterator<Item = &MessageIr> {
        self.messages.iter().filter(|m| m.generate)
    }
}

/// Plan for one message
#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageIr {
    /// Original full name, e.g. `.pkg.Profile`
    pub full_name: String,
    /// Plain full name, e.g. `.pkg.ProfilePlain`
    pub new_full_name: String,
    pub name: String,
    pub new_name: String,
    pub file: String,
    /// Whether a Plain message is derived. Non-generated messages carry no plans.
    pub generate: bool,
    pub is_map_entry: bool,
    /// Output fields in final order
    pub fields: Vec<FieldPlan>,
    /// One plan per source oneof
    pub oneofs: Vec<OneofPlan>,
    /// Names of the fields in `fields` that are purely virtual
    pub virtual_fields: Vec<String>,
    /// Enums synthesized for enum-dispatched oneofs
    pub enums: Vec<GeneratedEnum>,
    /// Messages declared through `virtual_types`
    pub virtual_types: Vec<VirtualTypePlan>,
    /// Collision records for merged fields
    pub crf: Vec<CrfEntry>,
}

impl MessageIr {
    /// Look up an output field by name
    pub fn field(&self, name: &str) -> Option<&FieldPlan> {
        self.fields.iter().find(|f| f.field.name == name)
    }

    /// Look up a oneof plan by name
    pub fn oneof(&self, name: &str) -> Option<&OneofPlan> {
        self.oneofs.iter().find(|o| o.name == name)
    }

    /// Collision record for a merged field
    pub fn crf_entry(&self, field: &str) -> Option<&CrfEntry> {
        self.crf.iter().find(|e| e.field == field)
    }
}

/// The source field a plan was derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldRef {
    /// Full name of the message declaring the field
    pub message: String,
    pub name: String,
    pub number: i32,
}

/// Shape of an output field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: String,
    /// Zero until numbering runs
    pub number: i32,
    pub kind: FieldKind,
    pub cardinality: Cardinality,
    pub type_ref: Option<String>,
    /// Index into the Plain message's oneofs
    pub oneof_index: Option<usize>,
    pub proto3_optional: bool,
    pub is_map: bool,
}

/// How an enum field is carried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumFormat {
    /// Value name in a string field
    AsString,
    /// Value number in an int32 field
    AsInt,
}

/// Fields with no source field of their own
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Synthetic {
    /// Dispatch enum of an enum-dispatched oneof
    DispatchTag { oneof: String },
    /// Enum value tag of a discriminated oneof
    Discriminator { oneof: String },
    /// Serialized variant of a discriminated oneof
    Payload { oneof: String },
    /// Populated source path of a merged field
    CrfPath { field: String },
}

/// Where an output field came from.
///
/// The facets are independent: an embedded field may also be a resolved type
/// alias, a oneof member and carry an enum format at the same time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Origin {
    /// Declared through `virtual_fields`; never written back
    pub is_virtual: bool,
    pub is_embedded: bool,
    /// Top-level field of the message whose embedding produced this field
    pub embed_source: Option<FieldRef>,
    pub is_type_alias: bool,
    /// Alias message and its scalar, e.g. `.pkg.UserId(string)`
    pub original_type: Option<String>,
    pub is_serialized: bool,
    pub is_oneof: bool,
    pub oneof_group: Option<String>,
    /// Oneof member the field belongs to
    pub oneof_variant: Option<String>,
    /// `with_enums` of the oneof members, for discriminated oneofs
    pub oneof_enums: Vec<String>,
    pub enum_format: Option<EnumFormat>,
    pub synthetic: Option<Synthetic>,
    /// Field-name chain from the message root to the source value
    pub source_path: Vec<String>,
}

/// Kind of transformation recorded on a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Rename,
    TypeAlias,
    Serialize,
    Embed,
    OverrideType,
    EnumFormat,
    Virtual,
    Merge,
}

/// One transformation step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Op {
    pub kind: OpKind,
    pub reason: String,
    pub data: BTreeMap<String, String>,
}

impl Op {
    /// Create an op without data
    pub fn new(kind: OpKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            data: BTreeMap::new(),
        }
    }

    /// Attach a data entry
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Read a data entry
    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }
}

/// Data key marking an override whose conversion is built in
pub const KNOWN_CONVERSION: &str = "known";

/// Plan for one output field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldPlan {
    /// Innermost source field; `None` for virtual and synthesized fields
    pub source: Option<FieldRef>,
    pub field: FieldSpec,
    pub origin: Origin,
    /// Append-only transformation log
    pub ops: Vec<Op>,
}

impl FieldPlan {
    /// Append an op
    pub fn push_op(&mut self, op: Op) {
        self.ops.push(op);
    }

    /// The type override applied to this field, if any
    pub fn override_op(&self) -> Option<&Op> {
        self.ops.iter().rev().find(|op| op.kind == OpKind::OverrideType)
    }

    /// Whether conversion needs a caller-supplied caster
    pub fn needs_caster(&self) -> bool {
        self.override_op()
            .is_some_and(|op| op.get(KNOWN_CONVERSION) != Some("true"))
    }

    /// Whether the field has a path back into the original message
    pub fn is_reversible(&self) -> bool {
        !self.origin.is_virtual && self.origin.synthetic.is_none()
    }
}

/// Plan for one source oneof
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OneofPlan {
    pub name: String,
    pub strategy: OneofStrategy,
    pub members: Vec<OneofMember>,
    pub dispatch: Option<EnumDispatchPlan>,
    /// Member fields are prefixed with `<oneof>_`
    pub prefixed: bool,
    /// Index in the Plain message for untouched oneofs
    pub new_index: Option<usize>,
}

/// A member of a oneof
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OneofMember {
    pub name: String,
    pub with_enums: Vec<String>,
}

/// Dispatch enum and tag field of an enum-dispatched oneof
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumDispatchPlan {
    pub enum_full_name: String,
    pub field_name: String,
    pub with_prefix: bool,
}

/// Value of a synthesized enum
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumValueSpec {
    pub name: String,
    pub number: i32,
}

/// Enum synthesized for an enum-dispatched oneof
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedEnum {
    pub name: String,
    pub full_name: String,
    pub values: Vec<EnumValueSpec>,
}

/// Message declared through `virtual_types`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VirtualTypePlan {
    pub name: String,
    pub full_name: String,
    pub fields: Vec<FieldSpec>,
}

/// Diagnostic severity, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Error,
    Warn,
    Info,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Error => "error",
            Level::Warn => "warn",
            Level::Info => "info",
        })
    }
}

/// A validation finding
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Diagnostic {
    pub level: Level,
    pub subject: String,
    pub message: String,
}

impl Diagnostic {
    /// Create an error diagnostic
    pub fn error(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Error, subject, message)
    }

    /// Create a warning
    pub fn warn(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Warn, subject, message)
    }

    /// Create an informational diagnostic
    pub fn info(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Info, subject, message)
    }

    fn new(level: Level, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            subject: subject.into(),
            message: message.into(),
        }
    }

    /// Whether this diagnostic fails the build
    pub fn is_error(&self) -> bool {
        self.level == Level::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.level, self.subject, self.message)
    }
}
