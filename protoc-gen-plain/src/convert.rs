//! Reference converter
//!
//! Executes the conversion contract of every generated message over
//! [`DynamicMessage`] values. Generated code implements the same steps
//! statically; this converter is the executable model they are checked
//! against.
//!
//! The lenient methods never fail on a field: anything that cannot be
//! converted is left unset. The `try_` methods stop at the first error.
//!
//! Flattening keeps values, not presence. An embedded message that is set but
//! empty, or an alias wrapper holding its default, reads back as unset. Oneofs
//! inside embedded messages become plain fields; writing a second member of
//! such a oneof back is a [`ConvertError::MemberConflict`].

use std::collections::HashMap;

use plain_runtime::{EnumDiscriminator, parse_crf_path, path};
use prost::Message;
use prost_reflect::{
    DescriptorError, DescriptorPool, DynamicMessage, FieldDescriptor, Kind, MessageDescriptor,
    ReflectMessage,
    Value,
};
use prost_types::FileDescriptorSet;
use tracing::debug;

use crate::apply::apply;
use crate::collision::CrfEntry;
use crate::error::{CastError, ConvertError};
use crate::descriptor::OneofSyntheticExt;
use crate::ir::{EnumFormat, FieldPlan, Ir, MessageIr, OneofPlan, OpKind, Synthetic};

/// Converts one overridden field value
pub type Caster = Box<dyn Fn(&Value) -> Value + Send + Sync>;

/// Converts one overridden field value, or fails
pub type FallibleCaster = Box<dyn Fn(&Value) -> Result<Value, CastError> + Send + Sync>;

fn dotted(name: &str) -> String {
    if name.starts_with('.') {
        name.to_string()
    } else {
        format!(".{}", name)
    }
}

/// Casters keyed by Plain message full name and Plain field name
pub struct Casters<C> {
    casters: HashMap<(String, String), C>,
}

impl<C> Default for Casters<C> {
    fn default() -> Self {
        Self {
            casters: HashMap::new(),
        }
    }
}

impl<C> Casters<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a caster
    pub fn insert(&mut self, message: &str, field: &str, caster: C) {
        self.casters
            .insert((dotted(message), field.to_string()), caster);
    }

    /// Register a caster, builder style
    pub fn with(mut self, message: &str, field: &str, caster: C) -> Self {
        self.insert(message, field, caster);
        self
    }

    pub fn get(&self, message: &str, field: &str) -> Option<&C> {
        self.casters.get(&(dotted(message), field.to_string()))
    }

    pub fn len(&self) -> usize {
        self.casters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.casters.is_empty()
    }
}

#[derive(Clone, Copy)]
enum Mode<'c> {
    Lenient(&'c Casters<Caster>),
    Strict(&'c Casters<FallibleCaster>),
}

impl Mode<'_> {
    fn cast(&self, message: &str, field: &str, value: &Value) -> Result<Value, ConvertError> {
        let missing = || ConvertError::MissingCaster {
            message: message.to_string(),
            field: field.to_string(),
        };
        match self {
            Mode::Lenient(casters) => casters.get(message, field).map(|f| f(value)).ok_or_else(missing),
            Mode::Strict(casters) => {
                let caster = casters.get(message, field).ok_or_else(missing)?;
                caster(value).map_err(|source| ConvertError::Cast {
                    field: field.to_string(),
                    source,
                })
            }
        }
    }

    /// Lenient mode drops per-field failures
    fn settle(&self, result: Result<(), ConvertError>) -> Result<(), ConvertError> {
        match (self, result) {
            (Mode::Lenient(_), Err(err)) => {
                debug!(error = %err, "field omitted");
                Ok(())
            }
            (_, result) => result,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    IntoPlain,
    IntoPb,
}

fn invalid(field: &str) -> ConvertError {
    ConvertError::InvalidValue {
        field: field.to_string(),
    }
}

/// Apply `f` to a value, or to every element of a list
fn each<F>(value: Value, mut f: F) -> Result<Value, ConvertError>
where
    F: FnMut(Value) -> Result<Value, ConvertError>,
{
    match value {
        Value::List(items) => Ok(Value::List(
            items.into_iter().map(f).collect::<Result<_, _>>()?,
        )),
        other => f(other),
    }
}

fn set(out: &mut DynamicMessage, field: &FieldDescriptor, value: Value) -> Result<(), ConvertError> {
    out.try_set_field(field, value)
        .map_err(|_| invalid(field.name()))
}

fn alias_field(plan: &FieldPlan) -> &str {
    plan.ops
        .iter()
        .find(|op| op.kind == OpKind::TypeAlias)
        .and_then(|op| op.get("field"))
        .unwrap_or("value")
}

/// Index of the populated member of a oneof
fn populated_member(msg: &DynamicMessage, oneof: &OneofPlan) -> Option<usize> {
    let descriptor = msg.descriptor();
    oneof.members.iter().position(|m| {
        descriptor
            .get_field_by_name(&m.name)
            .is_some_and(|f| msg.has_field(&f))
    })
}

fn discriminator_field<'i>(ir: &'i MessageIr, oneof: &str) -> Option<&'i str> {
    ir.fields.iter().find_map(|p| match &p.origin.synthetic {
        Some(Synthetic::Discriminator { oneof: o }) if o == oneof => Some(p.field.name.as_str()),
        _ => None,
    })
}

/// Dynamic implementation of the conversion contract
pub struct Converter<'a> {
    original: DescriptorPool,
    plain: DescriptorPool,
    ir: &'a Ir,
}

impl<'a> Converter<'a> {
    /// Create a converter over an original pool and its Plain counterpart
    pub fn new(original: DescriptorPool, plain: DescriptorPool, ir: &'a Ir) -> Self {
        Self { original, plain, ir }
    }

    /// Create a converter, deriving the Plain pool from the original one
    pub fn from_original(original: DescriptorPool, ir: &'a Ir) -> Result<Self, DescriptorError> {
        let files: Vec<_> = original.file_descriptor_protos().cloned().collect();
        let plain = DescriptorPool::from_file_descriptor_set(FileDescriptorSet {
            file: apply(&files, ir),
        })?;
        Ok(Self::new(original, plain, ir))
    }

    pub fn original_pool(&self) -> &DescriptorPool {
        &self.original
    }

    pub fn plain_pool(&self) -> &DescriptorPool {
        &self.plain
    }

    /// Flatten a message. `None` converts to `None`.
    pub fn into_plain(
        &self,
        msg: Option<&DynamicMessage>,
        casters: &Casters<Caster>,
    ) -> Option<DynamicMessage> {
        self.to_plain(msg?, Mode::Lenient(casters)).ok()
    }

    /// Flatten a message, stopping at the first error
    pub fn try_into_plain(
        &self,
        msg: Option<&DynamicMessage>,
        casters: &Casters<FallibleCaster>,
    ) -> Result<Option<DynamicMessage>, ConvertError> {
        msg.map(|m| self.to_plain(m, Mode::Strict(casters))).transpose()
    }

    /// Restore the original message from a Plain one. `None` converts to `None`.
    pub fn into_pb(
        &self,
        plain: Option<&DynamicMessage>,
        casters: &Casters<Caster>,
    ) -> Option<DynamicMessage> {
        self.to_pb(plain?, Mode::Lenient(casters)).ok()
    }

    /// Restore the original message, stopping at the first error
    pub fn try_into_pb(
        &self,
        plain: Option<&DynamicMessage>,
        casters: &Casters<FallibleCaster>,
    ) -> Result<Option<DynamicMessage>, ConvertError> {
        plain.map(|m| self.to_pb(m, Mode::Strict(casters))).transpose()
    }

    fn to_plain(&self, msg: &DynamicMessage, mode: Mode<'_>) -> Result<DynamicMessage, ConvertError> {
        let name = dotted(msg.descriptor().full_name());
        let ir = self
            .ir
            .message(&name)
            .filter(|m| m.generate)
            .ok_or_else(|| ConvertError::UnknownMessage(name.clone()))?;
        let descriptor = self
            .plain
            .get_message_by_name(ir.new_full_name.trim_start_matches('.'))
            .ok_or_else(|| ConvertError::UnknownMessage(ir.new_full_name.clone()))?;

        let mut out = DynamicMessage::new(descriptor);
        for plan in &ir.fields {
            let result = self.plain_field(msg, &mut out, ir, plan, mode);
            mode.settle(result)?;
        }
        Ok(out)
    }

    fn plain_field(
        &self,
        msg: &DynamicMessage,
        out: &mut DynamicMessage,
        ir: &MessageIr,
        plan: &FieldPlan,
        mode: Mode<'_>,
    ) -> Result<(), ConvertError> {
        let name = plan.field.name.as_str();
        let target = out
            .descriptor()
            .get_field_by_name(name)
            .ok_or_else(|| invalid(name))?;

        match &plan.origin.synthetic {
            Some(Synthetic::DispatchTag { oneof }) => {
                let Some(index) = ir.oneof(oneof).and_then(|o| populated_member(msg, o)) else {
                    return Ok(());
                };
                set(out, &target, Value::EnumNumber(index as i32 + 1))
            }
            Some(Synthetic::Discriminator { oneof }) => {
                let Some(oneof) = ir.oneof(oneof) else {
                    return Ok(());
                };
                let tag = populated_member(msg, oneof)
                    .and_then(|i| oneof.members[i].with_enums.first());
                match tag {
                    Some(tag) => set(out, &target, Value::String(EnumDiscriminator::new(tag).to_string())),
                    None => Ok(()),
                }
            }
            Some(Synthetic::Payload { oneof }) => {
                let Some(oneof) = ir.oneof(oneof) else {
                    return Ok(());
                };
                let Some(index) = populated_member(msg, oneof) else {
                    return Ok(());
                };
                let member = msg
                    .descriptor()
                    .get_field_by_name(&oneof.members[index].name)
                    .ok_or_else(|| invalid(name))?;
                let mut only = DynamicMessage::new(msg.descriptor());
                only.try_set_field(&member, msg.get_field(&member).into_owned())
                    .map_err(|_| invalid(name))?;
                set(out, &target, Value::Bytes(only.encode_to_vec().into()))
            }
            // written together with the merged field
            Some(Synthetic::CrfPath { .. }) => Ok(()),
            None if plan.origin.is_virtual => Ok(()),
            None => self.plain_value(msg, out, ir, plan, &target, mode),
        }
    }

    fn plain_value(
        &self,
        msg: &DynamicMessage,
        out: &mut DynamicMessage,
        ir: &MessageIr,
        plan: &FieldPlan,
        target: &FieldDescriptor,
        mode: Mode<'_>,
    ) -> Result<(), ConvertError> {
        let entry = ir.crf_entry(&plan.field.name);
        let candidates: Vec<Vec<String>> = match entry {
            Some(entry) => entry.sources.iter().map(|s| parse_crf_path(s)).collect(),
            None => vec![plan.origin.source_path.clone()],
        };

        let Some((used, (leaf, value))) = candidates
            .iter()
            .enumerate()
            .find_map(|(i, p)| path::get_value(msg, p).map(|found| (i, found)))
        else {
            return Ok(());
        };

        let mut value = self.adapt_into_plain(plan, &leaf, value, target, mode)?;
        if plan.needs_caster() {
            value = mode.cast(&ir.new_full_name, &plan.field.name, &value)?;
        }
        set(out, target, value)?;

        if let Some(entry) = entry {
            self.write_crf(out, entry, used)?;
        }
        Ok(())
    }

    fn write_crf(&self, out: &mut DynamicMessage, entry: &CrfEntry, used: usize) -> Result<(), ConvertError> {
        let field = out
            .descriptor()
            .get_field_by_name(&entry.crf_field)
            .ok_or_else(|| invalid(&entry.crf_field))?;
        let source = entry.sources.get(used).cloned().unwrap_or_default();
        set(out, &field, Value::String(source))
    }

    fn adapt_into_plain(
        &self,
        plan: &FieldPlan,
        leaf: &FieldDescriptor,
        value: Value,
        target: &FieldDescriptor,
        mode: Mode<'_>,
    ) -> Result<Value, ConvertError> {
        let name = plan.field.name.as_str();

        if plan.origin.is_serialized {
            return each(value, |v| match v {
                Value::Message(m) => Ok(Value::Bytes(m.encode_to_vec().into())),
                _ => Err(invalid(name)),
            });
        }

        if plan.origin.is_type_alias {
            let field = alias_field(plan);
            return each(value, |v| match v {
                Value::Message(m) => m
                    .get_field_by_name(field)
                    .map(|v| v.into_owned())
                    .ok_or_else(|| invalid(name)),
                _ => Err(invalid(name)),
            });
        }

        match plan.origin.enum_format {
            Some(EnumFormat::AsString) => {
                let Kind::Enum(descriptor) = leaf.kind() else {
                    return Err(invalid(name));
                };
                each(value, |v| match v {
                    Value::EnumNumber(n) => Ok(Value::String(
                        descriptor
                            .get_value(n)
                            .map(|ev| ev.name().to_string())
                            .unwrap_or_else(|| n.to_string()),
                    )),
                    _ => Err(invalid(name)),
                })
            }
            Some(EnumFormat::AsInt) => each(value, |v| match v {
                Value::EnumNumber(n) => Ok(Value::I32(n)),
                _ => Err(invalid(name)),
            }),
            None => self.convert_value(value, &target.kind(), Direction::IntoPlain, mode),
        }
    }

    fn to_pb(&self, plain: &DynamicMessage, mode: Mode<'_>) -> Result<DynamicMessage, ConvertError> {
        let name = dotted(plain.descriptor().full_name());
        let ir = self
            .ir
            .message_by_plain_name(&name)
            .ok_or_else(|| ConvertError::UnknownMessage(name.clone()))?;
        let descriptor = self
            .original
            .get_message_by_name(ir.full_name.trim_start_matches('.'))
            .ok_or_else(|| ConvertError::UnknownMessage(ir.full_name.clone()))?;

        let mut selected = HashMap::new();
        for oneof in &ir.oneofs {
            let result = self.selected_variant(plain, oneof).map(|variant| {
                if let Some(variant) = variant {
                    selected.insert(oneof.name.clone(), variant);
                }
            });
            mode.settle(result)?;
        }

        let mut out = DynamicMessage::new(descriptor);
        for plan in &ir.fields {
            let result = self.pb_field(plain, &mut out, ir, plan, &selected, mode);
            mode.settle(result)?;
        }

        // a selected variant with nothing written still selects it
        for (oneof, &index) in &selected {
            let Some(member) = ir.oneof(oneof).and_then(|o| o.members.get(index)) else {
                continue;
            };
            let Some(field) = out.descriptor().get_field_by_name(&member.name) else {
                continue;
            };
            if !out.has_field(&field) {
                let result = set(&mut out, &field, Value::default_value(&field.kind()));
                mode.settle(result)?;
            }
        }
        Ok(out)
    }

    /// Member selected by the dispatch tag of an enum-dispatched oneof
    fn selected_variant(&self, plain: &DynamicMessage, oneof: &OneofPlan) -> Result<Option<usize>, ConvertError> {
        let Some(dispatch) = &oneof.dispatch else {
            return Ok(None);
        };
        let number = match plain.get_field_by_name(&dispatch.field_name).as_deref() {
            Some(Value::EnumNumber(n)) => *n,
            _ => return Ok(None),
        };
        match number {
            0 => Ok(None),
            n if n > 0 && (n as usize) <= oneof.members.len() => Ok(Some(n as usize - 1)),
            n => Err(ConvertError::UnknownDiscriminator {
                oneof: oneof.name.clone(),
                value: n.to_string(),
            }),
        }
    }

    fn pb_field(
        &self,
        plain: &DynamicMessage,
        out: &mut DynamicMessage,
        ir: &MessageIr,
        plan: &FieldPlan,
        selected: &HashMap<String, usize>,
        mode: Mode<'_>,
    ) -> Result<(), ConvertError> {
        match &plan.origin.synthetic {
            Some(Synthetic::Payload { oneof }) => self.restore_payload(plain, out, ir, plan, oneof),
            Some(_) => Ok(()),
            None if plan.origin.is_virtual => Ok(()),
            None => self.pb_value(plain, out, ir, plan, selected, mode),
        }
    }

    fn restore_payload(
        &self,
        plain: &DynamicMessage,
        out: &mut DynamicMessage,
        ir: &MessageIr,
        plan: &FieldPlan,
        oneof: &str,
    ) -> Result<(), ConvertError> {
        let name = plan.field.name.as_str();
        let bytes = match plain.get_field_by_name(name).as_deref() {
            Some(Value::Bytes(bytes)) if !bytes.is_empty() => bytes.clone(),
            _ => return Ok(()),
        };
        let decoded = DynamicMessage::decode(out.descriptor(), bytes.as_ref()).map_err(|source| {
            ConvertError::Payload {
                field: name.to_string(),
                source,
            }
        })?;

        let Some(oneof_plan) = ir.oneof(oneof) else {
            return Ok(());
        };
        let Some(index) = populated_member(&decoded, oneof_plan) else {
            return Ok(());
        };
        let member = &oneof_plan.members[index];

        let tag = discriminator_field(ir, oneof)
            .and_then(|f| plain.get_field_by_name(f))
            .and_then(|v| v.as_str().map(EnumDiscriminator::new))
            .filter(|d| !d.is_empty());
        if let Some(tag) = tag {
            let tagged = oneof_plan
                .members
                .iter()
                .position(|m| m.with_enums.iter().any(|e| tag.matches(e)));
            match tagged {
                None => {
                    return Err(ConvertError::UnknownDiscriminator {
                        oneof: oneof.to_string(),
                        value: tag.to_string(),
                    });
                }
                Some(i) if i != index => {
                    return Err(ConvertError::DispatchMismatch {
                        oneof: oneof.to_string(),
                        expected: oneof_plan.members[i].name.clone(),
                        found: member.name.clone(),
                    });
                }
                Some(_) => {}
            }
        }

        let field = decoded
            .descriptor()
            .get_field_by_name(&member.name)
            .ok_or_else(|| invalid(name))?;
        set(out, &field, decoded.get_field(&field).into_owned())
    }

    fn pb_value(
        &self,
        plain: &DynamicMessage,
        out: &mut DynamicMessage,
        ir: &MessageIr,
        plan: &FieldPlan,
        selected: &HashMap<String, usize>,
        mode: Mode<'_>,
    ) -> Result<(), ConvertError> {
        let name = plan.field.name.as_str();
        let field = plain
            .descriptor()
            .get_field_by_name(name)
            .ok_or_else(|| invalid(name))?;
        if !plain.has_field(&field) {
            return Ok(());
        }
        let mut value = plain.get_field(&field).into_owned();

        let path = self.write_path(plain, ir, plan, selected);
        if let Some(group) = &plan.origin.oneof_group {
            let expected = selected
                .get(group)
                .and_then(|&i| ir.oneof(group).and_then(|o| o.members.get(i)));
            if let (Some(expected), Some(found)) = (expected, path.first()) {
                if &expected.name != found {
                    return Err(ConvertError::DispatchMismatch {
                        oneof: group.clone(),
                        expected: expected.name.clone(),
                        found: found.clone(),
                    });
                }
            }
        }

        let unwritable = || ConvertError::Unwritable {
            field: name.to_string(),
            path: path.join("/"),
        };
        let leaf = path::resolve_field(&out.descriptor(), &path).ok_or_else(unwritable)?;

        if plan.needs_caster() {
            value = mode.cast(&ir.new_full_name, name, &value)?;
        }
        let value = self.adapt_into_pb(plan, &leaf, value, mode)?;
        if let Some(conflict) = inner_oneof_conflict(out, &path) {
            return Err(conflict);
        }
        if path::set_value(out, &path, value) {
            Ok(())
        } else {
            Err(unwritable())
        }
    }

    /// Path a Plain value is written back through: the run-time CRF value,
    /// else the source of the dispatched variant, else the default
    fn write_path(
        &self,
        plain: &DynamicMessage,
        ir: &MessageIr,
        plan: &FieldPlan,
        selected: &HashMap<String, usize>,
    ) -> Vec<String> {
        let Some(entry) = ir.crf_entry(&plan.field.name) else {
            return plan.origin.source_path.clone();
        };

        let recorded = plain
            .get_field_by_name(&entry.crf_field)
            .and_then(|v| v.as_str().map(parse_crf_path))
            .unwrap_or_default();
        if !recorded.is_empty() {
            return recorded;
        }

        let variant = plan
            .origin
            .oneof_group
            .as_ref()
            .and_then(|g| selected.get(g).and_then(|&i| ir.oneof(g)?.members.get(i)));
        if let Some(variant) = variant {
            if let Some(path) = entry
                .sources
                .iter()
                .map(|s| parse_crf_path(s))
                .find(|p| p.first() == Some(&variant.name))
            {
                return path;
            }
        }
        plan.origin.source_path.clone()
    }

    fn adapt_into_pb(
        &self,
        plan: &FieldPlan,
        leaf: &FieldDescriptor,
        value: Value,
        mode: Mode<'_>,
    ) -> Result<Value, ConvertError> {
        let name = plan.field.name.as_str();

        if plan.origin.is_serialized {
            let Kind::Message(descriptor) = leaf.kind() else {
                return Err(invalid(name));
            };
            return each(value, |v| match v {
                Value::Bytes(bytes) => DynamicMessage::decode(descriptor.clone(), bytes.as_ref())
                    .map(Value::Message)
                    .map_err(|source| ConvertError::Payload {
                        field: name.to_string(),
                        source,
                    }),
                _ => Err(invalid(name)),
            });
        }

        if plan.origin.is_type_alias {
            let Kind::Message(wrapper) = leaf.kind() else {
                return Err(invalid(name));
            };
            let field = alias_field(plan);
            return each(value, |v| {
                let mut msg = DynamicMessage::new(wrapper.clone());
                msg.try_set_field_by_name(field, v)
                    .map_err(|_| invalid(name))?;
                Ok(Value::Message(msg))
            });
        }

        match plan.origin.enum_format {
            Some(EnumFormat::AsString) => {
                let Kind::Enum(descriptor) = leaf.kind() else {
                    return Err(invalid(name));
                };
                each(value, |v| match v {
                    Value::String(s) => descriptor
                        .get_value_by_name(&s)
                        .map(|ev| ev.number())
                        .or_else(|| s.parse::<i32>().ok())
                        .map(Value::EnumNumber)
                        .ok_or_else(|| ConvertError::UnknownEnumValue {
                            field: name.to_string(),
                            value: s,
                        }),
                    _ => Err(invalid(name)),
                })
            }
            Some(EnumFormat::AsInt) => each(value, |v| match v {
                Value::I32(n) => Ok(Value::EnumNumber(n)),
                _ => Err(invalid(name)),
            }),
            None => self.convert_value(value, &leaf.kind(), Direction::IntoPb, mode),
        }
    }

    /// Move a value between pools, converting nested messages
    fn convert_value(
        &self,
        value: Value,
        target: &Kind,
        direction: Direction,
        mode: Mode<'_>,
    ) -> Result<Value, ConvertError> {
        match value {
            Value::Message(msg) => match target {
                Kind::Message(descriptor) => Ok(Value::Message(
                    self.convert_message(&msg, descriptor, direction, mode)?,
                )),
                _ => Ok(Value::Message(msg)),
            },
            Value::List(items) => Ok(Value::List(
                items
                    .into_iter()
                    .map(|v| self.convert_value(v, target, direction, mode))
                    .collect::<Result<_, _>>()?,
            )),
            Value::Map(map) => {
                let Kind::Message(entry) = target else {
                    return Ok(Value::Map(map));
                };
                let value_kind = entry.map_entry_value_field().kind();
                Ok(Value::Map(
                    map.into_iter()
                        .map(|(k, v)| Ok((k, self.convert_value(v, &value_kind, direction, mode)?)))
                        .collect::<Result<_, ConvertError>>()?,
                ))
            }
            other => Ok(other),
        }
    }

    fn convert_message(
        &self,
        msg: &DynamicMessage,
        target: &MessageDescriptor,
        direction: Direction,
        mode: Mode<'_>,
    ) -> Result<DynamicMessage, ConvertError> {
        let name = dotted(msg.descriptor().full_name());
        match direction {
            Direction::IntoPlain if self.ir.message(&name).is_some_and(|m| m.generate) => {
                self.to_plain(msg, mode)
            }
            Direction::IntoPb if self.ir.message_by_plain_name(&name).is_some() => {
                self.to_pb(msg, mode)
            }
            _ => self.transcode(msg, target, direction, mode),
        }
    }

    /// Copy a message that has no plan into the other pool, field by number
    fn transcode(
        &self,
        msg: &DynamicMessage,
        target: &MessageDescriptor,
        direction: Direction,
        mode: Mode<'_>,
    ) -> Result<DynamicMessage, ConvertError> {
        let mut out = DynamicMessage::new(target.clone());
        for (field, value) in msg.fields() {
            let Some(target_field) = target.get_field(field.number()) else {
                continue;
            };
            let value = self.convert_value(value.clone(), &target_field.kind(), direction, mode)?;
            set(&mut out, &target_field, value)?;
        }
        Ok(out)
    }
}

/// A sibling already written into a oneof below the top level of `path`
fn inner_oneof_conflict(out: &DynamicMessage, path: &[String]) -> Option<ConvertError> {
    let mut current = out;
    for (depth, segment) in path.iter().enumerate() {
        let field = current.descriptor().get_field_by_name(segment)?;
        if depth > 0 {
            let oneof = field.containing_oneof().filter(|o| !o.is_synthetic());
            if let Some(oneof) = oneof {
                let other = oneof
                    .fields()
                    .find(|f| f.number() != field.number() && current.has_field(f));
                if let Some(other) = other {
                    return Some(ConvertError::MemberConflict {
                        oneof: oneof.full_name().to_string(),
                        existing: other.name().to_string(),
                        found: field.name().to_string(),
                    });
                }
            }
        }
        if !current.has_field(&field) {
            return None;
        }
        current = match current.get_field(&field) {
            std::borrow::Cow::Borrowed(Value::Message(child)) => child,
            _ => return None,
        };
    }
    None
}
