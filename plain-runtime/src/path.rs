//! Path navigation over dynamic messages
//!
//! Generated conversion code reads and writes values through chains of field
//! names rather than through generated accessors. Reads and writes are
//! deliberately asymmetric:
//!
//! - [`get`] and friends require every hop to be present and never mutate.
//!   A missing intermediate or leaf yields `None`.
//! - [`set`] and friends create missing intermediate messages and return
//!   `true`, unless the path is empty or a segment names an unknown field or a
//!   field of the wrong kind or cardinality. The path is validated before
//!   anything is created, so a rejected write leaves the message untouched.
//!
//! Navigation is by field name only. A message instance must not be written
//! from several threads at once; distinct instances are independent.

use prost::bytes::Bytes;
use prost_reflect::{DynamicMessage, FieldDescriptor, Kind, MessageDescriptor, ReflectMessage, Value};

/// An enum value carried as its number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EnumNumber(pub i32);

/// A Rust type that can be read from or written to a singular field
pub trait PathValue: Sized {
    /// Whether a field of this kind holds values of `Self`
    fn accepts(kind: &Kind) -> bool;

    /// Extract from a reflected value
    fn from_value(value: &Value) -> Option<Self>;

    /// Convert into a reflected value
    fn into_value(self) -> Value;
}

macro_rules! path_value {
    ($ty:ty, $variant:ident, $($kind:pat_param)|+) => {
        impl PathValue for $ty {
            fn accepts(kind: &Kind) -> bool {
                matches!(kind, $($kind)|+)
            }

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }
        }
    };
}

path_value!(bool, Bool, Kind::Bool);
path_value!(i32, I32, Kind::Int32 | Kind::Sint32 | Kind::Sfixed32);
path_value!(i64, I64, Kind::Int64 | Kind::Sint64 | Kind::Sfixed64);
path_value!(u32, U32, Kind::Uint32 | Kind::Fixed32);
path_value!(u64, U64, Kind::Uint64 | Kind::Fixed64);
path_value!(f32, F32, Kind::Float);
path_value!(f64, F64, Kind::Double);
path_value!(String, String, Kind::String);
path_value!(Bytes, Bytes, Kind::Bytes);

impl PathValue for Vec<u8> {
    fn accepts(kind: &Kind) -> bool {
        matches!(kind, Kind::Bytes)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bytes(v) => Some(v.to_vec()),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Bytes(Bytes::from(self))
    }
}

impl PathValue for EnumNumber {
    fn accepts(kind: &Kind) -> bool {
        matches!(kind, Kind::Enum(_))
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::EnumNumber(n) => Some(EnumNumber(*n)),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::EnumNumber(self.0)
    }
}

fn is_singular(field: &FieldDescriptor) -> bool {
    !field.is_list() && !field.is_map()
}

/// Resolve a field path against a message type without touching any instance.
///
/// Every segment but the last must name a singular message field.
pub fn resolve_field<S: AsRef<str>>(
    descriptor: &MessageDescriptor,
    path: &[S],
) -> Option<FieldDescriptor> {
    let (leaf, parents) = path.split_last()?;
    let mut current = descriptor.clone();
    for segment in parents {
        let field = current.get_field_by_name(segment.as_ref())?;
        match field.kind() {
            Kind::Message(child) if is_singular(&field) => current = child,
            _ => return None,
        }
    }
    current.get_field_by_name(leaf.as_ref())
}

/// Read the value at `path`, with the descriptor of the leaf field.
///
/// Returns `None` if any hop is unset. List and map leaves count as unset
/// when empty.
pub fn get_value<S: AsRef<str>>(
    msg: &DynamicMessage,
    path: &[S],
) -> Option<(FieldDescriptor, Value)> {
    let (leaf, parents) = path.split_last()?;
    let mut current = msg;
    for segment in parents {
        let field = current.descriptor().get_field_by_name(segment.as_ref())?;
        if !is_singular(&field) || !current.has_field(&field) {
            return None;
        }
        current = match current.get_field(&field) {
            std::borrow::Cow::Borrowed(Value::Message(child)) => child,
            _ => return None,
        };
    }

    let field = current.descriptor().get_field_by_name(leaf.as_ref())?;
    if !current.has_field(&field) {
        return None;
    }
    let value = current.get_field(&field).into_owned();
    Some((field, value))
}

/// Write `value` at `path`, creating missing intermediate messages.
pub fn set_value<S: AsRef<str>>(msg: &mut DynamicMessage, path: &[S], value: Value) -> bool {
    let Some(field) = resolve_field(&msg.descriptor(), path) else {
        return false;
    };
    if !value.is_valid_for_field(&field) || !same_message_type(&field, &value) {
        return false;
    }
    set_in(msg, path, value)
}

/// `is_valid_for_field` only checks the value's kind, not the message type
fn same_message_type(field: &FieldDescriptor, value: &Value) -> bool {
    let Kind::Message(expected) = field.kind() else {
        return true;
    };
    let matches = |value: &Value| match value {
        Value::Message(inner) => inner.descriptor().full_name() == expected.full_name(),
        _ => true,
    };
    match value {
        Value::List(items) => items.iter().all(matches),
        Value::Map(_) => true,
        other => matches(other),
    }
}

fn set_in<S: AsRef<str>>(msg: &mut DynamicMessage, path: &[S], value: Value) -> bool {
    let Some((head, rest)) = path.split_first() else {
        return false;
    };
    let Some(field) = msg.descriptor().get_field_by_name(head.as_ref()) else {
        return false;
    };

    if rest.is_empty() {
        return msg.try_set_field(&field, value).is_ok();
    }

    let Kind::Message(child) = field.kind() else {
        return false;
    };
    if !msg.has_field(&field)
        && msg
            .try_set_field(&field, Value::Message(DynamicMessage::new(child)))
            .is_err()
    {
        return false;
    }
    match msg.get_field_mut(&field) {
        Value::Message(inner) => set_in(inner, rest, value),
        _ => false,
    }
}

/// Read a singular scalar or enum value
pub fn get<T: PathValue, S: AsRef<str>>(msg: &DynamicMessage, path: &[S]) -> Option<T> {
    let (field, value) = get_value(msg, path)?;
    if !is_singular(&field) || !T::accepts(&field.kind()) {
        return None;
    }
    T::from_value(&value)
}

/// Write a singular scalar or enum value
pub fn set<T: PathValue, S: AsRef<str>>(msg: &mut DynamicMessage, path: &[S], value: T) -> bool {
    match resolve_field(&msg.descriptor(), path) {
        Some(field) if is_singular(&field) && T::accepts(&field.kind()) => {
            set_value(msg, path, value.into_value())
        }
        _ => false,
    }
}

/// Read a repeated scalar or enum field. An empty list reads as `None`.
pub fn get_list<T: PathValue, S: AsRef<str>>(msg: &DynamicMessage, path: &[S]) -> Option<Vec<T>> {
    let (field, value) = get_value(msg, path)?;
    if !field.is_list() || !T::accepts(&field.kind()) {
        return None;
    }
    match value {
        Value::List(items) if !items.is_empty() => items.iter().map(T::from_value).collect(),
        _ => None,
    }
}

/// Replace the contents of a repeated scalar or enum field
pub fn set_list<T: PathValue, S: AsRef<str>>(
    msg: &mut DynamicMessage,
    path: &[S],
    values: Vec<T>,
) -> bool {
    match resolve_field(&msg.descriptor(), path) {
        Some(field) if field.is_list() && T::accepts(&field.kind()) => {
            let items = values.into_iter().map(PathValue::into_value).collect();
            set_value(msg, path, Value::List(items))
        }
        _ => false,
    }
}

/// Read a singular message field
pub fn get_message<S: AsRef<str>>(msg: &DynamicMessage, path: &[S]) -> Option<DynamicMessage> {
    match get_value(msg, path)? {
        (field, Value::Message(inner)) if is_singular(&field) => Some(inner),
        _ => None,
    }
}

/// Write a singular message field. The message type must match the field.
pub fn set_message<S: AsRef<str>>(
    msg: &mut DynamicMessage,
    path: &[S],
    value: DynamicMessage,
) -> bool {
    match resolve_field(&msg.descriptor(), path) {
        Some(field) if is_singular(&field) => match field.kind() {
            Kind::Message(expected) if expected.full_name() == value.descriptor().full_name() => {
                set_value(msg, path, Value::Message(value))
            }
            _ => false,
        },
        _ => false,
    }
}
