//! Type alias resolution
//!
//! A message marked `type_alias` that wraps exactly one non-repeated scalar
//! field is replaced by that scalar wherever a flattened field references it.

use std::collections::HashMap;

use serde::Serialize;

use crate::descriptor::{Cardinality, FieldKind, MessageDescriptor, Schema};

/// A resolved alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alias {
    /// Full name of the wrapper message
    pub message: String,
    /// Name of the wrapped field
    pub field: String,
    /// Scalar kind of the wrapped field
    pub kind: FieldKind,
}

impl Alias {
    /// Descriptive name recorded on flattened fields
    pub fn describe(&self) -> String {
        format!("{}({})", self.message, self.kind.name())
    }
}

/// Check that a `type_alias` message has the one-scalar-field shape.
///
/// Returns the alias, or the reason the shape is wrong.
pub fn check_shape(message: &MessageDescriptor) -> Result<Alias, String> {
    if message.is_map_entry {
        return Err("type_alias is not allowed on map entries".to_string());
    }

    let expected = message.options.alias_field();
    let [field] = message.fields.as_slice() else {
        return Err(format!(
            "type_alias requires exactly one field, found {}",
            message.fields.len()
        ));
    };

    if field.name != expected {
        return Err(format!(
            "type_alias field must be named {:?}, found {:?}",
            expected, field.name
        ));
    }
    if field.cardinality == Cardinality::Repeated {
        return Err("type_alias field must not be repeated".to_string());
    }
    if !field.kind.is_scalar() {
        return Err(format!(
            "type_alias field must be a scalar, found {}",
            field.kind.name()
        ));
    }

    Ok(Alias {
        message: message.full_name.clone(),
        field: field.name.clone(),
        kind: field.kind,
    })
}

/// Index of every well-formed alias in a schema
#[derive(Debug, Clone, Default)]
pub struct AliasIndex {
    aliases: HashMap<String, Alias>,
}

impl AliasIndex {
    /// Collect the aliases of a schema. Malformed aliases are left out; the
    /// validation pass reports them.
    pub fn new(schema: &Schema) -> Self {
        let aliases = schema
            .messages()
            .iter()
            .filter(|m| m.options.type_alias)
            .filter_map(|m| check_shape(m).ok())
            .map(|alias| (alias.message.clone(), alias))
            .collect();
        Self { aliases }
    }

    /// Resolve a type reference to its alias, if it names one
    pub fn resolve(&self, type_ref: &str) -> Option<&Alias> {
        self.aliases.get(type_ref)
    }

    /// Number of aliases
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    /// Whether there are no aliases
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
