//! Enum discriminators for oneof payloads
//!
//! A discriminated oneof is carried in a Plain message as a tag naming a
//! fully-qualified enum value (`pkg.Kind.KIND_CARD`) plus an opaque payload.
//! The tag is stored as a string so it survives any JSON style unchanged.

use std::fmt;

use prost_reflect::{DescriptorPool, EnumValueDescriptor};

use crate::RuntimeError;

/// A fully-qualified enum value name, without a leading dot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct EnumDiscriminator(String);

impl EnumDiscriminator {
    /// Build a discriminator from a name, accepting an optional leading dot
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim_start_matches('.').to_string())
    }

    /// Build a discriminator naming an enum value descriptor
    pub fn from_value(value: &EnumValueDescriptor) -> Self {
        Self(format!("{}.{}", value.parent_enum().full_name(), value.name()))
    }

    /// The discriminator string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether no variant is tagged
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Split into the enum full name and the value name
    pub fn parts(&self) -> Result<(&str, &str), RuntimeError> {
        match self.0.rsplit_once('.') {
            Some((enum_name, value)) if !enum_name.is_empty() && !value.is_empty() => {
                Ok((enum_name, value))
            }
            _ => Err(RuntimeError::MalformedDiscriminator(self.0.clone())),
        }
    }

    /// Resolve the enum value this discriminator names
    pub fn resolve(&self, pool: &DescriptorPool) -> Result<EnumValueDescriptor, RuntimeError> {
        let (enum_name, value) = self.parts()?;
        pool.get_enum_by_name(enum_name)
            .and_then(|e| e.get_value_by_name(value))
            .ok_or_else(|| RuntimeError::UnknownDiscriminator(self.0.clone()))
    }

    /// Whether this discriminator names the same value as `other`,
    /// ignoring a leading dot on either side
    pub fn matches(&self, other: &str) -> bool {
        self.0 == other.trim_start_matches('.')
    }
}

impl fmt::Display for EnumDiscriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EnumDiscriminator {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::tests::pool;

    #[test]
    fn test_new_strips_leading_dot() {
        assert_eq!(EnumDiscriminator::new(".test.Kind.KIND_A").as_str(), "test.Kind.KIND_A");
    }

    #[test]
    fn test_resolve() {
        let pool = pool();
        let value = EnumDiscriminator::new("test.Kind.KIND_A").resolve(&pool).unwrap();
        assert_eq!(value.number(), 1);
        assert_eq!(EnumDiscriminator::from_value(&value).as_str(), "test.Kind.KIND_A");
    }

    #[test]
    fn test_resolve_unknown() {
        let pool = pool();
        assert!(matches!(
            EnumDiscriminator::new("test.Kind.KIND_Z").resolve(&pool),
            Err(RuntimeError::UnknownDiscriminator(_))
        ));
        assert!(matches!(
            EnumDiscriminator::new("KIND_A").resolve(&pool),
            Err(RuntimeError::MalformedDiscriminator(_))
        ));
    }

    #[test]
    fn test_matches_ignores_leading_dot() {
        let disc = EnumDiscriminator::new("test.Kind.KIND_A");
        assert!(disc.matches(".test.Kind.KIND_A"));
        assert!(!disc.matches("test.Kind.KIND_B"));
    }
}
