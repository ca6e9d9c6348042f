//! Rename index
//!
//! Generated messages get the configured suffix. Renames are recorded while
//! messages are planned and applied to every type reference in one final
//! pass, once every message of every file is known.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::descriptor::Schema;
use crate::ir::{FieldPlan, FieldSpec, Op, OpKind};

/// Old full name to new full name, for messages and enums
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenameIndex {
    pub messages: BTreeMap<String, String>,
    pub enums: BTreeMap<String, String>,
}

/// Plain name of a generated message
pub fn plain_name(name: &str, suffix: &str) -> String {
    format!("{}{}", name, suffix)
}

impl RenameIndex {
    /// Record the renames of every generated message in a schema.
    ///
    /// A nested message moves with its renamed parent; if it is generated
    /// itself it also gets the suffix.
    pub fn build(schema: &Schema, suffix: &str) -> Self {
        let mut index = Self::default();
        for message in schema.messages() {
            let parent = message
                .parent
                .as_deref()
                .map(|p| index.rename(p))
                .or_else(|| {
                    let package = schema.file(&message.file).map(|f| f.package.as_str())?;
                    Some(if package.is_empty() {
                        String::new()
                    } else {
                        format!(".{}", package)
                    })
                })
                .unwrap_or_default();

            let name = if message.options.generate {
                plain_name(&message.name, suffix)
            } else {
                message.name.clone()
            };
            let new_full_name = format!("{}.{}", parent, name);
            if new_full_name != message.full_name {
                index.insert_message(&message.full_name, new_full_name);
            }
        }
        index
    }

    /// Record a message rename
    pub fn insert_message(&mut self, old: &str, new: impl Into<String>) {
        self.messages.insert(old.to_string(), new.into());
    }

    /// Record an enum rename
    pub fn insert_enum(&mut self, old: &str, new: impl Into<String>) {
        self.enums.insert(old.to_string(), new.into());
    }

    /// New name for a type reference, if it or one of its enclosing
    /// messages was renamed. The longest matching prefix wins.
    pub fn resolve(&self, type_ref: &str) -> Option<String> {
        if let Some(new) = self.enums.get(type_ref).or_else(|| self.messages.get(type_ref)) {
            return Some(new.clone());
        }

        let mut end = type_ref.len();
        while let Some(dot) = type_ref[..end].rfind('.') {
            if dot == 0 {
                break;
            }
            let prefix = &type_ref[..dot];
            if let Some(new) = self.messages.get(prefix) {
                return Some(format!("{}{}", new, &type_ref[dot..]));
            }
            end = dot;
        }
        None
    }

    /// New name for a type reference, or the reference itself
    pub fn rename(&self, type_ref: &str) -> String {
        self.resolve(type_ref).unwrap_or_else(|| type_ref.to_string())
    }

    /// Exact message rename
    pub fn message(&self, old: &str) -> Option<&str> {
        self.messages.get(old).map(String::as_str)
    }

    /// Whether a name has been renamed away
    pub fn is_renamed(&self, full_name: &str) -> bool {
        self.messages.contains_key(full_name) || self.enums.contains_key(full_name)
    }

    pub fn len(&self) -> usize {
        self.messages.len() + self.enums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.enums.is_empty()
    }

    /// Rewrite the type reference of a field spec. Returns the old name when
    /// it changed.
    pub fn rewrite_spec(&self, spec: &mut FieldSpec) -> Option<String> {
        let old = spec.type_ref.as_deref()?;
        let new = self.resolve(old)?;
        let old = old.to_string();
        spec.type_ref = Some(new);
        Some(old)
    }

    /// Rewrite the type reference of a plan, logging a rename op
    pub fn rewrite_plan(&self, plan: &mut FieldPlan) {
        if let Some(old) = self.rewrite_spec(&mut plan.field) {
            let new = plan.field.type_ref.clone().unwrap_or_default();
            plan.push_op(
                Op::new(OpKind::Rename, "type renamed")
                    .with("from", old)
                    .with("to", new),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn test_build_renames_generated_and_nested() {
        let index = RenameIndex::build(&testing::schema("rename.proto"), "Plain");

        assert_eq!(index.message(".dep.Item"), Some(".dep.ItemPlain"));
        assert_eq!(index.message(".dep.Item.Detail"), Some(".dep.ItemPlain.DetailPlain"));
        // not generated, moves with its parent
        assert_eq!(index.message(".dep.Item.Note"), Some(".dep.ItemPlain.Note"));
        assert_eq!(index.message(".app.Basket"), Some(".app.BasketPlain"));
        assert_eq!(index.message(".app.Holder"), None);
    }

    #[test]
    fn test_resolve_longest_prefix() {
        let mut index = RenameIndex::default();
        index.insert_message(".a.B", ".a.BPlain");
        index.insert_message(".a.B.C", ".a.BPlain.CPlain");

        assert_eq!(index.resolve(".a.B").as_deref(), Some(".a.BPlain"));
        assert_eq!(index.resolve(".a.B.C").as_deref(), Some(".a.BPlain.CPlain"));
        assert_eq!(index.resolve(".a.B.C.D").as_deref(), Some(".a.BPlain.CPlain.D"));
        assert_eq!(index.resolve(".a.B.E").as_deref(), Some(".a.BPlain.E"));
        assert_eq!(index.resolve(".a.Bx"), None);
        assert_eq!(index.rename(".z.Y"), ".z.Y");
    }

    #[test]
    fn test_enum_rename_takes_precedence() {
        let mut index = RenameIndex::default();
        index.insert_message(".a.B", ".a.BPlain");
        index.insert_enum(".a.B.Kind", ".a.Kind");
        assert_eq!(index.resolve(".a.B.Kind").as_deref(), Some(".a.Kind"));
        assert!(index.is_renamed(".a.B.Kind"));
        assert_eq!(index.len(), 2);
    }
}
