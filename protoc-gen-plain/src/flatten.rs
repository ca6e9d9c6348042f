//! Field flattening
//!
//! Turns one source field into the output fields that replace it: serialized
//! payloads, recursively embedded message fields, or the field itself after
//! alias resolution, enum formatting and type overrides. Virtual fields and
//! virtual types are planned here too.

use heck::ToUpperCamelCase;

use crate::alias::AliasIndex;
use crate::descriptor::{Cardinality, FieldDescriptor, FieldKind, MessageDescriptor, Schema};
use crate::ir::{
    EnumFormat, FieldPlan, FieldRef, FieldSpec, Op, OpKind, Origin, VirtualTypePlan,
};
use crate::options::{TypeOverride, VirtualField, VirtualType};

/// Oneof membership carried down into the fields a member produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneofTag {
    pub group: String,
    pub variant: String,
}

/// Where a field sits relative to the message being planned
#[derive(Debug, Clone, Default)]
pub struct Scope {
    /// Field names leading to the field's parent
    pub path: Vec<String>,
    /// Prefix for produced field names
    pub name_prefix: String,
    /// Outermost embedding field, once inside an embed
    pub embed_source: Option<FieldRef>,
    pub oneof: Option<OneofTag>,
}

impl Scope {
    /// Scope of a direct field of the message being planned
    pub fn root() -> Self {
        Self::default()
    }

    /// Scope of a oneof member
    pub fn member(group: &str, variant: &str) -> Self {
        Self {
            oneof: Some(OneofTag {
                group: group.to_string(),
                variant: variant.to_string(),
            }),
            ..Self::default()
        }
    }

    /// Prefix every produced field name with `prefix`
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    fn is_root(&self) -> bool {
        self.path.is_empty()
    }
}

fn field_ref(owner: &MessageDescriptor, field: &FieldDescriptor) -> FieldRef {
    FieldRef {
        message: owner.full_name.clone(),
        name: field.name.clone(),
        number: field.number,
    }
}

fn trim_dot(name: &str) -> &str {
    name.trim_start_matches('.')
}

/// Flattens fields of messages declared in one file
pub struct Flattener<'a> {
    schema: &'a Schema,
    aliases: &'a AliasIndex,
    overrides: &'a [TypeOverride],
}

impl<'a> Flattener<'a> {
    pub fn new(schema: &'a Schema, aliases: &'a AliasIndex, overrides: &'a [TypeOverride]) -> Self {
        Self {
            schema,
            aliases,
            overrides,
        }
    }

    /// The output fields replacing `field` of `owner`, in order
    pub fn flatten_field(
        &self,
        owner: &MessageDescriptor,
        field: &FieldDescriptor,
        scope: &Scope,
    ) -> Vec<FieldPlan> {
        if field.options.embeds() && !field.options.serialize && field.kind == FieldKind::Message {
            let prefixed = field.options.embed_with_prefix;
            return self.embed_field(owner, field, scope, prefixed);
        }
        vec![self.plan_field(owner, field, scope)]
    }

    /// Whether a message-typed field referencing `type_ref` can be inlined
    pub fn is_embeddable(&self, type_ref: &str) -> bool {
        self.aliases.resolve(type_ref).is_none()
            && self.schema.message(type_ref).is_some_and(|m| !m.is_map_entry)
    }

    /// Inline the fields of the message referenced by `field`
    pub fn embed_field(
        &self,
        owner: &MessageDescriptor,
        field: &FieldDescriptor,
        scope: &Scope,
        prefixed: bool,
    ) -> Vec<FieldPlan> {
        let Some(target) = field.type_ref.as_deref().and_then(|t| self.schema.message(t)) else {
            // validation rejects unknown targets
            return Vec::new();
        };

        let mut path = scope.path.clone();
        path.push(field.name.clone());
        let name_prefix = if prefixed {
            format!("{}{}_", scope.name_prefix, field.name)
        } else {
            scope.name_prefix.clone()
        };
        let inner = Scope {
            path,
            name_prefix: name_prefix.clone(),
            embed_source: scope
                .embed_source
                .clone()
                .or_else(|| Some(field_ref(owner, field))),
            oneof: scope.oneof.clone(),
        };

        let mut plans = Vec::new();
        for inner_field in &target.fields {
            for mut plan in self.flatten_field(target, inner_field, &inner) {
                plan.push_op(
                    Op::new(OpKind::Embed, "embedded field")
                        .with("source", field.name.as_str())
                        .with("prefix", name_prefix.as_str()),
                );
                plans.push(plan);
            }
        }
        plans
    }

    fn plan_field(&self, owner: &MessageDescriptor, field: &FieldDescriptor, scope: &Scope) -> FieldPlan {
        let mut source_path = scope.path.clone();
        source_path.push(field.name.clone());

        let mut plan = FieldPlan {
            source: Some(field_ref(owner, field)),
            field: FieldSpec {
                name: format!("{}{}", scope.name_prefix, field.name),
                number: if scope.is_root() { field.number } else { 0 },
                kind: field.kind,
                cardinality: field.cardinality,
                type_ref: field.type_ref.clone(),
                oneof_index: None,
                proto3_optional: field.proto3_optional,
                is_map: field.is_map,
            },
            origin: Origin {
                is_embedded: scope.embed_source.is_some(),
                embed_source: scope.embed_source.clone(),
                is_oneof: scope.oneof.is_some(),
                oneof_group: scope.oneof.as_ref().map(|t| t.group.clone()),
                oneof_variant: scope.oneof.as_ref().map(|t| t.variant.clone()),
                source_path,
                ..Origin::default()
            },
            ops: Vec::new(),
        };

        let alias = field
            .type_ref
            .as_deref()
            .filter(|_| field.kind == FieldKind::Message)
            .and_then(|t| self.aliases.resolve(t));

        if field.options.serialize {
            plan.field.kind = FieldKind::Bytes;
            plan.field.type_ref = None;
            plan.origin.is_serialized = true;
            plan.push_op(
                Op::new(OpKind::Serialize, "serialized message")
                    .with("type", field.type_ref.clone().unwrap_or_default()),
            );
        } else if let Some(alias) = alias {
            plan.field.kind = alias.kind;
            plan.field.type_ref = None;
            plan.origin.is_type_alias = true;
            plan.origin.original_type = Some(alias.describe());
            plan.push_op(
                Op::new(OpKind::TypeAlias, "type alias")
                    .with("alias", alias.message.as_str())
                    .with("field", alias.field.as_str()),
            );
        } else if field.kind == FieldKind::Enum
            && (field.options.enum_as_string || field.options.enum_as_int)
        {
            let (format, kind) = if field.options.enum_as_string {
                (EnumFormat::AsString, FieldKind::String)
            } else {
                (EnumFormat::AsInt, FieldKind::Int32)
            };
            plan.field.kind = kind;
            plan.field.type_ref = None;
            plan.origin.enum_format = Some(format);
            plan.push_op(
                Op::new(OpKind::EnumFormat, "enum format")
                    .with("enum", field.type_ref.clone().unwrap_or_default())
                    .with("format", kind.name()),
            );
        }

        if let Some(target) = field.options.override_type.as_ref() {
            plan.push_op(
                Op::new(OpKind::OverrideType, "field override")
                    .with("name", target.name.as_str())
                    .with("import_path", target.import_path.as_str()),
            );
        } else if let Some(target) = self.match_override(owner, field) {
            plan.push_op(
                Op::new(OpKind::OverrideType, "file type override")
                    .with("name", target.name.as_str())
                    .with("import_path", target.import_path.as_str()),
            );
        }

        plan
    }

    fn match_override(
        &self,
        owner: &MessageDescriptor,
        field: &FieldDescriptor,
    ) -> Option<&crate::options::OverrideType> {
        let full_path = format!("{}.{}", owner.full_name, field.name);
        self.overrides.iter().find_map(|rule| {
            let selector = rule.selector.as_ref()?;
            let target = rule.target.as_ref()?;
            let matches = (selector.target_full_path.is_empty()
                || trim_dot(&selector.target_full_path) == trim_dot(&full_path))
                && (selector.field_kind.is_empty()
                    || FieldKind::from_name(&selector.field_kind) == Some(field.kind))
                && (selector.field_cardinality.is_empty()
                    || selector.field_cardinality == field.cardinality.selector_name())
                && (selector.field_type_url.is_empty()
                    || field
                        .type_ref
                        .as_deref()
                        .is_some_and(|t| trim_dot(t) == trim_dot(&selector.field_type_url)));
            matches.then_some(target)
        })
    }

    /// Plan a message-level virtual field
    pub fn virtual_field(
        &self,
        message: &MessageDescriptor,
        new_full_name: &str,
        suffix: &str,
        vf: &VirtualField,
    ) -> FieldPlan {
        let spec = virtual_spec(message, new_full_name, suffix, vf);
        let mut plan = FieldPlan {
            source: None,
            field: spec,
            origin: Origin {
                is_virtual: true,
                ..Origin::default()
            },
            ops: Vec::new(),
        };
        plan.push_op(Op::new(OpKind::Virtual, "virtual field").with("kind", vf.kind.as_str()));
        plan
    }

    /// Plan a message-level virtual type
    pub fn virtual_type(
        &self,
        message: &MessageDescriptor,
        new_full_name: &str,
        suffix: &str,
        vt: &VirtualType,
    ) -> VirtualTypePlan {
        let name = virtual_type_name(&vt.name, suffix);
        let mut fields: Vec<FieldSpec> = vt
            .fields
            .iter()
            .map(|vf| virtual_spec(message, new_full_name, suffix, vf))
            .collect();

        let mut next = 1;
        let taken: Vec<i32> = fields.iter().map(|f| f.number).filter(|&n| n > 0).collect();
        for field in fields.iter_mut().filter(|f| f.number == 0) {
            while taken.contains(&next) {
                next += 1;
            }
            field.number = next;
            next += 1;
        }

        VirtualTypePlan {
            full_name: format!("{}.{}", new_full_name, name),
            name,
            fields,
        }
    }
}

fn virtual_type_name(name: &str, suffix: &str) -> String {
    format!("{}{}", name.to_upper_camel_case(), suffix)
}

fn virtual_spec(
    message: &MessageDescriptor,
    new_full_name: &str,
    suffix: &str,
    vf: &VirtualField,
) -> FieldSpec {
    let kind = FieldKind::from_name(&vf.kind).unwrap_or(FieldKind::String);
    let type_ref = if kind.has_type_ref() {
        let local = message
            .options
            .virtual_types
            .iter()
            .any(|vt| vt.name == vf.type_ref);
        Some(if local {
            format!("{}.{}", new_full_name, virtual_type_name(&vf.type_ref, suffix))
        } else if vf.type_ref.starts_with('.') {
            vf.type_ref.clone()
        } else {
            format!(".{}", vf.type_ref)
        })
    } else {
        None
    };

    FieldSpec {
        name: vf.name.clone(),
        number: vf.number.max(0),
        kind,
        cardinality: if vf.repeated {
            Cardinality::Repeated
        } else {
            Cardinality::Singular
        },
        type_ref,
        oneof_index: None,
        proto3_optional: false,
        is_map: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn plans_for(fixture: &str, message: &str, field: &str) -> Vec<FieldPlan> {
        let schema = testing::schema(fixture);
        let aliases = AliasIndex::new(&schema);
        let msg = schema.message(message).unwrap();
        let overrides = &schema.file(&msg.file).unwrap().options.go_types_overrides;
        let flattener = Flattener::new(&schema, &aliases, overrides);
        flattener.flatten_field(msg, msg.field(field).unwrap(), &Scope::root())
    }

    fn names(plans: &[FieldPlan]) -> Vec<&str> {
        plans.iter().map(|p| p.field.name.as_str()).collect()
    }

    #[test]
    fn test_embed_with_prefix_recurses() {
        let plans = plans_for("embed.proto", ".embed.Profile", "home");
        assert_eq!(
            names(&plans),
            vec!["home_street", "home_city", "home_lat", "home_lng"]
        );

        let lat = &plans[2];
        assert!(lat.origin.is_embedded);
        assert_eq!(lat.origin.embed_source.as_ref().unwrap().name, "home");
        assert_eq!(lat.origin.source_path, vec!["home", "geo", "lat"]);
        assert_eq!(lat.field.number, 0);
        assert_eq!(lat.ops.iter().filter(|op| op.kind == OpKind::Embed).count(), 2);
    }

    #[test]
    fn test_serialize() {
        let plans = plans_for("embed.proto", ".embed.Profile", "billing");
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].field.kind, FieldKind::Bytes);
        assert_eq!(plans[0].field.type_ref, None);
        assert_eq!(plans[0].field.number, 3);
        assert!(plans[0].origin.is_serialized);
    }

    #[test]
    fn test_alias_resolution() {
        let plans = plans_for("alias.proto", ".alias.Account", "id");
        assert_eq!(plans[0].field.kind, FieldKind::String);
        assert_eq!(plans[0].field.type_ref, None);
        assert!(plans[0].origin.is_type_alias);
        assert_eq!(
            plans[0].origin.original_type.as_deref(),
            Some(".alias.UserId(string)")
        );

        let friends = plans_for("alias.proto", ".alias.Account", "friends");
        assert_eq!(friends[0].field.kind, FieldKind::String);
        assert_eq!(friends[0].field.cardinality, Cardinality::Repeated);
    }

    #[test]
    fn test_enum_formats() {
        let status = plans_for("override.proto", ".override.Event", "status");
        assert_eq!(status[0].field.kind, FieldKind::String);
        assert_eq!(status[0].origin.enum_format, Some(EnumFormat::AsString));

        let previous = plans_for("override.proto", ".override.Event", "previous");
        assert_eq!(previous[0].field.kind, FieldKind::Int32);
        assert_eq!(previous[0].origin.enum_format, Some(EnumFormat::AsInt));
    }

    #[test]
    fn test_field_override_beats_file_override() {
        let created = plans_for("override.proto", ".override.Event", "created_at");
        let op = created[0].override_op().unwrap();
        assert_eq!(op.reason, "field override");
        assert_eq!(op.get("name"), Some("DateTime"));

        let updated = plans_for("override.proto", ".override.Event", "updated_at");
        let op = updated[0].override_op().unwrap();
        assert_eq!(op.reason, "file type override");
        assert_eq!(op.get("name"), Some("Timestamp"));

        // cardinality filter excludes repeated fields
        let history = plans_for("override.proto", ".override.Event", "history");
        assert!(history[0].override_op().is_none());
    }

    #[test]
    fn test_virtual_type_and_field() {
        let schema = testing::schema("override.proto");
        let aliases = AliasIndex::new(&schema);
        let msg = schema.message(".override.Event").unwrap();
        let flattener = Flattener::new(&schema, &aliases, &[]);

        let vt = flattener.virtual_type(msg, ".override.EventPlain", "Plain", &msg.options.virtual_types[0]);
        assert_eq!(vt.full_name, ".override.EventPlain.AuditPlain");
        assert_eq!(
            vt.fields.iter().map(|f| f.number).collect::<Vec<_>>(),
            vec![1, 2]
        );

        let vf = flattener.virtual_field(msg, ".override.EventPlain", "Plain", &msg.options.virtual_fields[0]);
        assert!(vf.origin.is_virtual);
        assert!(vf.source.is_none());
        assert_eq!(vf.field.type_ref.as_deref(), Some(".override.EventPlain.AuditPlain"));
    }
}
