//! Oneof strategy selection
//!
//! Every oneof of a generated message is either copied through or flattened
//! with exactly one strategy, decided once here and consumed by the builder,
//! the converter and the contract renderer.

use std::str::FromStr;

use heck::{ToShoutySnakeCase, ToUpperCamelCase};
use serde::Serialize;

use crate::descriptor::{Cardinality, FieldKind, MessageDescriptor};
use crate::flatten::{Flattener, Scope};
use crate::ir::{
    EnumDispatchPlan, EnumValueSpec, FieldPlan, FieldSpec, GeneratedEnum, KNOWN_CONVERSION,
    OneofMember, OneofPlan, Op, OpKind, Origin, Synthetic,
};

/// Type name of discriminator fields
pub const DISCRIMINATOR_TYPE: &str = "EnumDiscriminator";
/// Module providing [`DISCRIMINATOR_TYPE`]
pub const DISCRIMINATOR_IMPORT: &str = "plain_runtime::discriminator";
/// Type name of discriminated payload fields
pub const PAYLOAD_TYPE: &str = "any";

/// How a oneof is represented in the Plain message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OneofStrategy {
    /// Members are embedded; the populated variant is inferred from values
    EmbedOnly,
    /// Members are embedded and a generated enum field names the variant
    EnumDispatch,
    /// A discriminator string plus an opaque serialized payload
    DiscriminatorOnly,
    /// Copied through as a real oneof
    Untouched,
}

impl OneofStrategy {
    /// Pick the strategy for the oneof at `index`
    pub fn select(message: &MessageDescriptor, index: usize) -> Self {
        let oneof = &message.oneofs[index];
        if oneof.synthetic {
            return OneofStrategy::Untouched;
        }

        let embed = oneof.options.embeds();
        let enum_dispatch = oneof.options.dispatches();
        let has_enums = message
            .oneof_fields(index)
            .any(|f| !f.options.with_enums.is_empty());

        if enum_dispatch {
            OneofStrategy::EnumDispatch
        } else if embed {
            OneofStrategy::EmbedOnly
        } else if has_enums {
            OneofStrategy::DiscriminatorOnly
        } else {
            OneofStrategy::Untouched
        }
    }

    /// Whether the oneof disappears from the Plain message
    pub fn flattens(self) -> bool {
        self != OneofStrategy::Untouched
    }
}

impl FromStr for OneofStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "embed" | "embed_only" => Ok(OneofStrategy::EmbedOnly),
            "enum_dispatch" | "dispatch" => Ok(OneofStrategy::EnumDispatch),
            "discriminator" | "discriminator_only" => Ok(OneofStrategy::DiscriminatorOnly),
            "untouched" | "none" => Ok(OneofStrategy::Untouched),
            _ => Err(format!("Unknown oneof strategy: {}", s)),
        }
    }
}

/// Output of flattening one oneof
#[derive(Debug, Clone)]
pub struct ExpandedOneof {
    pub plan: OneofPlan,
    /// Output fields, in order, replacing every member
    pub fields: Vec<FieldPlan>,
    pub generated_enum: Option<GeneratedEnum>,
}

fn synthetic_plan(name: String, kind: FieldKind, oneof: &str, synthetic: Synthetic) -> FieldPlan {
    FieldPlan {
        source: None,
        field: FieldSpec {
            name,
            number: 0,
            kind,
            cardinality: Cardinality::Singular,
            type_ref: None,
            oneof_index: None,
            proto3_optional: false,
            is_map: false,
        },
        origin: Origin {
            is_oneof: true,
            oneof_group: Some(oneof.to_string()),
            synthetic: Some(synthetic),
            ..Origin::default()
        },
        ops: Vec::new(),
    }
}

/// Members of the oneof at `index`, with normalized `with_enums`
pub fn members(message: &MessageDescriptor, index: usize) -> Vec<OneofMember> {
    message
        .oneof_fields(index)
        .map(|f| OneofMember {
            name: f.name.clone(),
            with_enums: f
                .options
                .with_enums
                .iter()
                .map(|v| v.trim_start_matches('.').to_string())
                .collect(),
        })
        .collect()
}

/// Plan of a oneof copied through to the Plain message
pub fn untouched(message: &MessageDescriptor, index: usize, new_index: Option<usize>) -> OneofPlan {
    OneofPlan {
        name: message.oneofs[index].name.clone(),
        strategy: OneofStrategy::Untouched,
        members: members(message, index),
        dispatch: None,
        prefixed: false,
        new_index,
    }
}

/// Flatten the oneof at `index` with a flattening strategy
pub fn expand(
    flattener: &Flattener<'_>,
    message: &MessageDescriptor,
    index: usize,
    strategy: OneofStrategy,
    new_full_name: &str,
) -> ExpandedOneof {
    let oneof = &message.oneofs[index];
    let members = members(message, index);

    let prefixed = oneof.options.embed_with_prefix || oneof.options.enum_dispatched_with_prefix;
    let mut fields = Vec::new();
    let mut dispatch = None;
    let mut generated_enum = None;

    match strategy {
        OneofStrategy::DiscriminatorOnly => {
            let all_enums: Vec<String> = members.iter().flat_map(|m| m.with_enums.clone()).collect();

            let mut disc = synthetic_plan(
                format!("{}_disc", oneof.name),
                FieldKind::String,
                &oneof.name,
                Synthetic::Discriminator {
                    oneof: oneof.name.clone(),
                },
            );
            disc.origin.oneof_enums = all_enums.clone();
            disc.push_op(
                Op::new(OpKind::OverrideType, "oneof discriminator")
                    .with("name", DISCRIMINATOR_TYPE)
                    .with("import_path", DISCRIMINATOR_IMPORT)
                    .with(KNOWN_CONVERSION, "true"),
            );

            let mut payload = synthetic_plan(
                oneof.name.clone(),
                FieldKind::Bytes,
                &oneof.name,
                Synthetic::Payload {
                    oneof: oneof.name.clone(),
                },
            );
            payload.origin.oneof_enums = all_enums;
            payload.push_op(
                Op::new(OpKind::OverrideType, "oneof discriminator payload")
                    .with("name", PAYLOAD_TYPE)
                    .with("import_path", "")
                    .with(KNOWN_CONVERSION, "true"),
            );

            fields.push(disc);
            fields.push(payload);
        }
        OneofStrategy::EmbedOnly | OneofStrategy::EnumDispatch => {
            if strategy == OneofStrategy::EnumDispatch {
                let enum_name = format!("{}Type", oneof.name.to_upper_camel_case());
                let enum_full_name = format!("{}.{}", new_full_name, enum_name);
                let value_prefix = enum_name.to_shouty_snake_case();
                let with_prefix = oneof.options.enum_dispatched_with_prefix;
                let field_name = if with_prefix {
                    format!("{0}_{0}_type", oneof.name)
                } else {
                    format!("{}_type", oneof.name)
                };

                let mut values = vec![EnumValueSpec {
                    name: format!("{}_UNSPECIFIED", value_prefix),
                    number: 0,
                }];
                values.extend(members.iter().enumerate().map(|(i, m)| EnumValueSpec {
                    name: format!("{}_{}", value_prefix, m.name.to_shouty_snake_case()),
                    number: i as i32 + 1,
                }));

                let mut tag = synthetic_plan(
                    field_name.clone(),
                    FieldKind::Enum,
                    &oneof.name,
                    Synthetic::DispatchTag {
                        oneof: oneof.name.clone(),
                    },
                );
                tag.field.type_ref = Some(enum_full_name.clone());
                tag.push_op(
                    Op::new(OpKind::Virtual, "oneof dispatch tag")
                        .with("enum", enum_full_name.as_str()),
                );
                fields.push(tag);

                generated_enum = Some(GeneratedEnum {
                    name: enum_name,
                    full_name: enum_full_name.clone(),
                    values,
                });
                dispatch = Some(EnumDispatchPlan {
                    enum_full_name,
                    field_name,
                    with_prefix,
                });
            }

            let name_prefix = if prefixed {
                format!("{}_", oneof.name)
            } else {
                String::new()
            };
            for member in message.oneof_fields(index) {
                let scope = Scope::member(&oneof.name, &member.name).with_name_prefix(&name_prefix);
                let embeds = member.kind == FieldKind::Message
                    && !member.options.serialize
                    && member
                        .type_ref
                        .as_deref()
                        .is_some_and(|t| flattener.is_embeddable(t));

                if embeds {
                    let own_prefix = member.options.embed_with_prefix;
                    fields.extend(flattener.embed_field(message, member, &scope, own_prefix));
                } else {
                    let mut plans = flattener.flatten_field(message, member, &scope);
                    for plan in &mut plans {
                        // keep presence so the populated variant stays detectable
                        plan.field.cardinality = Cardinality::Optional;
                        plan.field.proto3_optional = true;
                    }
                    fields.extend(plans);
                }
            }
        }
        OneofStrategy::Untouched => {}
    }

    ExpandedOneof {
        plan: OneofPlan {
            name: oneof.name.clone(),
            strategy,
            members,
            dispatch,
            prefixed,
            new_index: None,
        },
        fields,
        generated_enum,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::AliasIndex;
    use crate::testing;

    fn expand_fixture(fixture: &str, message: &str, oneof: &str) -> ExpandedOneof {
        let schema = testing::schema(fixture);
        let aliases = AliasIndex::new(&schema);
        let flattener = Flattener::new(&schema, &aliases, &[]);
        let msg = schema.message(message).unwrap();
        let index = msg.oneofs.iter().position(|o| o.name == oneof).unwrap();
        let strategy = OneofStrategy::select(msg, index);
        expand(&flattener, msg, index, strategy, &format!("{}Plain", message))
    }

    fn names(expanded: &ExpandedOneof) -> Vec<&str> {
        expanded.fields.iter().map(|p| p.field.name.as_str()).collect()
    }

    #[test]
    fn test_select() {
        let schema = testing::schema("oneof.proto");
        let payment = schema.message(".oneof.Payment").unwrap();
        assert_eq!(OneofStrategy::select(payment, 0), OneofStrategy::EmbedOnly);
        // synthetic oneof of `optional string note`
        assert_eq!(OneofStrategy::select(payment, 1), OneofStrategy::Untouched);

        let order = schema.message(".oneof.Order").unwrap();
        assert_eq!(OneofStrategy::select(order, 0), OneofStrategy::EnumDispatch);
        assert_eq!(OneofStrategy::select(order, 1), OneofStrategy::Untouched);

        let schema = testing::schema("discriminator.proto");
        let drawing = schema.message(".discriminator.Drawing").unwrap();
        assert_eq!(OneofStrategy::select(drawing, 0), OneofStrategy::DiscriminatorOnly);
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("embed".parse::<OneofStrategy>(), Ok(OneofStrategy::EmbedOnly));
        assert_eq!("Dispatch".parse::<OneofStrategy>(), Ok(OneofStrategy::EnumDispatch));
        assert!("merge".parse::<OneofStrategy>().is_err());
    }

    #[test]
    fn test_embed_only_keeps_colliding_names() {
        let expanded = expand_fixture("oneof.proto", ".oneof.Payment", "method");
        assert_eq!(names(&expanded), vec!["number", "expiry", "number", "swift"]);
        assert!(expanded.generated_enum.is_none());

        let bank_number = &expanded.fields[2];
        assert_eq!(bank_number.origin.oneof_group.as_deref(), Some("method"));
        assert_eq!(bank_number.origin.oneof_variant.as_deref(), Some("bank"));
        assert_eq!(bank_number.origin.source_path, vec!["bank", "number"]);
    }

    #[test]
    fn test_enum_dispatch() {
        let expanded = expand_fixture("oneof.proto", ".oneof.Order", "shipping");
        assert_eq!(
            names(&expanded),
            vec!["shipping_type", "store", "address", "eta_minutes"]
        );

        let generated = expanded.generated_enum.unwrap();
        assert_eq!(generated.full_name, ".oneof.OrderPlain.ShippingType");
        let values: Vec<_> = generated
            .values
            .iter()
            .map(|v| (v.name.as_str(), v.number))
            .collect();
        assert_eq!(
            values,
            vec![
                ("SHIPPING_TYPE_UNSPECIFIED", 0),
                ("SHIPPING_TYPE_PICKUP", 1),
                ("SHIPPING_TYPE_COURIER", 2),
            ]
        );

        let tag = &expanded.fields[0];
        assert_eq!(tag.field.kind, FieldKind::Enum);
        assert_eq!(tag.field.type_ref.as_deref(), Some(".oneof.OrderPlain.ShippingType"));
        assert_eq!(
            tag.origin.synthetic,
            Some(Synthetic::DispatchTag {
                oneof: "shipping".to_string()
            })
        );
    }

    #[test]
    fn test_embed_with_prefix_prefixes_every_member() {
        let expanded = expand_fixture("prefixed.proto", ".prefixed.Customer", "contact");
        assert_eq!(
            names(&expanded),
            vec!["contact_email_alt", "contact_number", "contact_expiry"]
        );
        assert!(expanded.plan.prefixed);
        assert!(expanded.plan.dispatch.is_none());

        let number = &expanded.fields[1];
        assert_eq!(number.origin.oneof_variant.as_deref(), Some("card"));
        assert_eq!(number.origin.source_path, vec!["card", "number"]);
        // scalar members keep presence
        assert!(expanded.fields[0].field.proto3_optional);
    }

    #[test]
    fn test_enum_dispatch_with_prefix() {
        let expanded = expand_fixture("prefixed.proto", ".prefixed.Delivery", "shipping");
        assert_eq!(
            names(&expanded),
            vec!["shipping_shipping_type", "shipping_store", "shipping_note"]
        );

        let dispatch = expanded.plan.dispatch.as_ref().unwrap();
        assert_eq!(dispatch.field_name, "shipping_shipping_type");
        assert!(dispatch.with_prefix);
        assert_eq!(dispatch.enum_full_name, ".prefixed.DeliveryPlain.ShippingType");
        assert_eq!(
            expanded.fields[0].field.type_ref.as_deref(),
            Some(".prefixed.DeliveryPlain.ShippingType")
        );
    }

    #[test]
    fn test_discriminator_only() {
        let expanded = expand_fixture("discriminator.proto", ".discriminator.Drawing", "shape");
        assert_eq!(names(&expanded), vec!["shape_disc", "shape"]);

        let disc = &expanded.fields[0];
        assert_eq!(disc.field.kind, FieldKind::String);
        assert_eq!(disc.override_op().unwrap().get("name"), Some(DISCRIMINATOR_TYPE));
        assert!(!disc.needs_caster());

        let payload = &expanded.fields[1];
        assert_eq!(payload.field.kind, FieldKind::Bytes);
        assert_eq!(payload.override_op().unwrap().get("name"), Some(PAYLOAD_TYPE));
        assert_eq!(
            expanded.plan.members[0].with_enums,
            vec!["discriminator.ShapeKind.SHAPE_KIND_CIRCLE"]
        );
    }
}
