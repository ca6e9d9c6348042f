//! Options validation
//!
//! Runs before any field plan is built. Every structural problem is reported
//! as a [`Diagnostic`]; the builder refuses to continue when any of them is
//! an error.

use std::collections::{BTreeSet, HashSet};

use crate::alias;
use crate::descriptor::{Cardinality, FieldKind, MessageDescriptor, Schema};
use crate::ir::Diagnostic;
use crate::options::VirtualField;

/// Validate every option in the schema. The result is sorted by level, then
/// subject.
pub fn validate(schema: &Schema) -> Vec<Diagnostic> {
    let mut diags = Vec::new();

    for file in schema.files() {
        validate_type_overrides(&file.name, &file.options.go_types_overrides, &mut diags);
    }

    for message in schema.messages() {
        validate_message(schema, message, &mut diags);
    }

    validate_embed_cycles(schema, &mut diags);

    diags.sort();
    diags.dedup();
    diags
}

fn validate_type_overrides(
    file: &str,
    overrides: &[crate::options::TypeOverride],
    diags: &mut Vec<Diagnostic>,
) {
    for (i, rule) in overrides.iter().enumerate() {
        let subject = format!("{}:go_types_overrides[{}]", file, i);

        match &rule.selector {
            None => diags.push(Diagnostic::error(&subject, "selector is required")),
            Some(selector) => {
                if selector.target_full_path.is_empty()
                    && selector.field_kind.is_empty()
                    && selector.field_cardinality.is_empty()
                    && selector.field_type_url.is_empty()
                {
                    diags.push(Diagnostic::error(
                        &subject,
                        "selector must set at least one filter",
                    ));
                }
                if !selector.field_kind.is_empty()
                    && FieldKind::from_name(&selector.field_kind).is_none()
                {
                    diags.push(Diagnostic::error(
                        &subject,
                        format!("unknown field kind {:?}", selector.field_kind),
                    ));
                }
                if !selector.field_cardinality.is_empty()
                    && !matches!(
                        selector.field_cardinality.as_str(),
                        "optional" | "required" | "repeated"
                    )
                {
                    diags.push(Diagnostic::error(
                        &subject,
                        format!("unknown cardinality {:?}", selector.field_cardinality),
                    ));
                }
            }
        }

        if rule.target.as_ref().is_none_or(|t| t.name.is_empty()) {
            diags.push(Diagnostic::error(&subject, "target name is required"));
        }
    }
}

fn validate_message(schema: &Schema, message: &MessageDescriptor, diags: &mut Vec<Diagnostic>) {
    let full = &message.full_name;
    let opts = &message.options;

    if opts.type_alias {
        if let Err(reason) = alias::check_shape(message) {
            diags.push(Diagnostic::error(full, reason));
        }
    }

    if !opts.generate && (!opts.virtual_fields.is_empty() || !opts.virtual_types.is_empty()) {
        diags.push(Diagnostic::info(
            full,
            "virtual fields and types are ignored on messages that are not generated",
        ));
    }

    if opts.generate {
        validate_virtual_types(schema, message, diags);
        let existing: Vec<i32> = message.fields.iter().map(|f| f.number).collect();
        let mut explicit = HashSet::new();
        let mut names = HashSet::new();
        for (i, vf) in opts.virtual_fields.iter().enumerate() {
            let subject = format!("{}:virtual_fields[{}]", full, i);
            validate_virtual_field(schema, message, vf, &subject, diags);
            if vf.number > 0 {
                if existing.contains(&vf.number) {
                    diags.push(Diagnostic::error(
                        &subject,
                        format!("number {} is already used by a field", vf.number),
                    ));
                } else if !explicit.insert(vf.number) {
                    diags.push(Diagnostic::error(
                        &subject,
                        format!("number {} is used by another virtual field", vf.number),
                    ));
                }
            }
            if !vf.name.is_empty() && !names.insert(vf.name.as_str()) {
                diags.push(Diagnostic::error(
                    &subject,
                    format!("duplicate virtual field {:?}", vf.name),
                ));
            }
        }
    }

    for field in &message.fields {
        let subject = format!("{}.{}", full, field.name);
        let fo = &field.options;

        if fo.serialize && fo.embeds() {
            diags.push(Diagnostic::error(
                &subject,
                "serialize and embed are mutually exclusive",
            ));
        }
        if fo.embeds() {
            if field.kind != FieldKind::Message {
                diags.push(Diagnostic::error(&subject, "embed requires a message field"));
            } else if field.cardinality == Cardinality::Repeated {
                diags.push(Diagnostic::error(&subject, "embed requires a singular field"));
            } else if field
                .type_ref
                .as_deref()
                .is_none_or(|t| schema.message(t).is_none())
            {
                diags.push(Diagnostic::error(&subject, "embedded message not found"));
            }
            let in_kept_oneof = field.oneof_index.is_some_and(|i| {
                let oneof = &message.oneofs[i];
                !oneof.synthetic && !oneof_flattens(message, i)
            });
            if opts.generate && in_kept_oneof {
                diags.push(Diagnostic::error(
                    &subject,
                    "embed is not allowed on members of a oneof that is not flattened",
                ));
            }
        }
        if fo.serialize && field.kind != FieldKind::Message {
            diags.push(Diagnostic::error(&subject, "serialize requires a message field"));
        }
        if fo.enum_as_string && fo.enum_as_int {
            diags.push(Diagnostic::error(
                &subject,
                "enum_as_string and enum_as_int are mutually exclusive",
            ));
        }
        if (fo.enum_as_string || fo.enum_as_int) && field.kind != FieldKind::Enum {
            diags.push(Diagnostic::error(
                &subject,
                "enum_as_string and enum_as_int require an enum field",
            ));
        }
        if fo.override_type.as_ref().is_some_and(|o| o.name.is_empty()) {
            diags.push(Diagnostic::error(&subject, "override_type.name is required"));
        }
        if !fo.with_enums.is_empty() && field.oneof_index.is_none() {
            diags.push(Diagnostic::warn(
                &subject,
                "with_enums is ignored outside a oneof",
            ));
        }
        for value in &fo.with_enums {
            if !schema.has_enum_value(value) {
                diags.push(Diagnostic::warn(
                    &subject,
                    format!("with_enums value {:?} does not name a known enum value", value),
                ));
            }
        }
    }

    for (index, oneof) in message.oneofs.iter().enumerate() {
        let subject = format!("{}.oneof:{}", full, oneof.name);
        let oo = &oneof.options;

        if oneof.synthetic {
            if oo.embeds() || oo.dispatches() {
                diags.push(Diagnostic::warn(&subject, "options on a synthetic oneof are ignored"));
            }
            continue;
        }

        let members: Vec<_> = message.oneof_fields(index).collect();
        let tagged = members.iter().filter(|f| !f.options.with_enums.is_empty()).count();
        let discriminated = tagged > 0 && !oo.embeds() && !oo.dispatches();

        if discriminated && tagged != members.len() {
            let missing: Vec<_> = members
                .iter()
                .filter(|f| f.options.with_enums.is_empty())
                .map(|f| f.name.as_str())
                .collect();
            diags.push(Diagnostic::error(
                &subject,
                format!(
                    "every member of a discriminated oneof must declare with_enums; missing on {}",
                    missing.join(", ")
                ),
            ));
        }

        if discriminated {
            let mut seen = HashSet::new();
            for value in members.iter().flat_map(|f| &f.options.with_enums) {
                if !seen.insert(value.trim_start_matches('.')) {
                    diags.push(Diagnostic::error(
                        &subject,
                        format!("with_enums value {:?} selects more than one member", value),
                    ));
                }
            }
        }
    }
}

/// Whether the oneof at `index` is flattened by any strategy
pub(crate) fn oneof_flattens(message: &MessageDescriptor, index: usize) -> bool {
    let oneof = &message.oneofs[index];
    if oneof.synthetic {
        return false;
    }
    oneof.options.embeds()
        || oneof.options.dispatches()
        || message
            .oneof_fields(index)
            .any(|f| !f.options.with_enums.is_empty())
}

fn validate_virtual_field(
    schema: &Schema,
    message: &MessageDescriptor,
    vf: &VirtualField,
    subject: &str,
    diags: &mut Vec<Diagnostic>,
) {
    if vf.name.is_empty() {
        diags.push(Diagnostic::error(subject, "name is required"));
    }
    if vf.number < 0 {
        diags.push(Diagnostic::error(subject, "number must not be negative"));
    }
    if vf.kind.is_empty() {
        diags.push(Diagnostic::error(subject, "kind is required"));
        return;
    }
    let Some(kind) = FieldKind::from_name(&vf.kind) else {
        diags.push(Diagnostic::error(subject, format!("unknown kind {:?}", vf.kind)));
        return;
    };

    match kind {
        FieldKind::Message | FieldKind::Enum if vf.type_ref.is_empty() => {
            diags.push(Diagnostic::error(
                subject,
                format!("{} kind requires type_ref", kind.name()),
            ));
        }
        FieldKind::Message => {
            let is_virtual_type = message
                .options
                .virtual_types
                .iter()
                .any(|vt| vt.name == vf.type_ref);
            if !is_virtual_type && schema.message(&vf.type_ref).is_none() {
                diags.push(Diagnostic::error(
                    subject,
                    format!("type_ref {:?} does not resolve", vf.type_ref),
                ));
            }
        }
        FieldKind::Enum => {
            if schema.enum_type(&vf.type_ref).is_none() {
                diags.push(Diagnostic::error(
                    subject,
                    format!("type_ref {:?} does not resolve", vf.type_ref),
                ));
            }
        }
        FieldKind::Group => {
            diags.push(Diagnostic::error(subject, "group kind is not supported"));
        }
        _ => {}
    }
}

fn validate_virtual_types(schema: &Schema, message: &MessageDescriptor, diags: &mut Vec<Diagnostic>) {
    let mut names = HashSet::new();
    for (i, vt) in message.options.virtual_types.iter().enumerate() {
        let subject = format!("{}:virtual_types[{}]", message.full_name, i);
        if vt.name.is_empty() {
            diags.push(Diagnostic::error(&subject, "name is required"));
        } else if !names.insert(vt.name.as_str()) {
            diags.push(Diagnostic::error(&subject, format!("duplicate virtual type {:?}", vt.name)));
        }

        let mut numbers = HashSet::new();
        for (j, vf) in vt.fields.iter().enumerate() {
            let field_subject = format!("{}.fields[{}]", subject, j);
            validate_virtual_field(schema, message, vf, &field_subject, diags);
            if vf.number > 0 && !numbers.insert(vf.number) {
                diags.push(Diagnostic::error(
                    &field_subject,
                    format!("number {} is used by another field", vf.number),
                ));
            }
        }
    }
}

/// Embed targets of a message. Oneof members count only for the message
/// being generated, since oneofs of embedded messages are not flattened.
fn embed_edges<'a>(message: &'a MessageDescriptor, root: bool) -> Vec<(&'a str, &'a str)> {
    message
        .fields
        .iter()
        .filter(|f| f.kind == FieldKind::Message)
        .filter(|f| {
            f.options.embeds() || (root && f.oneof_index.is_some_and(|i| oneof_flattens_embedding(message, i)))
        })
        .filter_map(|f| f.type_ref.as_deref().map(|t| (f.name.as_str(), t)))
        .collect()
}

fn oneof_flattens_embedding(message: &MessageDescriptor, index: usize) -> bool {
    let oneof = &message.oneofs[index];
    !oneof.synthetic && (oneof.options.embeds() || oneof.options.dispatches())
}

fn validate_embed_cycles(schema: &Schema, diags: &mut Vec<Diagnostic>) {
    let mut reported = BTreeSet::new();
    for message in schema.messages().iter().filter(|m| m.options.generate) {
        let mut stack = vec![message.full_name.clone()];
        walk_embeds(schema, message, true, &mut stack, &mut reported, diags);
    }
}

fn walk_embeds(
    schema: &Schema,
    message: &MessageDescriptor,
    root: bool,
    stack: &mut Vec<String>,
    reported: &mut BTreeSet<String>,
    diags: &mut Vec<Diagnostic>,
) {
    for (field, target) in embed_edges(message, root) {
        if let Some(start) = stack.iter().position(|m| m == target) {
            let subject = format!("{}.{}", message.full_name, field);
            if reported.insert(subject.clone()) {
                let mut cycle = stack[start..].to_vec();
                cycle.push(target.to_string());
                diags.push(Diagnostic::error(
                    subject,
                    format!("embed cycle: {}", cycle.join(" -> ")),
                ));
            }
            continue;
        }
        let Some(next) = schema.message(target) else {
            continue;
        };
        stack.push(next.full_name.clone());
        walk_embeds(schema, next, false, stack, reported, diags);
        stack.pop();
    }
}
