//! Descriptor application
//!
//! Rewrites the request's file descriptors into the Plain descriptor set:
//! generated messages are renamed in place with their planned fields, and
//! every type reference in every file is moved to its new name.

use std::collections::HashMap;

use heck::ToUpperCamelCase;
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, OneofDescriptorProto,
};

use crate::ir::{FieldSpec, Ir, MessageIr};
use crate::rename::RenameIndex;

/// Produce the Plain descriptor set
pub fn apply(files: &[FileDescriptorProto], ir: &Ir) -> Vec<FileDescriptorProto> {
    let entries = map_entries(files, &ir.renames);

    files
        .iter()
        .map(|file| {
            let mut file = file.clone();
            let proto3 = file.syntax() == "proto3";
            let scope = package_scope(file.package());

            for message in &mut file.message_type {
                apply_message(message, &scope, ir, &entries, proto3);
            }

            for message in &mut file.message_type {
                rename_message_refs(message, &ir.renames);
            }
            for extension in &mut file.extension {
                rename_field_refs(extension, &ir.renames);
            }
            for service in &mut file.service {
                for method in &mut service.method {
                    if let Some(input) = method.input_type.as_mut() {
                        *input = ir.renames.rename(input);
                    }
                    if let Some(output) = method.output_type.as_mut() {
                        *output = ir.renames.rename(output);
                    }
                }
            }
            file
        })
        .collect()
}

fn package_scope(package: &str) -> String {
    if package.is_empty() {
        String::new()
    } else {
        format!(".{}", package)
    }
}

/// Map entry messages by their renamed full name
fn map_entries(files: &[FileDescriptorProto], renames: &RenameIndex) -> HashMap<String, DescriptorProto> {
    fn walk(
        message: &DescriptorProto,
        scope: &str,
        renames: &RenameIndex,
        out: &mut HashMap<String, DescriptorProto>,
    ) {
        let full_name = format!("{}.{}", scope, message.name());
        if message.options.as_ref().is_some_and(|o| o.map_entry()) {
            out.insert(renames.rename(&full_name), message.clone());
        }
        for nested in &message.nested_type {
            walk(nested, &full_name, renames, out);
        }
    }

    let mut out = HashMap::new();
    for file in files {
        let scope = package_scope(file.package());
        for message in &file.message_type {
            walk(message, &scope, renames, &mut out);
        }
    }
    out
}

fn apply_message(
    message: &mut DescriptorProto,
    scope: &str,
    ir: &Ir,
    entries: &HashMap<String, DescriptorProto>,
    proto3: bool,
) {
    let full_name = format!("{}.{}", scope, message.name());
    for nested in &mut message.nested_type {
        apply_message(nested, &full_name, ir, entries, proto3);
    }

    if let Some(plan) = ir.message(&full_name).filter(|m| m.generate) {
        plain_message(message, plan, entries, proto3);
    }
}

fn plain_message(
    message: &mut DescriptorProto,
    plan: &MessageIr,
    entries: &HashMap<String, DescriptorProto>,
    proto3: bool,
) {
    message.name = Some(plan.new_name.clone());

    let mut kept: Vec<_> = plan
        .oneofs
        .iter()
        .filter_map(|o| o.new_index.map(|i| (i, o.name.clone())))
        .collect();
    kept.sort();
    let mut oneof_decl: Vec<OneofDescriptorProto> = kept
        .into_iter()
        .map(|(_, name)| OneofDescriptorProto {
            name: Some(name),
            options: None,
        })
        .collect();

    let mut fields = Vec::with_capacity(plan.fields.len());
    for field_plan in &plan.fields {
        let mut field = field_proto(&field_plan.field, proto3);
        if field_plan.field.is_map {
            field.type_name = Some(map_entry(message, plan, &field_plan.field, entries));
        }
        fields.push(field);
    }

    // synthetic oneofs go after every real one
    for field in fields.iter_mut().filter(|f| f.proto3_optional()) {
        let mut name = format!("_{}", field.name());
        while oneof_decl.iter().any(|o| o.name() == name) {
            name.insert(0, 'X');
        }
        oneof_decl.push(OneofDescriptorProto {
            name: Some(name),
            options: None,
        });
        field.oneof_index = Some(oneof_decl.len() as i32 - 1);
    }

    message.field = fields;
    message.oneof_decl = oneof_decl;
    message.reserved_range.clear();
    message.reserved_name.clear();
    message.extension_range.clear();

    message.enum_type.extend(plan.enums.iter().map(|e| EnumDescriptorProto {
        name: Some(e.name.clone()),
        value: e
            .values
            .iter()
            .map(|v| EnumValueDescriptorProto {
                name: Some(v.name.clone()),
                number: Some(v.number),
                options: None,
            })
            .collect(),
        ..Default::default()
    }));

    message
        .nested_type
        .extend(plan.virtual_types.iter().map(|vt| DescriptorProto {
            name: Some(vt.name.clone()),
            field: vt.fields.iter().map(|f| field_proto(f, proto3)).collect(),
            ..Default::default()
        }));
}

/// Type reference of a map field, copying its entry message into the Plain
/// message when the field came from elsewhere or was renamed
fn map_entry(
    message: &mut DescriptorProto,
    plan: &MessageIr,
    spec: &FieldSpec,
    entries: &HashMap<String, DescriptorProto>,
) -> String {
    let type_ref = spec.type_ref.clone().unwrap_or_default();
    let entry_name = format!("{}Entry", spec.name.to_upper_camel_case());
    let local = format!("{}.{}", plan.new_full_name, entry_name);
    if type_ref == local {
        return type_ref;
    }

    let Some(entry) = entries.get(&type_ref) else {
        return type_ref;
    };
    if !message.nested_type.iter().any(|n| n.name() == entry_name) {
        let mut entry = entry.clone();
        entry.name = Some(entry_name);
        message.nested_type.push(entry);
    }
    local
}

fn field_proto(spec: &FieldSpec, proto3: bool) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(spec.name.clone()),
        number: Some(spec.number),
        label: Some(spec.cardinality.to_label() as i32),
        r#type: Some(spec.kind.to_proto() as i32),
        type_name: spec.type_ref.clone(),
        oneof_index: spec.oneof_index.map(|i| i as i32),
        proto3_optional: (proto3 && spec.proto3_optional && spec.oneof_index.is_none())
            .then_some(true),
        ..Default::default()
    }
}

fn rename_field_refs(field: &mut FieldDescriptorProto, renames: &RenameIndex) {
    if let Some(type_name) = field.type_name.as_mut() {
        *type_name = renames.rename(type_name);
    }
    if let Some(extendee) = field.extendee.as_mut() {
        *extendee = renames.rename(extendee);
    }
}

fn rename_message_refs(message: &mut DescriptorProto, renames: &RenameIndex) {
    for field in message.field.iter_mut().chain(message.extension.iter_mut()) {
        rename_field_refs(field, renames);
    }
    for nested in &mut message.nested_type {
        rename_message_refs(nested, renames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginConfig;
    use crate::testing;
    use crate::descriptor::OneofSyntheticExt;
    use prost_reflect::DescriptorPool;
    use prost_types::FileDescriptorSet;

    fn plain_pool(fixture: &str, config: &PluginConfig) -> DescriptorPool {
        let ir = testing::build(fixture, config).unwrap();
        let files = apply(&testing::file_protos(fixture), &ir);
        DescriptorPool::from_file_descriptor_set(FileDescriptorSet { file: files }).unwrap()
    }

    /// Field names in declaration order; `fields()` iterates by number
    fn field_names(pool: &DescriptorPool, message: &str) -> Vec<String> {
        pool.get_message_by_name(message)
            .unwrap()
            .descriptor_proto()
            .field
            .iter()
            .map(|f| f.name().to_string())
            .collect()
    }

    #[test]
    fn test_oneof_messages_load() {
        let pool = plain_pool("oneof.proto", &PluginConfig::default().with_crf(true));

        assert!(pool.get_message_by_name("oneof.Payment").is_none());
        assert_eq!(
            field_names(&pool, "oneof.PaymentPlain"),
            vec!["id", "number", "numberCRF", "expiry", "swift", "note"]
        );

        let payment = pool.get_message_by_name("oneof.PaymentPlain").unwrap();
        let note = payment.get_field_by_name("note").unwrap();
        assert!(note.containing_oneof().unwrap().is_synthetic());
        assert!(payment.get_field_by_name("number").unwrap().containing_oneof().is_none());

        let order = pool.get_message_by_name("oneof.OrderPlain").unwrap();
        let contact: Vec<_> = order.oneofs().map(|o| o.name().to_string()).collect();
        assert_eq!(contact, vec!["contact"]);
        let tag = order.get_field_by_name("shipping_type").unwrap();
        let prost_reflect::Kind::Enum(dispatch) = tag.kind() else {
            panic!("shipping_type is not an enum");
        };
        assert_eq!(dispatch.full_name(), "oneof.OrderPlain.ShippingType");
        assert_eq!(dispatch.get_value(2).unwrap().name(), "SHIPPING_TYPE_COURIER");
    }

    #[test]
    fn test_prefixed_oneofs_load() {
        let pool = plain_pool("prefixed.proto", &PluginConfig::default());
        assert_eq!(
            field_names(&pool, "prefixed.CustomerPlain"),
            vec!["id", "contact_email_alt", "contact_number", "contact_expiry"]
        );
        assert_eq!(
            field_names(&pool, "prefixed.DeliveryPlain"),
            vec!["id", "shipping_shipping_type", "shipping_store", "shipping_note"]
        );
    }

    #[test]
    fn test_renames_reach_every_file() {
        let pool = plain_pool("rename.proto", &PluginConfig::default());

        let holder = pool.get_message_by_name("app.Holder").unwrap();
        let item = holder.get_field_by_name("item").unwrap();
        assert_eq!(item.kind().as_message().unwrap().full_name(), "dep.ItemPlain");

        let basket = pool.get_message_by_name("app.BasketPlain").unwrap();
        let detail = basket.get_field_by_name("detail").unwrap();
        assert_eq!(
            detail.kind().as_message().unwrap().full_name(),
            "dep.ItemPlain.DetailPlain"
        );
        assert!(pool.get_message_by_name("dep.ItemPlain.Note").is_some());
    }

    #[test]
    fn test_virtual_types_and_maps() {
        let pool = plain_pool("override.proto", &PluginConfig::default());

        let event = pool.get_message_by_name("override.EventPlain").unwrap();
        let audit = event.get_field_by_name("audit").unwrap();
        assert_eq!(
            audit.kind().as_message().unwrap().full_name(),
            "override.EventPlain.AuditPlain"
        );
        assert!(event.get_field_by_name("labels").unwrap().is_map());
        assert_eq!(
            event.get_field_by_name("status").unwrap().kind(),
            prost_reflect::Kind::String
        );
    }

    #[test]
    fn test_embedded_numbers() {
        let pool = plain_pool("embed.proto", &PluginConfig::default());
        let profile = pool.get_message_by_name("embed.ProfilePlain").unwrap();
        assert_eq!(profile.get_field_by_name("home_lng").unwrap().number(), 104);
        assert_eq!(
            profile.get_field_by_name("billing").unwrap().kind(),
            prost_reflect::Kind::Bytes
        );
    }
}
