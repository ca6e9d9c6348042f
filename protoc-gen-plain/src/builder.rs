//! IR builder
//!
//! Validates the schema, plans every generated message and applies the
//! rename index to every plan. The result is a pure function of the schema
//! and the configuration.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::alias::AliasIndex;
use crate::collision;
use crate::config::PluginConfig;
use crate::descriptor::{MessageDescriptor, Schema};
use crate::error::BuildError;
use crate::flatten::{Flattener, Scope};
use crate::ir::{Diagnostic, Ir, Level, MessageIr, OneofPlan};
use crate::numbering;
use crate::oneof::{self, OneofStrategy};
use crate::rename::RenameIndex;
use crate::validate::validate;

/// Build the IR of a schema.
///
/// Fails with every diagnostic when validation reports an error, or with the
/// first collision that cannot be merged.
pub fn build(schema: &Schema, config: &PluginConfig) -> Result<Ir, BuildError> {
    let diagnostics = validate(schema);
    for diag in &diagnostics {
        match diag.level {
            Level::Error => debug!(subject = %diag.subject, "{}", diag.message),
            Level::Warn => warn!(subject = %diag.subject, "{}", diag.message),
            Level::Info => debug!(subject = %diag.subject, "{}", diag.message),
        }
    }
    if diagnostics.iter().any(Diagnostic::is_error) {
        return Err(BuildError::InvalidOptions(diagnostics));
    }

    let aliases = AliasIndex::new(schema);
    let renames = RenameIndex::build(schema, &config.plain_suffix);

    let mut messages = Vec::with_capacity(schema.messages().len());
    for message in schema.messages() {
        let new_full_name = renames.rename(&message.full_name);
        let new_name = new_full_name
            .rsplit('.')
            .next()
            .unwrap_or(&message.name)
            .to_string();

        let mut ir = MessageIr {
            full_name: message.full_name.clone(),
            new_full_name,
            name: message.name.clone(),
            new_name,
            file: message.file.clone(),
            generate: message.options.generate,
            is_map_entry: message.is_map_entry,
            ..MessageIr::default()
        };
        if ir.generate {
            plan_message(schema, &aliases, config, message, &mut ir)?;
        }
        messages.push(ir);
    }

    // Every message is known now; references across files can be rewritten
    for ir in messages.iter_mut().filter(|m| m.generate) {
        for plan in &mut ir.fields {
            renames.rewrite_plan(plan);
        }
        for vt in &mut ir.virtual_types {
            for spec in &mut vt.fields {
                renames.rewrite_spec(spec);
            }
        }
    }

    let generated = messages.iter().filter(|m| m.generate).count();
    let merged: usize = messages.iter().map(|m| m.crf.len()).sum();
    info!(
        messages = messages.len(),
        generated,
        renames = renames.len(),
        merged,
        "built plain IR"
    );

    Ok(Ir {
        suffix: config.plain_suffix.clone(),
        messages,
        renames,
        diagnostics,
    })
}

fn plan_message(
    schema: &Schema,
    aliases: &AliasIndex,
    config: &PluginConfig,
    message: &MessageDescriptor,
    ir: &mut MessageIr,
) -> Result<(), BuildError> {
    let overrides = schema
        .file(&message.file)
        .map(|f| f.options.go_types_overrides.as_slice())
        .unwrap_or(&[]);
    let flattener = Flattener::new(schema, aliases, overrides);

    let strategies: Vec<OneofStrategy> = (0..message.oneofs.len())
        .map(|i| OneofStrategy::select(message, i))
        .collect();
    let mut oneofs: Vec<Option<OneofPlan>> = vec![None; message.oneofs.len()];
    let mut kept: HashMap<usize, usize> = HashMap::new();
    let mut plans = Vec::new();

    for field in &message.fields {
        match field.oneof_index {
            Some(i) if strategies[i].flattens() => {
                // the whole group lands where its first member is declared
                if oneofs[i].is_none() {
                    let expanded =
                        oneof::expand(&flattener, message, i, strategies[i], &ir.new_full_name);
                    plans.extend(expanded.fields);
                    ir.enums.extend(expanded.generated_enum);
                    oneofs[i] = Some(expanded.plan);
                }
            }
            Some(i) if !message.oneofs[i].synthetic => {
                let next = kept.len();
                let new_index = *kept.entry(i).or_insert(next);
                if oneofs[i].is_none() {
                    oneofs[i] = Some(oneof::untouched(message, i, Some(new_index)));
                }
                for mut plan in flattener.flatten_field(message, field, &Scope::root()) {
                    plan.field.oneof_index = Some(new_index);
                    plans.push(plan);
                }
            }
            _ => plans.extend(flattener.flatten_field(message, field, &Scope::root())),
        }
    }

    ir.oneofs = oneofs
        .into_iter()
        .enumerate()
        .map(|(i, plan)| plan.unwrap_or_else(|| oneof::untouched(message, i, None)))
        .collect();

    for vf in &message.options.virtual_fields {
        plans.push(flattener.virtual_field(message, &ir.new_full_name, &config.plain_suffix, vf));
    }
    ir.virtual_types = message
        .options
        .virtual_types
        .iter()
        .map(|vt| flattener.virtual_type(message, &ir.new_full_name, &config.plain_suffix, vt))
        .collect();

    let (mut plans, crf) = collision::resolve(&message.full_name, plans, config.enable_crf)?;
    numbering::assign(&mut plans);
    let problems = numbering::check(&plans);
    if !problems.is_empty() {
        return Err(BuildError::InvalidNumbers(
            problems
                .into_iter()
                .map(|p| Diagnostic::error(&message.full_name, p))
                .collect(),
        ));
    }

    ir.virtual_fields = plans
        .iter()
        .filter(|p| p.origin.is_virtual)
        .map(|p| p.field.name.clone())
        .collect();
    ir.fields = plans;
    ir.crf = crf;

    debug!(
        message = %ir.full_name,
        plain = %ir.new_full_name,
        fields = ir.fields.len(),
        merged = ir.crf.len(),
        "planned message"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::FieldKind;
    use crate::testing;

    fn layout(ir: &Ir, message: &str) -> Vec<(String, i32)> {
        ir.message(message)
            .unwrap()
            .fields
            .iter()
            .map(|p| (p.field.name.clone(), p.field.number))
            .collect()
    }

    fn pairs(expected: &[(&str, i32)]) -> Vec<(String, i32)> {
        expected.iter().map(|(n, i)| (n.to_string(), *i)).collect()
    }

    #[test]
    fn test_simple_message_keeps_layout() {
        let ir = testing::build("rename.proto", &PluginConfig::default()).unwrap();
        assert_eq!(
            layout(&ir, ".dep.Item"),
            pairs(&[("sku", 1), ("detail", 2), ("note", 3)])
        );
    }

    #[test]
    fn test_embed_then_virtual_numbering() {
        let ir = testing::build("embed.proto", &PluginConfig::default()).unwrap();
        assert_eq!(
            layout(&ir, ".embed.Profile"),
            pairs(&[
                ("name", 1),
                ("home_street", 101),
                ("home_city", 102),
                ("home_lat", 103),
                ("home_lng", 104),
                ("billing", 3),
                ("age", 4),
                ("display_name", 105),
                ("score", 100),
            ])
        );
        let profile = ir.message(".embed.Profile").unwrap();
        assert_eq!(profile.virtual_fields, vec!["display_name", "score"]);
        assert_eq!(profile.new_full_name, ".embed.ProfilePlain");
        assert!(!ir.message(".embed.Address").unwrap().generate);
    }

    #[test]
    fn test_collision_without_crf_fails() {
        let err = testing::build("oneof.proto", &PluginConfig::default()).unwrap_err();
        let diags = err.diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].subject, ".oneof.Payment.number");
        assert!(diags[0].message.contains("card?oneof=method/number"));
        assert!(diags[0].message.contains("bank?oneof=method/number"));
    }

    #[test]
    fn test_collision_with_crf_merges() {
        let config = PluginConfig::default().with_crf(true);
        let ir = testing::build("oneof.proto", &config).unwrap();

        assert_eq!(
            layout(&ir, ".oneof.Payment"),
            pairs(&[
                ("id", 1),
                ("number", 5),
                ("numberCRF", 6),
                ("expiry", 7),
                ("swift", 8),
                ("note", 4),
            ])
        );
        let payment = ir.message(".oneof.Payment").unwrap();
        let entry = payment.crf_entry("number").unwrap();
        assert_eq!(
            entry.sources,
            vec!["card?oneof=method/number", "bank?oneof=method/number"]
        );
        assert!(payment.field("note").unwrap().field.proto3_optional);
    }

    #[test]
    fn test_enum_dispatch_and_untouched_oneof() {
        let config = PluginConfig::default().with_crf(true);
        let ir = testing::build("oneof.proto", &config).unwrap();
        let order = ir.message(".oneof.Order").unwrap();

        assert_eq!(
            layout(&ir, ".oneof.Order"),
            pairs(&[
                ("id", 1),
                ("shipping_type", 7),
                ("store", 8),
                ("address", 9),
                ("eta_minutes", 10),
                ("email", 4),
                ("phone", 5),
                ("quantity", 6),
            ])
        );
        assert_eq!(order.oneofs[0].strategy, OneofStrategy::EnumDispatch);
        assert_eq!(order.oneofs[1].strategy, OneofStrategy::Untouched);
        assert_eq!(order.oneofs[1].new_index, Some(0));
        assert_eq!(order.field("email").unwrap().field.oneof_index, Some(0));
        assert_eq!(order.enums[0].full_name, ".oneof.OrderPlain.ShippingType");
    }

    #[test]
    fn test_discriminator_layout() {
        let ir = testing::build("discriminator.proto", &PluginConfig::default()).unwrap();
        assert_eq!(
            layout(&ir, ".discriminator.Drawing"),
            pairs(&[("title", 1), ("shape_disc", 2), ("shape", 3)])
        );
    }

    #[test]
    fn test_no_reference_to_renamed_names() {
        let ir = testing::build("rename.proto", &PluginConfig::default()).unwrap();
        let basket = ir.message(".app.Basket").unwrap();
        let refs: Vec<_> = basket
            .fields
            .iter()
            .map(|p| p.field.type_ref.as_deref().unwrap())
            .collect();
        assert_eq!(
            refs,
            vec![".dep.ItemPlain", ".dep.ItemPlain.Note", ".dep.ItemPlain.DetailPlain"]
        );

        for message in ir.generated() {
            for plan in &message.fields {
                if let Some(type_ref) = &plan.field.type_ref {
                    assert!(!ir.renames.is_renamed(type_ref), "{}", type_ref);
                }
            }
        }
    }

    #[test]
    fn test_alias_fields() {
        let ir = testing::build("alias.proto", &PluginConfig::default()).unwrap();
        let account = ir.message(".alias.Account").unwrap();
        let kinds: Vec<_> = account.fields.iter().map(|p| p.field.kind).collect();
        assert_eq!(
            kinds,
            vec![FieldKind::String, FieldKind::String, FieldKind::String, FieldKind::Int32]
        );
    }

    #[test]
    fn test_invalid_options_fail_with_all_diagnostics() {
        let err = testing::build("invalid.proto", &PluginConfig::default()).unwrap_err();
        let BuildError::InvalidOptions(diags) = &err else {
            panic!("unexpected error: {}", err);
        };
        assert!(diags.iter().filter(|d| d.is_error()).count() >= 8);
        assert!(err.to_string().starts_with("invalid options: "));
    }

    #[test]
    fn test_embed_cycle_fails() {
        let err = testing::build("cycle.proto", &PluginConfig::default()).unwrap_err();
        assert!(err.diagnostics().iter().any(|d| d.message.starts_with("embed cycle")));
    }

    #[test]
    fn test_reserved_virtual_number_fails() {
        let err = testing::build("numbers.proto", &PluginConfig::default()).unwrap_err();
        let BuildError::InvalidNumbers(diags) = &err else {
            panic!("unexpected error: {}", err);
        };
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].subject, ".numbers.Ticket");
        assert!(diags[0].message.starts_with("trace: number 19500"));
    }

    #[test]
    fn test_custom_suffix() {
        let config = PluginConfig::default().with_suffix("Flat");
        let ir = testing::build("embed.proto", &config).unwrap();
        assert_eq!(ir.suffix, "Flat");
        assert_eq!(
            ir.message(".embed.Profile").unwrap().new_full_name,
            ".embed.ProfileFlat"
        );
    }
}
