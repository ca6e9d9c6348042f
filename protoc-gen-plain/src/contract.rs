//! Conversion contract
//!
//! Derives the per-field conversion steps of every generated message from
//! the IR and renders them as Rust traits. Each message gets a pair:
//! `<Message>IntoPlain` on the original type and `<Message>PlainIntoPb` on
//! the Plain type, each with a lenient and a fallible method. A generic
//! caster parameter is added for every field whose override has no built-in
//! conversion.

use std::collections::HashSet;

use heck::{ToSnakeCase, ToUpperCamelCase};
use plain_runtime::JsonStyle;
use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use crate::descriptor::{Cardinality, FieldKind};
use crate::error::GeneratorError;
use crate::ir::{EnumFormat, FieldPlan, MessageIr, Op, OpKind, Synthetic};

/// What conversion does with one Plain field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldStep {
    /// Copied from the field of the same position
    Copy,
    /// Read and written through a field path
    Path,
    /// Read from the first populated source; written through the CRF value
    Merged { crf_field: String, sources: Vec<String> },
    /// Message encoded to bytes
    Serialized,
    /// Single-field carrier unwrapped to its value
    TypeAlias { field: String },
    /// Enum carried as its name or number
    EnumFormat(EnumFormat),
    /// Set from nothing, never written back
    Virtual,
    /// Index of the populated member of an enum-dispatched oneof
    DispatchTag { oneof: String },
    /// Enum value tag of the populated member
    Discriminator { oneof: String },
    /// Populated member encoded to bytes
    Payload { oneof: String },
    /// Source path of a merged field
    CrfPath { field: String },
}

impl FieldStep {
    fn describe(&self) -> String {
        match self {
            FieldStep::Copy => "copy".to_string(),
            FieldStep::Path => "field path".to_string(),
            FieldStep::Merged { crf_field, sources } => {
                format!("merged from {}, path in `{}`", sources.join(", "), crf_field)
            }
            FieldStep::Serialized => "serialized message".to_string(),
            FieldStep::TypeAlias { field } => format!("type alias over `{}`", field),
            FieldStep::EnumFormat(EnumFormat::AsString) => "enum value name".to_string(),
            FieldStep::EnumFormat(EnumFormat::AsInt) => "enum value number".to_string(),
            FieldStep::Virtual => "virtual".to_string(),
            FieldStep::DispatchTag { oneof } => format!("dispatch tag of `{}`", oneof),
            FieldStep::Discriminator { oneof } => format!("discriminator of `{}`", oneof),
            FieldStep::Payload { oneof } => format!("payload of `{}`", oneof),
            FieldStep::CrfPath { field } => format!("populated path of `{}`", field),
        }
    }
}

/// Caster required by an overridden field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasterSpec {
    /// Parameter name
    pub param: String,
    /// Name of the caster's type parameter
    pub generic: String,
    /// Rust type of the Plain field's wire value
    pub wire_type: String,
    /// Rust type the caster produces
    pub target_type: String,
}

/// Conversion of one Plain field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldContract {
    pub name: String,
    /// Field names leading to the source value
    pub path: Vec<String>,
    pub step: FieldStep,
    pub caster: Option<CasterSpec>,
}

/// Conversion contract of one generated message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContract {
    pub original: String,
    pub plain: String,
    pub fields: Vec<FieldContract>,
    pub json_style: JsonStyle,
}

/// Rust type path for a fully qualified protobuf name, following prost's
/// module layout: package segments as modules, enclosing messages as
/// snake-case modules.
fn rust_path(full_name: &str) -> String {
    let segments: Vec<&str> = full_name.trim_start_matches('.').split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return String::new();
    };
    let mut path: Vec<String> = parents
        .iter()
        .map(|s| {
            if s.starts_with(|c: char| c.is_ascii_uppercase()) {
                s.to_snake_case()
            } else {
                s.to_string()
            }
        })
        .collect();
    path.push(last.to_upper_camel_case());
    path.join("::")
}

fn scalar_type(kind: FieldKind, type_ref: Option<&str>) -> String {
    match kind {
        FieldKind::Double => "f64".to_string(),
        FieldKind::Float => "f32".to_string(),
        FieldKind::Int64 | FieldKind::Sint64 | FieldKind::Sfixed64 => "i64".to_string(),
        FieldKind::Uint64 | FieldKind::Fixed64 => "u64".to_string(),
        FieldKind::Int32 | FieldKind::Sint32 | FieldKind::Sfixed32 | FieldKind::Enum => {
            "i32".to_string()
        }
        FieldKind::Uint32 | FieldKind::Fixed32 => "u32".to_string(),
        FieldKind::Bool => "bool".to_string(),
        FieldKind::String => "String".to_string(),
        FieldKind::Bytes => "Vec<u8>".to_string(),
        FieldKind::Message | FieldKind::Group => rust_path(type_ref.unwrap_or_default()),
    }
}

/// Rust type prost generates for a Plain field
fn wire_type(plan: &FieldPlan) -> String {
    let spec = &plan.field;
    // map overrides receive the entry message list
    let inner = scalar_type(spec.kind, spec.type_ref.as_deref());
    match spec.cardinality {
        Cardinality::Repeated => format!("Vec<{}>", inner),
        Cardinality::Optional => format!("Option<{}>", inner),
        _ if spec.kind == FieldKind::Message || spec.proto3_optional => {
            format!("Option<{}>", inner)
        }
        _ => inner,
    }
}

fn override_target(op: &Op) -> String {
    let name = op.get("name").unwrap_or_default();
    let import = op.get("import_path").unwrap_or_default().trim_matches(':');
    if import.is_empty() {
        name.to_string()
    } else {
        format!("{}::{}", import.replace(['/', '.'], "::"), name)
    }
}

impl FieldContract {
    fn from_plan(message: &MessageIr, plan: &FieldPlan) -> Self {
        let origin = &plan.origin;
        let step = match &origin.synthetic {
            Some(Synthetic::DispatchTag { oneof }) => FieldStep::DispatchTag {
                oneof: oneof.clone(),
            },
            Some(Synthetic::Discriminator { oneof }) => FieldStep::Discriminator {
                oneof: oneof.clone(),
            },
            Some(Synthetic::Payload { oneof }) => FieldStep::Payload {
                oneof: oneof.clone(),
            },
            Some(Synthetic::CrfPath { field }) => FieldStep::CrfPath {
                field: field.clone(),
            },
            None if origin.is_virtual => FieldStep::Virtual,
            None => match message.crf_entry(&plan.field.name) {
                Some(entry) => FieldStep::Merged {
                    crf_field: entry.crf_field.clone(),
                    sources: entry.sources.clone(),
                },
                None if origin.is_serialized => FieldStep::Serialized,
                None if origin.is_type_alias => FieldStep::TypeAlias {
                    field: plan
                        .ops
                        .iter()
                        .find(|op| op.kind == OpKind::TypeAlias)
                        .and_then(|op| op.get("field"))
                        .unwrap_or("value")
                        .to_string(),
                },
                None => match origin.enum_format {
                    Some(format) => FieldStep::EnumFormat(format),
                    None if origin.source_path.len() > 1 => FieldStep::Path,
                    None => FieldStep::Copy,
                },
            },
        };

        let caster = plan
            .override_op()
            .filter(|_| plan.needs_caster())
            .map(|op| CasterSpec {
                param: plan.field.name.to_snake_case(),
                generic: plan.field.name.to_upper_camel_case(),
                wire_type: wire_type(plan),
                target_type: override_target(op),
            });

        Self {
            name: plan.field.name.clone(),
            path: origin.source_path.clone(),
            step,
            caster,
        }
    }

    fn doc_line(&self) -> String {
        let mut line = format!("`{}`: {}", self.name, self.step.describe());
        if self.path.len() > 1 {
            line.push_str(&format!(" (`{}`)", self.path.join(".")));
        }
        if let Some(caster) = &self.caster {
            line.push_str(&format!(", cast to `{}`", caster.target_type));
        }
        line
    }
}

impl MessageContract {
    /// Derive the contract of a generated message
    pub fn from_ir(message: &MessageIr, json_style: JsonStyle) -> Self {
        let mut fields: Vec<FieldContract> = message
            .fields
            .iter()
            .map(|plan| FieldContract::from_plan(message, plan))
            .collect();
        name_casters(&mut fields);
        Self {
            original: message.full_name.clone(),
            plain: message.new_full_name.clone(),
            fields,
            json_style,
        }
    }

    /// Casters in field order
    pub fn casters(&self) -> impl Iterator<Item = &CasterSpec> {
        self.fields.iter().filter_map(|f| f.caster.as_ref())
    }

    /// Fields that are written back into the original message
    pub fn reversible(&self) -> impl Iterator<Item = &FieldContract> {
        self.fields.iter().filter(|f| {
            !matches!(
                f.step,
                FieldStep::Virtual
                    | FieldStep::DispatchTag { .. }
                    | FieldStep::Discriminator { .. }
                    | FieldStep::CrfPath { .. }
            )
        })
    }

    fn short_name(full_name: &str) -> &str {
        full_name.rsplit('.').next().unwrap_or(full_name)
    }

    /// Render the trait pair
    pub fn render(&self) -> Result<TokenStream, GeneratorError> {
        let original = Self::short_name(&self.original).to_upper_camel_case();
        let plain = Self::short_name(&self.plain).to_upper_camel_case();
        let into_plain = format_ident!("{}IntoPlain", original);
        let into_pb = format_ident!("{}IntoPb", plain);

        let header = format!(
            " Conversion between `{}` and `{}`.",
            self.original.trim_start_matches('.'),
            self.plain.trim_start_matches('.')
        );
        let steps: Vec<String> = self
            .fields
            .iter()
            .map(|f| format!(" - {}", f.doc_line()))
            .collect();

        let mut generics = Vec::new();
        let mut params = Vec::new();
        let mut plain_bounds = Vec::new();
        let mut try_plain_bounds = Vec::new();
        let mut pb_bounds = Vec::new();
        let mut try_pb_bounds = Vec::new();
        for caster in self.casters() {
            let generic = format_ident!("{}", caster.generic);
            let param = format_ident!("{}", caster.param);
            let wire = parse_type(&caster.wire_type)?;
            let target = parse_type(&caster.target_type)?;

            plain_bounds.push(quote! { #generic: Fn(#wire) -> #target });
            try_plain_bounds.push(quote! { #generic: Fn(#wire) -> Result<#target, Self::Error> });
            pb_bounds.push(quote! { #generic: Fn(#target) -> #wire });
            try_pb_bounds.push(quote! { #generic: Fn(#target) -> Result<#wire, Self::Error> });
            params.push(quote! { #param: #generic });
            generics.push(generic);
        }

        let generics = if generics.is_empty() {
            quote! {}
        } else {
            quote! { <#(#generics),*> }
        };
        let where_clause = |bounds: &[TokenStream]| {
            if bounds.is_empty() {
                quote! {}
            } else {
                quote! { where #(#bounds),* }
            }
        };
        let plain_where = where_clause(&plain_bounds);
        let try_plain_where = where_clause(&try_plain_bounds);
        let pb_where = where_clause(&pb_bounds);
        let try_pb_where = where_clause(&try_pb_bounds);

        let style = match self.json_style {
            JsonStyle::Protojson => quote! { plain_runtime::JsonStyle::Protojson },
            JsonStyle::Jx => quote! { plain_runtime::JsonStyle::Jx },
        };

        Ok(quote! {
            #[doc = #header]
            #[doc = ""]
            #(#[doc = #steps])*
            pub trait #into_plain: Sized {
                /// Flattened counterpart
                type Plain;
                /// Error returned by the fallible conversion
                type Error;

                /// Flatten, omitting fields that cannot be converted
                fn into_plain #generics(this: Option<&Self> #(, #params)*) -> Option<Self::Plain>
                #plain_where;

                /// Flatten, stopping at the first error
                fn try_into_plain #generics(
                    this: Option<&Self>
                    #(, #params)*
                ) -> Result<Option<Self::Plain>, Self::Error>
                #try_plain_where;
            }

            #[doc = #header]
            pub trait #into_pb: Sized {
                /// Original message
                type Pb;
                /// Error returned by the fallible conversion
                type Error;

                /// JSON layout of this message
                const JSON_STYLE: plain_runtime::JsonStyle = #style;

                /// Restore the original message, omitting fields that cannot be converted
                fn into_pb #generics(this: Option<&Self> #(, #params)*) -> Option<Self::Pb>
                #pb_where;

                /// Restore the original message, stopping at the first error
                fn try_into_pb #generics(
                    this: Option<&Self>
                    #(, #params)*
                ) -> Result<Option<Self::Pb>, Self::Error>
                #try_pb_where;
            }
        })
    }
}

/// Names the rendered signatures already use
const TAKEN_PARAMS: &[&str] = &["this"];
const TAKEN_GENERICS: &[&str] = &["Self", "Sized", "Option", "Result", "Fn"];

fn is_identifier(name: &str) -> bool {
    syn::parse_str::<syn::Ident>(name).is_ok()
}

/// Make caster parameter and generic names unique, usable identifiers.
///
/// Keywords take a trailing `_`; clashes take a numeric suffix.
fn name_casters(fields: &mut [FieldContract]) {
    let mut params: HashSet<String> = TAKEN_PARAMS.iter().map(|s| s.to_string()).collect();
    let mut generics: HashSet<String> = TAKEN_GENERICS.iter().map(|s| s.to_string()).collect();

    for caster in fields.iter_mut().filter_map(|f| f.caster.as_mut()) {
        let mut base = caster.param.clone();
        if !is_identifier(&base) {
            base.push('_');
        }
        let mut param = base.clone();
        let mut generic = generic_name(&param);
        let mut n = 1;
        while params.contains(&param) || generics.contains(&generic) {
            n += 1;
            param = format!("{}_{}", base, n);
            generic = generic_name(&param);
        }
        params.insert(param.clone());
        generics.insert(generic.clone());
        caster.param = param;
        caster.generic = generic;
    }
}

fn generic_name(param: &str) -> String {
    let generic = param.to_upper_camel_case();
    if is_identifier(&generic) {
        generic
    } else {
        format!("Cast{}", generic)
    }
}

fn parse_type(path: &str) -> Result<syn::Type, GeneratorError> {
    syn::parse_str(path).map_err(|e| {
        GeneratorError::CodeGenError(format!("Invalid type {:?} in contract: {}", path, e))
    })
}

/// Render the contracts of one file
pub fn render_file(contracts: &[MessageContract]) -> Result<String, GeneratorError> {
    let items = contracts
        .iter()
        .map(MessageContract::render)
        .collect::<Result<Vec<_>, _>>()?;
    format_code(quote! {
        //! Conversion contracts generated by protoc-gen-plain.
        #(#items)*
    })
}

fn format_code(tokens: TokenStream) -> Result<String, GeneratorError> {
    let code = tokens.to_string();
    let parsed = syn::parse_file(&code).map_err(|e| {
        GeneratorError::CodeGenError(format!("Failed to parse generated code: {}", e))
    })?;
    Ok(prettyplease::unparse(&parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginConfig;
    use crate::testing;

    fn contract(fixture: &str, config: &PluginConfig, message: &str) -> MessageContract {
        let ir = testing::build(fixture, config).unwrap();
        MessageContract::from_ir(ir.message(message).unwrap(), config.json_style)
    }

    fn steps(contract: &MessageContract) -> Vec<(&str, &FieldStep)> {
        contract
            .fields
            .iter()
            .map(|f| (f.name.as_str(), &f.step))
            .collect()
    }

    #[test]
    fn test_rust_path() {
        assert_eq!(rust_path(".pkg.Profile"), "pkg::Profile");
        assert_eq!(rust_path(".pkg.v1.Item.Detail"), "pkg::v1::item::Detail");
        assert_eq!(rust_path("Top"), "Top");
    }

    #[test]
    fn test_casters_only_for_unknown_overrides() {
        let event = contract("override.proto", &PluginConfig::default(), ".override.Event");
        let casters: Vec<_> = event.casters().cloned().collect();
        assert_eq!(
            casters,
            vec![
                CasterSpec {
                    param: "created_at".to_string(),
                    generic: "CreatedAt".to_string(),
                    wire_type: "i64".to_string(),
                    target_type: "chrono::DateTime".to_string(),
                },
                CasterSpec {
                    param: "updated_at".to_string(),
                    generic: "UpdatedAt".to_string(),
                    wire_type: "i64".to_string(),
                    target_type: "time::Timestamp".to_string(),
                },
            ]
        );
        assert_eq!(
            event.fields.iter().find(|f| f.name == "status").unwrap().step,
            FieldStep::EnumFormat(EnumFormat::AsString)
        );
        assert_eq!(
            event.fields.iter().find(|f| f.name == "audit").unwrap().step,
            FieldStep::Virtual
        );

        // known conversions for discriminated oneofs need no caster
        let drawing = contract("discriminator.proto", &PluginConfig::default(), ".discriminator.Drawing");
        assert_eq!(drawing.casters().count(), 0);
    }

    #[test]
    fn test_steps_for_embeds_and_merges() {
        let profile = contract("embed.proto", &PluginConfig::default(), ".embed.Profile");
        let profile_steps = steps(&profile);
        assert_eq!(profile_steps[0], ("name", &FieldStep::Copy));
        assert_eq!(profile_steps[1], ("home_street", &FieldStep::Path));
        assert_eq!(profile_steps[5], ("billing", &FieldStep::Serialized));
        assert_eq!(profile.reversible().count(), 7);

        let config = PluginConfig::default().with_crf(true);
        let payment = contract("oneof.proto", &config, ".oneof.Payment");
        let number = payment.fields.iter().find(|f| f.name == "number").unwrap();
        assert_eq!(
            number.step,
            FieldStep::Merged {
                crf_field: "numberCRF".to_string(),
                sources: vec![
                    "card?oneof=method/number".to_string(),
                    "bank?oneof=method/number".to_string(),
                ],
            }
        );
        let crf = payment.fields.iter().find(|f| f.name == "numberCRF").unwrap();
        assert_eq!(crf.step, FieldStep::CrfPath { field: "number".to_string() });
    }

    #[test]
    fn test_render_file() {
        let config = PluginConfig::default();
        let ir = testing::build("override.proto", &config).unwrap();
        let contracts: Vec<_> = ir
            .generated()
            .map(|m| MessageContract::from_ir(m, config.json_style))
            .collect();
        let code = render_file(&contracts).unwrap();

        assert!(code.contains("pub trait EventIntoPlain: Sized"));
        assert!(code.contains("pub trait EventPlainIntoPb: Sized"));
        assert!(code.contains("CreatedAt: Fn(i64) -> chrono::DateTime"));
        assert!(code.contains("UpdatedAt: Fn(time::Timestamp) -> Result<i64, Self::Error>"));
        assert!(code.contains("plain_runtime::JsonStyle::Protojson"));
        assert!(code.contains("`status`: enum value name"));
    }

    fn caster_field(name: &str) -> FieldContract {
        FieldContract {
            name: name.to_string(),
            path: vec![name.to_string()],
            step: FieldStep::Copy,
            caster: Some(CasterSpec {
                param: name.to_snake_case(),
                generic: name.to_upper_camel_case(),
                wire_type: "i64".to_string(),
                target_type: "chrono::DateTime".to_string(),
            }),
        }
    }

    #[test]
    fn test_caster_names_are_unique_identifiers() {
        let mut fields: Vec<_> = ["createdAt", "created_at", "type", "this", "result", "self"]
            .into_iter()
            .map(caster_field)
            .collect();
        name_casters(&mut fields);
        let names: Vec<_> = fields
            .iter()
            .map(|f| {
                let c = f.caster.as_ref().unwrap();
                (c.param.as_str(), c.generic.as_str())
            })
            .collect();
        assert_eq!(
            names,
            vec![
                ("created_at", "CreatedAt"),
                ("created_at_2", "CreatedAt2"),
                ("type_", "Type"),
                ("this_2", "This2"),
                ("result_2", "Result2"),
                ("self_", "CastSelf"),
            ]
        );

        let contract = MessageContract {
            original: ".pkg.Clash".to_string(),
            plain: ".pkg.ClashPlain".to_string(),
            fields,
            json_style: JsonStyle::Protojson,
        };
        let code = format_code(contract.render().unwrap()).unwrap();
        assert!(code.contains("type_: Type"));
        assert!(code.contains("Result2: Fn(i64) -> Result<chrono::DateTime, Self::Error>"));
    }

    #[test]
    fn test_render_without_casters() {
        let config = PluginConfig {
            json_style: JsonStyle::Jx,
            ..PluginConfig::default()
        };
        let alias = contract("alias.proto", &config, ".alias.Account");
        let code = format_code(alias.render().unwrap()).unwrap();
        assert!(code.contains("fn into_plain(this: Option<&Self>) -> Option<Self::Plain>"));
        assert!(code.contains("plain_runtime::JsonStyle::Jx"));
        assert!(code.contains("type alias over `value`"));
    }
}
