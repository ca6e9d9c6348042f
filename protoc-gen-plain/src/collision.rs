//! Collision resolution
//!
//! Flattening can map several source fields onto one output name. Without
//! collision resolution that is a build error. With it, the first definition
//! is kept as the single physical field, every later origin is recorded in a
//! [`CrfEntry`], and a companion `<name>CRF` string field is added to carry
//! the path that was actually populated.

use std::collections::HashMap;

use plain_runtime::crf::{CrfPath, PathSegment};
use serde::Serialize;

use crate::descriptor::{Cardinality, FieldKind};
use crate::ir::{Diagnostic, FieldPlan, FieldSpec, Op, OpKind, Origin, Synthetic};

/// Suffix of the companion path field
pub const CRF_SUFFIX: &str = "CRF";

/// Marker key identifying the oneof of a member segment
pub const ONEOF_MARKER: &str = "oneof";

/// Every origin merged into one output field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrfEntry {
    /// Merged output field
    pub field: String,
    /// Companion string field
    pub crf_field: String,
    /// Origin paths in declaration order; the first one is the default
    pub sources: Vec<String>,
}

impl CrfEntry {
    /// Path used when no run-time value overrides it
    pub fn default_source(&self) -> Option<&str> {
        self.sources.first().map(String::as_str)
    }
}

/// A name clash that could not be merged
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("field {field:?} of {message} is produced by {}: {reason}", .sources.join(", "))]
pub struct CollisionError {
    pub message: String,
    pub field: String,
    pub sources: Vec<String>,
    pub reason: String,
}

impl CollisionError {
    /// Report the clash as an error diagnostic
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(
            format!("{}.{}", self.message, self.field),
            format!("{}: {}", self.reason, self.sources.join(", ")),
        )
    }
}

/// Origin path of a plan as a CRF string.
///
/// The segment naming a oneof member carries a `oneof=<group>` marker.
/// Virtual and synthesized fields have no origin and yield a placeholder.
pub fn origin_path(plan: &FieldPlan) -> String {
    if plan.origin.source_path.is_empty() {
        return if plan.origin.is_virtual {
            format!("<virtual {}>", plan.field.name)
        } else {
            format!("<synthetic {}>", plan.field.name)
        };
    }

    let segments = plan
        .origin
        .source_path
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let segment = PathSegment::new(name.as_str());
            match (&plan.origin.oneof_group, i) {
                (Some(group), 0) => segment.with_marker(ONEOF_MARKER, group.as_str()),
                _ => segment,
            }
        })
        .collect();
    CrfPath::new(segments).to_string()
}

/// Why two plans cannot share a physical field, if they cannot
fn incompatibility(kept: &FieldPlan, other: &FieldPlan) -> Option<&'static str> {
    if !kept.is_reversible() || !other.is_reversible() {
        return Some("virtual and synthesized fields cannot be merged");
    }
    if kept.field.kind != other.field.kind
        || kept.field.type_ref != other.field.type_ref
        || kept.field.is_map != other.field.is_map
    {
        return Some("merged fields must have the same type");
    }
    if (kept.field.cardinality == Cardinality::Repeated)
        != (other.field.cardinality == Cardinality::Repeated)
    {
        return Some("merged fields must have the same cardinality");
    }
    if kept.override_op().map(|op| op.get("name")) != other.override_op().map(|op| op.get("name")) {
        return Some("merged fields must have the same type override");
    }
    None
}

fn crf_plan(field: &str) -> FieldPlan {
    FieldPlan {
        source: None,
        field: FieldSpec {
            name: format!("{}{}", field, CRF_SUFFIX),
            number: 0,
            kind: FieldKind::String,
            cardinality: Cardinality::Singular,
            type_ref: None,
            oneof_index: None,
            proto3_optional: false,
            is_map: false,
        },
        origin: Origin {
            synthetic: Some(Synthetic::CrfPath {
                field: field.to_string(),
            }),
            ..Origin::default()
        },
        ops: vec![Op::new(OpKind::Virtual, "collision resolution path").with("field", field)],
    }
}

/// Merge same-named plans of `message`.
///
/// Returns the surviving plans, with companion fields inserted right after
/// each merged field, and one entry per merged name.
pub fn resolve(
    message: &str,
    plans: Vec<FieldPlan>,
    enable_crf: bool,
) -> Result<(Vec<FieldPlan>, Vec<CrfEntry>), CollisionError> {
    let mut by_name: HashMap<String, Vec<String>> = HashMap::new();
    for plan in &plans {
        by_name
            .entry(plan.field.name.clone())
            .or_default()
            .push(origin_path(plan));
    }

    if !enable_crf {
        if let Some(plan) = plans.iter().find(|p| by_name[&p.field.name].len() > 1) {
            return Err(CollisionError {
                message: message.to_string(),
                field: plan.field.name.clone(),
                sources: by_name[&plan.field.name].clone(),
                reason: "duplicate field name and collision resolution is disabled".to_string(),
            });
        }
        return Ok((plans, Vec::new()));
    }

    let mut kept: Vec<FieldPlan> = Vec::with_capacity(plans.len());
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut entries: Vec<CrfEntry> = Vec::new();

    for plan in plans {
        let Some(&i) = position.get(&plan.field.name) else {
            position.insert(plan.field.name.clone(), kept.len());
            kept.push(plan);
            continue;
        };

        let name = plan.field.name.clone();
        if let Some(reason) = incompatibility(&kept[i], &plan) {
            return Err(CollisionError {
                message: message.to_string(),
                field: name.clone(),
                sources: by_name[&name].clone(),
                reason: reason.to_string(),
            });
        }

        let path = origin_path(&plan);
        let entry = match entries.iter_mut().position(|e| e.field == name) {
            Some(e) => &mut entries[e],
            None => {
                entries.push(CrfEntry {
                    field: name.clone(),
                    crf_field: format!("{}{}", name, CRF_SUFFIX),
                    sources: vec![origin_path(&kept[i])],
                });
                let last = entries.len() - 1;
                &mut entries[last]
            }
        };
        if !entry.sources.contains(&path) {
            entry.sources.push(path.clone());
        }
        kept[i].push_op(Op::new(OpKind::Merge, "name collision").with("source", path));
    }

    let mut out = Vec::with_capacity(kept.len() + entries.len());
    for plan in kept {
        let entry = entries.iter().find(|e| e.field == plan.field.name);
        out.push(plan);
        if let Some(entry) = entry {
            if position.contains_key(&entry.crf_field) {
                return Err(CollisionError {
                    message: message.to_string(),
                    field: entry.crf_field.clone(),
                    sources: entry.sources.clone(),
                    reason: "collision resolution field name is already taken".to_string(),
                });
            }
            out.push(crf_plan(&entry.field));
        }
    }

    Ok((out, entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FieldRef;

    fn member(name: &str, group: &str, path: &[&str], kind: FieldKind) -> FieldPlan {
        FieldPlan {
            source: Some(FieldRef {
                message: ".pkg.Variant".to_string(),
                name: name.to_string(),
                number: 1,
            }),
            field: FieldSpec {
                name: name.to_string(),
                number: 0,
                kind,
                cardinality: Cardinality::Singular,
                type_ref: None,
                oneof_index: None,
                proto3_optional: false,
                is_map: false,
            },
            origin: Origin {
                is_embedded: true,
                is_oneof: true,
                oneof_group: Some(group.to_string()),
                oneof_variant: Some(path[0].to_string()),
                source_path: path.iter().map(|s| s.to_string()).collect(),
                ..Origin::default()
            },
            ops: Vec::new(),
        }
    }

    fn three_way() -> Vec<FieldPlan> {
        vec![
            member("number", "method", &["card", "number"], FieldKind::String),
            member("expiry", "method", &["card", "expiry"], FieldKind::String),
            member("number", "method", &["bank", "number"], FieldKind::String),
            member("number", "method", &["wallet", "number"], FieldKind::String),
        ]
    }

    #[test]
    fn test_origin_path_marks_oneof_member() {
        let plan = member("number", "method", &["card", "number"], FieldKind::String);
        assert_eq!(origin_path(&plan), "card?oneof=method/number");
        assert_eq!(
            plain_runtime::parse_crf_path(&origin_path(&plan)),
            vec!["card", "number"]
        );
    }

    #[test]
    fn test_disabled_names_every_origin() {
        let err = resolve(".pkg.Payment", three_way(), false).unwrap_err();
        assert_eq!(err.field, "number");
        assert_eq!(
            err.sources,
            vec![
                "card?oneof=method/number",
                "bank?oneof=method/number",
                "wallet?oneof=method/number",
            ]
        );
        let diag = err.to_diagnostic();
        assert!(diag.is_error());
        assert_eq!(diag.subject, ".pkg.Payment.number");
        assert!(diag.message.contains("bank?oneof=method/number"));
    }

    #[test]
    fn test_enabled_accumulates_in_order() {
        let (plans, entries) = resolve(".pkg.Payment", three_way(), true).unwrap();
        let names: Vec<_> = plans.iter().map(|p| p.field.name.as_str()).collect();
        assert_eq!(names, vec!["number", "numberCRF", "expiry"]);

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].default_source(), Some("card?oneof=method/number"));
        assert_eq!(entries[0].sources.len(), 3);

        let merges = plans[0].ops.iter().filter(|op| op.kind == OpKind::Merge).count();
        assert_eq!(merges, 2);
        assert_eq!(
            plans[1].origin.synthetic,
            Some(Synthetic::CrfPath {
                field: "number".to_string()
            })
        );
    }

    #[test]
    fn test_incompatible_types_are_fatal() {
        let plans = vec![
            member("number", "method", &["card", "number"], FieldKind::String),
            member("number", "method", &["bank", "number"], FieldKind::Int64),
        ];
        let err = resolve(".pkg.Payment", plans, true).unwrap_err();
        assert_eq!(err.reason, "merged fields must have the same type");
    }

    #[test]
    fn test_no_collision_is_untouched() {
        let plans = vec![
            member("number", "method", &["card", "number"], FieldKind::String),
            member("swift", "method", &["bank", "swift"], FieldKind::String),
        ];
        let (out, entries) = resolve(".pkg.Payment", plans.clone(), false).unwrap();
        assert_eq!(out, plans);
        assert!(entries.is_empty());
    }
}
