//! Field number assignment
//!
//! Runs once over the fully expanded, collision-resolved field list of a
//! message. Fields that already carry a number keep it; every other field
//! takes the next free number above the highest one in use, in list order.

use std::collections::{BTreeMap, BTreeSet};

use crate::ir::FieldPlan;

/// Largest valid field number
pub const MAX_FIELD_NUMBER: i32 = 536_870_911;

/// Numbers reserved by the protobuf implementation
pub const RESERVED_RANGE: std::ops::RangeInclusive<i32> = 19_000..=19_999;

/// Assign numbers to every plan whose number is zero
pub fn assign(plans: &mut [FieldPlan]) {
    let mut used: BTreeSet<i32> = plans
        .iter()
        .map(|p| p.field.number)
        .filter(|&n| n > 0)
        .collect();
    let mut next = used.last().copied().unwrap_or(0) + 1;

    for plan in plans.iter_mut().filter(|p| p.field.number == 0) {
        while used.contains(&next) || RESERVED_RANGE.contains(&next) {
            next += 1;
        }
        plan.field.number = next;
        used.insert(next);
        next += 1;
    }
}

/// Every number that is out of range, reserved or used twice
pub fn check(plans: &[FieldPlan]) -> Vec<String> {
    let mut owners: BTreeMap<i32, &str> = BTreeMap::new();
    let mut problems = Vec::new();
    for plan in plans {
        let (name, n) = (plan.field.name.as_str(), plan.field.number);
        if n <= 0 || n > MAX_FIELD_NUMBER {
            problems.push(format!("{}: number {} is out of range", name, n));
        } else if RESERVED_RANGE.contains(&n) {
            problems.push(format!(
                "{}: number {} falls in the reserved range {}-{}",
                name,
                n,
                RESERVED_RANGE.start(),
                RESERVED_RANGE.end()
            ));
        } else if let Some(other) = owners.insert(n, name) {
            problems.push(format!("{}: number {} is already used by {}", name, n, other));
        }
    }
    problems
}
