//! Filter expressions for indexing runs.
//!
//! Grammar:
//!
//! ```text
//! expression := clause ( "+" clause )*
//! clause     := field ":" values
//! values     := "*" | value ( "," value )*
//! ```
//!
//! Clauses are AND-ed, values within a clause are OR-ed and `*` means "the
//! field is present". Each field is classified against the bundle's
//! descriptor as a scalar, joined or reference field. Clauses naming a
//! field the bundle does not have are ignored with a warning.

use std::collections::BTreeMap;
use tracing::warn;

use crate::descriptor::EntityDescriptor;

/// Condition on a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// The field has a value.
    Present,
    /// The field equals one of the values.
    OneOf(Vec<String>),
}

impl Condition {
    fn merge(self, other: Condition) -> Condition {
        match (self, other) {
            (Condition::OneOf(mut a), Condition::OneOf(b)) => {
                for v in b {
                    if !a.contains(&v) {
                        a.push(v);
                    }
                }
                Condition::OneOf(a)
            }
            (Condition::Present, c) | (c, Condition::Present) => c,
        }
    }
}

/// Parsed filter, grouped by field category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub fields: BTreeMap<String, Condition>,
    pub joined: BTreeMap<String, Condition>,
    pub references: BTreeMap<String, Condition>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.joined.is_empty() && self.references.is_empty()
    }
}

/// Parse a filter expression against a bundle descriptor.
pub fn parse_filter(expr: &str, descriptor: &EntityDescriptor) -> Filter {
    let mut filter = Filter::default();

    for clause in expr.split('+') {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }
        let Some((field, values)) = clause.split_once(':') else {
            warn!(bundle = %descriptor.bundle, clause, "ignoring filter clause without ':'");
            continue;
        };
        let field = field.trim();

        let condition = if values.trim() == "*" {
            Condition::Present
        } else {
            let values: Vec<String> = values
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect();
            if values.is_empty() {
                warn!(bundle = %descriptor.bundle, field, "ignoring filter clause without values");
                continue;
            }
            Condition::OneOf(values)
        };

        let target = if descriptor.scalar(field).is_some() {
            &mut filter.fields
        } else if descriptor.joined_field(field).is_some() {
            &mut filter.joined
        } else if descriptor.reference(field).is_some() {
            &mut filter.references
        } else {
            warn!(bundle = %descriptor.bundle, field, "ignoring filter on unknown field");
            continue;
        };

        let merged = match target.remove(field) {
            Some(existing) => existing.merge(condition),
            None => condition,
        };
        target.insert(field.to_string(), merged);
    }

    filter
}
