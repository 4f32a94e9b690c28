//! Index mapping derived from an entity descriptor.
//!
//! Types follow the conversions declared for each field: `int`/`multi_int`
//! map to `long`, `float` to `double`, `bool` to `boolean` and `time` to a
//! `date` in epoch milliseconds. Structured values (images, files,
//! composites, references) are `object`s. Everything else is `text` with a
//! `keyword` sub-field for exact matches and aggregations.

use serde_json::{json, Map, Value};

use crate::descriptor::{Conversion, EntityDescriptor, FieldKind};
use crate::models::ID_FIELD;
use crate::registry::BundleHooks;

/// Mapping for a bundle: the `mapping` hook when installed, otherwise
/// [`build_mapping`].
pub fn resolve_mapping(descriptor: &EntityDescriptor, hooks: &BundleHooks) -> Value {
    match &hooks.mapping {
        Some(hook) => hook(descriptor),
        None => build_mapping(descriptor),
    }
}

pub fn build_mapping(descriptor: &EntityDescriptor) -> Value {
    let mut properties = Map::new();
    properties.insert(ID_FIELD.to_string(), json!({ "type": "long" }));
    properties.insert("url".to_string(), json!({ "type": "keyword" }));

    for field in &descriptor.fields {
        properties.insert(field.alias.clone(), field_type(descriptor, &field.alias, false));
    }
    for field in &descriptor.joined {
        let structured = !matches!(field.kind, FieldKind::Value | FieldKind::Multiple);
        properties.insert(field.alias.clone(), field_type(descriptor, &field.alias, structured));
    }
    for reference in &descriptor.references {
        properties.insert(reference.alias.clone(), field_type(descriptor, &reference.alias, true));
    }

    for (alias, conversions) in &descriptor.conversions {
        let renders_html = conversions.iter().any(|c| {
            matches!(c, Conversion::Html | Conversion::HtmlStrict | Conversion::HtmlIframe)
        });
        if renders_html {
            properties.insert(format!("{}-html", alias), json!({ "type": "text" }));
        }
    }

    json!({ "properties": properties })
}

fn field_type(descriptor: &EntityDescriptor, alias: &str, structured: bool) -> Value {
    // The last typing conversion wins: `multi_int` then `single` is still a long.
    let typed = descriptor
        .conversions_for(alias)
        .iter()
        .rev()
        .find_map(|c| match c {
            Conversion::Int | Conversion::MultiInt => Some(json!({ "type": "long" })),
            Conversion::Float => Some(json!({ "type": "double" })),
            Conversion::Bool => Some(json!({ "type": "boolean" })),
            Conversion::Time => Some(json!({ "type": "date", "format": "epoch_millis" })),
            _ => None,
        });

    match typed {
        Some(t) => t,
        None if structured => json!({ "type": "object" }),
        None => json!({
            "type": "text",
            "fields": { "keyword": { "type": "keyword", "ignore_above": 256 } }
        }),
    }
}
