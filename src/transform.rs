//! Transformation pipeline: raw [`Row`] → nested [`Document`].
//!
//! # Stages
//!
//! 1. `pre_transform` hook on the raw row
//! 2. joined fields decoded according to their [`FieldKind`]
//! 3. reference fields replaced by cached records
//! 4. conversion directives, field by field in field-name order, each
//!    field's directives in the order they are listed
//! 5. canonical `url` of the entity
//! 6. `post_transform` hook
//!
//! Data errors never abort a document. A value that cannot be coerced
//! drops its field, and a malformed tuple is skipped.
//!
//! Fields of kind `multiple` stay packed until a `multi_int` conversion
//! expands them.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::{Captures, Regex};
use serde_json::{Map, Number, Value};
use std::sync::LazyLock;

use crate::config::SiteConfig;
use crate::descriptor::{Conversion, EntityDescriptor, FieldKind, JoinedField, ReferenceField};
use crate::encoding::{decode, split_values, tuple_field};
use crate::error::{IndexerError, Result};
use crate::markdown::{self, BASE_TAGS, IFRAME_TAGS, STRICT_TAGS};
use crate::models::{row_id, Document, Row, ID_FIELD};
use crate::references::{reference_ids, ReferenceCache};
use crate::registry::BundleHooks;

/// Key the `primary` conversion sets on the matching sub-item.
pub const PRIMARY_FLAG: &str = "primary";

static HREF_ROOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(href\s*=\s*["'])/([^/"'][^"']*)?(["'])"#).expect("valid regex")
});
static MARKDOWN_ROOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\]\()/([^/][^)\s]*)?(\)|\s)").expect("valid regex"));
static LIST_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s,]+").expect("valid regex"));

/// Turns rows of any bundle into documents.
pub struct Transformer {
    origin: String,
    files_url: String,
    image_styles: Vec<String>,
    legacy_hosts: Vec<Regex>,
}

impl Transformer {
    pub fn new(site: &SiteConfig) -> Result<Self> {
        let legacy_hosts = site
            .legacy_hosts
            .iter()
            .map(|host| {
                Regex::new(&format!(
                    r#"(?i)(?:https?:)?//{}(/|[?#"'\s)<]|$)"#,
                    regex::escape(host.trim_end_matches('/'))
                ))
                .map_err(|e| IndexerError::config(format!("Invalid legacy host '{}': {}", host, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            origin: site.origin().to_string(),
            files_url: site.files_url(),
            image_styles: site.image_styles.clone(),
            legacy_hosts,
        })
    }

    /// Run the whole pipeline on one row.
    pub fn transform(
        &self,
        descriptor: &EntityDescriptor,
        hooks: &BundleHooks,
        mut row: Row,
        cache: &ReferenceCache,
    ) -> Document {
        if let Some(hook) = &hooks.pre_transform {
            hook(&mut row);
        }
        let mut doc: Document = row;

        let id = row_id(&doc);
        if let Some(id) = id {
            doc.insert(ID_FIELD.to_string(), Value::from(id));
        }

        for field in &descriptor.joined {
            let Some(raw) = doc.remove(&field.alias) else {
                continue;
            };
            if let Some(decoded) = self.decode_joined(field, raw) {
                doc.insert(field.alias.clone(), decoded);
            }
        }

        for reference in &descriptor.references {
            let Some(raw) = doc.remove(&reference.alias) else {
                continue;
            };
            if let Some(resolved) = resolve_reference(reference, &raw, cache) {
                doc.insert(reference.alias.clone(), resolved);
            }
        }

        for (alias, conversions) in &descriptor.conversions {
            for conversion in conversions {
                self.apply(*conversion, alias, &mut doc);
            }
        }

        if let Some(id) = id {
            doc.insert(
                "url".to_string(),
                Value::String(format!("{}/{}/{}", self.origin, descriptor.category.url_path(), id)),
            );
        }

        if let Some(hook) = &hooks.post_transform {
            hook(&mut doc);
        }
        doc
    }

    // ── joined fields ─────────────────────────────────────────────────

    fn decode_joined(&self, field: &JoinedField, raw: Value) -> Option<Value> {
        let packed = match raw {
            Value::Null => return None,
            Value::String(s) => s,
            other => return Some(other),
        };
        match field.kind {
            FieldKind::Value | FieldKind::Multiple => Some(Value::String(packed)),
            FieldKind::Image => non_empty(
                decode(&packed)
                    .iter()
                    .filter_map(|tuple| self.decode_image(tuple))
                    .collect(),
            ),
            FieldKind::File => non_empty(
                decode(&packed)
                    .iter()
                    .filter_map(|tuple| self.decode_file(tuple))
                    .collect(),
            ),
            FieldKind::Composite => non_empty(
                decode(&packed)
                    .iter()
                    .filter_map(|tuple| decode_composite(&field.columns, tuple))
                    .collect(),
            ),
        }
    }

    /// `id, alt, caption, width, height, uri, filename, filesize`
    fn decode_image(&self, tuple: &[&str]) -> Option<Value> {
        let id: i64 = tuple_field(tuple, 0)?.parse().ok()?;
        let uri = tuple_field(tuple, 5)?;

        let mut image = Map::new();
        image.insert("id".to_string(), Value::from(id));
        insert_text(&mut image, "alt", tuple_field(tuple, 1));
        insert_text(&mut image, "caption", tuple_field(tuple, 2));
        insert_int(&mut image, "width", tuple_field(tuple, 3));
        insert_int(&mut image, "height", tuple_field(tuple, 4));
        self.insert_urls(&mut image, uri);
        self.insert_file_meta(&mut image, tuple_field(tuple, 6), uri);
        insert_int(&mut image, "filesize", tuple_field(tuple, 7));
        Some(Value::Object(image))
    }

    /// `id, description, preview_page, preview_rotation, uri, filename, filesize`
    fn decode_file(&self, tuple: &[&str]) -> Option<Value> {
        let id: i64 = tuple_field(tuple, 0)?.parse().ok()?;
        let uri = tuple_field(tuple, 4)?;

        let mut file = Map::new();
        file.insert("id".to_string(), Value::from(id));
        insert_text(&mut file, "description", tuple_field(tuple, 1));
        if let Some(url) = self.file_url(uri) {
            file.insert("url".to_string(), Value::String(url));
        }
        let mime = self.insert_file_meta(&mut file, tuple_field(tuple, 5), uri);
        insert_int(&mut file, "filesize", tuple_field(tuple, 6));

        let page = tuple_field(tuple, 2).and_then(|p| p.parse::<i64>().ok());
        if mime == "application/pdf" {
            if let Some(page) = page {
                let rotation = tuple_field(tuple, 3).and_then(|r| r.parse::<i64>().ok());
                file.insert("preview".to_string(), self.preview(id, uri, page, rotation));
            }
        }
        Some(Value::Object(file))
    }

    /// Preview image rendered from one page of a PDF.
    fn preview(&self, id: i64, uri: &str, page: i64, rotation: Option<i64>) -> Value {
        let name = file_name(uri);
        let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
        let preview_uri = format!("public://previews/{}-{}.png", id, stem);

        let mut preview = Map::new();
        preview.insert("page".to_string(), Value::from(page));
        if let Some(rotation) = rotation {
            preview.insert("rotation".to_string(), Value::from(rotation));
        }
        self.insert_urls(&mut preview, &preview_uri);
        Value::Object(preview)
    }

    /// `url` plus one `url-<style>` per configured image style.
    fn insert_urls(&self, target: &mut Map<String, Value>, uri: &str) {
        if let Some(url) = self.file_url(uri) {
            target.insert("url".to_string(), Value::String(url));
        }
        if let Some(path) = uri.strip_prefix("public://") {
            for style in &self.image_styles {
                target.insert(
                    format!("url-{}", style),
                    Value::String(format!("{}/styles/{}/public/{}", self.files_url, style, path)),
                );
            }
        }
    }

    /// Insert `filename` and `filemime`; returns the MIME type.
    fn insert_file_meta(
        &self,
        target: &mut Map<String, Value>,
        filename: Option<&str>,
        uri: &str,
    ) -> String {
        let name = filename.unwrap_or_else(|| file_name(uri));
        let mime = mime_guess::from_path(name)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string();
        if let Some(filename) = filename {
            target.insert("filename".to_string(), Value::String(filename.to_string()));
        }
        target.insert("filemime".to_string(), Value::String(mime.clone()));
        mime
    }

    /// Absolute URL of a stored file.
    fn file_url(&self, uri: &str) -> Option<String> {
        if let Some(path) = uri.strip_prefix("public://") {
            return Some(format!("{}/{}", self.files_url, path));
        }
        if let Some(path) = uri.strip_prefix("private://") {
            return Some(format!("{}/system/files/{}", self.origin, path));
        }
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Some(uri.to_string());
        }
        if uri.starts_with('/') {
            return Some(format!("{}{}", self.origin, uri));
        }
        None
    }

    // ── conversions ───────────────────────────────────────────────────

    fn apply(&self, conversion: Conversion, alias: &str, doc: &mut Document) {
        match conversion {
            Conversion::Bool => convert(doc, alias, to_bool),
            Conversion::Int => convert(doc, alias, to_int),
            Conversion::Float => convert(doc, alias, to_float),
            Conversion::Time => convert(doc, alias, to_millis),
            Conversion::MultiInt => convert(doc, alias, to_int_list),
            Conversion::MultiString => convert(doc, alias, to_string_list),
            Conversion::Single => convert(doc, alias, first_item),
            Conversion::Links => convert(doc, alias, |v| match v {
                Value::String(s) => Some(Value::String(self.rewrite_links(s))),
                other => Some(other.clone()),
            }),
            Conversion::Html => render_html(doc, alias, markdown::render, BASE_TAGS),
            Conversion::HtmlStrict => render_html(doc, alias, markdown::render, STRICT_TAGS),
            Conversion::HtmlIframe => {
                render_html(doc, alias, markdown::render_with_iframes, IFRAME_TAGS)
            }
            Conversion::Primary => flag_primary(doc, alias),
        }
    }

    /// Make root-relative link targets absolute and move legacy hosts to
    /// the canonical origin.
    pub fn rewrite_links(&self, text: &str) -> String {
        let mut out = text.to_string();
        for host in &self.legacy_hosts {
            out = host
                .replace_all(&out, |caps: &Captures| format!("{}{}", self.origin, &caps[1]))
                .into_owned();
        }
        out = HREF_ROOT
            .replace_all(&out, |caps: &Captures| {
                format!(
                    "{}{}/{}{}",
                    &caps[1],
                    self.origin,
                    caps.get(2).map_or("", |m| m.as_str()),
                    &caps[3]
                )
            })
            .into_owned();
        MARKDOWN_ROOT
            .replace_all(&out, |caps: &Captures| {
                format!(
                    "{}{}/{}{}",
                    &caps[1],
                    self.origin,
                    caps.get(2).map_or("", |m| m.as_str()),
                    &caps[3]
                )
            })
            .into_owned()
    }
}

fn resolve_reference(reference: &ReferenceField, raw: &Value, cache: &ReferenceCache) -> Option<Value> {
    let ids = match raw {
        Value::Array(items) => items.iter().flat_map(reference_ids).collect(),
        other => reference_ids(other),
    };
    non_empty(
        ids.into_iter()
            .filter_map(|id| cache.get_item(&reference.bundle, id, &reference.fields))
            .map(Value::Object)
            .collect(),
    )
}

fn decode_composite(columns: &[String], tuple: &[&str]) -> Option<Value> {
    let mut item = Map::new();
    for (i, column) in columns.iter().enumerate() {
        if let Some(value) = tuple_field(tuple, i) {
            item.insert(column.clone(), Value::String(value.to_string()));
        }
    }
    if item.is_empty() {
        None
    } else {
        Some(Value::Object(item))
    }
}

/// Replace a field with `f(value)`, dropping it when `f` yields nothing.
fn convert(doc: &mut Document, alias: &str, f: impl Fn(&Value) -> Option<Value>) {
    let Some(value) = doc.get(alias) else {
        return;
    };
    match f(value) {
        Some(converted) => {
            doc.insert(alias.to_string(), converted);
        }
        None => {
            doc.remove(alias);
        }
    }
}

fn render_html(doc: &mut Document, alias: &str, render: fn(&str) -> String, tags: &[&str]) {
    let key = format!("{}-html", alias);
    match doc.get(alias) {
        Some(Value::String(source)) => {
            let html = markdown::sanitize(&render(source), tags);
            doc.insert(key, Value::String(html));
        }
        _ => {
            doc.remove(&key);
        }
    }
}

/// Set `primary: true` on the items of `alias` whose id equals the id
/// held by `primary_<alias>`.
fn flag_primary(doc: &mut Document, alias: &str) {
    let Some(primary_id) = doc.get(&format!("primary_{}", alias)).and_then(item_id) else {
        return;
    };
    let flag = |item: &mut Value| {
        if item_id(item) == Some(primary_id) {
            if let Value::Object(map) = item {
                map.insert(PRIMARY_FLAG.to_string(), Value::Bool(true));
            }
        }
    };
    match doc.get_mut(alias) {
        Some(Value::Array(items)) => items.iter_mut().for_each(flag),
        Some(item) if item.is_object() => flag(item),
        _ => {}
    }
}

/// Id of a sub-item: an object's `id`, a bare number, or the first
/// element of a one-item array.
fn item_id(value: &Value) -> Option<i64> {
    match value {
        Value::Object(map) => map.get(ID_FIELD).and_then(item_id),
        Value::Array(items) => items.first().and_then(item_id),
        other => to_int(other).and_then(|v| v.as_i64()),
    }
}

fn to_bool(value: &Value) -> Option<Value> {
    let b = match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64()? != 0.0,
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" | "" => false,
            _ => return None,
        },
        _ => return None,
    };
    Some(Value::Bool(b))
}

fn to_int(value: &Value) -> Option<Value> {
    let n = match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => i,
            None => {
                let f = n.as_f64()?;
                if f.fract() != 0.0 {
                    return None;
                }
                f as i64
            }
        },
        Value::String(s) => s.trim().parse().ok()?,
        Value::Bool(b) => i64::from(*b),
        _ => return None,
    };
    Some(Value::from(n))
}

fn to_float(value: &Value) -> Option<Value> {
    let f = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    Number::from_f64(f).map(Value::Number)
}

/// Epoch seconds or a date-time string → epoch milliseconds.
fn to_millis(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(secs) => secs.checked_mul(1000).map(Value::from),
            None => Some(Value::from((n.as_f64()? * 1000.0).round() as i64)),
        },
        Value::String(s) => {
            let s = s.trim();
            if let Ok(secs) = s.parse::<i64>() {
                return secs.checked_mul(1000).map(Value::from);
            }
            parse_datetime_millis(s).map(Value::from)
        }
        _ => None,
    }
}

fn parse_datetime_millis(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

fn to_int_list(value: &Value) -> Option<Value> {
    let ints: Vec<Value> = match value {
        Value::String(s) => split_values(s)
            .into_iter()
            .filter_map(|v| v.trim().parse::<i64>().ok())
            .map(Value::from)
            .collect(),
        Value::Array(items) => items.iter().filter_map(to_int).collect(),
        Value::Number(_) => to_int(value).into_iter().collect(),
        _ => return None,
    };
    non_empty(ints)
}

fn to_string_list(value: &Value) -> Option<Value> {
    let Value::String(s) = value else {
        return None;
    };
    Some(Value::Array(
        LIST_SEPARATOR
            .split(s)
            .filter(|part| !part.is_empty())
            .map(|part| Value::String(part.to_string()))
            .collect(),
    ))
}

fn first_item(value: &Value) -> Option<Value> {
    match value {
        Value::Array(items) => items.first().cloned(),
        _ => None,
    }
}

fn non_empty(items: Vec<Value>) -> Option<Value> {
    if items.is_empty() {
        None
    } else {
        Some(Value::Array(items))
    }
}

fn insert_text(target: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(v) = value {
        target.insert(key.to_string(), Value::String(v.to_string()));
    }
}

fn insert_int(target: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(n) = value.and_then(|v| v.parse::<i64>().ok()) {
        target.insert(key.to_string(), Value::from(n));
    }
}

fn file_name(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}
