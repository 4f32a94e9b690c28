//! Entity descriptors: the static definition of one bundle.
//!
//! A bundle is declared in the `[bundles.<name>]` section of the config file
//! and turned into an immutable [`EntityDescriptor`] when the registry is
//! built. All table and column names are validated here so that the query
//! builder only ever interpolates trusted identifiers.
//!
//! Relational layout follows the field-storage convention of the source
//! CMS: field `field_x` lives in table `field_data_field_x`, keyed by
//! `entity_type`, `entity_id` and `delta`, with value columns named
//! `field_x_<column>`. Files are stored in `file_managed`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::{IndexerError, Result};
use crate::models::ID_FIELD;

/// Entity category of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityCategory {
    /// Content entities (`node` table, `nid` key, `type` bundle column).
    Node,
    /// Vocabulary terms (`taxonomy_term_data` table, `tid` key).
    TaxonomyTerm,
}

impl FromStr for EntityCategory {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "node" => Ok(EntityCategory::Node),
            "taxonomy_term" => Ok(EntityCategory::TaxonomyTerm),
            other => Err(IndexerError::config(format!(
                "Unknown entity category: '{}'. Must be node or taxonomy_term.",
                other
            ))),
        }
    }
}

impl EntityCategory {
    /// Value of the `entity_type` column in field tables.
    pub fn entity_type(&self) -> &'static str {
        match self {
            EntityCategory::Node => "node",
            EntityCategory::TaxonomyTerm => "taxonomy_term",
        }
    }

    pub fn base_table(&self) -> &'static str {
        match self {
            EntityCategory::Node => "node",
            EntityCategory::TaxonomyTerm => "taxonomy_term_data",
        }
    }

    pub fn table_alias(&self) -> &'static str {
        match self {
            EntityCategory::Node => "n",
            EntityCategory::TaxonomyTerm => "td",
        }
    }

    pub fn id_column(&self) -> &'static str {
        match self {
            EntityCategory::Node => "nid",
            EntityCategory::TaxonomyTerm => "tid",
        }
    }

    /// Path prefix of the canonical entity URL on the site.
    pub fn url_path(&self) -> &'static str {
        match self {
            EntityCategory::Node => "node",
            EntityCategory::TaxonomyTerm => "taxonomy/term",
        }
    }
}

/// Encoding kind of a joined field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Single value, kept as the raw string.
    #[default]
    Value,
    /// Repeated values, kept packed until a conversion expands them.
    Multiple,
    /// Image tuples, see [`IMAGE_LAYOUT`].
    Image,
    /// File tuples, see [`FILE_LAYOUT`].
    File,
    /// Tuples of arbitrary field-table columns, in declaration order.
    Composite,
}

/// Where a position of a composite tuple is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSource {
    /// `<field>_<column>` in the field table.
    Field(&'static str),
    /// Column of the `file_managed` row the field points to.
    Managed(&'static str),
}

/// Tuple layout of image fields. Position 0 is the file id.
pub const IMAGE_LAYOUT: [(&str, ColumnSource); 8] = [
    ("id", ColumnSource::Field("fid")),
    ("alt", ColumnSource::Field("alt")),
    ("caption", ColumnSource::Field("title")),
    ("width", ColumnSource::Field("width")),
    ("height", ColumnSource::Field("height")),
    ("uri", ColumnSource::Managed("uri")),
    ("filename", ColumnSource::Managed("filename")),
    ("filesize", ColumnSource::Managed("filesize")),
];

/// Tuple layout of file fields. Position 0 is the file id.
pub const FILE_LAYOUT: [(&str, ColumnSource); 7] = [
    ("id", ColumnSource::Field("fid")),
    ("description", ColumnSource::Field("description")),
    ("preview_page", ColumnSource::Field("preview_page")),
    ("preview_rotation", ColumnSource::Field("preview_rotation")),
    ("uri", ColumnSource::Managed("uri")),
    ("filename", ColumnSource::Managed("filename")),
    ("filesize", ColumnSource::Managed("filesize")),
];

/// Per-field conversion directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conversion {
    Bool,
    Int,
    Float,
    Time,
    Links,
    Html,
    HtmlStrict,
    HtmlIframe,
    MultiInt,
    Single,
    MultiString,
    Primary,
}

// ═══════════════════════════════════════════════════════════════════════
// Configuration shapes
// ═══════════════════════════════════════════════════════════════════════

/// `[bundles.<name>]` section as written in the config file.
#[derive(Debug, Deserialize, Clone)]
pub struct BundleConfig {
    /// `node` or `taxonomy_term`.
    pub entity: String,
    /// Load the whole bundle into the reference cache once per run instead
    /// of fetching referenced ids lazily.
    #[serde(default)]
    pub preload: bool,
    /// Scalar fields: alias → column of the base table.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub joined: BTreeMap<String, JoinedFieldConfig>,
    #[serde(default)]
    pub references: BTreeMap<String, ReferenceFieldConfig>,
    /// Conversion directives keyed by field alias.
    #[serde(default)]
    pub conversions: BTreeMap<String, Vec<Conversion>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JoinedFieldConfig {
    /// Field machine name, e.g. `field_body`.
    pub field: String,
    #[serde(default = "default_value_column")]
    pub column: String,
    #[serde(default)]
    pub kind: FieldKind,
    /// Ordered column list for [`FieldKind::Composite`].
    #[serde(default)]
    pub columns: Vec<String>,
}

fn default_value_column() -> String {
    "value".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReferenceFieldConfig {
    pub field: String,
    #[serde(default = "default_reference_column")]
    pub column: String,
    /// Referenced bundle.
    pub bundle: String,
    /// Sub-field allowlist of the embedded records; empty keeps all.
    #[serde(default)]
    pub fields: Vec<String>,
}

fn default_reference_column() -> String {
    "tid".to_string()
}

// ═══════════════════════════════════════════════════════════════════════
// Validated descriptor
// ═══════════════════════════════════════════════════════════════════════

/// Scalar column of the base table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarField {
    pub alias: String,
    pub column: String,
}

/// One-to-many field stored in its own table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedField {
    pub alias: String,
    pub field: String,
    pub kind: FieldKind,
    /// Value columns (without the field prefix) for `value`, `multiple`
    /// and `composite` kinds.
    pub columns: Vec<String>,
}

impl JoinedField {
    pub fn table(&self) -> String {
        format!("field_data_{}", self.field)
    }

    /// Fully prefixed name of a field-table column.
    pub fn column_name(&self, column: &str) -> String {
        format!("{}_{}", self.field, column)
    }

    /// Column compared against by filters.
    pub fn key_column(&self) -> String {
        match self.kind {
            FieldKind::Image | FieldKind::File => self.column_name("fid"),
            _ => self.column_name(&self.columns[0]),
        }
    }
}

/// Field holding ids of another bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceField {
    pub alias: String,
    pub field: String,
    pub column: String,
    pub bundle: String,
    pub fields: Vec<String>,
}

impl ReferenceField {
    pub fn table(&self) -> String {
        format!("field_data_{}", self.field)
    }

    pub fn column_name(&self) -> String {
        format!("{}_{}", self.field, self.column)
    }
}

/// Immutable definition of one bundle.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub bundle: String,
    pub category: EntityCategory,
    pub preload: bool,
    pub fields: Vec<ScalarField>,
    pub joined: Vec<JoinedField>,
    pub references: Vec<ReferenceField>,
    pub conversions: Vec<(String, Vec<Conversion>)>,
}

impl EntityDescriptor {
    /// Build and validate a descriptor from its config section.
    pub fn from_config(bundle: &str, config: &BundleConfig) -> Result<Self> {
        let category: EntityCategory = config.entity.parse()?;
        check_identifier(bundle, "bundle name")?;

        let mut seen = vec![ID_FIELD.to_string()];
        let mut claim = |alias: &str| -> Result<()> {
            check_identifier(alias, "field alias")?;
            if seen.iter().any(|s| s == alias) {
                return Err(IndexerError::config(format!(
                    "Bundle '{}': field alias '{}' is declared twice or reserved",
                    bundle, alias
                )));
            }
            seen.push(alias.to_string());
            Ok(())
        };

        let mut fields = Vec::new();
        for (alias, column) in &config.fields {
            claim(alias)?;
            check_identifier(column, "column")?;
            fields.push(ScalarField {
                alias: alias.clone(),
                column: column.clone(),
            });
        }

        let mut joined = Vec::new();
        for (alias, jc) in &config.joined {
            claim(alias)?;
            check_identifier(&jc.field, "field name")?;
            let columns = match jc.kind {
                FieldKind::Composite => {
                    if jc.columns.is_empty() {
                        return Err(IndexerError::config(format!(
                            "Bundle '{}': composite field '{}' needs a column list",
                            bundle, alias
                        )));
                    }
                    jc.columns.clone()
                }
                FieldKind::Image | FieldKind::File => Vec::new(),
                FieldKind::Value | FieldKind::Multiple => vec![jc.column.clone()],
            };
            for column in &columns {
                check_identifier(column, "column")?;
            }
            joined.push(JoinedField {
                alias: alias.clone(),
                field: jc.field.clone(),
                kind: jc.kind,
                columns,
            });
        }

        let mut references = Vec::new();
        for (alias, rc) in &config.references {
            claim(alias)?;
            check_identifier(&rc.field, "field name")?;
            check_identifier(&rc.column, "column")?;
            references.push(ReferenceField {
                alias: alias.clone(),
                field: rc.field.clone(),
                column: rc.column.clone(),
                bundle: rc.bundle.clone(),
                fields: rc.fields.clone(),
            });
        }

        let conversions = config
            .conversions
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            bundle: bundle.to_string(),
            category,
            preload: config.preload,
            fields,
            joined,
            references,
            conversions,
        })
    }

    pub fn scalar(&self, alias: &str) -> Option<&ScalarField> {
        self.fields.iter().find(|f| f.alias == alias)
    }

    pub fn joined_field(&self, alias: &str) -> Option<&JoinedField> {
        self.joined.iter().find(|f| f.alias == alias)
    }

    pub fn reference(&self, alias: &str) -> Option<&ReferenceField> {
        self.references.iter().find(|f| f.alias == alias)
    }

    /// Bundles this one references, without duplicates.
    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = Vec::new();
        for r in &self.references {
            if !deps.contains(&r.bundle.as_str()) {
                deps.push(&r.bundle);
            }
        }
        deps
    }

    /// Conversions declared for a field, if any.
    pub fn conversions_for(&self, alias: &str) -> &[Conversion] {
        self.conversions
            .iter()
            .find(|(k, _)| k == alias)
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }
}

/// SQL identifiers are interpolated, never bound, so only plain names pass.
fn check_identifier(name: &str, what: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(IndexerError::config(format!("Invalid {}: '{}'", what, name)))
    }
}
