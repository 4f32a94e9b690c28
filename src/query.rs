//! Query builder: one SQL statement per entity page.
//!
//! Every statement selects the primary key as `id`, one column per scalar
//! field and one aggregated column per joined or reference field. Joined
//! fields are read through correlated subqueries so that several
//! one-to-many fields never multiply each other's rows:
//!
//! ```text
//! SELECT n.`nid` AS `id`, n.`title` AS `title`,
//!        (SELECT GROUP_CONCAT(j.`field_country_tid` ORDER BY j.delta SEPARATOR '%%%')
//!           FROM field_data_field_country AS j
//!          WHERE j.entity_id = n.`nid` AND j.entity_type = 'node') AS `country`
//! FROM node AS n
//! WHERE n.`type` = ? AND n.`nid` <= ?
//! GROUP BY n.`nid`
//! ORDER BY n.`nid` DESC
//! LIMIT ?
//! ```
//!
//! Filters on joined and reference fields add `INNER JOIN`s, which is why
//! the page is still grouped by primary key. Caller-supplied values are
//! always bound parameters; only validated identifiers are interpolated.

use crate::db::RelationalStore;
use crate::descriptor::{
    ColumnSource, EntityCategory, EntityDescriptor, FieldKind, JoinedField, FILE_LAYOUT,
    IMAGE_LAYOUT,
};
use crate::encoding::{INNER_DELIMITER, OUTER_DELIMITER};
use crate::error::{IndexerError, Result};
use crate::filter::{Condition, Filter};
use crate::models::Row;

/// SQL dialect of the relational store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Sqlite,
}

impl Dialect {
    /// Infer the dialect from a database URL scheme.
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("mysql:") || url.starts_with("mariadb:") {
            Ok(Dialect::MySql)
        } else if url.starts_with("sqlite:") {
            Ok(Dialect::Sqlite)
        } else {
            Err(IndexerError::config(format!(
                "Unsupported database URL '{}'. Use mysql:// or sqlite://",
                url
            )))
        }
    }

    fn group_concat(&self, expr: &str, order: &str) -> String {
        match self {
            Dialect::MySql => format!(
                "GROUP_CONCAT({} ORDER BY {} SEPARATOR '{}')",
                expr, order, OUTER_DELIMITER
            ),
            Dialect::Sqlite => format!(
                "GROUP_CONCAT({}, '{}' ORDER BY {})",
                expr, OUTER_DELIMITER, order
            ),
        }
    }

    fn concat(&self, parts: &[String]) -> String {
        let sep = format!("'{}'", INNER_DELIMITER);
        let mut items = Vec::with_capacity(parts.len() * 2);
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                items.push(sep.clone());
            }
            items.push(format!("IFNULL({}, '')", part));
        }
        match self {
            Dialect::MySql => format!("CONCAT({})", items.join(", ")),
            Dialect::Sqlite => items.join(" || "),
        }
    }
}

/// Bound statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Int(i64),
    Text(String),
}

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

/// Quote an identifier. Both MySQL and SQLite accept backticks.
fn q(name: &str) -> String {
    format!("`{}`", name)
}

/// Statement factory for one bundle.
pub struct EntityQuery<'a> {
    descriptor: &'a EntityDescriptor,
    dialect: Dialect,
}

impl<'a> EntityQuery<'a> {
    pub fn new(descriptor: &'a EntityDescriptor, dialect: Dialect) -> Self {
        Self {
            descriptor,
            dialect,
        }
    }

    fn category(&self) -> EntityCategory {
        self.descriptor.category
    }

    fn pk(&self) -> String {
        format!("{}.{}", self.category().table_alias(), q(self.category().id_column()))
    }

    /// Page of entities with primary key ≤ `cursor`, newest first.
    pub fn select(
        &self,
        cursor: Option<i64>,
        limit: Option<u64>,
        filter: &Filter,
        ids: &[i64],
    ) -> Statement {
        let alias = self.category().table_alias();
        let mut columns = vec![format!("{} AS {}", self.pk(), q("id"))];

        for field in &self.descriptor.fields {
            columns.push(format!("{}.{} AS {}", alias, q(&field.column), q(&field.alias)));
        }
        for field in &self.descriptor.joined {
            columns.push(format!("{} AS {}", self.joined_subquery(field), q(&field.alias)));
        }
        for reference in &self.descriptor.references {
            let expr = format!("j.{}", q(&reference.column_name()));
            columns.push(format!(
                "{} AS {}",
                self.aggregate_subquery(&reference.table(), &expr, ""),
                q(&reference.alias)
            ));
        }

        let mut params = Vec::new();
        let mut sql = format!("SELECT {}", columns.join(", "));
        sql.push_str(&self.from_where(cursor, filter, ids, &mut params));
        sql.push_str(&format!(" GROUP BY {} ORDER BY {} DESC", self.pk(), self.pk()));
        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            params.push(Param::Int(limit as i64));
        }

        Statement { sql, params }
    }

    /// Number of entities matching the filter with primary key ≤ `cursor`.
    pub fn count(&self, cursor: Option<i64>, filter: &Filter) -> Statement {
        let mut params = Vec::new();
        let mut sql = format!("SELECT COUNT(DISTINCT {}) AS {}", self.pk(), q("total"));
        sql.push_str(&self.from_where(cursor, filter, &[], &mut params));
        Statement { sql, params }
    }

    /// Most recent matching id.
    pub fn max_id(&self, filter: &Filter) -> Statement {
        let mut params = Vec::new();
        let mut sql = format!("SELECT {} AS {}", self.pk(), q("id"));
        sql.push_str(&self.from_where(None, filter, &[], &mut params));
        sql.push_str(&format!(" ORDER BY {} DESC LIMIT 1", self.pk()));
        Statement { sql, params }
    }

    /// `FROM`, bundle join, filter joins and `WHERE` clause.
    fn from_where(
        &self,
        cursor: Option<i64>,
        filter: &Filter,
        ids: &[i64],
        params: &mut Vec<Param>,
    ) -> String {
        let category = self.category();
        let alias = category.table_alias();
        let mut sql = format!(" FROM {} AS {}", category.base_table(), alias);
        let mut conditions = Vec::new();

        match category {
            EntityCategory::Node => {
                conditions.push(format!("{}.{} = ?", alias, q("type")));
            }
            EntityCategory::TaxonomyTerm => {
                sql.push_str(&format!(
                    " INNER JOIN taxonomy_vocabulary AS tv ON tv.{} = {}.{}",
                    q("vid"),
                    alias,
                    q("vid")
                ));
                conditions.push(format!("tv.{} = ?", q("machine_name")));
            }
        }
        params.push(Param::Text(self.descriptor.bundle.clone()));

        if let Some(cursor) = cursor {
            conditions.push(format!("{} <= ?", self.pk()));
            params.push(Param::Int(cursor));
        }

        if !ids.is_empty() {
            conditions.push(format!("{} IN ({})", self.pk(), placeholders(ids.len())));
            params.extend(ids.iter().map(|id| Param::Int(*id)));
        }

        for (name, condition) in &filter.fields {
            let Some(field) = self.descriptor.scalar(name) else {
                continue;
            };
            let column = format!("{}.{}", alias, q(&field.column));
            push_condition(&mut conditions, params, &column, condition, true);
        }

        for (name, condition) in &filter.joined {
            let Some(field) = self.descriptor.joined_field(name) else {
                continue;
            };
            let join_alias = format!("flt_{}", field.alias);
            sql.push_str(&self.filter_join(&field.table(), &join_alias));
            let column = format!("{}.{}", join_alias, q(&field.key_column()));
            push_condition(&mut conditions, params, &column, condition, false);
        }

        for (name, condition) in &filter.references {
            let Some(reference) = self.descriptor.reference(name) else {
                continue;
            };
            let join_alias = format!("flt_{}", reference.alias);
            sql.push_str(&self.filter_join(&reference.table(), &join_alias));
            let column = format!("{}.{}", join_alias, q(&reference.column_name()));
            push_condition(&mut conditions, params, &column, condition, false);
        }

        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
        sql
    }

    fn filter_join(&self, table: &str, join_alias: &str) -> String {
        format!(
            " INNER JOIN {} AS {} ON {}.entity_id = {} AND {}.entity_type = '{}'",
            table,
            join_alias,
            join_alias,
            self.pk(),
            join_alias,
            self.category().entity_type()
        )
    }

    /// Correlated `GROUP_CONCAT` over one field table, ordered by delta.
    fn aggregate_subquery(&self, table: &str, expr: &str, extra_join: &str) -> String {
        format!(
            "(SELECT {} FROM {} AS j{} WHERE j.entity_id = {} AND j.entity_type = '{}')",
            self.dialect.group_concat(expr, "j.delta"),
            table,
            extra_join,
            self.pk(),
            self.category().entity_type()
        )
    }

    fn joined_subquery(&self, field: &JoinedField) -> String {
        let managed_join = format!(
            " LEFT JOIN file_managed AS fm ON fm.{} = j.{}",
            q("fid"),
            q(&field.column_name("fid"))
        );
        match field.kind {
            FieldKind::Value | FieldKind::Multiple => {
                let expr = format!("j.{}", q(&field.column_name(&field.columns[0])));
                self.aggregate_subquery(&field.table(), &expr, "")
            }
            FieldKind::Composite => {
                let parts: Vec<String> = field
                    .columns
                    .iter()
                    .map(|c| format!("j.{}", q(&field.column_name(c))))
                    .collect();
                self.aggregate_subquery(&field.table(), &self.dialect.concat(&parts), "")
            }
            FieldKind::Image => {
                let parts = layout_columns(field, &IMAGE_LAYOUT);
                self.aggregate_subquery(&field.table(), &self.dialect.concat(&parts), &managed_join)
            }
            FieldKind::File => {
                let parts = layout_columns(field, &FILE_LAYOUT);
                self.aggregate_subquery(&field.table(), &self.dialect.concat(&parts), &managed_join)
            }
        }
    }

    /// Fetch one page of rows.
    pub async fn fetch(
        &self,
        store: &dyn RelationalStore,
        cursor: Option<i64>,
        limit: Option<u64>,
        filter: &Filter,
        ids: &[i64],
    ) -> Result<Vec<Row>> {
        store.fetch_rows(&self.select(cursor, limit, filter, ids)).await
    }

    /// Count matching entities.
    pub async fn fetch_count(
        &self,
        store: &dyn RelationalStore,
        cursor: Option<i64>,
        filter: &Filter,
    ) -> Result<u64> {
        let total = store.fetch_i64(&self.count(cursor, filter)).await?;
        Ok(total.unwrap_or(0).max(0) as u64)
    }

    /// Resolve the most recent id, if any entity matches.
    pub async fn fetch_max_id(
        &self,
        store: &dyn RelationalStore,
        filter: &Filter,
    ) -> Result<Option<i64>> {
        store.fetch_i64(&self.max_id(filter)).await
    }
}

fn layout_columns(field: &JoinedField, layout: &[(&str, ColumnSource)]) -> Vec<String> {
    layout
        .iter()
        .map(|(_, source)| match source {
            ColumnSource::Field(column) => format!("j.{}", q(&field.column_name(column))),
            ColumnSource::Managed(column) => format!("fm.{}", q(column)),
        })
        .collect()
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn push_condition(
    conditions: &mut Vec<String>,
    params: &mut Vec<Param>,
    column: &str,
    condition: &Condition,
    check_null: bool,
) {
    match condition {
        Condition::Present => {
            // Joins already require the field row to exist.
            if check_null {
                conditions.push(format!("{} IS NOT NULL", column));
            }
        }
        Condition::OneOf(values) => {
            conditions.push(format!("{} IN ({})", column, placeholders(values.len())));
            params.extend(values.iter().map(|v| Param::Text(v.clone())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::BundleConfig;
    use crate::filter::parse_filter;

    fn descriptor(toml_str: &str, bundle: &str) -> EntityDescriptor {
        let cfg: BundleConfig = toml::from_str(toml_str).unwrap();
        EntityDescriptor::from_config(bundle, &cfg).unwrap()
    }

    fn report() -> EntityDescriptor {
        descriptor(
            r#"
            entity = "node"
            fields = { title = "title", status = "status" }
            [joined.image]
            field = "field_image"
            kind = "image"
            [references.country]
            field = "field_country"
            bundle = "country"
            "#,
            "report",
        )
    }

    #[test]
    fn test_dialect_from_url() {
        assert_eq!(Dialect::from_url("mysql://u@h/db").unwrap(), Dialect::MySql);
        assert_eq!(Dialect::from_url("sqlite::memory:").unwrap(), Dialect::Sqlite);
        assert!(Dialect::from_url("postgres://x").is_err());
    }

    #[test]
    fn test_select_shape_and_params() {
        let d = report();
        let stmt = EntityQuery::new(&d, Dialect::MySql).select(Some(100), Some(10), &Filter::default(), &[]);
        assert!(stmt
            .sql
            .starts_with("SELECT n.`nid` AS `id`, n.`status` AS `status`, n.`title` AS `title`"));
        assert!(stmt.sql.contains("FROM node AS n"));
        assert!(stmt.sql.contains("WHERE n.`type` = ? AND n.`nid` <= ?"));
        assert!(stmt.sql.contains("GROUP BY n.`nid` ORDER BY n.`nid` DESC LIMIT ?"));
        assert!(stmt.sql.contains("SEPARATOR '%%%'"));
        assert!(stmt.sql.contains("LEFT JOIN file_managed AS fm"));
        assert_eq!(
            stmt.params,
            vec![
                Param::Text("report".to_string()),
                Param::Int(100),
                Param::Int(10)
            ]
        );
    }

    #[test]
    fn test_composite_columns_keep_order() {
        let d = report();
        let stmt = EntityQuery::new(&d, Dialect::Sqlite).select(None, None, &Filter::default(), &[]);
        let fid = stmt.sql.find("IFNULL(j.`field_image_fid`, '')").unwrap();
        let alt = stmt.sql.find("IFNULL(j.`field_image_alt`, '')").unwrap();
        let size = stmt.sql.find("IFNULL(fm.`filesize`, '')").unwrap();
        assert!(fid < alt && alt < size);
        assert!(stmt.sql.contains("'%%%' ORDER BY j.delta"));
        assert!(!stmt.sql.contains("LIMIT"));
    }

    #[test]
    fn test_filters_bind_values_in_order() {
        let d = report();
        let filter = parse_filter("status:1+country:12,45", &d);
        let stmt = EntityQuery::new(&d, Dialect::MySql).select(Some(9), Some(2), &filter, &[]);
        assert!(stmt.sql.contains("INNER JOIN field_data_field_country AS flt_country"));
        assert!(stmt.sql.contains("n.`status` IN (?)"));
        assert!(stmt.sql.contains("flt_country.`field_country_tid` IN (?, ?)"));
        assert_eq!(
            stmt.params,
            vec![
                Param::Text("report".to_string()),
                Param::Int(9),
                Param::Text("1".to_string()),
                Param::Text("12".to_string()),
                Param::Text("45".to_string()),
                Param::Int(2),
            ]
        );
    }

    #[test]
    fn test_term_bundle_joins_vocabulary() {
        let d = descriptor(
            r#"
            entity = "taxonomy_term"
            fields = { name = "name" }
            "#,
            "country",
        );
        let q = EntityQuery::new(&d, Dialect::Sqlite);
        let stmt = q.max_id(&Filter::default());
        assert_eq!(
            stmt.sql,
            "SELECT td.`tid` AS `id` FROM taxonomy_term_data AS td \
             INNER JOIN taxonomy_vocabulary AS tv ON tv.`vid` = td.`vid` \
             WHERE tv.`machine_name` = ? ORDER BY td.`tid` DESC LIMIT 1"
        );
        let count = q.count(Some(5), &Filter::default());
        assert!(count.sql.starts_with("SELECT COUNT(DISTINCT td.`tid`) AS `total`"));
        assert_eq!(count.params.len(), 2);
    }

    #[test]
    fn test_select_by_ids() {
        let d = report();
        let stmt = EntityQuery::new(&d, Dialect::Sqlite).select(None, None, &Filter::default(), &[3, 4]);
        assert!(stmt.sql.contains("n.`nid` IN (?, ?)"));
        assert_eq!(stmt.params[1..], [Param::Int(3), Param::Int(4)]);
    }
}
