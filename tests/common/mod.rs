//! Shared SQLite fixture: a tiny content site with reports, countries and
//! regions, laid out like the production field tables.

#![allow(dead_code)]

use relindex::config::{parse_config, Config};
use sqlx::AnyPool;

pub const SCHEMA: &[&str] = &[
    "CREATE TABLE node (nid INTEGER PRIMARY KEY, type TEXT NOT NULL, title TEXT, status INTEGER, created INTEGER)",
    "CREATE TABLE taxonomy_vocabulary (vid INTEGER PRIMARY KEY, machine_name TEXT NOT NULL)",
    "CREATE TABLE taxonomy_term_data (tid INTEGER PRIMARY KEY, vid INTEGER NOT NULL, name TEXT, description TEXT)",
    "CREATE TABLE field_data_field_country (entity_type TEXT, entity_id INTEGER, delta INTEGER, field_country_tid INTEGER)",
    "CREATE TABLE field_data_field_region (entity_type TEXT, entity_id INTEGER, delta INTEGER, field_region_tid INTEGER)",
    "CREATE TABLE field_data_field_body (entity_type TEXT, entity_id INTEGER, delta INTEGER, field_body_value TEXT)",
    "CREATE TABLE field_data_field_image (entity_type TEXT, entity_id INTEGER, delta INTEGER, field_image_fid INTEGER, \
     field_image_alt TEXT, field_image_title TEXT, field_image_width INTEGER, field_image_height INTEGER)",
    "CREATE TABLE file_managed (fid INTEGER PRIMARY KEY, uri TEXT, filename TEXT, filesize INTEGER)",
];

pub const DATA: &[&str] = &[
    "INSERT INTO taxonomy_vocabulary VALUES (1, 'country'), (2, 'region')",
    "INSERT INTO taxonomy_term_data VALUES (1, 2, 'Europe', NULL), (2, 2, 'Africa', NULL)",
    "INSERT INTO taxonomy_term_data VALUES (10, 1, 'France', 'fr'), (11, 1, 'Spain', 'es'), (12, 1, 'Chad', 'td')",
    "INSERT INTO field_data_field_region VALUES ('taxonomy_term', 10, 0, 1), ('taxonomy_term', 11, 0, 1)",
    "INSERT INTO node VALUES (3, 'report', 'Floods', 1, 1699990000), (4, 'report', 'Drought', 0, 1699995000), \
     (5, 'report', 'Harvest', 1, 1700000000), (6, 'blog', 'Unrelated', 1, 1700001000)",
    "INSERT INTO field_data_field_country VALUES ('node', 5, 0, 10), ('node', 5, 1, 11), ('node', 4, 0, 12), ('node', 6, 0, 10)",
    "INSERT INTO field_data_field_body VALUES ('node', 5, 0, 'See the [drought report](/node/4).')",
    "INSERT INTO field_data_field_image VALUES ('node', 4, 0, 7, 'Dry field', '', 800, 600)",
    "INSERT INTO file_managed VALUES (7, 'public://images/dry.jpg', 'dry.jpg', 2048)",
];

pub async fn seed(pool: &AnyPool) {
    for statement in SCHEMA.iter().chain(DATA) {
        sqlx::query(statement).execute(pool).await.unwrap();
    }
}

pub const BUNDLES: &str = r#"
[bundles.region]
entity = "taxonomy_term"
preload = true
fields = { name = "name" }

[bundles.country]
entity = "taxonomy_term"
fields = { name = "name", code = "description" }

[bundles.country.references.region]
field = "field_region"
bundle = "region"
fields = ["name"]

[bundles.report]
entity = "node"
fields = { title = "title", status = "status", created = "created" }

[bundles.report.joined.body]
field = "field_body"

[bundles.report.joined.image]
field = "field_image"
kind = "image"

[bundles.report.references.country]
field = "field_country"
bundle = "country"
fields = ["id", "name", "region"]

[bundles.report.conversions]
status = ["bool"]
created = ["time"]
body = ["links", "html"]

[bundles.page]
entity = "node"
fields = { title = "title" }
"#;

pub fn config_toml(database_url: &str, search_url: &str) -> String {
    format!(
        r#"
[database]
url = "{}"

[search]
url = "{}"
max_retries = 0

[index]
prefix = "site"
chunk_size = 500

[site]
origin = "https://example.org"
image_styles = ["thumb"]
{}"#,
        database_url, search_url, BUNDLES
    )
}

pub fn config(database_url: &str) -> Config {
    parse_config(&config_toml(database_url, "http://localhost:9200")).unwrap()
}
