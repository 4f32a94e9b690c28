use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::descriptor::BundleConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub search: SearchConfig,
    #[serde(default)]
    pub index: IndexConfig,
    pub site: SiteConfig,
    #[serde(default)]
    pub bundles: BTreeMap<String, BundleConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    pub url: String,
    #[serde(default = "default_shards")]
    pub shards: u32,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_shards() -> u32 {
    1
}
fn default_replicas() -> u32 {
    1
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            tag: None,
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_prefix() -> String {
    "relindex".to_string()
}
fn default_chunk_size() -> usize {
    500
}

impl IndexConfig {
    /// Stable name clients query: `{prefix}_{bundle}`.
    pub fn alias_name(&self, bundle: &str) -> String {
        format!("{}_{}", self.prefix, bundle)
    }

    /// Physical index: `{prefix}_{bundle}_index[_{tag}]`.
    pub fn index_name(&self, bundle: &str) -> String {
        match self.tag.as_deref().filter(|t| !t.is_empty()) {
            Some(tag) => format!("{}_{}_index_{}", self.prefix, bundle, tag),
            None => format!("{}_{}_index", self.prefix, bundle),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    /// Canonical origin, e.g. `https://example.org`.
    pub origin: String,
    /// Historical hostnames rewritten to `origin` by the `links` conversion.
    #[serde(default)]
    pub legacy_hosts: Vec<String>,
    /// Public files base URL. Defaults to `{origin}/sites/default/files`.
    #[serde(default)]
    pub files_url: Option<String>,
    #[serde(default = "default_image_styles")]
    pub image_styles: Vec<String>,
}

fn default_image_styles() -> Vec<String> {
    vec!["large".to_string(), "small".to_string(), "thumb".to_string()]
}

impl SiteConfig {
    pub fn origin(&self) -> &str {
        self.origin.trim_end_matches('/')
    }

    pub fn files_url(&self) -> String {
        match &self.files_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("{}/sites/default/files", self.origin()),
        }
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.index.chunk_size == 0 {
        anyhow::bail!("index.chunk_size must be > 0");
    }

    if config.search.shards == 0 {
        anyhow::bail!("search.shards must be >= 1");
    }

    url::Url::parse(&config.search.url)
        .with_context(|| format!("search.url is not a valid URL: '{}'", config.search.url))?;
    url::Url::parse(&config.site.origin)
        .with_context(|| format!("site.origin is not a valid URL: '{}'", config.site.origin))?;

    match config.database.url.split(':').next() {
        Some("mysql") | Some("mariadb") | Some("sqlite") => {}
        _ => anyhow::bail!(
            "Unsupported database.url: '{}'. Must start with mysql:// or sqlite:",
            config.database.url
        ),
    }

    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [database]
        url = "sqlite::memory:"

        [search]
        url = "http://localhost:9200"

        [site]
        origin = "https://example.org/"
    "#;

    #[test]
    fn test_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.index.chunk_size, 500);
        assert_eq!(cfg.search.shards, 1);
        assert_eq!(cfg.site.origin(), "https://example.org");
        assert_eq!(cfg.site.files_url(), "https://example.org/sites/default/files");
        assert_eq!(cfg.site.image_styles.len(), 3);
        assert!(cfg.bundles.is_empty());
    }

    #[test]
    fn test_index_names() {
        let mut cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.index.alias_name("report"), "relindex_report");
        assert_eq!(cfg.index.index_name("report"), "relindex_report_index");
        cfg.index.tag = Some("v2".to_string());
        assert_eq!(cfg.index.index_name("report"), "relindex_report_index_v2");
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let content = format!("{}\n[index]\nchunk_size = 0\n", MINIMAL);
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn test_rejects_unknown_database_scheme() {
        let content = MINIMAL.replace("sqlite::memory:", "postgres://localhost/db");
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn test_bundles_section() {
        let content = format!(
            "{}\n[bundles.country]\nentity = \"taxonomy_term\"\npreload = true\n",
            MINIMAL
        );
        let cfg = parse_config(&content).unwrap();
        assert!(cfg.bundles["country"].preload);
    }
}
