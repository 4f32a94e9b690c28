//! CLI command implementations.
//!
//! Each `run_*` function loads what it needs from the config, performs one
//! command and prints its result on stdout. Logs and progress go to
//! stderr.

use anyhow::{Context, Result};

use crate::config::Config;
use crate::db::SqlStore;
use crate::engine::http::ElasticClient;
use crate::engine::memory::MemoryEngine;
use crate::indexer::{IndexOptions, Indexer};
use crate::progress::ProgressMode;
use crate::registry::BundleRegistry;

fn search_engine(config: &Config) -> Result<ElasticClient> {
    ElasticClient::new(&config.search).context("Failed to build search engine client")
}

pub async fn run_index(
    config: &Config,
    bundle: &str,
    options: IndexOptions,
    progress: ProgressMode,
) -> Result<()> {
    let registry = BundleRegistry::from_config(config)?;
    let store = SqlStore::connect(config).await?;

    // A dry run never reaches the engine.
    let outcome = if options.dry_run {
        let engine = MemoryEngine::new();
        Indexer::new(config, &registry, &store, &engine)?
            .with_progress(progress.reporter())
            .index(bundle, &options)
            .await
    } else {
        let engine = search_engine(config)?;
        Indexer::new(config, &registry, &store, &engine)?
            .with_progress(progress.reporter())
            .index(bundle, &options)
            .await
    };
    store.close().await;
    let outcome = outcome?;

    if options.dry_run {
        println!(
            "Dry run: would index {} {} documents starting at cursor {}.",
            outcome.total, bundle, outcome.last_cursor
        );
    } else {
        println!(
            "Indexed {} {} documents into {}. Last cursor: {}.",
            outcome.processed,
            bundle,
            config.index.index_name(bundle),
            outcome.last_cursor
        );
    }
    Ok(())
}

pub async fn run_index_item(config: &Config, bundle: &str, id: i64) -> Result<()> {
    let registry = BundleRegistry::from_config(config)?;
    let store = SqlStore::connect(config).await?;
    let engine = search_engine(config)?;
    let indexed = Indexer::new(config, &registry, &store, &engine)?
        .index_item(bundle, id)
        .await;
    store.close().await;

    if indexed? {
        println!("Indexed {} {}.", bundle, id);
    } else {
        println!("No {} with id {}; nothing indexed.", bundle, id);
    }
    Ok(())
}

pub async fn run_remove_item(config: &Config, bundle: &str, id: i64) -> Result<()> {
    let registry = BundleRegistry::from_config(config)?;
    let store = SqlStore::connect(config).await?;
    let engine = search_engine(config)?;
    let removed = Indexer::new(config, &registry, &store, &engine)?
        .remove_item(bundle, id)
        .await;
    store.close().await;

    if removed? {
        println!("Removed {} {}.", bundle, id);
    } else {
        println!("{} {} was not indexed; nothing removed.", bundle, id);
    }
    Ok(())
}

pub async fn run_remove_index(config: &Config, bundle: &str) -> Result<()> {
    let registry = BundleRegistry::from_config(config)?;
    let store = SqlStore::connect(config).await?;
    let engine = search_engine(config)?;
    let result = Indexer::new(config, &registry, &store, &engine)?
        .remove_index(bundle)
        .await;
    store.close().await;
    result?;

    println!("Removed index {}.", config.index.index_name(bundle));
    Ok(())
}

pub async fn run_alias(config: &Config, bundle: &str, remove: bool) -> Result<()> {
    let registry = BundleRegistry::from_config(config)?;
    let store = SqlStore::connect(config).await?;
    let engine = search_engine(config)?;
    let result = Indexer::new(config, &registry, &store, &engine)?
        .set_alias(bundle, remove)
        .await;
    store.close().await;
    result?;

    let (index, alias) = (config.index.index_name(bundle), config.index.alias_name(bundle));
    if remove {
        println!("Alias {} no longer points at {}.", alias, index);
    } else {
        println!("Alias {} now points at {}.", alias, index);
    }
    Ok(())
}

/// Print every bundle with its category and reference order.
pub fn run_bundles(config: &Config) -> Result<()> {
    let registry = BundleRegistry::from_config(config)?;
    if registry.is_empty() {
        println!("No bundles configured.");
        return Ok(());
    }

    println!("{:<24} {:<16} {:<8} DEPENDS ON", "BUNDLE", "ENTITY", "PRELOAD");
    for name in registry.names() {
        let descriptor = registry.descriptor(name)?;
        let deps = registry.dependency_order(name)?;
        println!(
            "{:<24} {:<16} {:<8} {}",
            name,
            descriptor.category.entity_type(),
            if descriptor.preload { "yes" } else { "no" },
            if deps.is_empty() { "-".to_string() } else { deps.join(", ") }
        );
    }
    Ok(())
}
