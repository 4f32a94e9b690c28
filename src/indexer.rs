//! Indexing orchestrator.
//!
//! One [`Indexer`] drives every bundle. A full run walks the bundle from
//! the most recent id down, one chunk at a time:
//!
//! ```text
//! Idle → ComputingCursor → ComputingLimit → ResolvingMapping → ChunkLoop → Completed
//! ```
//!
//! Each chunk is fetched with `pk <= cursor`, its references are resolved
//! into the run's [`ReferenceCache`], the rows are transformed and the
//! documents bulk-upserted. The cursor then moves to the smallest id of
//! the chunk minus one and is logged, so an interrupted run resumes with
//! `--offset <cursor>`. Submitting the same chunk twice is harmless since
//! bulk submission upserts by id.
//!
//! Referenced bundles are loaded depth-first before the rows that embed
//! them are transformed. During a full run, bundles marked `preload` are
//! loaded entirely once; the others only for the ids a chunk actually
//! references. Single-item indexing always loads by id.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::config::{Config, IndexConfig};
use crate::db::RelationalStore;
use crate::descriptor::EntityDescriptor;
use crate::engine::{create_index_if_missing, SearchEngine, SearchError};
use crate::error::{IndexerError, Result};
use crate::filter::{parse_filter, Filter};
use crate::mapping::resolve_mapping;
use crate::models::{row_id, Document, IndexOutcome, Row};
use crate::progress::{IndexProgressEvent, IndexProgressReporter, NoProgress};
use crate::query::EntityQuery;
use crate::references::{reference_ids, BundleRecords, ReferenceCache};
use crate::registry::{BundleRegistry, RegisteredBundle};
use crate::transform::Transformer;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How referenced bundles are brought into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadMode {
    /// Full run: `preload` bundles are loaded whole.
    Run,
    /// Single item: only the referenced ids, whatever the bundle's flag.
    Item,
}

/// Phase of an indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Idle,
    ComputingCursor,
    ComputingLimit,
    ResolvingMapping,
    ChunkLoop,
    Completed,
}

/// Parameters of one `index` run. `None` means "use the default".
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Start at this id instead of the most recent one.
    pub offset: Option<i64>,
    /// Stop after this many documents.
    pub limit: Option<u64>,
    /// Documents per bulk request; defaults to `index.chunk_size`.
    pub chunk_size: Option<usize>,
    /// Filter expression, see [`crate::filter`].
    pub filter: Option<String>,
    /// Resolve cursor and limit only; nothing is fetched or submitted.
    pub dry_run: bool,
}

pub struct Indexer<'a> {
    registry: &'a BundleRegistry,
    store: &'a dyn RelationalStore,
    engine: &'a dyn SearchEngine,
    transformer: Transformer,
    index: IndexConfig,
    shards: u32,
    replicas: u32,
    progress: Box<dyn IndexProgressReporter>,
    state: Mutex<IndexState>,
}

impl<'a> Indexer<'a> {
    pub fn new(
        config: &Config,
        registry: &'a BundleRegistry,
        store: &'a dyn RelationalStore,
        engine: &'a dyn SearchEngine,
    ) -> Result<Self> {
        Ok(Self {
            registry,
            store,
            engine,
            transformer: Transformer::new(&config.site)?,
            index: config.index.clone(),
            shards: config.search.shards,
            replicas: config.search.replicas,
            progress: Box::new(NoProgress),
            state: Mutex::new(IndexState::Idle),
        })
    }

    pub fn with_progress(mut self, progress: Box<dyn IndexProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Phase the last run reached.
    pub fn state(&self) -> IndexState {
        self.state.lock().map(|s| *s).unwrap_or(IndexState::Idle)
    }

    fn enter(&self, bundle: &str, next: IndexState) {
        if let Ok(mut state) = self.state.lock() {
            debug!(bundle, from = ?*state, to = ?next, "index state");
            *state = next;
        }
    }

    /// Index a bundle from `offset` (or its most recent id) downwards.
    pub async fn index(&self, bundle: &str, options: &IndexOptions) -> Result<IndexOutcome> {
        let registered = self.registry.get(bundle)?;
        let descriptor = &registered.descriptor;
        let query = EntityQuery::new(descriptor, self.store.dialect());
        let filter = match &options.filter {
            Some(expr) => parse_filter(expr, descriptor),
            None => Filter::default(),
        };
        let chunk_size = options.chunk_size.unwrap_or(self.index.chunk_size).max(1);
        self.enter(bundle, IndexState::Idle);

        self.enter(bundle, IndexState::ComputingCursor);
        let mut cursor = match options.offset {
            Some(offset) => offset,
            None => query
                .fetch_max_id(self.store, &filter)
                .await?
                .ok_or_else(|| IndexerError::NothingToIndex(bundle.to_string()))?,
        };

        self.enter(bundle, IndexState::ComputingLimit);
        let count = query.fetch_count(self.store, Some(cursor), &filter).await?;
        let total = options.limit.map_or(count, |limit| limit.min(count));
        if total == 0 {
            return Err(IndexerError::NothingToIndex(bundle.to_string()));
        }

        info!(bundle, cursor, total, dry_run = options.dry_run, "starting index run");
        self.progress.report(IndexProgressEvent::Preparing {
            bundle: bundle.to_string(),
            cursor,
            total,
        });

        if options.dry_run {
            self.enter(bundle, IndexState::Completed);
            return Ok(IndexOutcome {
                processed: 0,
                total,
                last_cursor: cursor,
            });
        }

        self.enter(bundle, IndexState::ResolvingMapping);
        let index_name = self.ensure_index(bundle, registered).await?;

        let mut cache = ReferenceCache::new();
        self.preload_dependencies(bundle, &mut cache).await?;

        self.enter(bundle, IndexState::ChunkLoop);
        let mut processed: u64 = 0;
        while processed < total {
            let remaining = total - processed;
            let page = (chunk_size as u64).min(remaining);
            let rows = query
                .fetch(self.store, Some(cursor), Some(page), &filter, &[])
                .await?;
            if rows.is_empty() {
                break;
            }

            self.resolve_references(descriptor, &rows, &mut cache, LoadMode::Run)
                .await?;
            let docs = self.transform_rows(registered, rows, &cache);
            let Some(min_id) = docs.iter().map(|(id, _)| *id).min() else {
                warn!(bundle, cursor, "chunk has no usable ids, stopping");
                break;
            };

            self.engine.bulk_upsert(&index_name, &docs).await?;

            cursor = min_id - 1;
            processed += docs.len() as u64;
            info!(bundle, cursor, processed, total, "chunk indexed");
            self.progress.report(IndexProgressEvent::Indexing {
                bundle: bundle.to_string(),
                n: processed,
                total,
                cursor,
            });
        }

        self.enter(bundle, IndexState::Completed);
        info!(bundle, processed, last_cursor = cursor, "index run completed");
        Ok(IndexOutcome {
            processed,
            total,
            last_cursor: cursor,
        })
    }

    /// Index one entity. Returns `false` when the id does not exist.
    pub async fn index_item(&self, bundle: &str, id: i64) -> Result<bool> {
        let registered = self.registry.get(bundle)?;
        let descriptor = &registered.descriptor;
        let query = EntityQuery::new(descriptor, self.store.dialect());

        let rows = query
            .fetch(self.store, None, Some(1), &Filter::default(), &[id])
            .await?;
        if rows.is_empty() {
            info!(bundle, id, "item not found, nothing to index");
            return Ok(false);
        }

        let index_name = self.ensure_index(bundle, registered).await?;
        let mut cache = ReferenceCache::new();
        self.resolve_references(descriptor, &rows, &mut cache, LoadMode::Item)
            .await?;
        let docs = self.transform_rows(registered, rows, &cache);
        self.engine.bulk_upsert(&index_name, &docs).await?;
        info!(bundle, id, "item indexed");
        Ok(true)
    }

    /// Remove one document. Returns `false` when it was not indexed.
    pub async fn remove_item(&self, bundle: &str, id: i64) -> Result<bool> {
        self.registry.get(bundle)?;
        let index_name = self.index.index_name(bundle);
        match self.engine.delete_document(&index_name, id).await {
            Ok(()) => {
                info!(bundle, id, "item removed");
                Ok(true)
            }
            Err(SearchError::NotFound(_)) => {
                info!(bundle, id, "item not indexed, nothing to remove");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the physical index of a bundle.
    pub async fn remove_index(&self, bundle: &str) -> Result<()> {
        self.registry.get(bundle)?;
        let index_name = self.index.index_name(bundle);
        swallow_noop(self.engine.delete_index(&index_name).await)?;
        info!(bundle, index = %index_name, "index removed");
        Ok(())
    }

    /// Point the bundle alias at its physical index, or detach it.
    pub async fn set_alias(&self, bundle: &str, remove: bool) -> Result<()> {
        self.registry.get(bundle)?;
        let index_name = self.index.index_name(bundle);
        let alias = self.index.alias_name(bundle);
        if remove {
            swallow_noop(self.engine.remove_alias(&index_name, &alias).await)?;
            info!(bundle, index = %index_name, alias = %alias, "alias removed");
        } else {
            swallow_noop(self.engine.add_alias(&index_name, &alias).await)?;
            info!(bundle, index = %index_name, alias = %alias, "alias added");
        }
        Ok(())
    }

    async fn ensure_index(&self, bundle: &str, registered: &RegisteredBundle) -> Result<String> {
        let index_name = self.index.index_name(bundle);
        let mapping = resolve_mapping(&registered.descriptor, &registered.hooks);
        create_index_if_missing(self.engine, &index_name, &mapping, self.shards, self.replicas)
            .await?;
        Ok(index_name)
    }

    fn transform_rows(
        &self,
        registered: &RegisteredBundle,
        rows: Vec<Row>,
        cache: &ReferenceCache,
    ) -> Vec<(i64, Document)> {
        rows.into_iter()
            .filter_map(|row| {
                let doc = self.transformer.transform(
                    &registered.descriptor,
                    &registered.hooks,
                    row,
                    cache,
                );
                match row_id(&doc) {
                    Some(id) => Some((id, doc)),
                    None => {
                        warn!(bundle = %registered.descriptor.bundle, "dropping row without id");
                        None
                    }
                }
            })
            .collect()
    }

    /// Load every `preload` bundle `bundle` depends on, leaves first.
    async fn preload_dependencies(&self, bundle: &str, cache: &mut ReferenceCache) -> Result<()> {
        for dep in self.registry.dependency_order(bundle)? {
            let registered = self.registry.get(&dep)?;
            if registered.descriptor.preload && !cache.has(&dep) {
                self.preload(registered, cache).await?;
            }
        }
        Ok(())
    }

    async fn preload(&self, registered: &RegisteredBundle, cache: &mut ReferenceCache) -> Result<()> {
        let descriptor = &registered.descriptor;
        let rows = EntityQuery::new(descriptor, self.store.dialect())
            .fetch(self.store, None, None, &Filter::default(), &[])
            .await?;
        self.resolve_references(descriptor, &rows, cache, LoadMode::Run)
            .await?;
        let records: BundleRecords = self
            .transform_rows(registered, rows, cache)
            .into_iter()
            .collect();
        debug!(bundle = %descriptor.bundle, count = records.len(), "preloaded bundle");
        cache.set(&descriptor.bundle, records);
        Ok(())
    }

    async fn load_items(
        &self,
        registered: &RegisteredBundle,
        ids: &[i64],
        cache: &mut ReferenceCache,
        mode: LoadMode,
    ) -> Result<()> {
        let descriptor = &registered.descriptor;
        let rows = EntityQuery::new(descriptor, self.store.dialect())
            .fetch(self.store, None, None, &Filter::default(), ids)
            .await?;
        self.resolve_references(descriptor, &rows, cache, mode).await?;
        let records = self.transform_rows(registered, rows, cache);
        debug!(bundle = %descriptor.bundle, requested = ids.len(), loaded = records.len(), "loaded references");
        cache.set_items(&descriptor.bundle, records);
        Ok(())
    }

    /// Make sure every record referenced by `rows` is in the cache.
    ///
    /// Recurses through the referenced bundles' own references before
    /// transforming them. The registry rejects cycles, so this terminates.
    fn resolve_references<'s>(
        &'s self,
        descriptor: &'s EntityDescriptor,
        rows: &'s [Row],
        cache: &'s mut ReferenceCache,
        mode: LoadMode,
    ) -> BoxFuture<'s, Result<()>> {
        Box::pin(async move {
            for reference in &descriptor.references {
                let target = self.registry.get(&reference.bundle)?;
                if mode == LoadMode::Run && target.descriptor.preload {
                    if !cache.has(&reference.bundle) {
                        self.preload(target, cache).await?;
                    }
                    continue;
                }

                let ids: Vec<i64> = rows
                    .iter()
                    .filter_map(|row| row.get(&reference.alias))
                    .flat_map(reference_ids)
                    .collect();
                let missing = cache.get_not_loaded(&reference.bundle, &ids);
                if missing.is_empty() {
                    continue;
                }
                self.load_items(target, &missing, cache, mode).await?;
            }
            Ok(())
        })
    }
}

fn swallow_noop(result: std::result::Result<(), SearchError>) -> Result<()> {
    match result {
        Err(e) if e.is_noop() => {
            debug!(error = %e, "ignoring idempotent search engine error");
            Ok(())
        }
        other => other.map_err(IndexerError::from),
    }
}
