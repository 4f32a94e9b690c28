//! End-to-end indexing runs against an in-memory SQLite database and the
//! in-memory search engine.

mod common;

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use relindex::config::Config;
use relindex::db::{RelationalStore, SqlStore};
use relindex::engine::memory::MemoryEngine;
use relindex::indexer::IndexState;
use relindex::models::Row;
use relindex::query::{Dialect, Statement};
use relindex::registry::BundleRegistry;
use relindex::{IndexOptions, Indexer, IndexerError};

const INDEX: &str = "site_report_index";

async fn fixture() -> (Config, BundleRegistry, SqlStore, MemoryEngine) {
    let config = common::config("sqlite::memory:");
    let registry = BundleRegistry::from_config(&config).unwrap();
    let store = SqlStore::connect(&config).await.unwrap();
    common::seed(store.pool()).await;
    (config, registry, store, MemoryEngine::new())
}

/// Store that records the SQL of every row fetch.
struct RecordingStore {
    inner: SqlStore,
    statements: Mutex<Vec<String>>,
}

impl RecordingStore {
    fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelationalStore for RecordingStore {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    async fn fetch_rows(&self, stmt: &Statement) -> relindex::Result<Vec<Row>> {
        self.statements.lock().unwrap().push(stmt.sql.clone());
        self.inner.fetch_rows(stmt).await
    }

    async fn fetch_i64(&self, stmt: &Statement) -> relindex::Result<Option<i64>> {
        self.statements.lock().unwrap().push(stmt.sql.clone());
        self.inner.fetch_i64(stmt).await
    }
}

fn chunked(size: usize) -> IndexOptions {
    IndexOptions {
        chunk_size: Some(size),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_chunk_loop_walks_ids_downwards() {
    let (config, registry, store, engine) = fixture().await;
    let indexer = Indexer::new(&config, &registry, &store, &engine).unwrap();

    let outcome = indexer.index("report", &chunked(2)).await.unwrap();

    assert_eq!(engine.bulk_calls(), vec![vec![5, 4], vec![3]]);
    assert_eq!(outcome.processed, 3);
    assert_eq!(outcome.total, 3);
    assert_eq!(outcome.last_cursor, 2);
    assert_eq!(indexer.state(), IndexState::Completed);
    assert!(engine.has_index(INDEX));
    assert_eq!(engine.document_ids(INDEX), vec![5, 4, 3]);
}

#[tokio::test]
async fn test_documents_embed_references() {
    let (config, registry, store, engine) = fixture().await;
    let indexer = Indexer::new(&config, &registry, &store, &engine).unwrap();
    indexer.index("report", &IndexOptions::default()).await.unwrap();

    let harvest = engine.document(INDEX, 5).unwrap();
    assert_eq!(harvest["title"], json!("Harvest"));
    assert_eq!(harvest["status"], json!(true));
    assert_eq!(harvest["created"], json!(1700000000000i64));
    assert_eq!(harvest["url"], json!("https://example.org/node/5"));
    assert_eq!(
        harvest["country"],
        json!([
            {"id": 10, "name": "France", "region": [{"name": "Europe"}]},
            {"id": 11, "name": "Spain", "region": [{"name": "Europe"}]}
        ])
    );
    assert_eq!(harvest["body"], json!("See the [drought report](https://example.org/node/4)."));
    assert!(harvest["body-html"]
        .as_str()
        .unwrap()
        .contains(r#"<a href="https://example.org/node/4">drought report</a>"#));
    assert!(!harvest.contains_key("image"));

    let drought = engine.document(INDEX, 4).unwrap();
    assert_eq!(drought["status"], json!(false));
    assert_eq!(drought["country"], json!([{"id": 12, "name": "Chad"}]));
    assert_eq!(drought["image"][0]["alt"], json!("Dry field"));
    assert_eq!(
        drought["image"][0]["url"],
        json!("https://example.org/sites/default/files/images/dry.jpg")
    );
    assert_eq!(
        drought["image"][0]["url-thumb"],
        json!("https://example.org/sites/default/files/styles/thumb/public/images/dry.jpg")
    );

    let floods = engine.document(INDEX, 3).unwrap();
    assert!(!floods.contains_key("country"));
    assert!(!floods.contains_key("body"));
}

#[tokio::test]
async fn test_offset_limit_and_filter() {
    let (config, registry, store, engine) = fixture().await;
    let indexer = Indexer::new(&config, &registry, &store, &engine).unwrap();

    let outcome = indexer
        .index(
            "report",
            &IndexOptions {
                offset: Some(4),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.processed, 2);
    assert_eq!(outcome.last_cursor, 2);

    let outcome = indexer
        .index(
            "report",
            &IndexOptions {
                limit: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.last_cursor, 4);

    let outcome = indexer
        .index(
            "report",
            &IndexOptions {
                filter: Some("country:12".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.processed, 1);
    assert_eq!(outcome.last_cursor, 3);

    assert_eq!(engine.bulk_calls(), vec![vec![4, 3], vec![5], vec![4]]);
}

#[tokio::test]
async fn test_nothing_to_index() {
    let (config, registry, store, engine) = fixture().await;
    let indexer = Indexer::new(&config, &registry, &store, &engine).unwrap();

    let err = indexer.index("page", &IndexOptions::default()).await.unwrap_err();
    assert!(matches!(err, IndexerError::NothingToIndex(_)));

    let err = indexer
        .index(
            "report",
            &IndexOptions {
                offset: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IndexerError::NothingToIndex(_)));

    let err = indexer.index("blog", &IndexOptions::default()).await.unwrap_err();
    assert!(matches!(err, IndexerError::UnknownBundle(_)));
    assert!(engine.bulk_calls().is_empty());
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let (config, registry, store, engine) = fixture().await;
    let indexer = Indexer::new(&config, &registry, &store, &engine).unwrap();

    indexer.index("report", &chunked(2)).await.unwrap();
    let first: Vec<_> = engine
        .document_ids(INDEX)
        .into_iter()
        .map(|id| engine.document(INDEX, id))
        .collect();

    indexer.index("report", &chunked(2)).await.unwrap();
    let second: Vec<_> = engine
        .document_ids(INDEX)
        .into_iter()
        .map(|id| engine.document(INDEX, id))
        .collect();

    assert_eq!(first, second);
    assert_eq!(engine.bulk_calls().len(), 4);
}

#[tokio::test]
async fn test_single_item_operations() {
    let (config, registry, store, engine) = fixture().await;
    let indexer = Indexer::new(&config, &registry, &store, &engine).unwrap();

    assert!(indexer.index_item("report", 5).await.unwrap());
    assert_eq!(engine.bulk_calls(), vec![vec![5]]);
    assert_eq!(engine.document(INDEX, 5).unwrap()["country"][1]["name"], json!("Spain"));

    assert!(!indexer.index_item("report", 99).await.unwrap());
    // Ids of another bundle are not items of this one.
    assert!(!indexer.index_item("report", 6).await.unwrap());
    assert_eq!(engine.bulk_calls().len(), 1);

    assert!(indexer.remove_item("report", 5).await.unwrap());
    assert!(!indexer.remove_item("report", 5).await.unwrap());
    assert!(engine.document(INDEX, 5).is_none());
}

#[tokio::test]
async fn test_alias_and_index_removal() {
    let (config, registry, store, engine) = fixture().await;
    let indexer = Indexer::new(&config, &registry, &store, &engine).unwrap();

    indexer.index("country", &IndexOptions::default()).await.unwrap();
    let index = config.index.index_name("country");
    let alias = config.index.alias_name("country");
    assert_eq!(alias, "site_country");

    indexer.set_alias("country", false).await.unwrap();
    indexer.set_alias("country", false).await.unwrap();
    assert_eq!(engine.alias_targets(&alias), vec![index.clone()]);

    indexer.set_alias("country", true).await.unwrap();
    indexer.set_alias("country", true).await.unwrap();
    assert!(engine.alias_targets(&alias).is_empty());

    indexer.remove_index("country").await.unwrap();
    indexer.remove_index("country").await.unwrap();
    assert!(!engine.has_index(&index));
}

#[tokio::test]
async fn test_dry_run_touches_nothing() {
    let (config, registry, store, engine) = fixture().await;
    let indexer = Indexer::new(&config, &registry, &store, &engine).unwrap();

    let outcome = indexer
        .index(
            "report",
            &IndexOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.processed, 0);
    assert_eq!(outcome.total, 3);
    assert_eq!(outcome.last_cursor, 5);
    assert!(!engine.has_index(INDEX));
}

#[tokio::test]
async fn test_mapping_created_with_index() {
    let (config, registry, store, engine) = fixture().await;
    let indexer = Indexer::new(&config, &registry, &store, &engine).unwrap();
    indexer.index("report", &IndexOptions::default()).await.unwrap();

    let mapping = engine.mapping(INDEX).unwrap();
    assert_eq!(mapping["properties"]["created"]["type"], json!("date"));
    assert_eq!(mapping["properties"]["body-html"]["type"], json!("text"));
}

#[tokio::test]
async fn test_alias_moves_to_rebuilt_index() {
    let (mut config, registry, store, engine) = fixture().await;
    let alias = config.index.alias_name("country");

    config.index.tag = Some("v1".to_string());
    let indexer = Indexer::new(&config, &registry, &store, &engine).unwrap();
    indexer.index("country", &IndexOptions::default()).await.unwrap();
    indexer.set_alias("country", false).await.unwrap();
    assert_eq!(engine.alias_targets(&alias), vec!["site_country_index_v1".to_string()]);

    config.index.tag = Some("v2".to_string());
    let indexer = Indexer::new(&config, &registry, &store, &engine).unwrap();
    indexer.index("country", &IndexOptions::default()).await.unwrap();
    indexer.set_alias("country", false).await.unwrap();

    assert_eq!(engine.alias_targets(&alias), vec!["site_country_index_v2".to_string()]);
    assert!(engine.has_index("site_country_index_v1"));
}

#[tokio::test]
async fn test_index_item_loads_references_by_id() {
    let (config, registry, store, engine) = fixture().await;
    let store = RecordingStore {
        inner: store,
        statements: Mutex::new(Vec::new()),
    };
    let indexer = Indexer::new(&config, &registry, &store, &engine).unwrap();

    assert!(indexer.index_item("report", 5).await.unwrap());

    let statements = store.statements();
    // report, country, then region through country.
    assert_eq!(statements.len(), 3);
    for sql in &statements {
        assert!(sql.contains(" IN ("), "unscoped statement: {}", sql);
    }
    assert_eq!(
        engine.document(INDEX, 5).unwrap()["country"][0]["region"],
        json!([{"name": "Europe"}])
    );
}
