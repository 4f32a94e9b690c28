//! # relindex
//!
//! Incremental exporter from a relational content store into an
//! Elasticsearch-compatible search engine.
//!
//! Entities of each configured bundle are read newest first, one chunk at a
//! time. One-to-many fields arrive packed into single columns, then get
//! decoded and reshaped into nested JSON documents before being
//! bulk-upserted.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │  SQL store  │──▶│ Query builder│──▶│  Transformer │──▶│  Search  │
//! │ MySQL/SQLite│   │ packed rows  │   │ + ref. cache │   │  engine  │
//! └─────────────┘   └──────────────┘   └──────────────┘   └──────────┘
//!                           ▲                                   ▲
//!                           └──────────── Indexer ──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! relindex bundles                       # list configured bundles
//! relindex index report --chunk-size 200 # index a bundle
//! relindex alias report                  # point the alias at the new index
//! relindex index-item report 4021        # refresh one entity
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`descriptor`] | Bundle definitions |
//! | [`registry`] | Bundle registry and per-bundle hooks |
//! | [`encoding`] | Packed Value encoding |
//! | [`query`] | SQL statement builder |
//! | [`filter`] | Filter expressions |
//! | [`db`] | Relational store connection |
//! | [`references`] | Reference cache |
//! | [`transform`] | Row → document pipeline |
//! | [`markdown`] | Markdown rendering and HTML filtering |
//! | [`mapping`] | Index mappings |
//! | [`engine`] | Search engine clients |
//! | [`indexer`] | Indexing orchestrator |
//! | [`models`] | Rows, documents and run outcomes |
//! | [`error`] | Error taxonomy |
//! | [`progress`] | Progress reporting |
//! | [`commands`] | CLI command implementations |

pub mod commands;
pub mod config;
pub mod db;
pub mod descriptor;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod filter;
pub mod indexer;
pub mod mapping;
pub mod markdown;
pub mod models;
pub mod progress;
pub mod query;
pub mod references;
pub mod registry;
pub mod transform;

pub use error::{IndexerError, Result};
pub use indexer::{IndexOptions, Indexer};
