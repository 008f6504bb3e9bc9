//! Scheduled RSS ingestion with per-feed deduplication.
//!
//! Feeds are fetched, parsed into raw items, reduced to the configured
//! fields, deduplicated by guid (or link) against the item store and
//! persisted. Stored items can later be read back for templating, or a feed
//! can be read live without touching the store.

pub mod config;
pub mod error;
pub mod extract;
pub mod fetcher;
pub mod identity;
pub mod ingest;
pub mod models;
pub mod parser;
pub mod store;

pub use config::{FeedConfig, FeedList, FieldSpec, Settings};
pub use error::{Diagnostic, FetchError, LiveError, ParseError, StoreError};
pub use fetcher::{FeedFetcher, HttpFetcher};
pub use ingest::{FeedLocks, Ingestor, DEFAULT_DAYS_TO_KEEP};
pub use models::{FieldValues, IngestionReport, IngestionResult, RunSummary, StoredItem};
pub use parser::{RawItem, MEDIA_NAMESPACE};
pub use store::ItemStore;
