use chrono::{Duration, Local, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info};

use crate::config::{FeedConfig, FeedList, FieldSpec};
use crate::error::{LiveError, StoreError};
use crate::extract::{extract, extract_all};
use crate::fetcher::FeedFetcher;
use crate::identity::{resolve, Resolution};
use crate::models::{FieldValues, IngestionReport, IngestionResult, RunSummary, StoredItem};
use crate::parser;
use crate::store::ItemStore;

pub const DEFAULT_DAYS_TO_KEEP: u32 = 30;

/// Per-feed mutual exclusion shared between ingestion runs.
///
/// The dedup check and the insert that follows are two separate store calls.
/// Runs that share a `FeedLocks` never work on the same feed at the same
/// time, which keeps (feed, guid) unique.
#[derive(Clone, Default)]
pub struct FeedLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl FeedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, feed_name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(feed_name.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Runs fetch, parse, extract, dedup and persist over configured feeds.
///
/// Feeds are processed one at a time in configuration order. Fetch and parse
/// failures are recorded per feed; store failures abort the run.
pub struct Ingestor<F> {
    fetcher: F,
    store: ItemStore,
    locks: Option<FeedLocks>,
}

impl<F: FeedFetcher> Ingestor<F> {
    pub fn new(fetcher: F, store: ItemStore) -> Self {
        Self {
            fetcher,
            store,
            locks: None,
        }
    }

    pub fn with_locks(mut self, locks: FeedLocks) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn store(&self) -> &ItemStore {
        &self.store
    }

    pub async fn ingest_feed(&self, feed: &FeedConfig, fields: &FieldSpec) -> Result<IngestionResult, StoreError> {
        let _guard = match &self.locks {
            Some(locks) => Some(locks.acquire(&feed.name).await),
            None => None,
        };

        info!(feed = %feed.name, "Fetching feed from {}", feed.url);
        let fetched_date = Utc::now();

        let bytes = match self.fetcher.fetch(&feed.url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let message = format!("Failed to fetch RSS feed from {}", feed.url);
                error!(feed = %feed.name, reason = e.reason(), "{}: {}", message, e);
                return Ok(IngestionResult::failed(message));
            }
        };

        let items = match parser::parse(&bytes) {
            Ok(items) => items,
            Err(e) => {
                let message = format!("Failed to parse RSS feed: {}", e);
                error!(feed = %feed.name, "{}", message);
                return Ok(IngestionResult::failed(message));
            }
        };

        let mut items_added = 0;
        let mut items_skipped = 0;

        for (position, raw) in items.iter().enumerate() {
            let guid = match resolve(&self.store, &feed.name, raw)? {
                Resolution::New(guid) => guid,
                Resolution::Duplicate(guid) => {
                    debug!(feed = %feed.name, guid = %guid, "Skipping already stored item");
                    items_skipped += 1;
                    continue;
                }
                Resolution::Unidentified => {
                    debug!(feed = %feed.name, position, "Skipping item without guid or link");
                    items_skipped += 1;
                    continue;
                }
            };

            let mut item = StoredItem::new(&feed.name, &feed.url, &guid, fetched_date);
            item.position = position;
            for field in fields.iter() {
                item.set_field(field, extract(raw, field));
            }

            self.store.insert(&item)?;
            items_added += 1;
        }

        let message = format!(
            "Successfully fetched feed '{}': {} items added, {} items skipped",
            feed.name, items_added, items_skipped
        );
        info!(feed = %feed.name, "{}", message);

        Ok(IngestionResult {
            success: true,
            message,
            items_added,
            items_skipped,
        })
    }

    pub async fn ingest_all(&self, feeds: &FeedList, fields: &FieldSpec) -> Result<IngestionReport, StoreError> {
        let mut report = IngestionReport::default();
        for feed in feeds.iter() {
            let result = self.ingest_feed(feed, fields).await?;
            report.record(&feed.name, result);
        }
        Ok(report)
    }

    /// Deletes items of every feed fetched more than `days_to_keep` days ago.
    pub fn purge(&self, days_to_keep: u32) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - Duration::days(i64::from(days_to_keep));
        let deleted = self.store.purge_older_than(cutoff)?;
        info!("Cleaned up {} old items (older than {} days)", deleted, days_to_keep);
        Ok(deleted)
    }

    /// Entry point for schedulers: ingest every feed, then clean up.
    /// `cleanup_days` defaults to 30; zero disables cleanup.
    pub async fn run(
        &self,
        feeds: &FeedList,
        fields: &FieldSpec,
        cleanup_days: Option<u32>,
    ) -> Result<RunSummary, StoreError> {
        let report = self.ingest_all(feeds, fields).await?;

        let days = cleanup_days.unwrap_or(DEFAULT_DAYS_TO_KEEP);
        let purged = if days > 0 { Some(self.purge(days)?) } else { None };

        info!(
            "Fetched {} feeds: {} items added, {} skipped, {} errors",
            feeds.len(),
            report.totals.added,
            report.totals.skipped,
            report.totals.failed
        );

        Ok(RunSummary { report, purged })
    }

    /// Fetches and extracts a feed for immediate display, bypassing the store.
    ///
    /// `feed` may be a configured feed name or a literal http(s) URL; `None`
    /// selects the first configured feed.
    pub async fn fetch_live(
        &self,
        feeds: &FeedList,
        feed: Option<&str>,
        fields: &FieldSpec,
    ) -> Result<Vec<FieldValues>, LiveError> {
        let url = select_feed_url(feeds, feed)?;
        let bytes = self.fetcher.fetch(&url).await?;
        let items = parser::parse(&bytes)?;
        Ok(items.iter().map(|item| extract_all(item, fields)).collect())
    }

    /// Recently stored items of a feed, ready for the template renderer.
    pub fn get_cached(&self, feed_name: &str, limit: usize) -> Result<Vec<FieldValues>, StoreError> {
        Ok(self
            .store
            .recent_by_feed(feed_name, limit)?
            .iter()
            .map(StoredItem::to_fields)
            .collect())
    }

    /// Items of all feeds fetched since local midnight.
    pub fn todays_items(&self) -> Result<Vec<StoredItem>, StoreError> {
        let midnight = Local::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|t| Local.from_local_datetime(&t).earliest())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|| Utc::now() - Duration::days(1));
        self.store.fetched_since(midnight)
    }
}

fn select_feed_url(feeds: &FeedList, feed: Option<&str>) -> Result<String, LiveError> {
    match feed.map(str::trim).filter(|f| !f.is_empty()) {
        Some(name) => match feeds.get(name) {
            Some(config) => Ok(config.url.clone()),
            None if name.starts_with("http://") || name.starts_with("https://") => Ok(name.to_string()),
            None => Err(LiveError::UnknownFeed(name.to_string())),
        },
        None => feeds
            .first()
            .map(|config| config.url.clone())
            .ok_or(LiveError::NoFeed),
    }
}
