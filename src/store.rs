use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config;
use crate::error::StoreError;
use crate::models::StoredItem;

const PURGE_STAGING_DIR: &str = "purging";

/// File-backed item store.
///
/// Every item is one JSON document at `items/<feed>/<guid>.json`, where both
/// path segments are derived deterministically from the feed name and the
/// guid, so an identity lookup is a single path check. Uniqueness of
/// (feed, guid) is not enforced here; see [`crate::identity::resolve`].
pub struct ItemStore {
    base_dir: PathBuf,
    items_dir: PathBuf,
}

impl ItemStore {
    /// Opens the store in the configured data directory.
    pub fn new() -> Result<Self, StoreError> {
        Self::open(&config::data_dir())
    }

    /// Opens (creating if needed) a store rooted at `base_dir`.
    pub fn open(base_dir: &Path) -> Result<Self, StoreError> {
        let items_dir = base_dir.join("items");
        fs::create_dir_all(&items_dir).map_err(|e| StoreError::io(&items_dir, e))?;
        let state_dir = base_dir.join("state");
        fs::create_dir_all(&state_dir).map_err(|e| StoreError::io(&state_dir, e))?;

        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            items_dir,
        })
    }

    pub fn state_dir(&self) -> PathBuf {
        self.base_dir.join("state")
    }

    /// Writes one item. The document is written to a temporary file and
    /// renamed into place, so readers never see a partial item.
    pub fn insert(&self, item: &StoredItem) -> Result<(), StoreError> {
        let dir = self.feed_dir(&item.feed_name);
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let path = dir.join(item_file_name(&item.guid));
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(item).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            source: e,
        })?;

        fs::write(&tmp, json).map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| StoreError::io(&path, e))?;
        Ok(())
    }

    pub fn find_by_identity(&self, feed_name: &str, guid: &str) -> Result<Option<StoredItem>, StoreError> {
        let path = self.feed_dir(feed_name).join(item_file_name(guid));
        if !path.exists() {
            return Ok(None);
        }

        let item = read_item(&path)?;
        if item.feed_name == feed_name && item.guid == guid {
            Ok(Some(item))
        } else {
            Ok(None)
        }
    }

    /// Removes one item. Returns whether it existed.
    pub fn delete_by_identity(&self, feed_name: &str, guid: &str) -> Result<bool, StoreError> {
        if self.find_by_identity(feed_name, guid)?.is_none() {
            return Ok(false);
        }
        let path = self.feed_dir(feed_name).join(item_file_name(guid));
        fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
        Ok(true)
    }

    /// Most recently fetched items of a feed, newest first, at most `limit`.
    /// Items from the same fetch keep their document order.
    pub fn recent_by_feed(&self, feed_name: &str, limit: usize) -> Result<Vec<StoredItem>, StoreError> {
        let mut items = self.load_feed(feed_name)?;
        sort_newest_first(&mut items);
        items.truncate(limit);
        Ok(items)
    }

    /// Items of a feed fetched at or after `since`, newest first.
    pub fn items_since(&self, feed_name: &str, since: DateTime<Utc>) -> Result<Vec<StoredItem>, StoreError> {
        let mut items = self.load_feed(feed_name)?;
        items.retain(|i| i.fetched_date >= since);
        sort_newest_first(&mut items);
        Ok(items)
    }

    /// Items of every feed fetched at or after `since`, grouped by feed name
    /// and newest first within a feed.
    pub fn fetched_since(&self, since: DateTime<Utc>) -> Result<Vec<StoredItem>, StoreError> {
        let mut items: Vec<StoredItem> = self
            .all_items()?
            .into_iter()
            .map(|(_, item)| item)
            .filter(|i| i.fetched_date >= since)
            .collect();

        sort_newest_first(&mut items);
        items.sort_by(|a, b| a.feed_name.cmp(&b.feed_name));
        Ok(items)
    }

    pub fn count_by_feed(&self, feed_name: &str) -> Result<usize, StoreError> {
        Ok(self.load_feed(feed_name)?.len())
    }

    /// Deletes every item fetched strictly before `cutoff`, across all feeds.
    ///
    /// Expired documents are moved out of `items/` into a staging directory
    /// and only deleted once all of them have moved. If a move fails, the
    /// moved documents are put back and the store is left as it was.
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let expired: Vec<PathBuf> = self
            .all_items()?
            .into_iter()
            .filter(|(_, item)| item.fetched_date < cutoff)
            .map(|(path, _)| path)
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        let staging = self.base_dir.join(PURGE_STAGING_DIR);
        fs::create_dir_all(&staging).map_err(|e| StoreError::io(&staging, e))?;

        let mut moved: Vec<(&PathBuf, PathBuf)> = Vec::with_capacity(expired.len());
        for (index, path) in expired.iter().enumerate() {
            let staged = staging.join(format!("{}.json", index));
            if let Err(e) = fs::rename(path, &staged) {
                for (original, staged) in moved.iter().rev() {
                    if let Err(e) = fs::rename(staged, original) {
                        tracing::warn!("Failed to restore {}: {}", original.display(), e);
                    }
                }
                return Err(StoreError::io(path, e));
            }
            moved.push((path, staged));
        }

        fs::remove_dir_all(&staging).map_err(|e| StoreError::io(&staging, e))?;
        Ok(expired.len())
    }

    fn feed_dir(&self, feed_name: &str) -> PathBuf {
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, feed_name.as_bytes()).simple().to_string();
        self.items_dir
            .join(format!("{}-{}", sanitize_filename(feed_name), &id[..8]))
    }

    fn load_feed(&self, feed_name: &str) -> Result<Vec<StoredItem>, StoreError> {
        let dir = self.feed_dir(feed_name);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let mut items = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&dir, e))?.path();
            if !is_item_file(&path) {
                continue;
            }
            if let Some(item) = read_listed_item(&path)? {
                if item.feed_name == feed_name {
                    items.push(item);
                }
            }
        }
        Ok(items)
    }

    fn all_items(&self) -> Result<Vec<(PathBuf, StoredItem)>, StoreError> {
        let mut items = Vec::new();
        for entry in WalkDir::new(&self.items_dir).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.items_dir).to_path_buf();
                StoreError::io(path, io::Error::from(e))
            })?;
            let path = entry.path();
            if !is_item_file(path) {
                continue;
            }
            if let Some(item) = read_listed_item(path)? {
                items.push((path.to_path_buf(), item));
            }
        }
        Ok(items)
    }
}

fn read_item(path: &Path) -> Result<StoredItem, StoreError> {
    let content = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    serde_json::from_slice(&content).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        source: e,
    })
}

// Listings skip corrupt documents instead of failing as a whole
fn read_listed_item(path: &Path) -> Result<Option<StoredItem>, StoreError> {
    match read_item(path) {
        Ok(item) => Ok(Some(item)),
        Err(StoreError::Corrupt { path, source }) => {
            tracing::warn!("Skipping corrupt stored item {}: {}", path.display(), source);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn is_item_file(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "json")
}

fn sort_newest_first(items: &mut [StoredItem]) {
    items.sort_by(|a, b| {
        b.fetched_date
            .cmp(&a.fetched_date)
            .then(a.position.cmp(&b.position))
    });
}

fn item_file_name(guid: &str) -> String {
    format!("{}.json", Uuid::new_v5(&Uuid::NAMESPACE_URL, guid.as_bytes()).simple())
}

fn sanitize_filename(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(50)
        .collect()
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
