use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Field names that have a dedicated slot on [`StoredItem`].
pub const KNOWN_FIELDS: [&str; 6] = ["title", "link", "description", "category", "pubDate", "media"];

/// An item persisted by the store, keyed by (feed_name, guid).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredItem {
    pub feed_name: String,
    pub feed_url: String,
    pub guid: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub pub_date: Option<String>,
    pub media: Option<String>,
    pub fetched_date: DateTime<Utc>,
    /// Index of the item within the document it was fetched from
    #[serde(default)]
    pub position: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_data: Option<BTreeMap<String, String>>,
}

impl StoredItem {
    pub fn new(feed_name: &str, feed_url: &str, guid: &str, fetched_date: DateTime<Utc>) -> Self {
        Self {
            feed_name: feed_name.to_string(),
            feed_url: feed_url.to_string(),
            guid: guid.to_string(),
            title: None,
            link: None,
            description: None,
            category: None,
            pub_date: None,
            media: None,
            fetched_date,
            position: 0,
            additional_data: None,
        }
    }

    /// Puts a known field into its slot, anything else into `additional_data`.
    pub fn set_field(&mut self, field: &str, value: String) {
        match field {
            "title" => self.title = Some(value),
            "link" => self.link = Some(value),
            "description" => self.description = Some(value),
            "category" => self.category = Some(value),
            "pubDate" => self.pub_date = Some(value),
            "media" => self.media = Some(value),
            _ => {
                self.additional_data
                    .get_or_insert_with(BTreeMap::new)
                    .insert(field.to_string(), value);
            }
        }
    }

    /// The known fields in fixed order (absent ones as empty strings),
    /// followed by the additional data.
    pub fn to_fields(&self) -> FieldValues {
        let mut fields = FieldValues::default();
        let known = [
            &self.title,
            &self.link,
            &self.description,
            &self.category,
            &self.pub_date,
            &self.media,
        ];
        for (name, value) in KNOWN_FIELDS.iter().zip(known) {
            fields.insert(*name, value.clone().unwrap_or_default());
        }
        if let Some(extra) = &self.additional_data {
            for (name, value) in extra {
                fields.insert(name, value.clone());
            }
        }
        fields
    }
}

/// Field name to value mapping handed to the template renderer.
/// Keeps insertion order; inserting an existing name replaces its value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldValues {
    entries: Vec<(String, String)>,
}

impl FieldValues {
    pub fn insert(&mut self, field: &str, value: String) {
        match self.entries.iter_mut().find(|(name, _)| name == field) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((field.to_string(), value)),
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for FieldValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionResult {
    pub success: bool,
    pub message: String,
    pub items_added: usize,
    pub items_skipped: usize,
}

impl IngestionResult {
    pub fn failed(message: String) -> Self {
        Self {
            success: false,
            message,
            items_added: 0,
            items_skipped: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedOutcome {
    pub feed: String,
    #[serde(flatten)]
    pub result: IngestionResult,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub added: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Outcome of one ingestion run: every configured feed, in configuration order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionReport {
    pub feeds: Vec<FeedOutcome>,
    pub totals: Totals,
}

impl IngestionReport {
    pub fn record(&mut self, feed: &str, result: IngestionResult) {
        if result.success {
            self.totals.added += result.items_added;
            self.totals.skipped += result.items_skipped;
        } else {
            self.totals.failed += 1;
        }
        self.feeds.push(FeedOutcome {
            feed: feed.to_string(),
            result,
        });
    }

    pub fn get(&self, feed: &str) -> Option<&IngestionResult> {
        self.feeds
            .iter()
            .find(|o| o.feed == feed)
            .map(|o| &o.result)
    }

    pub fn errors(&self) -> impl Iterator<Item = &FeedOutcome> {
        self.feeds.iter().filter(|o| !o.result.success)
    }

    pub fn has_errors(&self) -> bool {
        self.totals.failed > 0
    }
}

/// What the trigger interface reports back to the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub report: IngestionReport,
    /// Items removed by the cleanup step, `None` when cleanup was disabled
    pub purged: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_field_routes_unknown_names() {
        let mut item = StoredItem::new("BBC", "https://x/rss.xml", "g1", Utc::now());
        item.set_field("title", "Hello".to_string());
        item.set_field("pubDate", "Mon, 01 Jan 2024".to_string());
        item.set_field("author", "someone".to_string());

        assert_eq!(item.title.as_deref(), Some("Hello"));
        assert_eq!(item.pub_date.as_deref(), Some("Mon, 01 Jan 2024"));
        assert_eq!(
            item.additional_data.as_ref().and_then(|d| d.get("author")).map(String::as_str),
            Some("someone")
        );
    }

    #[test]
    fn test_to_fields_order() {
        let mut item = StoredItem::new("BBC", "https://x/rss.xml", "g1", Utc::now());
        item.set_field("link", "https://x/1".to_string());
        item.set_field("guid", "g1".to_string());

        let fields = item.to_fields();
        let names: Vec<_> = fields.iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec!["title", "link", "description", "category", "pubDate", "media", "guid"]
        );
        assert_eq!(fields.get("title"), Some(""));
        assert_eq!(fields.get("link"), Some("https://x/1"));

        let json = serde_json::to_string(&fields).unwrap();
        assert!(json.starts_with(r#"{"title":"","link":"https://x/1""#));
    }

    #[test]
    fn test_report_totals() {
        let mut report = IngestionReport::default();
        report.record(
            "A",
            IngestionResult {
                success: true,
                message: String::new(),
                items_added: 2,
                items_skipped: 1,
            },
        );
        report.record("B", IngestionResult::failed("down".to_string()));

        assert_eq!(report.totals, Totals { added: 2, skipped: 1, failed: 1 });
        assert!(report.has_errors());
        assert_eq!(report.errors().count(), 1);
        assert!(!report.get("B").unwrap().success);
    }
}
