use crate::error::StoreError;
use crate::parser::RawItem;
use crate::store::ItemStore;

/// How an item relates to what the store already holds for its feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    New(String),
    Duplicate(String),
    /// Neither guid nor link; such items cannot be deduplicated and are skipped
    Unidentified,
}

/// The item's dedup key: a non-empty guid, else a non-empty link, trimmed.
pub fn identify(item: &RawItem) -> Option<String> {
    ["guid", "link"]
        .into_iter()
        .filter_map(|name| item.text(name))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

pub fn is_duplicate(store: &ItemStore, feed_name: &str, guid: &str) -> Result<bool, StoreError> {
    Ok(store.find_by_identity(feed_name, guid)?.is_some())
}

/// Classifies an item. Not atomic with a later insert: callers must not
/// ingest the same feed from two places at once.
pub fn resolve(store: &ItemStore, feed_name: &str, item: &RawItem) -> Result<Resolution, StoreError> {
    let Some(guid) = identify(item) else {
        return Ok(Resolution::Unidentified);
    };

    if is_duplicate(store, feed_name, &guid)? {
        Ok(Resolution::Duplicate(guid))
    } else {
        Ok(Resolution::New(guid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StoredItem;
    use crate::parser::Element;
    use chrono::Utc;
    use tempfile::TempDir;

    fn raw(children: &[(&str, &str)]) -> RawItem {
        RawItem::new(
            children
                .iter()
                .map(|(name, text)| Element {
                    name: name.to_string(),
                    text: text.to_string(),
                    ..Default::default()
                })
                .collect(),
        )
    }

    #[test]
    fn test_guid_preferred_over_link() {
        assert_eq!(
            identify(&raw(&[("link", "https://x/1"), ("guid", "abc")])),
            Some("abc".to_string())
        );
        assert_eq!(
            identify(&raw(&[("guid", ""), ("link", "https://x/1")])),
            Some("https://x/1".to_string())
        );
        assert_eq!(identify(&raw(&[("title", "no id")])), None);
        assert_eq!(identify(&raw(&[("guid", ""), ("link", "")])), None);
    }

    #[test]
    fn test_identity_ignores_surrounding_whitespace() {
        assert_eq!(
            identify(&raw(&[("guid", "\n  abc  \n")])),
            Some("abc".to_string())
        );
        // a blank guid falls through to the link
        assert_eq!(
            identify(&raw(&[("guid", "   "), ("link", " https://x/1 ")])),
            Some("https://x/1".to_string())
        );
    }

    #[test]
    fn test_identify_is_stable() {
        let bytes = br#"<rss><channel><item><guid>g-1</guid></item><item><link>l-2</link></item></channel></rss>"#;
        let first: Vec<_> = crate::parser::parse(bytes).unwrap().iter().map(identify).collect();
        let second: Vec<_> = crate::parser::parse(bytes).unwrap().iter().map(identify).collect();
        assert_eq!(first, second);
        assert_eq!(first, vec![Some("g-1".to_string()), Some("l-2".to_string())]);
    }

    #[test]
    fn test_resolve_against_store() {
        let dir = TempDir::new().unwrap();
        let store = ItemStore::open(dir.path()).unwrap();
        store
            .insert(&StoredItem::new("BBC", "https://x", "abc", Utc::now()))
            .unwrap();

        let item = raw(&[("guid", "abc")]);
        assert_eq!(resolve(&store, "BBC", &item).unwrap(), Resolution::Duplicate("abc".to_string()));
        // identity is scoped to the feed
        assert_eq!(resolve(&store, "TC", &item).unwrap(), Resolution::New("abc".to_string()));
        assert_eq!(resolve(&store, "BBC", &raw(&[])).unwrap(), Resolution::Unidentified);
    }
}
