use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

use rss_import::{
    FeedFetcher, FeedList, FeedLocks, FetchError, FieldSpec, Ingestor, ItemStore, LiveError,
    StoredItem,
};

/// Serves canned documents; unknown URLs are unreachable.
#[derive(Clone, Default)]
struct StubFetcher {
    documents: HashMap<String, String>,
    delay_ms: u64,
}

impl StubFetcher {
    fn with(mut self, url: &str, body: &str) -> Self {
        self.documents.insert(url.to_string(), body.to_string());
        self
    }
}

#[async_trait]
impl FeedFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        self.documents
            .get(url)
            .map(|body| body.as_bytes().to_vec())
            .ok_or_else(|| FetchError::Unreachable {
                url: url.to_string(),
                detail: "connection refused".to_string(),
            })
    }
}

fn rss(items: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Test</title>
    {}
  </channel>
</rss>"#,
        items
    )
}

const TWO_ITEMS: &str = r#"
    <item>
      <title>One</title>
      <link>https://x/1</link>
      <guid>guid-1</guid>
      <category>World</category>
      <category>Politics</category>
      <media:thumbnail url="https://img/1.jpg"/>
    </item>
    <item>
      <title>Two</title>
      <link>https://x/2</link>
      <guid>guid-2</guid>
    </item>"#;

fn ingestor(fetcher: StubFetcher) -> (Ingestor<StubFetcher>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = ItemStore::open(temp_dir.path()).unwrap();
    (Ingestor::new(fetcher, store), temp_dir)
}

#[tokio::test]
async fn test_one_feed_failing_does_not_abort_the_run() {
    let fetcher = StubFetcher::default().with("https://x/rss.xml", &rss(TWO_ITEMS));
    let (ingestor, _temp_dir) = ingestor(fetcher);

    let feeds = FeedList::parse("BBC|https://x/rss.xml\nTC|https://y/rss.xml");
    let fields = FieldSpec::parse("title\nlink\nguid");

    let report = ingestor.ingest_all(&feeds, &fields).await.unwrap();

    let bbc = report.get("BBC").unwrap();
    assert!(bbc.success);
    assert_eq!((bbc.items_added, bbc.items_skipped), (2, 0));

    let tc = report.get("TC").unwrap();
    assert!(!tc.success);
    assert_eq!((tc.items_added, tc.items_skipped), (0, 0));
    assert!(tc.message.contains("https://y/rss.xml"));

    assert_eq!(report.totals.added, 2);
    assert_eq!(report.totals.skipped, 0);
    assert_eq!(report.totals.failed, 1);
    assert_eq!(report.feeds.iter().map(|o| o.feed.as_str()).collect::<Vec<_>>(), vec!["BBC", "TC"]);
}

#[tokio::test]
async fn test_reingesting_unchanged_feed_adds_nothing() {
    let fetcher = StubFetcher::default().with("https://x/rss.xml", &rss(TWO_ITEMS));
    let (ingestor, _temp_dir) = ingestor(fetcher);
    let feeds = FeedList::parse("BBC|https://x/rss.xml");
    let fields = FieldSpec::default();

    let first = ingestor.ingest_all(&feeds, &fields).await.unwrap();
    assert_eq!(first.totals.added, 2);

    let second = ingestor.ingest_all(&feeds, &fields).await.unwrap();
    assert_eq!(second.totals.added, 0);
    assert_eq!(second.totals.skipped, 2);
    assert_eq!(ingestor.store().count_by_feed("BBC").unwrap(), 2);
}

#[tokio::test]
async fn test_items_without_identity_are_skipped() {
    let body = rss(r#"
        <item><title>No id</title><description>nothing to key on</description></item>
        <item><title>Empty id</title><guid></guid><link></link></item>
        <item><title>Link only</title><link>https://x/only-link</link></item>"#);
    let fetcher = StubFetcher::default().with("https://x/rss.xml", &body);
    let (ingestor, _temp_dir) = ingestor(fetcher);

    let feeds = FeedList::parse("BBC|https://x/rss.xml");
    let report = ingestor.ingest_all(&feeds, &FieldSpec::default()).await.unwrap();

    let bbc = report.get("BBC").unwrap();
    assert!(bbc.success);
    assert_eq!((bbc.items_added, bbc.items_skipped), (1, 2));

    let stored = ingestor.store().recent_by_feed("BBC", 10).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].guid, "https://x/only-link");
}

#[tokio::test]
async fn test_malformed_feed_fails_alone() {
    let fetcher = StubFetcher::default()
        .with("https://a/rss", &rss(TWO_ITEMS))
        .with("https://b/rss", "<rss><channel><item><title>oops</channel></rss>")
        .with("https://c/rss", &rss("<item><guid>c-1</guid></item>"));
    let (ingestor, _temp_dir) = ingestor(fetcher);

    let feeds = FeedList::parse("A|https://a/rss\nB|https://b/rss\nC|https://c/rss");
    let report = ingestor.ingest_all(&feeds, &FieldSpec::default()).await.unwrap();

    assert!(report.get("A").unwrap().success);
    assert_eq!(report.get("A").unwrap().items_added, 2);

    let b = report.get("B").unwrap();
    assert!(!b.success);
    assert_eq!(b.items_added, 0);
    assert!(b.message.starts_with("Failed to parse RSS feed"));
    assert_eq!(ingestor.store().count_by_feed("B").unwrap(), 0);

    assert!(report.get("C").unwrap().success);
    assert_eq!(report.get("C").unwrap().items_added, 1);
}

#[tokio::test]
async fn test_feed_without_items_succeeds() {
    let fetcher = StubFetcher::default().with("https://x/rss.xml", &rss(""));
    let (ingestor, _temp_dir) = ingestor(fetcher);

    let feeds = FeedList::parse("Quiet|https://x/rss.xml");
    let report = ingestor.ingest_all(&feeds, &FieldSpec::default()).await.unwrap();

    let quiet = report.get("Quiet").unwrap();
    assert!(quiet.success);
    assert_eq!((quiet.items_added, quiet.items_skipped), (0, 0));
}

#[tokio::test]
async fn test_stored_fields_and_shared_fetch_time() {
    let fetcher = StubFetcher::default().with("https://x/rss.xml", &rss(TWO_ITEMS));
    let (ingestor, _temp_dir) = ingestor(fetcher);

    let feeds = FeedList::parse("BBC|https://x/rss.xml");
    let fields = FieldSpec::parse("title\ncategory\nmedia\nguid\nauthor");
    ingestor.ingest_all(&feeds, &fields).await.unwrap();

    let one = ingestor.store().find_by_identity("BBC", "guid-1").unwrap().unwrap();
    let two = ingestor.store().find_by_identity("BBC", "guid-2").unwrap().unwrap();

    assert_eq!(one.feed_url, "https://x/rss.xml");
    assert_eq!(one.title.as_deref(), Some("One"));
    assert_eq!(one.category.as_deref(), Some("World, Politics"));
    assert_eq!(one.media.as_deref(), Some("https://img/1.jpg"));
    // link was not requested
    assert_eq!(one.link, None);

    let extra = one.additional_data.as_ref().unwrap();
    assert_eq!(extra.get("guid").map(String::as_str), Some("guid-1"));
    assert_eq!(extra.get("author").map(String::as_str), Some(""));

    assert_eq!(one.fetched_date, two.fetched_date);
    assert_eq!((one.position, two.position), (0, 1));
}

#[tokio::test]
async fn test_cached_items_for_templates() {
    let fetcher = StubFetcher::default().with("https://x/rss.xml", &rss(TWO_ITEMS));
    let (ingestor, _temp_dir) = ingestor(fetcher);

    let feeds = FeedList::parse("BBC|https://x/rss.xml");
    ingestor
        .ingest_all(&feeds, &FieldSpec::parse("title\nlink\nguid"))
        .await
        .unwrap();

    let cached = ingestor.get_cached("BBC", 50).unwrap();
    assert_eq!(cached.len(), 2);
    assert_eq!(cached[0].get("title"), Some("One"));
    assert_eq!(cached[1].get("title"), Some("Two"));
    assert_eq!(cached[0].get("description"), Some(""));
    assert_eq!(cached[0].get("guid"), Some("guid-1"));

    assert_eq!(ingestor.get_cached("BBC", 1).unwrap().len(), 1);
    assert!(ingestor.get_cached("Nobody", 50).unwrap().is_empty());

    let today = ingestor.todays_items().unwrap();
    assert_eq!(today.len(), 2);
}

#[tokio::test]
async fn test_live_fetch_bypasses_store() {
    let fetcher = StubFetcher::default().with("https://x/rss.xml", &rss(TWO_ITEMS));
    let (ingestor, _temp_dir) = ingestor(fetcher);
    let feeds = FeedList::parse("BBC|https://x/rss.xml");

    let items = ingestor
        .fetch_live(&feeds, Some("BBC"), &FieldSpec::parse("title\ncategory"))
        .await
        .unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].get("category"), Some("World, Politics"));
    assert_eq!(items[1].get("category"), Some(""));
    assert_eq!(ingestor.store().count_by_feed("BBC").unwrap(), 0);

    // a literal URL works without configuration
    let by_url = ingestor
        .fetch_live(&FeedList::default(), Some("https://x/rss.xml"), &FieldSpec::default())
        .await
        .unwrap();
    assert_eq!(by_url.len(), 2);

    let unreachable = ingestor
        .fetch_live(&feeds, Some("https://down/rss"), &FieldSpec::default())
        .await;
    assert!(matches!(unreachable, Err(LiveError::Fetch(_))));
}

#[tokio::test]
async fn test_run_cleans_up_old_items() {
    let fetcher = StubFetcher::default().with("https://x/rss.xml", &rss(TWO_ITEMS));
    let (ingestor, _temp_dir) = ingestor(fetcher);

    let old = StoredItem::new("BBC", "https://x/rss.xml", "stale", Utc::now() - Duration::days(45));
    ingestor.store().insert(&old).unwrap();

    let feeds = FeedList::parse("BBC|https://x/rss.xml");
    let summary = ingestor.run(&feeds, &FieldSpec::default(), None).await.unwrap();

    assert_eq!(summary.report.totals.added, 2);
    assert_eq!(summary.purged, Some(1));
    assert!(ingestor.store().find_by_identity("BBC", "stale").unwrap().is_none());

    let disabled = ingestor.run(&feeds, &FieldSpec::default(), Some(0)).await.unwrap();
    assert_eq!(disabled.purged, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runs_sharing_locks_store_each_item_once() {
    let items: String = (0..20)
        .map(|i| format!("<item><guid>g-{}</guid><title>{}</title></item>", i, i))
        .collect();
    let mut fetcher = StubFetcher::default().with("https://x/rss.xml", &rss(&items));
    fetcher.delay_ms = 20;

    let temp_dir = TempDir::new().unwrap();
    let locks = FeedLocks::new();
    let feeds = Arc::new(FeedList::parse("BBC|https://x/rss.xml"));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = ItemStore::open(temp_dir.path()).unwrap();
            let ingestor = Ingestor::new(fetcher.clone(), store).with_locks(locks.clone());
            let feeds = Arc::clone(&feeds);
            tokio::spawn(async move {
                ingestor
                    .ingest_all(&feeds, &FieldSpec::default())
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut added = 0;
    let mut skipped = 0;
    for handle in handles {
        let report = handle.await.unwrap();
        added += report.totals.added;
        skipped += report.totals.skipped;
    }

    assert_eq!(added, 20);
    assert_eq!(skipped, 60);

    let store = ItemStore::open(temp_dir.path()).unwrap();
    assert_eq!(store.count_by_feed("BBC").unwrap(), 20);
}
