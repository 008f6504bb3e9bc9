use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use rss_import::config::{self, Settings};
use rss_import::{FeedList, FieldSpec, HttpFetcher, Ingestor, ItemStore, DEFAULT_DAYS_TO_KEEP};

#[derive(Parser)]
#[command(name = "rss-import")]
#[command(about = "Fetch RSS feeds into a deduplicated item cache for email templates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every configured feed and store new items
    Fetch {
        /// Remove items older than this many days afterwards (0 disables)
        #[arg(long, default_value_t = DEFAULT_DAYS_TO_KEEP)]
        cleanup: u32,
    },
    /// Read a feed live, without caching, and print its items as JSON
    Live {
        /// Configured feed name or feed URL; defaults to the first feed
        #[arg(short, long)]
        feed: Option<String>,
    },
    /// Print stored items of a feed as JSON
    Cached {
        #[arg(short, long)]
        feed: Option<String>,
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
    /// List configured feeds, optionally replacing them from a `Name|URL` file
    Feeds {
        #[arg(long)]
        set: Option<PathBuf>,
    },
    /// Remove stored items older than the given number of days
    Cleanup {
        #[arg(short, long, default_value_t = DEFAULT_DAYS_TO_KEEP)]
        days: u32,
    },
    /// Print items fetched today across all feeds
    Today,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();

    let store = ItemStore::new().context("Failed to open item store")?;
    let settings = Settings::load(&store.state_dir())?;
    let feeds = settings.feeds();
    let fields = settings.fields();
    let fetcher = HttpFetcher::new().context("Failed to build HTTP client")?;
    let ingestor = Ingestor::new(fetcher, store);

    match cli.command {
        Commands::Fetch { cleanup } => {
            if feeds.is_empty() {
                println!("No RSS feeds configured");
                return Ok(());
            }
            warn_unfilled_tokens(&settings, &fields)?;

            let guard = RunGuard::acquire(&ingestor.store().state_dir())?;

            println!("Configured feeds:");
            for feed in feeds.iter() {
                println!("  - {}: {}", feed.name, feed.url);
            }

            let summary = ingestor.run(&feeds, &fields, Some(cleanup)).await?;
            drop(guard);
            let report = &summary.report;

            for outcome in &report.feeds {
                let result = &outcome.result;
                if result.success {
                    println!(
                        "  ✓ {}: {} added, {} skipped",
                        outcome.feed, result.items_added, result.items_skipped
                    );
                } else {
                    println!("  ✗ {}: {}", outcome.feed, result.message);
                }
            }
            println!("Total items added: {}", report.totals.added);
            println!("Total items skipped: {}", report.totals.skipped);
            if let Some(deleted) = summary.purged {
                println!("Removed {} items older than {} days", deleted, cleanup);
            }

            if report.has_errors() {
                eprintln!("Errors:");
                for outcome in report.errors() {
                    eprintln!("  - {}: {}", outcome.feed, outcome.result.message);
                }
                std::process::exit(1);
            }
        }
        Commands::Live { feed } => {
            let response = match ingestor.fetch_live(&feeds, feed.as_deref(), &fields).await {
                Ok(items) => json!({
                    "success": true,
                    "items": items,
                    "template": settings.template(),
                    "feedName": feed_name(&feeds, feed.as_deref()),
                }),
                Err(e) => json!({ "error": e.to_string() }),
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Cached { feed, limit } => {
            let Some(name) = feed_name(&feeds, feed.as_deref()) else {
                println!("{}", json!({ "error": "No RSS feed configured" }));
                return Ok(());
            };
            let items = ingestor.get_cached(&name, limit)?;
            let mut response = json!({
                "success": true,
                "items": items,
                "template": settings.template(),
                "feedName": name,
                "cached": true,
            });
            if items.is_empty() {
                response["message"] = json!("No cached items found for this feed");
            }
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Feeds { set } => {
            let feeds = match set {
                Some(path) => {
                    let text = fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    let parsed = FeedList::parse(&text);
                    Settings::store_feeds(&ingestor.store().state_dir(), &text)?;
                    parsed
                }
                None => feeds,
            };

            println!("{} RSS feeds configured:", feeds.len());
            for feed in feeds.iter() {
                println!("  - {}: {}", feed.name, feed.url);
            }
        }
        Commands::Cleanup { days } => {
            let deleted = ingestor.purge(days)?;
            println!("Removed {} items older than {} days", deleted, days);
        }
        Commands::Today => {
            let items = ingestor.todays_items()?;
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
    }

    Ok(())
}

/// The feed a live or cached read refers to; URLs have no name
fn feed_name(feeds: &FeedList, requested: Option<&str>) -> Option<String> {
    match requested {
        Some(name) => feeds.get(name).map(|f| f.name.clone()),
        None => feeds.first().map(|f| f.name.clone()),
    }
}

fn warn_unfilled_tokens(settings: &Settings, fields: &FieldSpec) -> Result<()> {
    for token in config::template_tokens(settings.template())? {
        if !fields.contains(&token) {
            tracing::warn!("Template token {{{}}} is not among the configured fields", token);
        }
    }
    Ok(())
}

/// Lock file held for the duration of an ingestion run, so a scheduled run
/// and a manual run cannot ingest at the same time.
struct RunGuard {
    path: PathBuf,
}

impl RunGuard {
    fn acquire(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join("ingest.lock");
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| {
                format!(
                    "Another ingestion run appears to be in progress (remove {} if it is stale)",
                    path.display()
                )
            })?;
        Ok(Self { path })
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_guard_is_exclusive() {
        let dir = TempDir::new().unwrap();

        let guard = RunGuard::acquire(dir.path()).unwrap();
        assert!(RunGuard::acquire(dir.path()).is_err());

        drop(guard);
        assert!(RunGuard::acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_feed_name() {
        let feeds = FeedList::parse("BBC|https://x\nTC|https://y");
        assert_eq!(feed_name(&feeds, None).as_deref(), Some("BBC"));
        assert_eq!(feed_name(&feeds, Some("TC")).as_deref(), Some("TC"));
        assert_eq!(feed_name(&feeds, Some("https://z")), None);
    }
}
