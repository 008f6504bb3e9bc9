use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// Name given to the feed configured through the legacy single-URL setting
pub const LEGACY_FEED_NAME: &str = "Default Feed";

pub const DEFAULT_FIELDS: &str = "title\nlink\ndescription\ncategory\npubDate\nmedia";

pub const DEFAULT_TEMPLATE: &str = r##"<mj-section background-color="#ffffff" padding-top="25px" padding-bottom="0">
  <mj-column width="100%">
    <mj-image src="{media}" alt="{title}" padding-top="0" padding-bottom="20px"></mj-image>
    <mj-text font-size="20px" line-height="1.5" font-weight="500"><p>{title}</p></mj-text>
    <mj-text font-size="16px" line-height="1.5" font-weight="300" align="justify"><p>{description}</p></mj-text>
    <mj-button background-color="#486AE2" color="#FFFFFF" href="{link}">READ MORE</mj-button>
    <mj-text color="#666666" font-size="12px"><p>{category} - {pubDate}</p></mj-text>
  </mj-column>
</mj-section>"##;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
}

/// Configured feeds in configuration order, unique by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedList {
    feeds: Vec<FeedConfig>,
}

impl FeedList {
    /// Parses `Name|URL` lines. Lines without a separator or with an empty
    /// side are dropped; the first entry for a name wins.
    pub fn parse(text: &str) -> Self {
        let mut list = FeedList::default();

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let Some((name, url)) = line.split_once('|') else {
                continue;
            };
            let (name, url) = (name.trim(), url.trim());
            if name.is_empty() || url.is_empty() || list.get(name).is_some() {
                continue;
            }
            list.feeds.push(FeedConfig {
                name: name.to_string(),
                url: url.to_string(),
            });
        }

        list
    }

    /// Multi-feed text first; the legacy single URL only when that yields nothing.
    pub fn from_settings(feeds: Option<&str>, legacy_url: Option<&str>) -> Self {
        let list = feeds.map(FeedList::parse).unwrap_or_default();
        if !list.is_empty() {
            return list;
        }

        match legacy_url.map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => FeedList {
                feeds: vec![FeedConfig {
                    name: LEGACY_FEED_NAME.to_string(),
                    url: url.to_string(),
                }],
            },
            None => list,
        }
    }

    pub fn get(&self, name: &str) -> Option<&FeedConfig> {
        self.feeds.iter().find(|f| f.name == name)
    }

    pub fn first(&self) -> Option<&FeedConfig> {
        self.feeds.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeedConfig> {
        self.feeds.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.feeds.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}

/// Ordered set of field names to pull out of each item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    fields: Vec<String>,
}

impl FieldSpec {
    pub fn parse(text: &str) -> Self {
        let mut fields: Vec<String> = Vec::new();
        for name in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if !fields.iter().any(|f| f == name) {
                fields.push(name.to_string());
            }
        }
        Self { fields }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Default for FieldSpec {
    fn default() -> Self {
        FieldSpec::parse(DEFAULT_FIELDS)
    }
}

/// Lists the `{name}` placeholders of a template, in order of first use.
pub fn template_tokens(template: &str) -> Result<Vec<String>> {
    let token = Regex::new(r"\{([A-Za-z_][A-Za-z0-9_:\-]*)\}")?;
    let mut tokens: Vec<String> = Vec::new();
    for cap in token.captures_iter(template) {
        let name = &cap[1];
        if !tokens.iter().any(|t| t == name) {
            tokens.push(name.to_string());
        }
    }
    Ok(tokens)
}

/// Resolves the data directory.
/// `RSS_IMPORT_DATA_DIR` wins, then `$XDG_DATA_HOME/rss-import`,
/// then `~/.local/share/rss-import`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("RSS_IMPORT_DATA_DIR") {
        return PathBuf::from(shellexpand::tilde(&dir).into_owned());
    }
    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg_data).join("rss-import");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".local/share/rss-import")
}

/// Plain-text settings kept under `<data dir>/state`.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub rss_feeds: Option<String>,
    pub rss_url: Option<String>,
    pub rss_fields: Option<String>,
    pub html_template: Option<String>,
}

const FEEDS_FILE: &str = "feeds.txt";
const LEGACY_URL_FILE: &str = "feed_url.txt";
const FIELDS_FILE: &str = "fields.txt";
const TEMPLATE_FILE: &str = "template.html";

impl Settings {
    pub fn load(state_dir: &Path) -> Result<Self> {
        Ok(Self {
            rss_feeds: read_optional(&state_dir.join(FEEDS_FILE))?,
            rss_url: read_optional(&state_dir.join(LEGACY_URL_FILE))?,
            rss_fields: read_optional(&state_dir.join(FIELDS_FILE))?,
            html_template: read_optional(&state_dir.join(TEMPLATE_FILE))?,
        })
    }

    pub fn store_feeds(state_dir: &Path, text: &str) -> Result<()> {
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(FEEDS_FILE);
        fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn feeds(&self) -> FeedList {
        FeedList::from_settings(self.rss_feeds.as_deref(), self.rss_url.as_deref())
    }

    pub fn fields(&self) -> FieldSpec {
        match self.rss_fields.as_deref().map(FieldSpec::parse) {
            Some(spec) if !spec.is_empty() => spec,
            _ => FieldSpec::default(),
        }
    }

    pub fn template(&self) -> &str {
        self.html_template.as_deref().unwrap_or(DEFAULT_TEMPLATE)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
    Ok(Some(content).filter(|c| !c.trim().is_empty()))
}
