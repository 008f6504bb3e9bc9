use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A feed could not be retrieved.
///
/// The transport failure is kept for logging, but callers only ever see the
/// feed as unreachable: DNS, connection and HTTP status failures are not
/// distinguished.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unreachable: {url} ({detail})")]
    Unreachable { url: String, detail: String },
}

impl FetchError {
    pub fn reason(&self) -> &'static str {
        match self {
            FetchError::Unreachable { .. } => "unreachable",
        }
    }
}

/// One problem found while reading a feed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Byte offset into the document where the problem was detected
    pub position: u64,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at byte {}: {}", self.position, self.message)
    }
}

#[derive(Debug, Error)]
#[error("{}", join_diagnostics(.diagnostics))]
pub struct ParseError {
    pub diagnostics: Vec<Diagnostic>,
}

fn join_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stored item {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io { path: path.into(), source }
    }
}

/// Failure of an on-demand (non-cached) feed read.
#[derive(Debug, Error)]
pub enum LiveError {
    #[error("No RSS feed configured")]
    NoFeed,

    #[error("Unknown feed: {0}")]
    UnknownFeed(String),

    #[error("Failed to fetch RSS feed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Failed to parse RSS feed: {0}")]
    Parse(#[from] ParseError),
}
