//! Change feeds from the primary store.
//!
//! Tailing the store's operation log is left to an external change-capture
//! process; finder consumes what it emits through the [`ChangeSource`]
//! trait:
//!
//! - [`JsonLinesSource`] reads one change event per line from a file or
//!   standard input, and backfill snapshots from
//!   `<snapshot_dir>/<collection>.jsonl`.
//! - [`ChannelSource`] is fed in-process over a tokio channel.
//!
//! Event lines look like:
//!
//! ```text
//! {"op":"insert","collection":"compendia","document":{"_id":"5a0e…","id":"abc12",…}}
//! {"op":"update","collection":"jobs","document":{"_id":"5a0f…","id":"job01",…}}
//! {"op":"delete","collection":"jobs","id":"5a0f…"}
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::{ChangeEvent, RawDocument};

#[async_trait]
pub trait ChangeSource: Send {
    /// Every document currently in `collection`, for backfill.
    async fn existing(&mut self, collection: &str) -> Result<Vec<RawDocument>>;

    /// The next change, or `None` once the feed has ended.
    async fn next_change(&mut self) -> Result<Option<ChangeEvent>>;
}

// ============ JSON lines ============

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

pub struct JsonLinesSource {
    name: String,
    lines: Lines<BufReader<BoxedReader>>,
    line_no: u64,
    snapshot_dir: Option<PathBuf>,
}

impl JsonLinesSource {
    /// Open `feed` (`-` for standard input). Failing to open the feed means
    /// the primary store is unreachable, which callers treat as fatal.
    pub async fn open(feed: &str, snapshot_dir: Option<PathBuf>) -> Result<Self> {
        let reader: BoxedReader = if feed == "-" {
            Box::new(tokio::io::stdin())
        } else {
            let file = tokio::fs::File::open(feed)
                .await
                .with_context(|| format!("Failed to open change feed: {}", feed))?;
            Box::new(file)
        };

        if let Some(dir) = &snapshot_dir {
            if !dir.is_dir() {
                anyhow::bail!("Snapshot directory does not exist: {}", dir.display());
            }
        }

        Ok(Self::from_reader(feed, reader, snapshot_dir))
    }

    pub fn from_reader(name: &str, reader: BoxedReader, snapshot_dir: Option<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            lines: BufReader::new(reader).lines(),
            line_no: 0,
            snapshot_dir,
        }
    }
}

#[async_trait]
impl ChangeSource for JsonLinesSource {
    async fn existing(&mut self, collection: &str) -> Result<Vec<RawDocument>> {
        let Some(dir) = &self.snapshot_dir else {
            return Ok(Vec::new());
        };
        let path = dir.join(format!("{}.jsonl", collection));
        if !path.exists() {
            debug!(collection, path = %path.display(), "no snapshot for collection");
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;

        let mut docs = Vec::new();
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line).ok().and_then(RawDocument::from_value) {
                Some(doc) => docs.push(doc),
                None => warn!(
                    path = %path.display(),
                    line = i + 1,
                    "skipping snapshot line that is not a JSON object"
                ),
            }
        }
        Ok(docs)
    }

    async fn next_change(&mut self) -> Result<Option<ChangeEvent>> {
        loop {
            let Some(line) = self
                .lines
                .next_line()
                .await
                .with_context(|| format!("Failed to read change feed: {}", self.name))?
            else {
                return Ok(None);
            };
            self.line_no += 1;

            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ChangeEvent>(&line) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => warn!(
                    feed = %self.name,
                    line = self.line_no,
                    error = %e,
                    "skipping malformed change event"
                ),
            }
        }
    }
}

// ============ Channel ============

/// Change source fed over a tokio channel. The feed ends when every sender
/// has been dropped.
pub struct ChannelSource {
    rx: mpsc::Receiver<ChangeEvent>,
    existing: HashMap<String, Vec<RawDocument>>,
}

/// Create a channel-backed source and the sender feeding it.
pub fn channel(buffer: usize) -> (mpsc::Sender<ChangeEvent>, ChannelSource) {
    let (tx, rx) = mpsc::channel(buffer);
    (
        tx,
        ChannelSource {
            rx,
            existing: HashMap::new(),
        },
    )
}

impl ChannelSource {
    /// Documents returned by [`ChangeSource::existing`] for `collection`.
    pub fn with_existing(mut self, collection: &str, docs: Vec<RawDocument>) -> Self {
        self.existing.insert(collection.to_string(), docs);
        self
    }
}

#[async_trait]
impl ChangeSource for ChannelSource {
    async fn existing(&mut self, collection: &str) -> Result<Vec<RawDocument>> {
        Ok(self.existing.get(collection).cloned().unwrap_or_default())
    }

    async fn next_change(&mut self) -> Result<Option<ChangeEvent>> {
        Ok(self.rx.recv().await)
    }
}
