//! Sync engine: applies store changes to the search index.
//!
//! The engine owns the watcher registry and a backend handle. For every
//! change it looks up the collection's watcher, runs the watcher's
//! transformer on the blocking pool, and writes the result to the backend.
//! A transform failure skips the document; a backend write failure is
//! logged and counted. Neither stops the engine, so the document is picked
//! up again by its next change.
//!
//! ```text
//! ChangeSource ──▶ SyncEngine::apply ──▶ Transformer ──▶ SearchBackend
//!                        │                    │
//!                        │                    └──▶ TransformLog
//!                        └── deletes go straight to the backend
//! ```

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::backend::SearchBackend;
use crate::changes::ChangeSource;
use crate::models::{ChangeEvent, RawDocument, TransformLogEntry};
use crate::transform::TransformError;
use crate::transform_log::TransformLog;
use crate::watchers::{WatcherDescriptor, WatcherRegistry};

/// What [`SyncEngine::apply`] did with one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Transformed and written under this id.
    Indexed(String),
    /// The transformer rejected the document; nothing was written.
    Skipped(String),
    /// Removed the document with this id.
    Deleted(String),
    /// No watcher for the collection.
    Ignored,
    /// The backend refused the write.
    WriteFailed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub indexed: u64,
    pub skipped: u64,
    pub deleted: u64,
    pub ignored: u64,
    pub failed: u64,
}

impl SyncStats {
    pub fn record(&mut self, outcome: &ApplyOutcome) {
        match outcome {
            ApplyOutcome::Indexed(_) => self.indexed += 1,
            ApplyOutcome::Skipped(_) => self.skipped += 1,
            ApplyOutcome::Deleted(_) => self.deleted += 1,
            ApplyOutcome::Ignored => self.ignored += 1,
            ApplyOutcome::WriteFailed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.indexed + self.skipped + self.deleted + self.ignored + self.failed
    }
}

pub struct SyncEngine {
    backend: Arc<dyn SearchBackend>,
    watchers: WatcherRegistry,
    log: Option<Arc<TransformLog>>,
}

impl SyncEngine {
    pub fn new(backend: Arc<dyn SearchBackend>, watchers: WatcherRegistry) -> Self {
        Self {
            backend,
            watchers,
            log: None,
        }
    }

    /// Record transforms that panic in `log`; transformers cannot record
    /// those themselves.
    pub fn with_log(mut self, log: Arc<TransformLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn watchers(&self) -> &WatcherRegistry {
        &self.watchers
    }

    /// Index every existing document of each backfilling watcher, lowest
    /// priority value first.
    pub async fn backfill(&self, source: &mut dyn ChangeSource) -> Result<SyncStats> {
        let mut stats = SyncStats::default();

        for watcher in self.watchers.backfilling() {
            let docs = source.existing(&watcher.collection).await?;
            info!(
                collection = %watcher.collection,
                count = docs.len(),
                "backfilling existing documents"
            );
            for doc in docs {
                let outcome = self.upsert(watcher, doc).await;
                stats.record(&outcome);
            }
        }

        Ok(stats)
    }

    /// Apply one change.
    pub async fn apply(&self, event: ChangeEvent) -> ApplyOutcome {
        let Some(watcher) = self.watchers.find(event.collection()) else {
            debug!(collection = event.collection(), "no watcher for collection");
            return ApplyOutcome::Ignored;
        };

        match event {
            ChangeEvent::Insert { document, .. } | ChangeEvent::Update { document, .. } => {
                self.upsert(watcher, document).await
            }
            ChangeEvent::Delete { id, .. } => {
                match self
                    .backend
                    .delete_document(&watcher.index, watcher.index_type.as_deref(), &id)
                    .await
                {
                    Ok(()) => {
                        debug!(collection = %watcher.collection, %id, "deleted document");
                        ApplyOutcome::Deleted(id)
                    }
                    Err(e) => {
                        warn!(collection = %watcher.collection, %id, error = %e, "failed to delete document");
                        ApplyOutcome::WriteFailed(id)
                    }
                }
            }
        }
    }

    /// Backfill, then apply changes until the feed ends.
    pub async fn run(&self, source: &mut dyn ChangeSource) -> Result<SyncStats> {
        info!(
            watchers = self.watchers.len(),
            backend = self.backend.location(),
            "starting sync"
        );

        let mut stats = self.backfill(source).await?;
        info!(?stats, "backfill finished");

        while let Some(event) = source.next_change().await? {
            let outcome = self.apply(event).await;
            stats.record(&outcome);
        }

        info!(?stats, "change feed ended");
        Ok(stats)
    }

    async fn upsert(&self, watcher: &WatcherDescriptor, raw: RawDocument) -> ApplyOutcome {
        let transformer = watcher.transformer.clone();
        let external = raw.external_id().unwrap_or_default().to_string();

        let transformed = tokio::task::spawn_blocking(move || transformer.transform(raw)).await;
        let doc = match transformed {
            Ok(Ok(doc)) => doc,
            Ok(Err(e)) => return skipped(watcher, external, &e),
            Err(join) => {
                warn!(collection = %watcher.collection, document = %external, error = %join, "transform task failed");
                if let Some(log) = &self.log {
                    log.append(TransformLogEntry::error(
                        &external,
                        format!("transform failed: {}", join),
                    ));
                }
                return ApplyOutcome::Skipped(external);
            }
        };

        let Some(id) = doc.id().map(str::to_string) else {
            warn!(collection = %watcher.collection, document = %external, "transformed document has no id");
            return ApplyOutcome::Skipped(external);
        };

        match self
            .backend
            .index_document(&watcher.index, watcher.index_type.as_deref(), &id, &doc)
            .await
        {
            Ok(()) => {
                debug!(collection = %watcher.collection, %id, "indexed document");
                ApplyOutcome::Indexed(id)
            }
            Err(e) => {
                warn!(collection = %watcher.collection, %id, error = %e, "failed to index document");
                ApplyOutcome::WriteFailed(id)
            }
        }
    }
}

fn skipped(watcher: &WatcherDescriptor, external: String, error: &TransformError) -> ApplyOutcome {
    debug!(
        collection = %watcher.collection,
        document = %external,
        %error,
        "transform failed, document not indexed"
    );
    ApplyOutcome::Skipped(external)
}
