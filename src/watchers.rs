//! Watcher registry.
//!
//! A watcher wires one collection of the primary store to the search index:
//! where its documents go, which [`Transformer`] shapes them, whether
//! existing documents are backfilled at startup, and in which order
//! watchers are processed.
//!
//! ```text
//! ┌─────────────────────────── WatcherRegistry ───────────────────────────┐
//! │ priority 1   compendia ──▶ CompendiumTransformer ──▶ o2r / compendia │
//! │ priority 10  jobs      ──▶ JobTransformer        ──▶ o2r / jobs      │
//! └────────────────────────────────────┬──────────────────────────────────┘
//!                                      ▼
//!                                SyncEngine
//! ```
//!
//! The registry is built once at startup and never changes afterwards.

use std::sync::Arc;

use thiserror::Error;

use crate::config::Config;
use crate::transform::{CompendiumTransformer, JobTransformer, Transformer};
use crate::transform_log::TransformLog;

pub const COMPENDIA_PRIORITY: i32 = 1;
pub const JOBS_PRIORITY: i32 = 10;

#[derive(Clone)]
pub struct WatcherDescriptor {
    pub collection: String,
    pub index: String,
    /// Mapping type, for clusters that still have them.
    pub index_type: Option<String>,
    pub transformer: Arc<dyn Transformer>,
    pub backfill_existing: bool,
    /// Lower values are processed first.
    pub priority: i32,
}

impl std::fmt::Debug for WatcherDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherDescriptor")
            .field("collection", &self.collection)
            .field("index", &self.index)
            .field("index_type", &self.index_type)
            .field("transformer", &self.transformer.name())
            .field("backfill_existing", &self.backfill_existing)
            .field("priority", &self.priority)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("collection '{0}' has more than one watcher")]
    DuplicateCollection(String),
}

#[derive(Debug, Clone)]
pub struct WatcherRegistry {
    watchers: Vec<WatcherDescriptor>,
}

impl WatcherRegistry {
    /// Build a registry ordered by ascending priority. Watchers with equal
    /// priority keep the order they were given in.
    pub fn new(mut watchers: Vec<WatcherDescriptor>) -> Result<Self, RegistryError> {
        for (i, w) in watchers.iter().enumerate() {
            if watchers[..i].iter().any(|o| o.collection == w.collection) {
                return Err(RegistryError::DuplicateCollection(w.collection.clone()));
            }
        }
        watchers.sort_by_key(|w| w.priority);
        Ok(Self { watchers })
    }

    /// The compendia and jobs watchers described by the config.
    pub fn from_config(config: &Config, log: Arc<TransformLog>) -> Result<Self, RegistryError> {
        let es = &config.elasticsearch;
        Self::new(vec![
            WatcherDescriptor {
                collection: config.collections.compendia.clone(),
                index: es.index.clone(),
                index_type: es.types.compendia.clone(),
                transformer: Arc::new(CompendiumTransformer::from_config(config, log.clone())),
                backfill_existing: config.sync.fetch_existing.compendia,
                priority: COMPENDIA_PRIORITY,
            },
            WatcherDescriptor {
                collection: config.collections.jobs.clone(),
                index: es.index.clone(),
                index_type: es.types.jobs.clone(),
                transformer: Arc::new(JobTransformer::with_log(log)),
                backfill_existing: config.sync.fetch_existing.jobs,
                priority: JOBS_PRIORITY,
            },
        ])
    }

    /// All watchers, lowest priority value first.
    pub fn watchers(&self) -> &[WatcherDescriptor] {
        &self.watchers
    }

    pub fn find(&self, collection: &str) -> Option<&WatcherDescriptor> {
        self.watchers.iter().find(|w| w.collection == collection)
    }

    /// Watchers that backfill existing documents, in processing order.
    pub fn backfilling(&self) -> impl Iterator<Item = &WatcherDescriptor> {
        self.watchers.iter().filter(|w| w.backfill_existing)
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }
}

/// Print the registry as a table, in processing order.
pub fn list_watchers(registry: &WatcherRegistry) {
    println!(
        "{:<10} {:<16} {:<12} {:<12} {:<10} BACKFILL",
        "PRIORITY", "COLLECTION", "INDEX", "TYPE", "TRANSFORM"
    );
    for w in registry.watchers() {
        println!(
            "{:<10} {:<16} {:<12} {:<12} {:<10} {}",
            w.priority,
            w.collection,
            w.index,
            w.index_type.as_deref().unwrap_or("-"),
            w.transformer.name(),
            w.backfill_existing
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn descriptor(collection: &str, priority: i32) -> WatcherDescriptor {
        WatcherDescriptor {
            collection: collection.to_string(),
            index: "o2r".to_string(),
            index_type: None,
            transformer: Arc::new(JobTransformer::new()),
            backfill_existing: true,
            priority,
        }
    }

    #[test]
    fn orders_by_ascending_priority() {
        let registry = WatcherRegistry::new(vec![
            descriptor("jobs", 10),
            descriptor("compendia", 1),
            descriptor("users", 5),
        ])
        .unwrap();

        let order: Vec<&str> = registry
            .watchers()
            .iter()
            .map(|w| w.collection.as_str())
            .collect();
        assert_eq!(order, vec!["compendia", "users", "jobs"]);
    }

    #[test]
    fn rejects_duplicate_collections() {
        let err = WatcherRegistry::new(vec![descriptor("jobs", 1), descriptor("jobs", 2)])
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateCollection(c) if c == "jobs"));
    }

    #[test]
    fn builds_from_config() {
        let config = parse_config(
            "[sync.fetch_existing]\njobs = false\n[elasticsearch.types]\njobs = \"jobs\"",
        )
        .unwrap();
        let registry =
            WatcherRegistry::from_config(&config, Arc::new(TransformLog::new(5))).unwrap();

        assert_eq!(registry.len(), 2);
        let compendia = registry.find("compendia").unwrap();
        assert_eq!(compendia.transformer.name(), "compendium");
        assert_eq!(compendia.priority, COMPENDIA_PRIORITY);

        let jobs = registry.find("jobs").unwrap();
        assert_eq!(jobs.transformer.name(), "job");
        assert_eq!(jobs.index_type.as_deref(), Some("jobs"));

        let backfilling: Vec<&str> = registry.backfilling().map(|w| w.collection.as_str()).collect();
        assert_eq!(backfilling, vec!["compendia"]);
    }
}
