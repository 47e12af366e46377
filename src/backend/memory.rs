//! In-memory [`SearchBackend`] for tests and dry runs.
//!
//! Keeps indices and documents in `HashMap`s behind `std::sync::Mutex`, and
//! records every call in order so tests can assert on exactly which
//! operations ran. Pings can be scripted to fail a number of times before
//! succeeding, and individual operations can be made to fail.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{BackendError, SearchBackend};
use crate::models::IndexDocument;

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Ping,
    IndexExists(String),
    DeleteIndex(String),
    CreateIndex(String),
    PutMapping {
        index: String,
        mapping_type: Option<String>,
    },
    IndexDocument {
        index: String,
        id: String,
    },
    DeleteDocument {
        index: String,
        id: String,
    },
    Info,
    IndexStats,
}

#[derive(Default)]
struct StoredIndex {
    mapping: Option<Value>,
    docs: BTreeMap<String, Value>,
}

pub struct InMemoryBackend {
    indices: Mutex<HashMap<String, StoredIndex>>,
    calls: Mutex<Vec<BackendCall>>,
    failing_pings: AtomicU32,
    failing_ops: Mutex<HashSet<&'static str>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            indices: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failing_pings: AtomicU32::new(0),
            failing_ops: Mutex::new(HashSet::new()),
        }
    }

    /// A backend that already holds `index`.
    pub fn with_index(index: &str) -> Self {
        let backend = Self::new();
        lock(&backend.indices).insert(index.to_string(), StoredIndex::default());
        backend
    }

    /// Make the next `n` pings fail. `u32::MAX` fails every ping.
    pub fn fail_pings(&self, n: u32) {
        self.failing_pings.store(n, Ordering::SeqCst);
    }

    /// Make every call of operation `op` fail. Names follow the trait
    /// methods (`"create_index"`, `"index_document"`, …).
    pub fn fail_operation(&self, op: &'static str) {
        lock(&self.failing_ops).insert(op);
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        lock(&self.calls).clone()
    }

    pub fn count_calls(&self, matches: impl Fn(&BackendCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|c| matches(c)).count()
    }

    pub fn has_index(&self, index: &str) -> bool {
        lock(&self.indices).contains_key(index)
    }

    pub fn mapping(&self, index: &str) -> Option<Value> {
        lock(&self.indices)
            .get(index)
            .and_then(|i| i.mapping.clone())
    }

    pub fn document(&self, index: &str, id: &str) -> Option<Value> {
        lock(&self.indices)
            .get(index)
            .and_then(|i| i.docs.get(id).cloned())
    }

    pub fn document_ids(&self, index: &str) -> Vec<String> {
        lock(&self.indices)
            .get(index)
            .map(|i| i.docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn record(&self, call: BackendCall) {
        lock(&self.calls).push(call);
    }

    fn check_op(&self, op: &'static str) -> Result<(), BackendError> {
        if lock(&self.failing_ops).contains(op) {
            return Err(BackendError::Unavailable(format!("{} failed", op)));
        }
        Ok(())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn missing_index(index: &str) -> BackendError {
    BackendError::Status {
        status: 404,
        body: format!("no such index [{}]", index),
    }
}

#[async_trait]
impl SearchBackend for InMemoryBackend {
    fn location(&self) -> &str {
        "memory://"
    }

    async fn ping(&self, _timeout: Duration) -> Result<(), BackendError> {
        self.record(BackendCall::Ping);
        let remaining = self.failing_pings.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.failing_pings.store(remaining - 1, Ordering::SeqCst);
            }
            return Err(BackendError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> Result<bool, BackendError> {
        self.record(BackendCall::IndexExists(index.to_string()));
        self.check_op("index_exists")?;
        Ok(self.has_index(index))
    }

    async fn delete_index(&self, index: &str) -> Result<(), BackendError> {
        self.record(BackendCall::DeleteIndex(index.to_string()));
        self.check_op("delete_index")?;
        lock(&self.indices)
            .remove(index)
            .map(|_| ())
            .ok_or_else(|| missing_index(index))
    }

    async fn create_index(&self, index: &str) -> Result<(), BackendError> {
        self.record(BackendCall::CreateIndex(index.to_string()));
        self.check_op("create_index")?;
        let mut indices = lock(&self.indices);
        if indices.contains_key(index) {
            return Err(BackendError::Status {
                status: 400,
                body: format!("index [{}] already exists", index),
            });
        }
        indices.insert(index.to_string(), StoredIndex::default());
        Ok(())
    }

    async fn put_mapping(
        &self,
        index: &str,
        mapping_type: Option<&str>,
        mapping: &Value,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::PutMapping {
            index: index.to_string(),
            mapping_type: mapping_type.map(str::to_string),
        });
        self.check_op("put_mapping")?;
        let mut indices = lock(&self.indices);
        let stored = indices.get_mut(index).ok_or_else(|| missing_index(index))?;
        stored.mapping = Some(mapping.clone());
        Ok(())
    }

    async fn index_document(
        &self,
        index: &str,
        _doc_type: Option<&str>,
        id: &str,
        doc: &IndexDocument,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::IndexDocument {
            index: index.to_string(),
            id: id.to_string(),
        });
        self.check_op("index_document")?;
        // Like Elasticsearch, writing to a missing index creates it.
        lock(&self.indices)
            .entry(index.to_string())
            .or_default()
            .docs
            .insert(id.to_string(), doc.as_value());
        Ok(())
    }

    async fn delete_document(
        &self,
        index: &str,
        _doc_type: Option<&str>,
        id: &str,
    ) -> Result<(), BackendError> {
        self.record(BackendCall::DeleteDocument {
            index: index.to_string(),
            id: id.to_string(),
        });
        self.check_op("delete_document")?;
        if let Some(stored) = lock(&self.indices).get_mut(index) {
            stored.docs.remove(id);
        }
        Ok(())
    }

    async fn info(&self) -> Result<Value, BackendError> {
        self.record(BackendCall::Info);
        self.check_op("info")?;
        Ok(json!({ "name": "memory", "version": { "number": env!("CARGO_PKG_VERSION") } }))
    }

    async fn index_stats(&self) -> Result<Value, BackendError> {
        self.record(BackendCall::IndexStats);
        self.check_op("index_stats")?;
        let indices = lock(&self.indices);
        let stats: serde_json::Map<String, Value> = indices
            .iter()
            .map(|(name, stored)| {
                (
                    name.clone(),
                    json!({ "primaries": { "docs": { "count": stored.docs.len() } } }),
                )
            })
            .collect();
        Ok(Value::Object(stats))
    }
}
