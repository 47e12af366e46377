//! Document transformers.
//!
//! Every watcher is bound to one [`Transformer`]. Both implementations start
//! by re-keying the raw document so that the index identity matches the
//! primary store's internal key:
//!
//! ```text
//! raw:   { "_id": "5a0e…", "id": "abc12", "__v": 0, "metadata": {…} }
//! index: { "id": "5a0e…", "metadata": {…}, "compendium_id": "abc12" }
//! ```
//!
//! The compendium transformer then attaches the compendium's file listing
//! (`files`) and the inlined contents of its text files (`texts`), and
//! records the outcome in the shared [`TransformLog`].

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::{
    stringify_id, IndexDocument, RawDocument, TransformLogEntry, ID_FIELD, INTERNAL_ID_FIELD,
    REVISION_FIELD, SCHEMA_VERSION_FIELD,
};
use crate::transform_log::TransformLog;
use crate::tree::{build_tree, read_text_files, rewrite_paths};

/// Output field holding the API-addressable file tree.
pub const FILES_FIELD: &str = "files";
/// Output field holding the flattened text file contents.
pub const TEXTS_FIELD: &str = "texts";

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("document has no `{0}` field")]
    MissingField(&'static str),

    #[error("invalid identifier {0:?}")]
    InvalidIdentifier(String),

    #[error("storage directory {} does not exist", .0.display())]
    MissingDirectory(PathBuf),

    #[error("reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("encoding file listing: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Turns a raw stored document into an index-ready document.
///
/// Implementations must be safe to call concurrently for different
/// documents. Calls may block on filesystem reads; the sync engine runs them
/// on the blocking pool.
pub trait Transformer: Send + Sync {
    /// Short name for logs and the watcher listing.
    fn name(&self) -> &str;

    fn transform(&self, raw: RawDocument) -> Result<IndexDocument, TransformError>;
}

/// Move `id` to `secondary_field`, put the stringified internal identifier
/// in `id`, and drop the store's bookkeeping fields. Every other field is
/// carried over untouched and in order.
pub fn rekey(raw: RawDocument, secondary_field: &str) -> Result<IndexDocument, TransformError> {
    let mut fields = raw.into_inner();

    let external = fields
        .get(ID_FIELD)
        .cloned()
        .ok_or(TransformError::MissingField(ID_FIELD))?;
    let internal = match fields.get(INTERNAL_ID_FIELD) {
        None => return Err(TransformError::MissingField(INTERNAL_ID_FIELD)),
        Some(value) => {
            stringify_id(value).ok_or_else(|| TransformError::InvalidIdentifier(value.to_string()))?
        }
    };

    fields.insert(ID_FIELD.to_string(), Value::String(internal));
    fields.shift_remove(INTERNAL_ID_FIELD);
    fields.shift_remove(SCHEMA_VERSION_FIELD);
    fields.shift_remove(REVISION_FIELD);
    fields.insert(secondary_field.to_string(), external);

    Ok(IndexDocument(fields))
}

// ============ Job ============

/// Re-keys job documents. Never touches the filesystem.
#[derive(Debug, Default, Clone)]
pub struct JobTransformer {
    log: Option<Arc<TransformLog>>,
}

impl JobTransformer {
    pub const SECONDARY_ID_FIELD: &'static str = "job_id";

    pub fn new() -> Self {
        Self::default()
    }

    /// Record every outcome in `log`, like compendium transforms do.
    pub fn with_log(log: Arc<TransformLog>) -> Self {
        Self { log: Some(log) }
    }
}

impl Transformer for JobTransformer {
    fn name(&self) -> &str {
        "job"
    }

    fn transform(&self, raw: RawDocument) -> Result<IndexDocument, TransformError> {
        let id = raw.external_id().unwrap_or("<no id>").to_string();
        debug!(job = %id, "transforming job");

        let result = rekey(raw, Self::SECONDARY_ID_FIELD);
        if let Some(log) = &self.log {
            record(log, &id, &result);
        }
        match &result {
            Ok(doc) => debug!(job = ?doc.id(), "transformed job"),
            Err(e) => warn!(job = %id, error = %e, "error while transforming job"),
        }
        result
    }
}

fn record(log: &TransformLog, id: &str, result: &Result<IndexDocument, TransformError>) {
    log.append(match result {
        Ok(_) => TransformLogEntry::success(id),
        Err(e) => TransformLogEntry::error(id, e.to_string()),
    });
}

// ============ Compendium ============

/// Re-keys compendium documents and attaches their file tree and text
/// contents read from `<storage_root>/<id>`.
pub struct CompendiumTransformer {
    storage_root: PathBuf,
    id_length: usize,
    api_prefix: String,
    log: Arc<TransformLog>,
}

impl CompendiumTransformer {
    pub const SECONDARY_ID_FIELD: &'static str = "compendium_id";

    pub fn new(
        storage_root: impl Into<PathBuf>,
        id_length: usize,
        api_prefix: impl Into<String>,
        log: Arc<TransformLog>,
    ) -> Self {
        let api_prefix: String = api_prefix.into();
        Self {
            storage_root: storage_root.into(),
            id_length,
            api_prefix: api_prefix.trim_end_matches('/').to_string(),
            log,
        }
    }

    pub fn from_config(config: &Config, log: Arc<TransformLog>) -> Self {
        Self::new(
            config.fs.compendium.clone(),
            config.fs.id_length,
            config.api.prefix.clone(),
            log,
        )
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// API path under which the files of compendium `id` are served.
    pub fn data_prefix(&self, id: &str) -> String {
        format!("{}/{}/data", self.api_prefix, id)
    }

    fn compendium_dir(&self, id: &str) -> Result<PathBuf, TransformError> {
        let is_plain_segment = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\'])
            && Path::new(id).is_relative();
        if !is_plain_segment {
            return Err(TransformError::InvalidIdentifier(id.to_string()));
        }
        if self.id_length > 0 && id.chars().count() != self.id_length {
            debug!(
                compendium = id,
                expected = self.id_length,
                "compendium id has unexpected length"
            );
        }
        Ok(self.storage_root.join(id))
    }

    fn transform_inner(&self, raw: RawDocument) -> Result<IndexDocument, TransformError> {
        let id = raw
            .external_id()
            .ok_or(TransformError::MissingField(ID_FIELD))?
            .to_string();
        let mut doc = rekey(raw, Self::SECONDARY_ID_FIELD)?;

        let dir = self.compendium_dir(&id)?;
        match std::fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(TransformError::MissingDirectory(dir)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TransformError::MissingDirectory(dir))
            }
            Err(source) => return Err(TransformError::Io { path: dir, source }),
        }

        let tree = build_tree(&dir).map_err(|source| TransformError::Io {
            path: dir.clone(),
            source,
        })?;

        let files = rewrite_paths(&tree, &dir, &self.data_prefix(&id));
        doc.insert(FILES_FIELD, serde_json::to_value(&files)?);

        let texts = read_text_files(&tree, &dir).map_err(|e| TransformError::Io {
            path: e.path,
            source: e.source,
        })?;
        doc.insert(TEXTS_FIELD, serde_json::to_value(&texts)?);

        Ok(doc)
    }
}

impl Transformer for CompendiumTransformer {
    fn name(&self) -> &str {
        "compendium"
    }

    fn transform(&self, raw: RawDocument) -> Result<IndexDocument, TransformError> {
        let id = raw.external_id().unwrap_or("<no id>").to_string();
        debug!(compendium = %id, "transforming compendium");

        let result = self.transform_inner(raw);
        record(&self.log, &id, &result);
        match &result {
            Ok(_) => info!(compendium = %id, "transformed compendium"),
            Err(e) => warn!(compendium = %id, error = %e, "error while transforming compendium"),
        }
        result
    }
}
