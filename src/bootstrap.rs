//! Startup index bootstrap.
//!
//! Runs once before any document is synced:
//!
//! 1. check whether the index exists;
//! 2. delete it if it exists and `delete_existing` is set, otherwise keep it;
//! 3. create it if it was deleted or never existed;
//! 4. apply the mapping if `apply_mapping` is set and step 3 created the index.
//!
//! The first failing step aborts the sequence. Failures are fatal for the
//! process and are not retried; an unreachable backend is the business of
//! [`crate::gate`], which runs after this.

use std::fmt;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::backend::{BackendError, SearchBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStep {
    CheckExists,
    Delete,
    Create,
    PutMapping,
}

impl fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            BootstrapStep::CheckExists => "checking index",
            BootstrapStep::Delete => "deleting index",
            BootstrapStep::Create => "creating index",
            BootstrapStep::PutMapping => "putting mapping",
        };
        f.write_str(step)
    }
}

#[derive(Debug, Error)]
#[error("{step} '{index}' failed: {source}")]
pub struct BootstrapError {
    pub step: BootstrapStep,
    pub index: String,
    #[source]
    pub source: BackendError,
}

/// What the bootstrap did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootstrapReport {
    pub existed: bool,
    pub deleted: bool,
    pub created: bool,
    pub mapping_applied: bool,
}

pub struct BootstrapOptions<'a> {
    pub index: &'a str,
    pub mapping: &'a Value,
    /// Mapping type for clusters that still have them.
    pub mapping_type: Option<&'a str>,
    pub delete_existing: bool,
    pub apply_mapping: bool,
}

pub async fn bootstrap(
    backend: &dyn SearchBackend,
    options: BootstrapOptions<'_>,
) -> Result<BootstrapReport, BootstrapError> {
    let index = options.index;
    let fail = |step: BootstrapStep| {
        move |source: BackendError| BootstrapError {
            step,
            index: index.to_string(),
            source,
        }
    };

    let mut report = BootstrapReport {
        existed: backend
            .index_exists(index)
            .await
            .map_err(fail(BootstrapStep::CheckExists))?,
        ..Default::default()
    };

    if report.existed {
        if options.delete_existing {
            info!(index, "index already exists, deleting it");
            backend
                .delete_index(index)
                .await
                .map_err(fail(BootstrapStep::Delete))?;
            report.deleted = true;
        } else {
            info!(index, "index already exists, keeping it");
        }
    }

    if !report.existed || report.deleted {
        backend
            .create_index(index)
            .await
            .map_err(fail(BootstrapStep::Create))?;
        report.created = true;
        info!(index, "index (re)created");
    }

    if options.apply_mapping && report.created {
        backend
            .put_mapping(index, options.mapping_type, options.mapping)
            .await
            .map_err(fail(BootstrapStep::PutMapping))?;
        report.mapping_applied = true;
        info!(index, mapping_type = ?options.mapping_type, "mapping applied");
    } else {
        debug!(index, "mapping not applied");
    }

    Ok(report)
}
